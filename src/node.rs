use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;

use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::worker::SystemStats;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("unable to connect to {api}, permanent failure: {source}")]
    Transport { api: String, source: reqwest::Error },

    #[error("stats request to {api} returned {status}")]
    Status { api: String, status: StatusCode },

    #[error("error decoding stats from {api}: {source}")]
    Decode { api: String, source: reqwest::Error },
}

/// The manager's view of one worker: its address, role, last observed
/// stats, and resource totals derived from that snapshot (bytes).
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub api: String,
    pub role: String,
    pub cores: u64,
    pub memory: u64,
    pub memory_allocated: u64,
    pub disk: u64,
    pub disk_allocated: u64,
    pub task_count: u64,
    pub stats: Option<SystemStats>,
}

impl Node {
    pub fn new(name: &str, api: &str, role: &str) -> Self {
        Node {
            name: name.to_string(),
            api: api.to_string(),
            role: role.to_string(),
            cores: 0,
            memory: 0,
            memory_allocated: 0,
            disk: 0,
            disk_allocated: 0,
            task_count: 0,
            stats: None,
        }
    }

    /// Fetches the worker's stats endpoint with retries and updates this
    /// node's resource totals from the snapshot before returning it.
    pub async fn get_stats(&mut self) -> Result<SystemStats, NodeError> {
        let url = format!("{}/stats", self.api);

        let response = retry_with_backoff(RetryPolicy::default(), || {
            let url = url.clone();
            async move { reqwest::get(url).await }
        })
        .await
        .map_err(|source| NodeError::Transport {
            api: self.api.clone(),
            source,
        })?;

        if response.status() != StatusCode::OK {
            return Err(NodeError::Status {
                api: self.api.clone(),
                status: response.status(),
            });
        }

        let stats: SystemStats = response.json().await.map_err(|source| NodeError::Decode {
            api: self.api.clone(),
            source,
        })?;

        // Stats report MB; totals are tracked in bytes.
        self.memory = stats.total_memory * 1024 * 1024;
        self.disk = stats.disk_total * 1024 * 1024;
        self.cores = stats.total_cpus;
        self.stats = Some(stats.clone());

        debug!(node = %self.name, memory = self.memory, disk = self.disk, "node stats refreshed");
        Ok(stats)
    }
}
