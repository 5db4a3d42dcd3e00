use serde::{Deserialize, Serialize};
use sysinfo::System;
use thiserror::Error;
use uuid::Uuid;

use crate::queue::Queue;
use crate::store::{Store, StoreError, StoreKind};
use crate::task::{DockerError, State, Task};

use super::stats::get_stats;

/// A host-local runtime that owns the containers it was told to run.
pub struct Worker {
    pub name: String,
    pub queue: Queue<Task>,
    pub db: Box<dyn Store<Task> + Send>,
    pub task_count: u64,
    pub stats: SystemStats,
    pub(crate) sys: System,
}

impl Worker {
    pub fn new(name: &str, store: &StoreKind) -> Result<Self, StoreError> {
        let db = store.open::<Task>(&format!("{name}-tasks"))?;
        let mut sys = System::new_all();
        sys.refresh_all();
        let stats = get_stats(&sys, 0);

        Ok(Worker {
            name: name.to_string(),
            queue: Queue::new(),
            db,
            task_count: 0,
            stats,
            sys,
        })
    }
}

/// Resource snapshot a worker reports on its stats endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub cpu_usage: f32,
    pub total_memory: u64,
    pub used_memory: u64,
    pub total_swap: u64,
    pub used_swap: u64,
    pub system_name: String,
    pub hostname: String,
    pub total_cpus: u64,
    pub disk_total: u64,
    pub disk_usage: f32,
    pub task_count: u64,
}

/// Error body returned by the RPC surface on any non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status_code: u16,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("invalid state transition from {from} to {to} for task {id}")]
    InvalidTransition { id: Uuid, from: State, to: State },

    #[error("task {id} arrived in unexpected state {state}")]
    UnexpectedState { id: Uuid, state: State },

    #[error("task {0} has no container to stop")]
    MissingContainer(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Docker(#[from] DockerError),
}
