use std::collections::HashMap;

use thiserror::Error;
use uuid::Uuid;

use crate::node::Node;
use crate::queue::Queue;
use crate::scheduler::{Scheduler, SchedulerKind};
use crate::store::{Store, StoreError, StoreKind};
use crate::task::{Task, TaskEvent};

/// The coordinator: receives task events, assigns them to workers, and
/// reconciles worker state back into its own store.
pub struct Manager {
    pub pending: Queue<TaskEvent>,
    pub task_db: Box<dyn Store<Task> + Send>,
    pub event_db: Box<dyn Store<TaskEvent> + Send>,
    pub workers: Vec<String>,
    pub worker_task_map: HashMap<String, Vec<Uuid>>,
    pub task_worker_map: HashMap<Uuid, String>,
    pub worker_nodes: Vec<Node>,
    pub scheduler: Box<dyn Scheduler + Send>,
}

impl Manager {
    pub fn new(
        workers: Vec<String>,
        scheduler: SchedulerKind,
        store: &StoreKind,
    ) -> Result<Self, StoreError> {
        let mut worker_task_map = HashMap::new();
        let mut worker_nodes = Vec::new();
        for worker in &workers {
            worker_task_map.insert(worker.clone(), Vec::new());
            let api = format!("http://{worker}");
            worker_nodes.push(Node::new(worker, &api, "worker"));
        }

        Ok(Manager {
            pending: Queue::new(),
            task_db: store.open::<Task>("manager-tasks")?,
            event_db: store.open::<TaskEvent>("manager-events")?,
            workers,
            worker_task_map,
            task_worker_map: HashMap::new(),
            worker_nodes,
            scheduler: scheduler.build(),
        })
    }
}

/// What the dispatch loop decided to do with a dequeued event.
#[derive(Debug)]
pub enum WorkOrder {
    Dispatch { worker: String, event: TaskEvent },
    Stop { worker: String, task_id: Uuid },
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("no available candidates match resource request for task {0}")]
    NoCandidate(Uuid),

    #[error("error connecting to {url}: {source}")]
    Transport { url: String, source: reqwest::Error },

    #[error("error decoding response from {url}: {source}")]
    Decode { url: String, source: reqwest::Error },

    #[error("health check for task {id} returned status {status}")]
    Unhealthy { id: Uuid, status: u16 },

    #[error(transparent)]
    Store(#[from] StoreError),
}
