pub mod api;
pub mod stats;
pub mod types;
pub mod worker;

pub use api::TaskServer;
pub use stats::get_stats;
pub use types::{ErrorResponse, SystemStats, Worker, WorkerError};
pub use worker::{
    collect_stats, inspect_tasks, run_next_task, run_tasks, update_tasks, TaskAction,
};
