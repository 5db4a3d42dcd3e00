pub mod api;
pub mod manager;
pub mod types;

pub use api::ManagerServer;
pub use manager::{
    check_health, do_health_checks, process_tasks, reconcile_tasks, restart_task, send_work,
    update_tasks,
};
pub use types::{Manager, ManagerError, WorkOrder};
