pub mod docker;
pub mod state;
pub mod types;

pub use docker::{DockerClient, DockerError, DockerResult};
pub use state::valid_state_transition;
pub use types::{Config, State, Task, TaskEvent};
