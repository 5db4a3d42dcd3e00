use std::collections::HashMap;
use std::fmt;

use bollard::secret::PortMap;
use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, Unexpected};
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

/// Phase of a task's lifecycle. Serialized on the wire as its numeric
/// discriminant so both sides agree on the ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Pending = 0,
    Scheduled = 1,
    Running = 2,
    Completed = 3,
    Failed = 4,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Pending => write!(f, "pending"),
            State::Scheduled => write!(f, "scheduled"),
            State::Running => write!(f, "running"),
            State::Completed => write!(f, "completed"),
            State::Failed => write!(f, "failed"),
        }
    }
}

impl Serialize for State {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for State {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(State::Pending),
            1 => Ok(State::Scheduled),
            2 => Ok(State::Running),
            3 => Ok(State::Completed),
            4 => Ok(State::Failed),
            other => Err(de::Error::invalid_value(
                Unexpected::Unsigned(other as u64),
                &"a task state between 0 and 4",
            )),
        }
    }
}

/// A unit of desired work, eventually realized as one container.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Task {
    pub id: Uuid,
    pub container_id: Option<String>,
    pub name: String,
    pub state: State,
    pub image: String,
    pub memory: i64,
    pub disk: i64,
    pub exposed_ports: Vec<String>,
    pub host_ports: Option<PortMap>,
    pub port_bindings: HashMap<String, String>,
    pub restart_policy: String,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
    pub health_check: Option<String>,
    pub restart_count: u32,
}

impl Default for Task {
    fn default() -> Self {
        Task {
            id: Uuid::new_v4(),
            container_id: None,
            name: String::new(),
            state: State::Pending,
            image: String::new(),
            memory: 0,
            disk: 0,
            exposed_ports: Vec::new(),
            host_ports: None,
            port_bindings: HashMap::new(),
            restart_policy: String::new(),
            start_time: None,
            finish_time: None,
            health_check: None,
            restart_count: 0,
        }
    }
}

/// A request to move a task into a new state. Events are the only way a
/// task enters or changes phase in the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskEvent {
    pub id: Uuid,
    pub state: State,
    pub timestamp: DateTime<Utc>,
    pub task: Task,
}

impl TaskEvent {
    pub fn new(state: State, task: Task) -> Self {
        TaskEvent {
            id: Uuid::new_v4(),
            state,
            timestamp: Utc::now(),
            task,
        }
    }
}

/// Container-driver configuration snapshotted from a task.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub name: String,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub exposed_ports: Vec<String>,
    pub port_bindings: HashMap<String, String>,
    pub cmd: Vec<String>,
    pub image: String,
    pub cpu: f64,
    pub memory: i64,
    pub disk: i64,
    pub env: Vec<String>,
    pub restart_policy: String,
}

impl Config {
    pub fn from_task(task: &Task) -> Self {
        Config {
            name: task.name.clone(),
            image: task.image.clone(),
            restart_policy: task.restart_policy.clone(),
            exposed_ports: task.exposed_ports.clone(),
            port_bindings: task.port_bindings.clone(),
            memory: task.memory,
            disk: task.disk,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_serializes_as_numeric_discriminant() {
        assert_eq!(serde_json::to_string(&State::Pending).unwrap(), "0");
        assert_eq!(serde_json::to_string(&State::Failed).unwrap(), "4");

        let state: State = serde_json::from_str("2").unwrap();
        assert_eq!(state, State::Running);

        assert!(serde_json::from_str::<State>("5").is_err());
        assert!(serde_json::from_str::<State>("\"running\"").is_err());
    }

    #[test]
    fn task_event_rejects_unknown_fields() {
        let task = Task::default();
        let event = TaskEvent::new(State::Scheduled, task);
        let mut value = serde_json::to_value(&event).unwrap();

        // Round-trips as-is.
        let decoded: TaskEvent = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(decoded.id, event.id);
        assert_eq!(decoded.state, State::Scheduled);

        value
            .as_object_mut()
            .unwrap()
            .insert("surprise".to_string(), serde_json::json!(true));
        assert!(serde_json::from_value::<TaskEvent>(value).is_err());
    }

    #[test]
    fn config_snapshots_task_bindings() {
        let task = Task {
            name: "web".to_string(),
            image: "nginx:latest".to_string(),
            restart_policy: "always".to_string(),
            exposed_ports: vec!["80/tcp".to_string()],
            port_bindings: HashMap::from([("80/tcp".to_string(), "8080".to_string())]),
            memory: 256 * 1024 * 1024,
            disk: 1,
            ..Default::default()
        };

        let config = Config::from_task(&task);
        assert_eq!(config.name, "web");
        assert_eq!(config.image, "nginx:latest");
        assert_eq!(config.restart_policy, "always");
        assert_eq!(config.exposed_ports, vec!["80/tcp".to_string()]);
        assert_eq!(config.port_bindings.get("80/tcp").unwrap(), "8080");
        assert_eq!(config.memory, 256 * 1024 * 1024);
    }
}
