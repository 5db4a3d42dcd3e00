use std::sync::Arc;
use std::time::Duration;

use bollard::secret::ContainerStateStatusEnum;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::store::StoreError;
use crate::task::{valid_state_transition, Config, DockerClient, State, Task};

use super::stats::get_stats;
use super::types::{Worker, WorkerError};

const RUN_TICK: Duration = Duration::from_secs(10);
const INSPECT_TICK: Duration = Duration::from_secs(15);
const STATS_TICK: Duration = Duration::from_secs(15);

/// What the run loop should do with the task it pulled off the queue.
#[derive(Debug)]
pub enum TaskAction {
    Start(Task),
    Stop(Task),
}

impl Worker {
    /// Enqueues a task for the run loop. No validation happens here; the
    /// transition check runs when the task is dequeued.
    pub fn add_task(&mut self, task: Task) {
        self.queue.enqueue(task);
    }

    pub fn get_tasks(&self) -> Vec<Task> {
        match self.db.list() {
            Ok(tasks) => tasks,
            Err(err) => {
                error!(worker = %self.name, error = %err, "listing persisted tasks failed");
                Vec::new()
            }
        }
    }

    /// Pulls one task off the queue and decides how to drive it. A task
    /// with no persisted prior state is taken as authoritative and
    /// persisted before the transition check.
    pub fn next_action(&mut self) -> Result<Option<TaskAction>, WorkerError> {
        let Some(task) = self.queue.dequeue() else {
            return Ok(None);
        };

        let key = task.id.to_string();
        let persisted = match self.db.get(&key) {
            Ok(existing) => existing,
            Err(StoreError::NotFound(_)) => {
                self.db.put(&key, task.clone())?;
                task.clone()
            }
            Err(err) => return Err(err.into()),
        };

        if !valid_state_transition(persisted.state, task.state) {
            return Err(WorkerError::InvalidTransition {
                id: task.id,
                from: persisted.state,
                to: task.state,
            });
        }

        match task.state {
            State::Scheduled => Ok(Some(TaskAction::Start(task))),
            State::Completed => Ok(Some(TaskAction::Stop(task))),
            state => Err(WorkerError::UnexpectedState { id: task.id, state }),
        }
    }

    pub fn refresh_stats(&mut self) {
        self.sys.refresh_all();
        self.task_count = self.db.count().unwrap_or(0) as u64;
        self.stats = get_stats(&self.sys, self.task_count);
    }
}

/// Consumes the local queue: one dequeued task driven per tick.
pub async fn run_tasks(worker: Arc<Mutex<Worker>>) {
    loop {
        run_next_task(&worker).await;
        debug!("sleeping before checking the queue again");
        tokio::time::sleep(RUN_TICK).await;
    }
}

pub async fn run_next_task(worker: &Arc<Mutex<Worker>>) {
    let action = { worker.lock().await.next_action() };

    let result = match action {
        Ok(Some(TaskAction::Start(task))) => start_task(worker, task).await,
        Ok(Some(TaskAction::Stop(task))) => stop_task(worker, task).await,
        Ok(None) => {
            debug!("no task to run currently");
            return;
        }
        Err(err) => Err(err),
    };

    if let Err(err) = result {
        error!(error = %err, "error running task");
    }
}

/// Stamps the start time, runs the container, and persists Running with
/// the new container id, or Failed if the driver errored.
async fn start_task(worker: &Arc<Mutex<Worker>>, mut task: Task) -> Result<(), WorkerError> {
    task.start_time = Some(Utc::now());
    let config = Config::from_task(&task);

    let run_result = match DockerClient::new(config) {
        Ok(docker) => docker.run().await,
        Err(err) => Err(err),
    };

    match run_result {
        Ok(result) => {
            task.container_id = Some(result.container_id.clone());
            task.state = State::Running;
            let mut w = worker.lock().await;
            w.db.put(&task.id.to_string(), task.clone())?;
            info!(task_id = %task.id, container_id = %result.container_id, "task started");
            Ok(())
        }
        Err(err) => {
            task.state = State::Failed;
            let mut w = worker.lock().await;
            w.db.put(&task.id.to_string(), task.clone())?;
            Err(err.into())
        }
    }
}

/// Stops and removes the container, then persists Completed with the
/// finish time, or Failed if the driver errored.
async fn stop_task(worker: &Arc<Mutex<Worker>>, mut task: Task) -> Result<(), WorkerError> {
    let Some(container_id) = task.container_id.clone() else {
        return Err(WorkerError::MissingContainer(task.id));
    };

    let config = Config::from_task(&task);

    let stop_result = match DockerClient::new(config) {
        Ok(docker) => docker.stop(&container_id).await,
        Err(err) => Err(err),
    };

    match stop_result {
        Ok(_) => {
            task.finish_time = Some(Utc::now());
            task.state = State::Completed;
            let mut w = worker.lock().await;
            w.db.put(&task.id.to_string(), task.clone())?;
            info!(task_id = %task.id, %container_id, "stopped and removed container");
            Ok(())
        }
        Err(err) => {
            task.state = State::Failed;
            let mut w = worker.lock().await;
            w.db.put(&task.id.to_string(), task.clone())?;
            Err(err.into())
        }
    }
}

/// Reconciles persisted Running tasks against the engine every tick.
pub async fn update_tasks(worker: Arc<Mutex<Worker>>) {
    loop {
        debug!("checking status of running tasks");
        inspect_tasks(&worker).await;
        tokio::time::sleep(INSPECT_TICK).await;
    }
}

pub async fn inspect_tasks(worker: &Arc<Mutex<Worker>>) {
    let running: Vec<Task> = {
        worker
            .lock()
            .await
            .get_tasks()
            .into_iter()
            .filter(|t| t.state == State::Running)
            .collect()
    };

    for mut task in running {
        let Some(container_id) = task.container_id.clone() else {
            warn!(task_id = %task.id, "running task has no container id");
            continue;
        };

        let inspection = match DockerClient::new(Config::from_task(&task)) {
            Ok(docker) => docker.inspect(&container_id).await,
            Err(err) => Err(err),
        };

        match inspection {
            Ok(response) => {
                let status = response.state.as_ref().and_then(|s| s.status);
                if status == Some(ContainerStateStatusEnum::EXITED) {
                    warn!(task_id = %task.id, %container_id, "container is in non-running state");
                    task.state = State::Failed;
                }
                task.host_ports = response.network_settings.and_then(|n| n.ports);
            }
            Err(err) => {
                warn!(task_id = %task.id, error = %err, "inspecting container failed");
                task.state = State::Failed;
            }
        }

        let mut w = worker.lock().await;
        if let Err(err) = w.db.put(&task.id.to_string(), task.clone()) {
            error!(task_id = %task.id, error = %err, "persisting inspected task failed");
        }
    }
}

/// Refreshes the local stats snapshot every tick, stamped with the
/// current task count.
pub async fn collect_stats(worker: Arc<Mutex<Worker>>) {
    loop {
        debug!("collecting stats");
        worker.lock().await.refresh_stats();
        tokio::time::sleep(STATS_TICK).await;
    }
}
