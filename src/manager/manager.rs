use std::sync::Arc;
use std::time::Duration;

use bollard::secret::PortMap;
use reqwest::StatusCode;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::node::Node;
use crate::task::{valid_state_transition, State, Task, TaskEvent};
use crate::worker::ErrorResponse;

use super::types::{Manager, ManagerError, WorkOrder};

const PROCESS_TICK: Duration = Duration::from_secs(10);
const RECONCILE_TICK: Duration = Duration::from_secs(15);
const HEALTH_TICK: Duration = Duration::from_secs(60);

const MAX_RESTARTS: u32 = 3;

impl Manager {
    /// Enqueues a task event on the pending queue. Validation happens at
    /// dispatch time, not here.
    pub fn add_task(&mut self, event: TaskEvent) {
        self.pending.enqueue(event);
    }

    pub fn get_tasks(&self) -> Vec<Task> {
        match self.task_db.list() {
            Ok(tasks) => tasks,
            Err(err) => {
                error!(error = %err, "listing persisted tasks failed");
                Vec::new()
            }
        }
    }

    pub fn select_worker(&mut self, task: &Task) -> Result<Node, ManagerError> {
        let candidates = self.scheduler.select_candidate_nodes(task, &self.worker_nodes);
        if candidates.is_empty() {
            return Err(ManagerError::NoCandidate(task.id));
        }

        let scores = self.scheduler.score(task, &candidates);
        self.scheduler
            .pick(&scores, &candidates)
            .ok_or(ManagerError::NoCandidate(task.id))
    }

    /// Dequeues one pending event, persists it, and routes it: a stop
    /// order for a known task, a dispatch to a freshly selected worker
    /// for an unknown one, or nothing when the event is invalid.
    pub fn route_next_event(&mut self) -> Option<WorkOrder> {
        let event = self.pending.dequeue()?;

        if let Err(err) = self.event_db.put(&event.id.to_string(), event.clone()) {
            error!(event_id = %event.id, error = %err, "persisting task event failed");
        }

        let task = event.task.clone();
        debug!(task_id = %task.id, state = %event.state, "pulled task event from the pending queue");

        if let Some(worker) = self.task_worker_map.get(&task.id).cloned() {
            let persisted = match self.task_db.get(&task.id.to_string()) {
                Ok(found) => found,
                Err(err) => {
                    error!(task_id = %task.id, error = %err, "assigned task is missing from the task store");
                    return None;
                }
            };

            if event.state == State::Completed
                && valid_state_transition(persisted.state, State::Completed)
            {
                return Some(WorkOrder::Stop {
                    worker,
                    task_id: task.id,
                });
            }

            warn!(
                task_id = %task.id,
                from = %persisted.state,
                to = %event.state,
                "invalid transition for an existing task, dropping event"
            );
            return None;
        }

        let node = match self.select_worker(&task) {
            Ok(node) => node,
            Err(err) => {
                warn!(task_id = %task.id, error = %err, "failed to select a worker");
                return None;
            }
        };

        self.worker_task_map
            .entry(node.name.clone())
            .or_default()
            .push(task.id);
        self.task_worker_map.insert(task.id, node.name.clone());
        self.charge_node(&node.name, &task);

        let mut scheduled = task;
        scheduled.state = State::Scheduled;
        if let Err(err) = self.task_db.put(&scheduled.id.to_string(), scheduled.clone()) {
            error!(task_id = %scheduled.id, error = %err, "persisting scheduled task failed");
            return None;
        }

        Some(WorkOrder::Dispatch {
            worker: node.name,
            event,
        })
    }

    /// Folds a worker-reported task into the locally persisted copy. The
    /// worker is authoritative for runtime fields; tasks the manager
    /// never created are skipped.
    pub fn merge_task_update(&mut self, incoming: Task) {
        let key = incoming.id.to_string();
        let mut local = match self.task_db.get(&key) {
            Ok(found) => found,
            Err(_) => {
                debug!(task_id = %incoming.id, "worker reported a task this manager did not create, skipping");
                return;
            }
        };

        if local.state != incoming.state {
            local.state = incoming.state;
        }
        local.start_time = incoming.start_time;
        local.finish_time = incoming.finish_time;
        local.container_id = incoming.container_id;
        local.host_ports = incoming.host_ports;

        if let Err(err) = self.task_db.put(&key, local) {
            error!(task_id = %incoming.id, error = %err, "persisting task update failed");
        }
    }

    fn charge_node(&mut self, name: &str, task: &Task) {
        if let Some(node) = self.worker_nodes.iter_mut().find(|n| n.name == name) {
            node.memory_allocated += task.memory.max(0) as u64;
            node.disk_allocated += task.disk.max(0) as u64;
            node.task_count += 1;
        }
    }
}

/// Dispatch loop: one pending event processed per tick.
pub async fn process_tasks(manager: Arc<Mutex<Manager>>) {
    loop {
        debug!("processing any tasks in the pending queue");
        send_work(&manager).await;
        tokio::time::sleep(PROCESS_TICK).await;
    }
}

pub async fn send_work(manager: &Arc<Mutex<Manager>>) {
    let order = { manager.lock().await.route_next_event() };

    match order {
        Some(WorkOrder::Dispatch { worker, event }) => {
            if let Err(err) = post_task_event(manager, &worker, event).await {
                error!(%worker, error = %err, "dispatching task event failed");
            }
        }
        Some(WorkOrder::Stop { worker, task_id }) => {
            info!(%task_id, %worker, "stopping task");
            stop_remote_task(&worker, task_id).await;
        }
        None => {}
    }
}

/// Posts a task event to a worker's start endpoint. A transport failure
/// re-enqueues the event on pending; a rejection is decoded and logged.
async fn post_task_event(
    manager: &Arc<Mutex<Manager>>,
    worker: &str,
    event: TaskEvent,
) -> Result<(), ManagerError> {
    let url = format!("http://{worker}/task");

    let response = match reqwest::Client::new().post(&url).json(&event).send().await {
        Ok(response) => response,
        Err(source) => {
            manager.lock().await.pending.enqueue(event);
            return Err(ManagerError::Transport { url, source });
        }
    };

    if response.status() != StatusCode::CREATED {
        let body: ErrorResponse = response
            .json()
            .await
            .map_err(|source| ManagerError::Decode {
                url: url.clone(),
                source,
            })?;
        error!(status = body.status_code, message = %body.message, "worker rejected task event");
        return Ok(());
    }

    let task: Task = response
        .json()
        .await
        .map_err(|source| ManagerError::Decode { url, source })?;
    info!(task_id = %task.id, state = %task.state, %worker, "worker accepted task");
    Ok(())
}

async fn stop_remote_task(worker: &str, task_id: Uuid) {
    let url = format!("http://{worker}/task/{task_id}");

    let response = match reqwest::Client::new().delete(&url).send().await {
        Ok(response) => response,
        Err(err) => {
            error!(%url, error = %err, "error connecting to worker");
            return;
        }
    };

    if response.status() != StatusCode::NO_CONTENT {
        error!(%url, status = %response.status(), "unexpected response to stop request");
        return;
    }

    info!(%task_id, "task has been scheduled to be stopped");
}

/// Reconciliation loop: pulls each worker's task list and stats snapshot
/// and folds them into the manager's view.
pub async fn update_tasks(manager: Arc<Mutex<Manager>>) {
    loop {
        debug!("checking for task updates from workers");
        reconcile_tasks(&manager).await;
        tokio::time::sleep(RECONCILE_TICK).await;
    }
}

pub async fn reconcile_tasks(manager: &Arc<Mutex<Manager>>) {
    let workers = { manager.lock().await.workers.clone() };

    for worker in workers {
        debug!(%worker, "checking worker for task updates");
        let url = format!("http://{worker}/task");

        let response = match reqwest::get(&url).await {
            Ok(response) => response,
            Err(err) => {
                warn!(%worker, error = %err, "error connecting to worker, skipping this tick");
                continue;
            }
        };

        if response.status() != StatusCode::OK {
            warn!(%worker, status = %response.status(), "error requesting tasks from worker");
            continue;
        }

        let tasks: Vec<Task> = match response.json().await {
            Ok(tasks) => tasks,
            Err(err) => {
                warn!(%worker, error = %err, "error decoding task list");
                continue;
            }
        };

        {
            let mut m = manager.lock().await;
            for task in tasks {
                m.merge_task_update(task);
            }
        }

        refresh_node_stats(manager, &worker).await;
    }
}

/// Updates the node registry entry for one worker. The stats RPC runs on
/// a detached copy so the manager lock is not held across it.
async fn refresh_node_stats(manager: &Arc<Mutex<Manager>>, worker: &str) {
    let node = {
        manager
            .lock()
            .await
            .worker_nodes
            .iter()
            .find(|n| n.name == worker)
            .cloned()
    };

    let Some(mut node) = node else { return };

    match node.get_stats().await {
        Ok(_) => {
            let mut m = manager.lock().await;
            if let Some(slot) = m.worker_nodes.iter_mut().find(|n| n.name == worker) {
                // Allocations may have moved while the RPC was in flight;
                // keep the slot's accounting and take the fresh totals.
                node.memory_allocated = slot.memory_allocated;
                node.disk_allocated = slot.disk_allocated;
                node.task_count = slot.task_count;
                *slot = node;
            }
        }
        Err(err) => warn!(%worker, error = %err, "refreshing node stats failed"),
    }
}

/// Health-check loop: probes Running tasks and restarts the unhealthy
/// and the Failed, while their restart budget lasts.
pub async fn do_health_checks(manager: Arc<Mutex<Manager>>) {
    loop {
        debug!("performing task health checks");
        check_health(&manager).await;
        tokio::time::sleep(HEALTH_TICK).await;
    }
}

pub async fn check_health(manager: &Arc<Mutex<Manager>>) {
    let tasks = { manager.lock().await.get_tasks() };

    for task in tasks {
        if task.state == State::Running && task.restart_count < MAX_RESTARTS {
            if let Err(err) = check_task_health(manager, &task).await {
                warn!(task_id = %task.id, error = %err, "task is unhealthy");
                restart_task(manager, &task).await;
            }
        } else if task.state == State::Failed && task.restart_count < MAX_RESTARTS {
            restart_task(manager, &task).await;
        }
    }
}

/// Calls the task's health endpoint on its worker's host and first
/// published port. Tasks without a health path, an assigned worker, or a
/// published port are treated as healthy.
async fn check_task_health(
    manager: &Arc<Mutex<Manager>>,
    task: &Task,
) -> Result<(), ManagerError> {
    let Some(path) = task.health_check.clone() else {
        return Ok(());
    };

    let worker = { manager.lock().await.task_worker_map.get(&task.id).cloned() };
    let Some(worker) = worker else {
        debug!(task_id = %task.id, "task has no assigned worker, skipping health check");
        return Ok(());
    };

    let Some(host_port) = first_host_port(task.host_ports.as_ref()) else {
        debug!(task_id = %task.id, "no host port published yet, skipping health check");
        return Ok(());
    };

    let host = worker.split(':').next().unwrap_or(worker.as_str());
    let url = format!("http://{host}:{host_port}{path}");
    debug!(task_id = %task.id, %url, "calling health check");

    let response = reqwest::get(&url)
        .await
        .map_err(|source| ManagerError::Transport {
            url: url.clone(),
            source,
        })?;

    if response.status() != StatusCode::OK {
        return Err(ManagerError::Unhealthy {
            id: task.id,
            status: response.status().as_u16(),
        });
    }

    debug!(task_id = %task.id, status = %response.status(), "health check passed");
    Ok(())
}

/// First host port in the published-ports map. The map is unordered, so
/// with several published ports the choice is arbitrary.
fn first_host_port(ports: Option<&PortMap>) -> Option<String> {
    for bindings in ports?.values() {
        if let Some(binding) = bindings.as_ref().and_then(|list| list.first()) {
            if let Some(port) = binding.host_port.clone() {
                return Some(port);
            }
        }
    }
    None
}

/// Re-dispatches a task to its current worker as a fresh event, bumping
/// the restart counter. Bypasses the pending queue unless the transport
/// fails, in which case the fresh event lands there.
pub async fn restart_task(manager: &Arc<Mutex<Manager>>, task: &Task) {
    let order = {
        let mut m = manager.lock().await;
        let Some(worker) = m.task_worker_map.get(&task.id).cloned() else {
            warn!(task_id = %task.id, "cannot restart a task without an assigned worker");
            return;
        };

        let mut restarted = task.clone();
        restarted.state = State::Scheduled;
        restarted.restart_count += 1;
        if let Err(err) = m.task_db.put(&restarted.id.to_string(), restarted.clone()) {
            error!(task_id = %task.id, error = %err, "persisting restarted task failed");
            return;
        }

        info!(task_id = %task.id, restart_count = restarted.restart_count, %worker, "restarting task");
        (worker, TaskEvent::new(State::Running, restarted))
    };

    let (worker, event) = order;
    if let Err(err) = post_task_event(manager, &worker, event).await {
        error!(%worker, error = %err, "re-dispatching restarted task failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::secret::PortBinding;
    use std::collections::HashMap;

    #[test]
    fn first_host_port_reads_the_first_binding() {
        let ports: PortMap = HashMap::from([(
            "80/tcp".to_string(),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some("49153".to_string()),
            }]),
        )]);

        assert_eq!(first_host_port(Some(&ports)), Some("49153".to_string()));
    }

    #[test]
    fn first_host_port_handles_empty_maps() {
        assert_eq!(first_host_port(None), None);
        let empty: PortMap = HashMap::new();
        assert_eq!(first_host_port(Some(&empty)), None);
        let unbound: PortMap = HashMap::from([("80/tcp".to_string(), None)]);
        assert_eq!(first_host_port(Some(&unbound)), None);
    }
}
