use std::sync::Arc;

use reqwest::StatusCode;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use uuid::Uuid;

use stevedore::store::StoreKind;
use stevedore::task::{State, Task, TaskEvent};
use stevedore::worker::{ErrorResponse, SystemStats, TaskServer, Worker};

async fn spawn_worker() -> (Arc<Mutex<Worker>>, String) {
    let worker = Arc::new(Mutex::new(
        Worker::new("worker-test", &StoreKind::Memory).unwrap(),
    ));
    let server = TaskServer::new(worker.clone(), "127.0.0.1", 0);
    let router = server.router();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (worker, format!("127.0.0.1:{}", addr.port()))
}

#[tokio::test]
async fn post_task_enqueues_and_returns_created() {
    let (worker, addr) = spawn_worker().await;

    let task = Task {
        name: "sleepy".to_string(),
        image: "alpine:latest".to_string(),
        state: State::Scheduled,
        ..Default::default()
    };
    let event = TaskEvent::new(State::Scheduled, task.clone());

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/task"))
        .json(&event)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let returned: Task = response.json().await.unwrap();
    assert_eq!(returned.id, task.id);

    let w = worker.lock().await;
    assert_eq!(w.queue.len(), 1);
    assert_eq!(w.queue.peek().unwrap().id, task.id);
}

#[tokio::test]
async fn post_task_rejects_unknown_fields() {
    let (worker, addr) = spawn_worker().await;

    let event = TaskEvent::new(State::Scheduled, Task::default());
    let mut body = serde_json::to_value(&event).unwrap();
    body.as_object_mut()
        .unwrap()
        .insert("shadow".to_string(), serde_json::json!("field"));

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/task"))
        .json(&body)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: ErrorResponse = response.json().await.unwrap();
    assert_eq!(error.status_code, 400);

    assert!(worker.lock().await.queue.is_empty());
}

#[tokio::test]
async fn get_task_lists_persisted_tasks() {
    let (worker, addr) = spawn_worker().await;

    let task = Task {
        state: State::Running,
        container_id: Some("cafebabe".to_string()),
        ..Default::default()
    };
    worker
        .lock()
        .await
        .db
        .put(&task.id.to_string(), task.clone())
        .unwrap();

    let tasks: Vec<Task> = reqwest::get(format!("http://{addr}/task"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, task.id);
    assert_eq!(tasks[0].state, State::Running);
}

#[tokio::test]
async fn delete_known_task_queues_a_completed_copy() {
    let (worker, addr) = spawn_worker().await;

    let task = Task {
        state: State::Running,
        container_id: Some("cafebabe".to_string()),
        ..Default::default()
    };
    worker
        .lock()
        .await
        .db
        .put(&task.id.to_string(), task.clone())
        .unwrap();

    let response = reqwest::Client::new()
        .delete(format!("http://{addr}/task/{}", task.id))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let mut w = worker.lock().await;
    let queued = w.queue.dequeue().expect("a stop task should be queued");
    assert_eq!(queued.id, task.id);
    assert_eq!(queued.state, State::Completed);
    // The persisted copy is untouched until the run loop drives the stop.
    assert_eq!(
        w.db.get(&task.id.to_string()).unwrap().state,
        State::Running
    );
}

#[tokio::test]
async fn delete_unknown_task_is_a_bad_request() {
    let (worker, addr) = spawn_worker().await;

    let response = reqwest::Client::new()
        .delete(format!("http://{addr}/task/{}", Uuid::new_v4()))
        .send()
        .await
        .unwrap();

    // The response is a 400 whose body reports 404.
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: ErrorResponse = response.json().await.unwrap();
    assert_eq!(error.status_code, 404);

    assert!(worker.lock().await.queue.is_empty());
}

#[tokio::test]
async fn delete_malformed_id_is_a_bad_request() {
    let (_worker, addr) = spawn_worker().await;

    let response = reqwest::Client::new()
        .delete(format!("http://{addr}/task/not-a-uuid"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stats_endpoint_serves_a_snapshot() {
    let (_worker, addr) = spawn_worker().await;

    let response = reqwest::get(format!("http://{addr}/stats")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stats: SystemStats = response.json().await.unwrap();
    assert!(stats.total_cpus >= 1);
}
