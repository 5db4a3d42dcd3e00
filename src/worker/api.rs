use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State as AxumState};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::task::{State, Task, TaskEvent};

use super::types::{ErrorResponse, Worker};

/// The RPC surface a worker exposes to the manager.
pub struct TaskServer {
    pub worker: Arc<Mutex<Worker>>,
    pub address: String,
    pub port: u16,
}

impl TaskServer {
    pub fn new(worker: Arc<Mutex<Worker>>, address: &str, port: u16) -> Self {
        TaskServer {
            worker,
            address: address.to_string(),
            port,
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/task", get(get_tasks).post(start_task))
            .route("/task/{id}", delete(stop_task))
            .route("/stats", get(get_stats))
            .with_state(self.worker.clone())
    }

    pub async fn start(self) -> Result<(), std::io::Error> {
        let addr = format!("{}:{}", self.address, self.port);
        info!(%addr, "starting worker api");
        let listener = TcpListener::bind(&addr).await?;
        axum::serve(listener, self.router()).await
    }
}

async fn start_task(
    AxumState(worker): AxumState<Arc<Mutex<Worker>>>,
    payload: Result<Json<TaskEvent>, JsonRejection>,
) -> Response {
    let Json(event) = match payload {
        Ok(body) => body,
        Err(rejection) => {
            let message = format!("error decoding task event body: {rejection}");
            warn!(%message, "rejecting start request");
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    status_code: StatusCode::BAD_REQUEST.as_u16(),
                    message,
                }),
            )
                .into_response();
        }
    };

    let task = event.task.clone();
    worker.lock().await.add_task(event.task);
    info!(task_id = %task.id, "task queued to start");

    (StatusCode::CREATED, Json(task)).into_response()
}

async fn get_tasks(AxumState(worker): AxumState<Arc<Mutex<Worker>>>) -> Json<Vec<Task>> {
    Json(worker.lock().await.get_tasks())
}

async fn stop_task(
    AxumState(worker): AxumState<Arc<Mutex<Worker>>>,
    Path(id): Path<Uuid>,
) -> Response {
    let mut w = worker.lock().await;

    let task = match w.db.get(&id.to_string()) {
        Ok(task) => task,
        Err(err) => {
            let message = format!("no task found with id {id}");
            warn!(task_id = %id, error = %err, "rejecting stop request");
            // The body reports 404 while the response itself is a 400;
            // kept for compatibility with existing clients.
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    status_code: StatusCode::NOT_FOUND.as_u16(),
                    message,
                }),
            )
                .into_response();
        }
    };

    let mut stopping = task;
    stopping.state = State::Completed;
    w.add_task(stopping.clone());
    info!(task_id = %id, container_id = ?stopping.container_id, "task queued to stop");

    StatusCode::NO_CONTENT.into_response()
}

async fn get_stats(AxumState(worker): AxumState<Arc<Mutex<Worker>>>) -> Response {
    let stats = worker.lock().await.stats.clone();
    (StatusCode::OK, Json(stats)).into_response()
}
