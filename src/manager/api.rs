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
use crate::worker::ErrorResponse;

use super::types::Manager;

/// The manager's own HTTP surface: clients submit task events here and
/// the control loops take it from there.
pub struct ManagerServer {
    pub manager: Arc<Mutex<Manager>>,
    pub address: String,
    pub port: u16,
}

impl ManagerServer {
    pub fn new(manager: Arc<Mutex<Manager>>, address: &str, port: u16) -> Self {
        ManagerServer {
            manager,
            address: address.to_string(),
            port,
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/task", get(get_tasks).post(add_task))
            .route("/task/{id}", delete(stop_task))
            .with_state(self.manager.clone())
    }

    pub async fn start(self) -> Result<(), std::io::Error> {
        let addr = format!("{}:{}", self.address, self.port);
        info!(%addr, "starting manager api");
        let listener = TcpListener::bind(&addr).await?;
        axum::serve(listener, self.router()).await
    }
}

async fn add_task(
    AxumState(manager): AxumState<Arc<Mutex<Manager>>>,
    payload: Result<Json<TaskEvent>, JsonRejection>,
) -> Response {
    let Json(event) = match payload {
        Ok(body) => body,
        Err(rejection) => {
            let message = format!("error decoding task event body: {rejection}");
            warn!(%message, "rejecting submitted task event");
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
    manager.lock().await.add_task(event);
    info!(task_id = %task.id, "task event accepted");

    (StatusCode::CREATED, Json(task)).into_response()
}

async fn get_tasks(AxumState(manager): AxumState<Arc<Mutex<Manager>>>) -> Json<Vec<Task>> {
    Json(manager.lock().await.get_tasks())
}

async fn stop_task(
    AxumState(manager): AxumState<Arc<Mutex<Manager>>>,
    Path(id): Path<Uuid>,
) -> Response {
    let mut m = manager.lock().await;

    let task = match m.task_db.get(&id.to_string()) {
        Ok(task) => task,
        Err(err) => {
            let message = format!("no task found with id {id}");
            warn!(task_id = %id, error = %err, "rejecting stop request");
            return (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    status_code: StatusCode::NOT_FOUND.as_u16(),
                    message,
                }),
            )
                .into_response();
        }
    };

    m.add_task(TaskEvent::new(State::Completed, task));
    info!(task_id = %id, "task queued for stopping");

    StatusCode::NO_CONTENT.into_response()
}
