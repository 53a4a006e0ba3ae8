use crate::recurrence::RepeatPolicy;
use crate::store::PersistenceGateway;
use crate::task::{NewTask, Task, TaskError, TaskService};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// JSON representation of a Task for API responses.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct TaskJson {
    pub id: Uuid,
    pub title: String,
    /// ID of the open remote item, absent while the task is completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_remote_id: Option<String>,
    pub next_due_at: DateTime<Utc>,
    pub is_completed: bool,
    pub repeat: RepeatPolicy,
}

impl From<Task> for TaskJson {
    fn from(task: Task) -> Self {
        Self {
            id: task.id(),
            title: task.title().to_string(),
            last_remote_id: task.last_remote_id().map(str::to_string),
            next_due_at: task.next_due_at(),
            is_completed: task.is_completed(),
            repeat: task.repeat().clone(),
        }
    }
}

/// API response for listing all tasks.
#[derive(Debug, Serialize, Deserialize)]
pub struct TasksResponse {
    pub tasks: Vec<TaskJson>,
    pub count: usize,
}

/// JSON response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for TaskError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            TaskError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            TaskError::MissingTitle => (StatusCode::UNPROCESSABLE_ENTITY, "missing_title"),
            TaskError::MissingRepeatPolicy => {
                (StatusCode::UNPROCESSABLE_ENTITY, "missing_repeat_policy")
            }
            TaskError::AmbiguousRepeatPolicy => {
                (StatusCode::UNPROCESSABLE_ENTITY, "ambiguous_repeat_policy")
            }
            TaskError::InvalidInterval(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_interval"),
            TaskError::InvalidCron(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_cron"),
        };
        let body = ErrorResponse {
            error: error.to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Clone)]
pub struct TaskState {
    pub service: TaskService,
    pub persistence: PersistenceGateway,
}

impl TaskState {
    /// Writes the snapshot after a mutation. The in-memory registry stays authoritative, so a
    /// failure is only logged.
    async fn save_snapshot(&self) {
        if let Err(e) = self.persistence.save(self.service.registry()).await {
            tracing::error!("Failed to save tasks after update: {}", e);
        }
    }
}

/// Handler for POST /v1/tasks - Creates a task.
#[tracing::instrument(skip(state))]
pub async fn create_task_handler(
    State(state): State<Arc<TaskState>>,
    Json(new_task): Json<NewTask>,
) -> Result<(StatusCode, Json<TaskJson>), TaskError> {
    let task = state.service.create_task(new_task).await?;
    state.save_snapshot().await;
    Ok((StatusCode::CREATED, Json(TaskJson::from(task))))
}

/// Handler for GET /v1/tasks - Returns all tasks in registry order.
#[tracing::instrument(skip(state))]
pub async fn get_tasks_handler(State(state): State<Arc<TaskState>>) -> Json<TasksResponse> {
    let tasks: Vec<TaskJson> = state
        .service
        .list_tasks()
        .await
        .into_iter()
        .map(TaskJson::from)
        .collect();
    let count = tasks.len();
    Json(TasksResponse { tasks, count })
}

/// Handler for DELETE /v1/tasks/{id}. Unknown IDs are not an error.
#[tracing::instrument(skip(state))]
pub async fn delete_task_handler(
    State(state): State<Arc<TaskState>>,
    Path(id): Path<Uuid>,
) -> StatusCode {
    if state.service.delete_task(id).await {
        state.save_snapshot().await;
    }
    StatusCode::NO_CONTENT
}

/// Handler for POST /v1/tasks/{id}/trigger - Makes a task due immediately.
#[tracing::instrument(skip(state))]
pub async fn trigger_task_handler(
    State(state): State<Arc<TaskState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskJson>, TaskError> {
    let task = state.service.trigger_now(id).await?;
    state.save_snapshot().await;
    Ok(Json(TaskJson::from(task)))
}

/// Creates and returns the tasks API router.
pub fn create_api_router(state: Arc<TaskState>) -> Router {
    Router::new()
        .route("/tasks", get(get_tasks_handler).post(create_task_handler))
        .route("/tasks/{id}", axum::routing::delete(delete_task_handler))
        .route("/tasks/{id}/trigger", post(trigger_task_handler))
        .with_state(state)
}
