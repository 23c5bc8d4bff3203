use crate::server::{AppContext, AppError};
use crate::state::{ConversionTask, TaskStatusView};
use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use castforge_common::TaskId;
use serde::Serialize;

pub fn task_routes() -> Router<AppContext> {
    Router::new()
        .route("/tasks", get(list_tasks))
        .route("/tasks/", get(list_tasks))
        .route("/tasks/:id", get(get_task))
}

#[derive(Debug, Serialize)]
struct TaskResponse {
    #[serde(flatten)]
    status: TaskStatusView,
    stream_url: Option<String>,
}

impl From<ConversionTask> for TaskResponse {
    fn from(task: ConversionTask) -> Self {
        Self {
            status: task.status_view(),
            stream_url: task.playback_url,
        }
    }
}

async fn list_tasks(State(ctx): State<AppContext>) -> Json<Vec<TaskResponse>> {
    Json(ctx.registry.list().into_iter().map(TaskResponse::from).collect())
}

async fn get_task(
    State(ctx): State<AppContext>,
    Path(id): Path<u64>,
) -> Result<Json<TaskResponse>, AppError> {
    let task = ctx.registry.get(TaskId::from(id))?;
    Ok(Json(task.into()))
}
