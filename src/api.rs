//! HTTP 提交接口（axum）
//!
//! 路由：
//! - `GET /`              接口说明（含提交请求的 JSON Schema）
//! - `POST /automate`     提交目标，立即返回 task_id
//! - `GET /task/:id`      任务快照
//! - `GET /tasks`         列表（?limit=50&status=running）
//! - `DELETE /task/:id`   删除任务
//! - `GET /health`        健康检查

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use schemars::schema_for;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::tasks::{SubmitRequest, TaskError, TaskList, TaskManager, TaskStatus};

const DEFAULT_LIST_LIMIT: usize = 50;

impl IntoResponse for TaskError {
    fn into_response(self) -> Response {
        let status = match &self {
            TaskError::NotFound(_) => StatusCode::NOT_FOUND,
            TaskError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

/// 请求体解析失败（缺字段、类型错、非 JSON）同样以 422 + detail 返回
impl From<JsonRejection> for TaskError {
    fn from(rejection: JsonRejection) -> Self {
        TaskError::InvalidRequest(rejection.body_text())
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
    status: Option<String>,
}

pub fn router(manager: Arc<TaskManager>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(api_info))
        .route("/automate", post(submit))
        .route("/task/:task_id", get(get_task).delete(delete_task))
        .route("/tasks", get(list_tasks))
        .route("/health", get(health))
        .layer(cors)
        .with_state(manager)
}

async fn api_info() -> impl IntoResponse {
    Json(json!({
        "name": "Browser Automation API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": {
            "POST /automate": "Submit automation task",
            "GET /task/{task_id}": "Get task status/result",
            "GET /tasks": "List all tasks",
            "DELETE /task/{task_id}": "Delete a task",
            "GET /health": "Health check",
        },
        "request_schema": schema_for!(SubmitRequest),
    }))
}

async fn submit(
    State(manager): State<Arc<TaskManager>>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<impl IntoResponse, TaskError> {
    let Json(req) = payload?;
    let receipt = manager.submit(req).await?;
    Ok(Json(receipt))
}

async fn get_task(
    State(manager): State<Arc<TaskManager>>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, TaskError> {
    Ok(Json(manager.get(&task_id).await?))
}

async fn list_tasks(
    State(manager): State<Arc<TaskManager>>,
    Query(q): Query<ListQuery>,
) -> impl IntoResponse {
    let limit = q.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    // 未知状态与任何记录都不匹配
    let list = match q.status.as_deref().filter(|s| !s.is_empty()) {
        None => manager.list(None, limit).await,
        Some(s) => match s.parse::<TaskStatus>() {
            Ok(status) => manager.list(Some(status), limit).await,
            Err(_) => TaskList::empty(),
        },
    };
    Json(list)
}

async fn delete_task(
    State(manager): State<Arc<TaskManager>>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, TaskError> {
    manager.delete(&task_id).await?;
    Ok(Json(json!({ "message": "Task deleted successfully" })))
}

async fn health(State(manager): State<Arc<TaskManager>>) -> impl IntoResponse {
    Json(manager.health().await)
}
