//! REST handlers.

use std::path::{Path as FsPath, PathBuf};

use axum::{
    Json,
    extract::{Multipart, Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::AppState;
use crate::error::ToolError;
use crate::queue::FormField;

/// Body of `POST /api/tasks`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub form_data: Option<Vec<FormField>>,
}

fn error_body(status: StatusCode, message: impl std::fmt::Display) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(json!({ "error": message.to_string() })))
}

fn parse_id(id: &str) -> Result<Uuid, (StatusCode, Json<serde_json::Value>)> {
    Uuid::parse_str(id).map_err(|_| error_body(StatusCode::BAD_REQUEST, "Invalid task ID"))
}

// ── Health ──────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "form-runner"
    }))
}

// ── Tasks ───────────────────────────────────────────────────────────────

pub async fn list_tasks(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.queue.list_all().await)
}

pub async fn create_task(
    State(state): State<AppState>,
    body: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(req) = match body {
        Ok(body) => body,
        Err(e) => return error_body(StatusCode::BAD_REQUEST, e.body_text()),
    };

    let url = req.url.unwrap_or_default();
    let form_data = req.form_data.unwrap_or_default();
    match state.queue.enqueue(url, form_data).await {
        Ok(task) => (StatusCode::OK, Json(json!(task))),
        Err(e) => error_body(StatusCode::BAD_REQUEST, e),
    }
}

pub async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.queue.get(id).await {
        Some(task) => (StatusCode::OK, Json(json!(task))),
        None => error_body(StatusCode::NOT_FOUND, "Task not found"),
    }
}

pub async fn delete_task(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    if state.queue.delete(id).await {
        (StatusCode::OK, Json(json!({ "success": true })))
    } else {
        error_body(StatusCode::NOT_FOUND, "Task not found")
    }
}

// ── Upload ──────────────────────────────────────────────────────────────

/// Strip any directory components a client put in the file name.
fn safe_file_name(raw: Option<&str>) -> String {
    raw.and_then(|name| FsPath::new(name).file_name())
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("upload")
        .to_string()
}

/// `POST /api/tasks/{id}/upload`, multipart `file` + `selector`.
pub async fn upload_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let mut selector: Option<String> = None;
    let mut saved: Option<PathBuf> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return error_body(StatusCode::BAD_REQUEST, e.body_text()),
        };

        match field.name().map(str::to_string).as_deref() {
            Some("selector") => match field.text().await {
                Ok(text) => selector = Some(text.trim().to_string()),
                Err(e) => return error_body(StatusCode::BAD_REQUEST, e.body_text()),
            },
            Some("file") => {
                let name = safe_file_name(field.file_name());
                let bytes = match field.bytes().await {
                    Ok(bytes) => bytes,
                    Err(e) => return error_body(StatusCode::BAD_REQUEST, e.body_text()),
                };
                let millis = chrono::Utc::now().timestamp_millis();
                let path = state.upload_dir.join(format!("{millis}-{name}"));
                if let Err(e) = tokio::fs::write(&path, &bytes).await {
                    warn!(path = %path.display(), error = %e, "Failed to persist upload");
                    return error_body(StatusCode::INTERNAL_SERVER_ERROR, e);
                }
                saved = Some(path);
            }
            _ => {}
        }
    }

    let Some(path) = saved else {
        return error_body(StatusCode::BAD_REQUEST, "No file uploaded");
    };
    let Some(selector) = selector.filter(|s| !s.is_empty()) else {
        let _ = tokio::fs::remove_file(&path).await;
        return error_body(StatusCode::BAD_REQUEST, "selector is required");
    };

    if !state.queue.file_uploaded(id, selector.clone(), path.clone()).await {
        let _ = tokio::fs::remove_file(&path).await;
        return error_body(StatusCode::NOT_FOUND, "Task not found");
    }

    info!(task_id = %id, selector = %selector, path = %path.display(), "Upload accepted");
    (
        StatusCode::OK,
        Json(json!({ "success": true, "path": path.display().to_string() })),
    )
}

// ── Worker ──────────────────────────────────────────────────────────────

/// `GET /api/worker`: the held task's pipeline stage, `null` before the first run.
pub async fn worker_stage(State(state): State<AppState>) -> impl IntoResponse {
    let run = state.stages.borrow().clone();
    Json(json!({ "run": run }))
}

// ── Tools ───────────────────────────────────────────────────────────────

pub async fn list_tools(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "tools": state.tools.tool_definitions().await }))
}

pub async fn call_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> impl IntoResponse {
    let Json(params) = match body {
        Ok(body) => body,
        Err(e) => return error_body(StatusCode::BAD_REQUEST, e.body_text()),
    };

    match state.tools.execute(&name, params).await {
        Ok(output) => (StatusCode::OK, Json(json!(output))),
        Err(e @ ToolError::NotFound { .. }) => error_body(StatusCode::NOT_FOUND, e),
        Err(e @ ToolError::InvalidParameters { .. }) => error_body(StatusCode::BAD_REQUEST, e),
    }
}
