//! Dashboard boundary: REST endpoints, multipart upload, live-update
//! WebSocket and the queue tool-calling endpoints.

pub mod routes;
pub mod ws;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;

use crate::queue::TaskQueue;
use crate::tools::ToolRegistry;
use crate::worker::RunState;

/// Uploaded files may exceed axum's 2 MB default body limit.
const UPLOAD_BODY_LIMIT: usize = 50 * 1024 * 1024;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<TaskQueue>,
    pub tools: Arc<ToolRegistry>,
    /// Where uploaded files are persisted.
    pub upload_dir: PathBuf,
    /// Stage of the run the worker currently holds.
    pub stages: watch::Receiver<Option<RunState>>,
}

/// Build the Axum router with task REST, upload, worker, tool and WebSocket routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(routes::health))
        .route(
            "/api/tasks",
            get(routes::list_tasks).post(routes::create_task),
        )
        .route(
            "/api/tasks/{id}",
            get(routes::get_task).delete(routes::delete_task),
        )
        .route(
            "/api/tasks/{id}/upload",
            post(routes::upload_file).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/api/worker", get(routes::worker_stage))
        .route("/api/tools", get(routes::list_tools))
        .route("/api/tools/{name}", post(routes::call_tool))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
