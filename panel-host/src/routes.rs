//! HTTP route handlers for the host API.

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use panel::bus::BusError;
use panel::io::supervisor::{ProcessStatus, SupervisedProcess};
use serde::Serialize;

use crate::state::AppState;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/messages", post(post_message))
        .route("/status", get(get_status))
}

async fn health() -> &'static str {
    "ok"
}

/// POST /api/messages - one bus frame from the view.
pub(crate) async fn post_message(State(state): State<AppState>, body: String) -> StatusCode {
    match state.bus().dispatch(&body) {
        Ok(_) => StatusCode::ACCEPTED,
        Err(BusError::Unhandled(_)) => StatusCode::UNPROCESSABLE_ENTITY,
        Err(_) => StatusCode::BAD_REQUEST,
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct StatusResponse {
    server_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    review_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    worker: Option<WorkerResponse>,
}

#[derive(Debug, Serialize)]
struct WorkerResponse {
    command: Vec<String>,
    working_directory: String,
    status: &'static str,
    restart_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pid: Option<u32>,
}

impl From<SupervisedProcess> for WorkerResponse {
    fn from(process: SupervisedProcess) -> Self {
        Self {
            command: process.command,
            working_directory: process.working_directory.display().to_string(),
            status: status_label(process.status),
            restart_count: process.restart_count,
            pid: process.pid,
        }
    }
}

fn status_label(status: ProcessStatus) -> &'static str {
    match status {
        ProcessStatus::Starting => "starting",
        ProcessStatus::Running => "running",
        ProcessStatus::Stopped => "stopped",
        ProcessStatus::Terminating => "terminating",
    }
}

/// GET /api/status - the same snapshot a `pong` carries, plus worker details.
pub(crate) async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let pong = state.host.status().await;
    Json(StatusResponse {
        server_active: pong.server_active,
        review_link: pong.review_link,
        worker: state
            .host
            .supervisor()
            .map(|supervisor| WorkerResponse::from(supervisor.snapshot())),
    })
}
