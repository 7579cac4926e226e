//! Plain HTTP routes: liveness and out-of-band termination.

use axum::Router;
use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use serde::Serialize;
use tracing::info;

use crate::state::AppState;

#[derive(Debug, Serialize, PartialEq, Eq)]
struct StatusResponse {
    status: &'static str,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/terminate", post(terminate))
}

/// GET /health - process liveness, independent of sessions.
async fn health() -> Json<StatusResponse> {
    Json(StatusResponse { status: "OK" })
}

/// POST /terminate - cancel every running session. Does not wait for teardown.
async fn terminate(State(state): State<AppState>) -> Json<StatusResponse> {
    info!("termination requested for all sessions");
    state.terminate_all();
    Json(StatusResponse {
        status: "terminating",
    })
}
