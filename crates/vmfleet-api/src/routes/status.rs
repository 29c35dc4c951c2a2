//! Fleet status API.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use vmfleet_scheduler::FleetStatus;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/status", get(status))
}

/// Current capacity use, queue depths, tracked jobs and expired markers.
async fn status(State(state): State<AppState>) -> Json<FleetStatus> {
    Json(state.coordinator.status())
}
