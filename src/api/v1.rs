use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use super::{controls, health};
use crate::controller::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/recent", get(get_recent))
        .route(
            "/controls",
            get(controls::set_controls).post(controls::set_controls),
        )
        .route("/health", get(health::health_check))
        .route("/healthz", get(healthz))
        .with_state(state)
}

pub async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

/// Snapshot published by the last control cycle.
pub async fn get_status(State(st): State<AppState>) -> impl IntoResponse {
    Json(st.status())
}

/// Oldest first.
pub async fn get_recent(State(st): State<AppState>) -> impl IntoResponse {
    Json(st.recent.snapshot())
}
