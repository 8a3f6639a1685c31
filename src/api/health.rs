use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Local};
use serde::Serialize;

use crate::controller::AppState;

/// Polls missed before the controller counts as stalled
const STALL_FACTOR: u32 = 3;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    timestamp: DateTime<Local>,
    controller: ComponentHealth,
}

/// Health status of a component
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_poll_age_secs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// GET /api/v1/health
///
/// Unhealthy once the control loop has missed several polls in a row,
/// counting the longer interval while asleep.
pub async fn health_check(State(st): State<AppState>) -> impl IntoResponse {
    let now = Local::now();
    let status = st.status();
    let cfg = st.desired_config();
    let mut interval = cfg.read_interval().saturating_mul(STALL_FACTOR);
    if status.sleep_mode {
        interval = interval.saturating_mul(cfg.sleep_read_interval_multiplier);
    }
    let is_stale = |last: DateTime<Local>| (now - last).to_std().is_ok_and(|age| age > interval);

    let controller = match status.last_poll {
        Some(last) if !is_stale(last) => ComponentHealth {
            status: "healthy",
            last_poll_age_secs: Some((now - last).num_seconds()),
            error: None,
        },
        Some(last) => ComponentHealth {
            status: "unhealthy",
            last_poll_age_secs: Some((now - last).num_seconds()),
            error: Some("control loop stalled".to_string()),
        },
        None => ComponentHealth {
            status: "unhealthy",
            last_poll_age_secs: None,
            error: Some("no poll yet".to_string()),
        },
    };

    let code = if controller.status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let response = HealthResponse {
        status: controller.status,
        timestamp: now,
        controller,
    };
    (code, Json(response))
}
