use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use brick_battery::analytics::{AnalyticsSinks, RecentValues};
use brick_battery::api;
use brick_battery::config::Config;
use brick_battery::controller::ControlLoop;
use brick_battery::domain::{ClimateUnit, SimulatedAircon, SimulatedPowerSource, UnitCapacity};

const CONFIG: &str = r#"
    [server]
    host = "127.0.0.1"
    port = 8080

    [controller]
    min_load = 200
    max_load = 700
    sleep_threshold = 0
    wakeup_threshold = 200
    read_interval_secs = 5
    set_interval_secs = 60
    max_htemp = 24.0
    control_humidity = true
    operation_enabled = true

    [controller.sleep_profile]
    power = "on"
    mode = "heat"
    setpoint_temperature = 22.0
    setpoint_humidity = 0

    [power_source]
    kind = "simulated"

    [[aircons]]
    name = "Living"
"#;

async fn setup() -> (ControlLoop, Router) {
    let cfg = Config::from_toml_str(CONFIG).unwrap();
    let device: Arc<dyn ClimateUnit> = Arc::new(SimulatedAircon::heating("Living"));
    let recent = Arc::new(RecentValues::new(5));
    let sinks = AnalyticsSinks::new(None, recent, Duration::from_secs(120));
    let mut ctl = ControlLoop::new(
        cfg.controller.clone(),
        Arc::new(SimulatedPowerSource::new(450.0, 1800.0)),
        vec![(device, UnitCapacity::default())],
        sinks,
    );
    ctl.startup().await;
    let app = api::router(ctl.app_state(), &cfg);
    (ctl, app)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let resp = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let (status, body) = get(app, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_greeting_and_healthz() {
    let (_ctl, app) = setup().await;
    let (status, body) = get(&app, "/").await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.starts_with("Hello, Brick Battery here!"));

    let (status, _) = get(&app, "/api/v1/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let (status, health) = get_json(&app, "/api/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["controller"]["status"], "healthy");
}

#[tokio::test]
async fn test_health_survives_oversized_interval() {
    let (ctl, app) = setup().await;
    let mut cfg = ctl.config().clone();
    cfg.read_interval_secs = u64::MAX / 2;
    ctl.app_state().desired_config.send_replace(cfg);

    let (status, health) = get_json(&app, "/api/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["controller"]["status"], "healthy");
}

#[tokio::test]
async fn test_controls_reject_out_of_range_read_interval() {
    let (ctl, app) = setup().await;
    let (status, body) = get_json(&app, "/api/v1/controls?read_interval=90000000000").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["errors"]["read_interval"],
        "invalid value, must be an integer from 1 to 3600"
    );
    assert_eq!(ctl.app_state().desired_config().read_interval_secs, 5);
}

#[tokio::test]
async fn test_status_reflects_last_cycle() {
    let (mut ctl, app) = setup().await;
    ctl.cycle().await;

    let (status, body) = get_json(&app, "/api/v1/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["operation_enabled"], true);
    assert_eq!(body["sleep_mode"], false);
    assert_eq!(body["grid_import_w"], 450.0);
    assert_eq!(body["pv_generation_w"], 1800.0);
    assert_eq!(body["target_reason"], "dead_band");
    assert_eq!(body["aircons"][0]["name"], "Living");
    assert_eq!(body["aircons"][0]["sensors"]["htemp"], 20.0);
    assert!(body["last_poll"].is_string());

    let (_, recent) = get_json(&app, "/api/v1/recent").await;
    assert_eq!(recent.as_array().unwrap().len(), 1);
    assert_eq!(recent[0]["grid_import_w"], 450.0);
}

#[tokio::test]
async fn test_controls_reject_whole_request_with_field_errors() {
    let (ctl, app) = setup().await;
    let (status, body) = get_json(
        &app,
        "/api/v1/controls?max_load=900&min_load=1000&ac_sleep_shum=7&bogus=1",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let errors = body["errors"].as_object().unwrap();
    assert_eq!(errors["min_load"], "min_load must be lower than max_load");
    assert_eq!(
        errors["ac_sleep_shum"],
        "invalid value, must be an integer from 0 to 100 by increments of 5"
    );
    assert_eq!(errors["bogus"], "invalid key");
    assert!(!errors.contains_key("max_load"));

    assert_eq!(ctl.app_state().desired_config().max_load, 700.0);
}

#[tokio::test]
async fn test_controls_apply_on_next_cycle() {
    let (mut ctl, app) = setup().await;
    let (status, body) = get_json(
        &app,
        "/api/v1/controls?operation=off&max_load=900&ac_sleep_mode=3",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["operation"], false);
    assert_eq!(body["max_load"], 900.0);
    assert_eq!(body["min_load"], 200.0);
    assert_eq!(body["ac_sleep_mode"], "3");

    // Queued only
    assert_eq!(ctl.config().max_load, 700.0);
    ctl.cycle().await;
    assert_eq!(ctl.config().max_load, 900.0);
    assert!(!ctl.config().operation_enabled);

    let (_, status) = get_json(&app, "/api/v1/status").await;
    assert_eq!(status["operation_enabled"], false);
}

#[tokio::test]
async fn test_controls_without_parameters_returns_current_values() {
    let (_ctl, app) = setup().await;
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/controls")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["set_interval"], 60);
    assert_eq!(body["ac_sleep_pow"], "1");
    assert_eq!(body["ac_sleep_stemp"], 22.0);
}
