use anyhow::Result;
use brick_battery::{analytics, api, config, controller, hardware, telemetry};
use config::Config;
use telemetry::init_tracing;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cfg = Config::load()?;

    let devices = hardware::DeviceFactory::build(&cfg)?;
    let sinks = analytics::AnalyticsSinks::from_config(&cfg.analytics, devices.aircons.len())?;
    let control_loop = controller::ControlLoop::new(
        cfg.controller.clone(),
        devices.power_source,
        devices.aircons,
        sinks,
    );
    let app_state = control_loop.app_state();
    let app = api::router(app_state, &cfg);

    let addr = cfg.server.socket_addr()?;

    if cfg.server.host == "0.0.0.0" {
        warn!(
            "Server binding to 0.0.0.0 - the control API will be reachable from the network \
            without authentication"
        );
    }

    info!(%addr, aircons = cfg.aircons.len(), "starting Brick Battery");

    let cancel = CancellationToken::new();
    let controller_task = controller::spawn_controller_tasks(control_loop, cancel.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    cancel.cancel();
    if let Err(e) = controller_task.await {
        warn!(error = %e, "controller task did not stop cleanly");
    }

    warn!("shutdown complete");
    Ok(())
}
