//! End-to-end control cycles against simulated hardware.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use brick_battery::analytics::{AnalyticsSinks, CsvLogger, RecentValues};
use brick_battery::config::{ControllerConfig, SleepProfile};
use brick_battery::controller::{spawn_controller_tasks, ControlLoop, LoopMode, TargetReason};
use brick_battery::domain::{
    AcMode, ClimateUnit, ControlCommand, Controls, GridState, Power, PowerSource, Sensors,
    SimulatedAircon, SimulatedPowerSource, UnitCapacity,
};

fn config() -> ControllerConfig {
    ControllerConfig {
        min_load: 0.0,
        max_load: 400.0,
        sleep_threshold: 200.0,
        wakeup_threshold: 500.0,
        read_interval_secs: 5,
        set_interval_secs: 60,
        max_htemp: 24.0,
        control_humidity: true,
        operation_enabled: true,
        startup_grace_reads: 3,
        sleep_read_interval_multiplier: 10,
        io_timeout_ms: 2000,
        sleep_profile: SleepProfile {
            power: Power::On,
            mode: AcMode::Heat,
            setpoint_temperature: 18.0,
            setpoint_humidity: 0,
        },
    }
}

fn memory_sinks() -> AnalyticsSinks {
    let recent = Arc::new(RecentValues::new(10));
    AnalyticsSinks::new(None, recent, Duration::from_secs(120))
}

fn unit(name: &str, htemp: f64, stemp: f64) -> SimulatedAircon {
    SimulatedAircon::new(
        Some(name.to_string()),
        Sensors {
            htemp: Some(htemp),
            otemp: Some(6.0),
            hhum: None,
            cmpfreq: Some(30.0),
        },
        Controls {
            power: Some(Power::On),
            mode: Some(AcMode::Heat),
            setpoint_temperature: Some(stemp),
            setpoint_humidity: Some(0),
        },
    )
}

fn devices(units: &[&SimulatedAircon]) -> Vec<(Arc<dyn ClimateUnit>, UnitCapacity)> {
    units
        .iter()
        .map(|u| {
            let device: Arc<dyn ClimateUnit> = Arc::new((*u).clone());
            (device, UnitCapacity::default())
        })
        .collect()
}

async fn settle(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        handle.await.unwrap();
    }
}

/// Never answers; only the loop's own timeout ends the poll.
struct SilentInverter;

#[async_trait]
impl PowerSource for SilentInverter {
    async fn poll(&self) -> GridState {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_surplus_raises_coldest_unit_then_humidifies() {
    let a = unit("A", 20.0, 22.0);
    let b = unit("B", 22.5, 22.0);
    // Exporting 50 W: target = min(200 + 50, fleet headroom) = 250 W
    let source = Arc::new(SimulatedPowerSource::new(-50.0, 2500.0));
    let mut ctl = ControlLoop::new(config(), source, devices(&[&a, &b]), memory_sinks());

    ctl.startup().await;
    assert_eq!(ctl.mode(), LoopMode::Awake);
    assert_eq!(ctl.units()[0].name, "A");

    tokio::time::advance(Duration::from_secs(15)).await;
    let outcome = ctl.cycle().await;
    let decision = outcome.decision.unwrap();
    assert_eq!(decision.watts, 250.0);
    assert_eq!(decision.reason, TargetReason::Increase);
    assert!(outcome.setpoints_changed);
    settle(outcome.writes).await;

    assert_eq!(
        a.writes().await,
        vec![ControlCommand {
            power: Power::On,
            mode: AcMode::Heat,
            setpoint_temperature: 23.0,
            setpoint_humidity: 50,
        }]
    );
    assert!(b.writes().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_set_interval_spaces_changes() {
    let a = unit("A", 20.0, 22.0);
    let source = Arc::new(SimulatedPowerSource::new(-300.0, 2500.0));
    let mut ctl = ControlLoop::new(config(), source, devices(&[&a]), memory_sinks());
    ctl.startup().await;

    tokio::time::advance(Duration::from_secs(15)).await;
    assert!(ctl.cycle().await.setpoints_changed);

    tokio::time::advance(Duration::from_secs(30)).await;
    let outcome = ctl.cycle().await;
    assert!(outcome.decision.unwrap().is_actionable());
    assert!(!outcome.setpoints_changed);

    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(ctl.cycle().await.setpoints_changed);
}

#[tokio::test(start_paused = true)]
async fn test_sleep_and_wake_follow_pv_with_hysteresis() {
    let a = unit("A", 20.0, 22.0);
    let b = unit("B", 21.0, 23.5);
    let source = Arc::new(SimulatedPowerSource::new(200.0, 1500.0));
    let mut ctl = ControlLoop::new(config(), source.clone(), devices(&[&a, &b]), memory_sinks());
    ctl.startup().await;
    assert_eq!(ctl.mode(), LoopMode::Awake);

    source.set_reading(900.0, 0.0).await;
    let outcome = ctl.cycle().await;
    assert_eq!(outcome.mode, LoopMode::Asleep);
    assert!(outcome.decision.is_none());
    settle(outcome.writes).await;

    let sleep = config().sleep_profile.to_command();
    assert_eq!(a.writes().await, vec![sleep]);
    assert_eq!(b.writes().await, vec![sleep]);
    assert_eq!(ctl.effective_read_interval(), Duration::from_secs(50));

    // Between the thresholds nothing changes
    source.set_reading(900.0, 300.0).await;
    tokio::time::advance(Duration::from_secs(120)).await;
    let outcome = ctl.cycle().await;
    assert_eq!(outcome.mode, LoopMode::Asleep);
    assert!(outcome.writes.is_empty());
    assert_eq!(a.writes().await.len(), 1);

    source.set_reading(900.0, 600.0).await;
    let outcome = ctl.cycle().await;
    assert_eq!(outcome.mode, LoopMode::Awake);
    assert!(outcome.decision.is_some());
    assert_eq!(ctl.effective_read_interval(), Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_power_source_timeout_logs_empty_fields_and_skips_allocation() {
    let name = format!("brick-loop-{}.csv", uuid::Uuid::new_v4());
    let path = std::env::temp_dir().join(name);
    let csv = CsvLogger::open(&path, 1).unwrap();
    let recent = Arc::new(RecentValues::new(10));
    let sinks = AnalyticsSinks::new(Some(csv), recent.clone(), Duration::ZERO);

    let a = unit("A", 20.0, 22.0);
    let mut ctl = ControlLoop::new(config(), Arc::new(SilentInverter), devices(&[&a]), sinks);
    ctl.startup().await;
    tokio::time::advance(Duration::from_secs(600)).await;

    let outcome = ctl.cycle().await;
    assert!(!outcome.grid.is_known());
    assert!(!outcome.setpoints_changed);
    assert!(a.writes().await.is_empty());

    let latest = recent.latest().unwrap();
    assert_eq!(latest.grid_import_w, None);
    assert_eq!(latest.pv_generation_w, None);
    assert_eq!(latest.ac_consumption_w, Some(600.0));

    let contents = std::fs::read_to_string(&path).unwrap();
    let row = contents.lines().nth(1).unwrap();
    let fields: Vec<_> = row.split(',').collect();
    assert_eq!(fields[1], "");
    assert_eq!(fields[2], "");
    assert_eq!(fields[3], "600");
    assert!(!contents.contains("NaN"));
    std::fs::remove_file(&path).ok();
}

#[tokio::test(start_paused = true)]
async fn test_cooling_unit_blocks_the_whole_fleet() {
    let a = unit("A", 20.0, 22.0);
    let b = unit("B", 26.0, 24.0);
    b.set_controls(Controls {
        power: Some(Power::On),
        mode: Some(AcMode::Cool),
        setpoint_temperature: Some(24.0),
        setpoint_humidity: Some(0),
    })
    .await;
    let source = Arc::new(SimulatedPowerSource::new(-300.0, 2500.0));
    let mut ctl = ControlLoop::new(config(), source, devices(&[&a, &b]), memory_sinks());
    ctl.startup().await;
    tokio::time::advance(Duration::from_secs(15)).await;

    let outcome = ctl.cycle().await;
    assert!(outcome.decision.unwrap().is_actionable());
    assert!(!outcome.setpoints_changed);
    assert!(a.writes().await.is_empty());
    assert_eq!(ctl.units()[0].controls.setpoint_temperature, Some(22.0));
}

#[tokio::test(start_paused = true)]
async fn test_dry_run_computes_but_never_writes() {
    let mut cfg = config();
    cfg.operation_enabled = false;
    let a = unit("A", 20.0, 22.0);
    let source = Arc::new(SimulatedPowerSource::new(-300.0, 2500.0));
    let mut ctl = ControlLoop::new(cfg, source, devices(&[&a]), memory_sinks());
    ctl.startup().await;
    tokio::time::advance(Duration::from_secs(15)).await;

    let outcome = ctl.cycle().await;
    assert!(outcome.setpoints_changed);
    assert!(outcome.writes.is_empty());
    assert!(a.writes().await.is_empty());
    assert!(!ctl.app_state().status().operation_enabled);
}

#[tokio::test(start_paused = true)]
async fn test_failed_unit_poll_keeps_last_values() {
    let a = unit("A", 20.0, 22.0);
    let source = Arc::new(SimulatedPowerSource::new(300.0, 2500.0));
    let mut ctl = ControlLoop::new(config(), source, devices(&[&a]), memory_sinks());
    ctl.startup().await;

    a.set_fail_reads(true).await;
    a.set_sensors(Sensors {
        htemp: Some(25.0),
        ..Sensors::default()
    })
    .await;
    ctl.cycle().await;
    assert_eq!(ctl.units()[0].sensors.htemp, Some(20.0));
    assert_eq!(ctl.units()[0].sensors.cmpfreq, Some(30.0));
}

#[tokio::test(start_paused = true)]
async fn test_run_stops_on_cancel() {
    let a = unit("A", 20.0, 22.0);
    let source = Arc::new(SimulatedPowerSource::new(300.0, 2500.0));
    let ctl = ControlLoop::new(config(), source, devices(&[&a]), memory_sinks());
    let state = ctl.app_state();
    let cancel = CancellationToken::new();
    let task = spawn_controller_tasks(ctl, cancel.clone());

    tokio::time::sleep(Duration::from_secs(12)).await;
    assert_eq!(state.recent.len(), 2);
    assert!(state.status().last_poll.is_some());
    assert_eq!(state.status().grid_import_w, Some(300.0));

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("loop did not stop")
        .unwrap();
}
