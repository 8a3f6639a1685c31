//! The polling and scheduling loop.
//!
//! Every cycle polls the power source and all units concurrently, tracks the
//! sleep/wake mode against PV generation, records telemetry and, when awake
//! and due, reallocates setpoints. No two cycles overlap; writes started by a
//! cycle run in the background under the unit's I/O lock.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use validator::Validate;

use super::allocator::{AllocatorSettings, SetpointAllocator};
use super::dispatch::{broadcast, dispatch_changes, UnitLink};
use super::estimator;
use super::target::{TargetCalculator, TargetDecision, TargetReason};
use super::AppState;
use crate::analytics::{known, AnalyticsSinks, TelemetryRecord};
use crate::config::ControllerConfig;
use crate::domain::{ClimateUnit, ClimateUnitState, GridState, PowerSource, UnitCapacity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "UPPERCASE")]
pub enum LoopMode {
    Awake,
    Asleep,
}

/// Read-only view published after every cycle.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub operation_enabled: bool,
    pub sleep_mode: bool,
    pub last_poll: Option<DateTime<Local>>,
    pub last_setpoint_change: Option<DateTime<Local>>,
    pub grid_import_w: Option<f64>,
    pub pv_generation_w: Option<f64>,
    pub estimated_ac_consumption_w: Option<f64>,
    pub target_w: Option<f64>,
    pub target_reason: Option<TargetReason>,
    pub aircons: Vec<ClimateUnitState>,
}

impl StatusSnapshot {
    fn initial(cfg: &ControllerConfig, units: &[ClimateUnitState]) -> Self {
        Self {
            operation_enabled: cfg.operation_enabled,
            sleep_mode: false,
            last_poll: None,
            last_setpoint_change: None,
            grid_import_w: None,
            pv_generation_w: None,
            estimated_ac_consumption_w: None,
            target_w: None,
            target_reason: None,
            aircons: units.to_vec(),
        }
    }
}

/// What one cycle did; handy for driving the loop step by step.
#[derive(Debug)]
pub struct CycleOutcome {
    pub mode: LoopMode,
    pub grid: GridState,
    pub estimated_ac_consumption_w: f64,
    /// `None` while asleep
    pub decision: Option<TargetDecision>,
    pub setpoints_changed: bool,
    pub writes: Vec<JoinHandle<()>>,
}

pub struct ControlLoop {
    config: ControllerConfig,
    config_tx: Arc<watch::Sender<ControllerConfig>>,
    config_rx: watch::Receiver<ControllerConfig>,
    status_tx: watch::Sender<StatusSnapshot>,
    power_source: Arc<dyn PowerSource>,
    links: Vec<UnitLink>,
    units: Vec<ClimateUnitState>,
    analytics: AnalyticsSinks,
    mode: LoopMode,
    grid: GridState,
    estimated_ac_consumption_w: f64,
    grace_until: Option<Instant>,
    last_setpoint_change: Option<Instant>,
    last_setpoint_change_at: Option<DateTime<Local>>,
    last_poll_at: Option<DateTime<Local>>,
}

impl ControlLoop {
    pub fn new(
        config: ControllerConfig,
        power_source: Arc<dyn PowerSource>,
        devices: Vec<(Arc<dyn ClimateUnit>, UnitCapacity)>,
        analytics: AnalyticsSinks,
    ) -> Self {
        let (links, units): (Vec<_>, Vec<_>) = devices
            .into_iter()
            .enumerate()
            .map(|(index, (device, capacity))| {
                (UnitLink::new(device), ClimateUnitState::new(index, capacity))
            })
            .unzip();
        let (config_tx, config_rx) = watch::channel(config.clone());
        let (status_tx, _) = watch::channel(StatusSnapshot::initial(&config, &units));
        Self {
            config,
            config_tx: Arc::new(config_tx),
            config_rx,
            status_tx,
            power_source,
            links,
            units,
            analytics,
            mode: LoopMode::Awake,
            grid: GridState::unknown(),
            estimated_ac_consumption_w: f64::NAN,
            grace_until: None,
            last_setpoint_change: None,
            last_setpoint_change_at: None,
            last_poll_at: None,
        }
    }

    /// Handles for the web API.
    pub fn app_state(&self) -> AppState {
        AppState {
            status: self.status_tx.subscribe(),
            desired_config: self.config_tx.clone(),
            recent: self.analytics.recent(),
        }
    }

    pub fn mode(&self) -> LoopMode {
        self.mode
    }

    pub fn units(&self) -> &[ClimateUnitState] {
        &self.units
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Poll interval for the current mode.
    pub fn effective_read_interval(&self) -> Duration {
        let base = self.config.read_interval();
        match self.mode {
            LoopMode::Awake => base,
            LoopMode::Asleep => base.saturating_mul(self.config.sleep_read_interval_multiplier),
        }
    }

    fn new_interval(&self) -> Interval {
        let period = self.effective_read_interval();
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }

    /// Run until `cancel` fires, then flush the analytics file.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        self.startup().await;
        let mut interval = self.new_interval();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            let outcome = self.cycle().await;
            debug!(
                mode = %outcome.mode,
                writes = outcome.writes.len(),
                "cycle complete"
            );
            if interval.period() != self.effective_read_interval() {
                interval = self.new_interval();
            }
        }
        info!("control loop stopped");
        self.analytics.flush().context("final analytics flush")
    }

    /// Initial read deciding the starting mode.
    pub async fn startup(&mut self) {
        self.poll_all().await;
        let pv = self.grid.pv_generation_w();
        if pv <= self.config.sleep_threshold {
            self.mode = LoopMode::Asleep;
            info!(pv_generation_w = pv, "starting in sleep mode");
        } else {
            self.mode = LoopMode::Awake;
            let grace = self
                .config
                .read_interval()
                .saturating_mul(self.config.startup_grace_reads);
            self.grace_until = Instant::now().checked_add(grace);
            info!(pv_generation_w = pv, grace_secs = grace.as_secs(), "starting awake");
        }
        if !self.config.operation_enabled {
            warn!("operation disabled, running in dry-run mode");
        }
        self.estimated_ac_consumption_w = estimator::aggregate(&self.units);
        self.publish_status(None);
    }

    /// One read/decide/act cycle. Device and sink failures are logged and
    /// leave the affected values unknown; they never end the cycle early.
    pub async fn cycle(&mut self) -> CycleOutcome {
        self.apply_pending_config();
        self.poll_all().await;
        let mut writes = self.evaluate_mode().await;

        self.estimated_ac_consumption_w = estimator::aggregate(&self.units);
        self.analytics.record(TelemetryRecord::new(
            Local::now(),
            &self.grid,
            self.estimated_ac_consumption_w,
            &self.units,
        ));

        let mut decision = None;
        let mut setpoints_changed = false;
        if self.mode == LoopMode::Awake {
            let fleet_max_w = estimator::fleet_max_consumption(&self.units);
            let calc = TargetCalculator::new(&self.config, fleet_max_w);
            let d = calc.evaluate(self.grid.grid_import_w(), self.estimated_ac_consumption_w);
            debug!(
                grid_import_w = self.grid.grid_import_w(),
                ac_consumption_w = self.estimated_ac_consumption_w,
                target_w = d.watts,
                reason = %d.reason,
                "target evaluated"
            );
            if d.is_actionable() && self.setpoint_change_due() {
                let allocator = SetpointAllocator::new(AllocatorSettings::from(&self.config));
                if allocator.allocate(&mut self.units, d.watts) {
                    writes.extend(
                        dispatch_changes(
                            &self.links,
                            &mut self.units,
                            self.config.operation_enabled,
                            self.config.io_timeout(),
                        )
                        .await,
                    );
                    self.last_setpoint_change = Some(Instant::now());
                    self.last_setpoint_change_at = Some(Local::now());
                    setpoints_changed = true;
                }
            }
            decision = Some(d);
        }

        self.publish_status(decision);
        CycleOutcome {
            mode: self.mode,
            grid: self.grid,
            estimated_ac_consumption_w: self.estimated_ac_consumption_w,
            decision,
            setpoints_changed,
            writes,
        }
    }

    fn apply_pending_config(&mut self) {
        if !self.config_rx.has_changed().unwrap_or(false) {
            return;
        }
        let next = self.config_rx.borrow_and_update().clone();
        if next == self.config {
            return;
        }
        if let Err(e) = next.validate() {
            error!(error = %e, "ignoring invalid controller configuration");
            return;
        }
        info!(
            min_load = next.min_load,
            max_load = next.max_load,
            operation_enabled = next.operation_enabled,
            "applying new controller configuration"
        );
        self.config = next;
    }

    async fn poll_all(&mut self) {
        let io_timeout = self.config.io_timeout();
        let power_source = &self.power_source;
        let grid = async {
            match timeout(io_timeout, power_source.poll()).await {
                Ok(grid) => grid,
                Err(_) => {
                    warn!("power source poll timed out");
                    GridState::unknown()
                }
            }
        };
        let readings = join_all(
            self.links
                .iter()
                .zip(&self.units)
                .map(|(link, state)| link.poll(state, io_timeout)),
        );
        let (grid, readings) = tokio::join!(grid, readings);

        self.grid = grid;
        for (reading, state) in readings.into_iter().zip(self.units.iter_mut()) {
            reading.apply(state);
        }
        self.last_poll_at = Some(Local::now());
        debug!(
            grid_import_w = self.grid.grid_import_w(),
            pv_generation_w = self.grid.pv_generation_w(),
            "poll complete"
        );
    }

    async fn evaluate_mode(&mut self) -> Vec<JoinHandle<()>> {
        let pv = self.grid.pv_generation_w();
        match self.mode {
            LoopMode::Awake if pv <= self.config.sleep_threshold => {
                self.mode = LoopMode::Asleep;
                info!(pv_generation_w = pv, "no PV generation, entering sleep mode");
                broadcast(
                    &self.links,
                    &self.units,
                    self.config.sleep_profile.to_command(),
                    self.config.operation_enabled,
                    self.config.io_timeout(),
                )
                .await
            }
            LoopMode::Asleep if pv >= self.config.wakeup_threshold => {
                self.mode = LoopMode::Awake;
                info!(pv_generation_w = pv, "PV generation back, leaving sleep mode");
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn setpoint_change_due(&self) -> bool {
        let now = Instant::now();
        if self.grace_until.is_some_and(|until| now < until) {
            return false;
        }
        let Some(last) = self.last_setpoint_change else {
            return true;
        };
        now.duration_since(last) >= self.config.set_interval()
    }

    fn publish_status(&self, decision: Option<TargetDecision>) {
        self.status_tx.send_replace(StatusSnapshot {
            operation_enabled: self.config.operation_enabled,
            sleep_mode: self.mode == LoopMode::Asleep,
            last_poll: self.last_poll_at,
            last_setpoint_change: self.last_setpoint_change_at,
            grid_import_w: known(self.grid.grid_import_w()),
            pv_generation_w: known(self.grid.pv_generation_w()),
            estimated_ac_consumption_w: known(self.estimated_ac_consumption_w),
            target_w: decision.and_then(|d| known(d.watts)),
            target_reason: decision.map(|d| d.reason),
            aircons: self.units.clone(),
        });
    }
}
