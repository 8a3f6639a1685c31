//! Per-cycle telemetry sinks: the CSV file and the in-memory recent buffer.

pub mod csv_logger;
pub mod recent;

pub use csv_logger::CsvLogger;
pub use recent::RecentValues;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fs::File;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::AnalyticsConfig;
use crate::domain::{ClimateUnitState, GridState};

/// `None` for the NaN "unknown" marker.
pub fn known(value: f64) -> Option<f64> {
    (!value.is_nan()).then_some(value)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitRecord {
    pub cmpfreq: Option<f64>,
    pub otemp: Option<f64>,
    pub htemp: Option<f64>,
    pub stemp: Option<f64>,
    pub shum: Option<u8>,
}

impl From<&ClimateUnitState> for UnitRecord {
    fn from(unit: &ClimateUnitState) -> Self {
        Self {
            cmpfreq: unit.sensors.cmpfreq,
            otemp: unit.sensors.otemp,
            htemp: unit.sensors.htemp,
            stemp: unit.controls.setpoint_temperature,
            shum: unit.controls.setpoint_humidity,
        }
    }
}

/// One telemetry snapshot, as written to every sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub timestamp: DateTime<Local>,
    pub pv_generation_w: Option<f64>,
    pub grid_import_w: Option<f64>,
    pub ac_consumption_w: Option<f64>,
    pub aircons: Vec<UnitRecord>,
}

impl TelemetryRecord {
    pub fn new(
        timestamp: DateTime<Local>,
        grid: &GridState,
        ac_consumption_w: f64,
        units: &[ClimateUnitState],
    ) -> Self {
        Self {
            timestamp,
            pv_generation_w: known(grid.pv_generation_w()),
            grid_import_w: known(grid.grid_import_w()),
            ac_consumption_w: known(ac_consumption_w),
            aircons: units.iter().map(UnitRecord::from).collect(),
        }
    }
}

/// Fan-out to the configured sinks with periodic CSV flushing.
pub struct AnalyticsSinks {
    csv: Option<CsvLogger<File>>,
    recent: Arc<RecentValues>,
    flush_interval: Duration,
    last_flush: Instant,
}

impl AnalyticsSinks {
    pub fn new(
        csv: Option<CsvLogger<File>>,
        recent: Arc<RecentValues>,
        flush_interval: Duration,
    ) -> Self {
        Self {
            csv,
            recent,
            flush_interval,
            last_flush: Instant::now(),
        }
    }

    /// Opens the CSV file named in `cfg`, if any.
    pub fn from_config(cfg: &AnalyticsConfig, unit_count: usize) -> Result<Self> {
        let csv = match &cfg.csv_path {
            Some(path) => {
                let logger = CsvLogger::open(path, unit_count)
                    .with_context(|| format!("opening analytics file {}", path.display()))?;
                info!(path = %path.display(), "logging runtime analytics");
                Some(logger)
            }
            None => None,
        };
        Ok(Self::new(
            csv,
            Arc::new(RecentValues::new(cfg.recent_capacity)),
            Duration::from_secs(cfg.flush_interval_secs),
        ))
    }

    pub fn recent(&self) -> Arc<RecentValues> {
        self.recent.clone()
    }

    pub fn record(&mut self, record: TelemetryRecord) {
        if let Some(csv) = self.csv.as_mut() {
            if let Err(e) = csv.append(&record) {
                warn!(error = %e, "failed to append analytics row");
            }
            if self.last_flush.elapsed() >= self.flush_interval {
                if let Err(e) = self.flush() {
                    warn!(error = %e, "failed to flush analytics file");
                }
            }
        }
        self.recent.push(record);
    }

    pub fn flush(&mut self) -> Result<()> {
        self.last_flush = Instant::now();
        if let Some(csv) = self.csv.as_mut() {
            csv.flush().context("flushing analytics file")?;
        }
        Ok(())
    }
}
