use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use validator::{Validate, ValidationError};

use crate::domain::{AcMode, ControlCommand, Power, UnitCapacity};

/// Longest accepted poll interval, seconds
pub const MAX_READ_INTERVAL_SECS: u64 = 3600;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Config {
    pub server: ServerConfig,
    #[validate(nested)]
    pub controller: ControllerConfig,
    pub power_source: PowerSourceConfig,
    #[serde(default)]
    pub aircons: Vec<AirconConfig>,
    #[serde(default)]
    #[validate(nested)]
    pub analytics: AnalyticsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub enable_cors: bool,
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

/// Controller tuning. Replaced as a whole between cycles, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_bands"))]
pub struct ControllerConfig {
    /// Lower edge of the target grid import band, W
    pub min_load: f64,
    /// Upper edge of the target grid import band, W
    pub max_load: f64,
    #[validate(range(min = 0.0))]
    pub sleep_threshold: f64,
    pub wakeup_threshold: f64,
    #[validate(range(min = 1, max = 3600))]
    pub read_interval_secs: u64,
    #[validate(range(min = 10))]
    pub set_interval_secs: u64,
    /// Indoor temperature above which setpoints are pulled down
    pub max_htemp: f64,
    pub control_humidity: bool,
    /// When false, commands are computed and logged but never sent
    pub operation_enabled: bool,
    #[serde(default = "default_startup_grace_reads")]
    #[validate(range(max = 100))]
    pub startup_grace_reads: u32,
    #[serde(default = "default_sleep_read_interval_multiplier")]
    #[validate(range(min = 1, max = 100))]
    pub sleep_read_interval_multiplier: u32,
    #[serde(default = "default_io_timeout_ms")]
    #[validate(range(min = 100))]
    pub io_timeout_ms: u64,
    pub sleep_profile: SleepProfile,
}

fn default_startup_grace_reads() -> u32 {
    3
}
fn default_sleep_read_interval_multiplier() -> u32 {
    10
}
fn default_io_timeout_ms() -> u64 {
    3000
}

fn validate_bands(cfg: &ControllerConfig) -> Result<(), ValidationError> {
    match cfg.band_errors().first() {
        None => Ok(()),
        Some((_, message)) => {
            let error = ValidationError::new("band_order");
            Err(error.with_message((*message).into()))
        }
    }
}

impl ControllerConfig {
    /// Ordering rules between fields, keyed by the field reported to the user.
    pub fn band_errors(&self) -> Vec<(&'static str, &'static str)> {
        let mut errors = Vec::new();
        if !(self.min_load < self.max_load) {
            errors.push(("min_load", "min_load must be lower than max_load"));
        }
        if !(self.sleep_threshold < self.wakeup_threshold) {
            errors.push((
                "wakeup_threshold",
                "wakeup_threshold must be greater than sleep_threshold",
            ));
        }
        if self.set_interval_secs < 10 {
            errors.push(("set_interval", "must be at least 10 seconds"));
        }
        if self.io_timeout_ms >= self.read_interval_secs.saturating_mul(1000) {
            errors.push((
                "read_interval",
                "read_interval must be longer than the I/O timeout",
            ));
        }
        errors
    }

    pub fn midpoint(&self) -> f64 {
        (self.max_load + self.min_load) / 2.0
    }

    pub fn read_interval(&self) -> Duration {
        Duration::from_secs(self.read_interval_secs)
    }

    pub fn set_interval(&self) -> Duration {
        Duration::from_secs(self.set_interval_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

/// Controls pushed to every unit when PV generation stops.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SleepProfile {
    pub power: Power,
    pub mode: AcMode,
    pub setpoint_temperature: f64,
    pub setpoint_humidity: u8,
}

impl SleepProfile {
    pub fn to_command(&self) -> ControlCommand {
        ControlCommand {
            power: self.power,
            mode: self.mode,
            setpoint_temperature: self.setpoint_temperature,
            setpoint_humidity: self.setpoint_humidity,
        }
    }
}

impl Default for SleepProfile {
    fn default() -> Self {
        Self {
            power: Power::On,
            mode: AcMode::Heat,
            setpoint_temperature: 22.0,
            setpoint_humidity: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PowerSourceConfig {
    Simulated {
        #[serde(default = "default_sim_import_w")]
        grid_import_w: f64,
        #[serde(default = "default_sim_pv_w")]
        pv_generation_w: f64,
        #[serde(default)]
        jitter_w: f64,
    },
    /// SolarEdge monitoring portal, `currentPowerFlow` endpoint
    SolaredgeWeb {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    /// SolarEdge inverter with attached meter over Modbus TCP
    SolaredgeModbus {
        host: String,
        #[serde(default = "default_modbus_port")]
        port: u16,
        #[serde(default = "default_modbus_unit_id")]
        unit_id: u8,
    },
}

fn default_sim_import_w() -> f64 {
    300.0
}
fn default_sim_pv_w() -> f64 {
    1500.0
}
fn default_modbus_port() -> u16 {
    502
}
fn default_modbus_unit_id() -> u8 {
    1
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AirconKind {
    #[default]
    Simulated,
    Daikin,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AirconConfig {
    #[serde(default)]
    pub kind: AirconKind,
    /// Base URL of the wifi adapter, e.g. `http://192.168.1.101`
    #[serde(default)]
    pub host: String,
    /// Name used by simulated units
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub capacity: UnitCapacity,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AnalyticsConfig {
    /// CSV file to append to; no file logging when absent
    pub csv_path: Option<PathBuf>,
    #[validate(range(min = 1))]
    pub flush_interval_secs: u64,
    #[validate(range(min = 1))]
    pub recent_capacity: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            csv_path: Some(PathBuf::from("energy_data.csv")),
            flush_interval_secs: 120,
            recent_capacity: 100,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("BRICK__").split("__"));
        Self::from_figment(figment)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Self::from_figment(Figment::from(Toml::string(toml)))
    }

    fn from_figment(figment: Figment) -> Result<Self> {
        let cfg: Config = figment.extract().context("invalid configuration")?;
        cfg.validate().context("configuration rejected")?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
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
        kind = "daikin"
        host = "http://192.168.1.101"
        max_humidity = 50

        [[aircons]]
        kind = "simulated"
        name = "Bedrooms"
        watts_per_degree_step = 150
    "#;

    #[test]
    fn test_sample_config_loads() {
        let cfg = Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.controller.midpoint(), 450.0);
        assert_eq!(cfg.controller.startup_grace_reads, 3);
        assert_eq!(cfg.controller.io_timeout(), Duration::from_millis(3000));
        assert_eq!(cfg.aircons.len(), 2);
        assert_eq!(cfg.aircons[0].kind, AirconKind::Daikin);
        assert_eq!(cfg.aircons[1].capacity.watts_per_degree_step, 150.0);
        assert_eq!(cfg.aircons[1].capacity.max_consumption_w, 1400.0);
        assert!(matches!(cfg.power_source, PowerSourceConfig::Simulated { .. }));
        assert_eq!(cfg.controller.sleep_profile.mode, AcMode::Heat);
    }

    #[test]
    fn test_inverted_band_is_rejected() {
        let broken = SAMPLE.replace("max_load = 700", "max_load = 100");
        assert!(Config::from_toml_str(&broken).is_err());
    }

    #[test]
    fn test_short_set_interval_is_rejected() {
        let broken = SAMPLE.replace("set_interval_secs = 60", "set_interval_secs = 5");
        assert!(Config::from_toml_str(&broken).is_err());
    }

    #[test]
    fn test_read_interval_upper_bound() {
        let broken = SAMPLE.replace("read_interval_secs = 5", "read_interval_secs = 3601");
        assert!(Config::from_toml_str(&broken).is_err());
        let longest = SAMPLE.replace("read_interval_secs = 5", "read_interval_secs = 3600");
        assert!(Config::from_toml_str(&longest).is_ok());
    }

    #[test]
    fn test_band_errors_name_the_fields() {
        let mut cfg = Config::from_toml_str(SAMPLE).unwrap().controller;
        cfg.sleep_threshold = 500.0;
        cfg.read_interval_secs = 2;
        let fields: Vec<_> = cfg.band_errors().into_iter().map(|(k, _)| k).collect();
        assert_eq!(fields, vec!["wakeup_threshold", "read_interval"]);
    }
}
