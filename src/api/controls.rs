//! Runtime tuning through `/api/v1/controls?key=value...`.
//!
//! Every key is parsed against the configuration the loop will use next,
//! then the merged result is checked as a whole. A request either applies
//! completely or not at all.

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

use super::error::ApiError;
use crate::config::{ControllerConfig, MAX_READ_INTERVAL_SECS};
use crate::controller::AppState;
use crate::domain::{AcMode, Power};

/// The tunables as the API names them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlsView {
    pub operation: bool,
    pub min_load: f64,
    pub max_load: f64,
    pub wakeup_threshold: f64,
    pub sleep_threshold: f64,
    pub read_interval: u64,
    pub set_interval: u64,
    pub control_humidity: bool,
    pub max_htemp: f64,
    pub ac_sleep_pow: &'static str,
    pub ac_sleep_mode: &'static str,
    pub ac_sleep_stemp: f64,
    pub ac_sleep_shum: u8,
}

impl From<&ControllerConfig> for ControlsView {
    fn from(cfg: &ControllerConfig) -> Self {
        Self {
            operation: cfg.operation_enabled,
            min_load: cfg.min_load,
            max_load: cfg.max_load,
            wakeup_threshold: cfg.wakeup_threshold,
            sleep_threshold: cfg.sleep_threshold,
            read_interval: cfg.read_interval_secs,
            set_interval: cfg.set_interval_secs,
            control_humidity: cfg.control_humidity,
            max_htemp: cfg.max_htemp,
            ac_sleep_pow: cfg.sleep_profile.power.code(),
            ac_sleep_mode: cfg.sleep_profile.mode.code(),
            ac_sleep_stemp: cfg.sleep_profile.setpoint_temperature,
            ac_sleep_shum: cfg.sleep_profile.setpoint_humidity,
        }
    }
}

const ONOFF: &str = "invalid value must be on/off/0/1/true/false";
const INTEGER: &str = "invalid value, must be an integer";
const NON_NEGATIVE: &str = "invalid value, must be an integer equal to or greater than zero";
const POSITIVE: &str = "invalid value, must be an integer greater than zero";
const READ_INTERVAL: &str = "invalid value, must be an integer from 1 to 3600";
const NUMBER: &str = "invalid value, must be a number";
const POW: &str = "invalid value must be 0 or 1";
const MODE: &str = "invalid value must be (empty) for humidify, 1 for auto, 2 for dry, \
                    3 for cool, 4 for heat, 6 for fan only";
const STEMP: &str = "invalid value, must be an integer from 10 to 32";
const SHUM: &str = "invalid value, must be an integer from 0 to 100 by increments of 5";

fn onoff(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "0" | "off" | "false" => Some(false),
        "1" | "on" | "true" => Some(true),
        _ => None,
    }
}

fn integer(value: &str) -> Option<i64> {
    value.trim().parse().ok()
}

fn parse_field(cfg: &mut ControllerConfig, key: &str, value: &str) -> Result<(), &'static str> {
    match key {
        "operation" => cfg.operation_enabled = onoff(value).ok_or(ONOFF)?,
        "control_humidity" => cfg.control_humidity = onoff(value).ok_or(ONOFF)?,
        "min_load" => cfg.min_load = integer(value).ok_or(INTEGER)? as f64,
        "max_load" => cfg.max_load = integer(value).ok_or(INTEGER)? as f64,
        "sleep_threshold" => {
            cfg.sleep_threshold = integer(value).filter(|n| *n >= 0).ok_or(NON_NEGATIVE)? as f64
        }
        "wakeup_threshold" => {
            cfg.wakeup_threshold = integer(value).filter(|n| *n > 0).ok_or(POSITIVE)? as f64
        }
        "read_interval" => {
            cfg.read_interval_secs = integer(value)
                .and_then(|n| u64::try_from(n).ok())
                .filter(|n| (1..=MAX_READ_INTERVAL_SECS).contains(n))
                .ok_or(READ_INTERVAL)?
        }
        "set_interval" => {
            cfg.set_interval_secs = integer(value)
                .filter(|n| *n > 0)
                .and_then(|n| u64::try_from(n).ok())
                .ok_or(POSITIVE)?
        }
        "max_htemp" => {
            cfg.max_htemp = value
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|t| t.is_finite())
                .ok_or(NUMBER)?
        }
        "ac_sleep_pow" => cfg.sleep_profile.power = Power::from_code(value).ok_or(POW)?,
        "ac_sleep_mode" => cfg.sleep_profile.mode = AcMode::from_code(value).ok_or(MODE)?,
        "ac_sleep_stemp" => {
            cfg.sleep_profile.setpoint_temperature = integer(value)
                .filter(|n| (10..=32).contains(n))
                .ok_or(STEMP)? as f64
        }
        "ac_sleep_shum" => {
            cfg.sleep_profile.setpoint_humidity = integer(value)
                .filter(|n| (0..=100).contains(n) && n % 5 == 0)
                .and_then(|n| u8::try_from(n).ok())
                .ok_or(SHUM)?
        }
        _ => return Err("invalid key"),
    }
    Ok(())
}

/// Merge `query` into `current`, collecting one reason per rejected field.
pub fn parse_controls(
    current: &ControllerConfig,
    query: &[(String, String)],
) -> Result<ControllerConfig, BTreeMap<String, String>> {
    let mut next = current.clone();
    let mut errors = BTreeMap::new();
    for (key, value) in query {
        if let Err(reason) = parse_field(&mut next, key, value) {
            errors.insert(key.clone(), reason.to_string());
        }
    }
    for (field, reason) in next.band_errors() {
        errors.insert(field.to_string(), reason.to_string());
    }
    if errors.is_empty() {
        Ok(next)
    } else {
        Err(errors)
    }
}

fn changed_fields(before: &ControllerConfig, after: &ControllerConfig) -> Vec<(String, String)> {
    let (Ok(serde_json::Value::Object(before)), Ok(serde_json::Value::Object(after))) = (
        serde_json::to_value(ControlsView::from(before)),
        serde_json::to_value(ControlsView::from(after)),
    ) else {
        return Vec::new();
    };
    after
        .into_iter()
        .filter(|(key, value)| before.get(key) != Some(value))
        .map(|(key, value)| (key, value.to_string()))
        .collect()
}

/// GET|POST /api/v1/controls
pub async fn set_controls(
    State(st): State<AppState>,
    Query(query): Query<Vec<(String, String)>>,
) -> Result<impl IntoResponse, ApiError> {
    let mut result = Err(BTreeMap::new());
    // Parsed under the sender's lock
    st.desired_config.send_if_modified(|cfg| {
        result = parse_controls(cfg, &query);
        match &result {
            Ok(next) if *next != *cfg => {
                for (key, value) in changed_fields(cfg, next) {
                    info!(%key, %value, "control setting changed");
                }
                *cfg = next.clone();
                true
            }
            _ => false,
        }
    });
    let next = result.map_err(ApiError::InvalidFields)?;
    Ok(Json(ControlsView::from(&next)))
}
