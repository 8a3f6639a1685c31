//! Empirical electrical load estimate for the air conditioners.
//!
//! The outdoor compressor dominates consumption, so its frequency is used as
//! a linear proxy. There is no calibration loop; the figure is coarse.

use crate::domain::ClimateUnitState;

/// Watts per Hz of compressor frequency.
pub const WATTS_PER_COMPRESSOR_HZ: f64 = 20.0;

/// Estimated consumption of one unit in watts, `NaN` when the last poll did
/// not report both compressor frequency and humidity setpoint.
pub fn estimate(unit: &ClimateUnitState) -> f64 {
    let (Some(cmpfreq), Some(shum)) = (unit.sensors.cmpfreq, unit.controls.setpoint_humidity)
    else {
        return f64::NAN;
    };
    let humidifier = if shum > 0 {
        unit.capacity.humidifier_w
    } else {
        0.0
    };
    cmpfreq * WATTS_PER_COMPRESSOR_HZ + humidifier
}

/// Sum of the known unit estimates; `NaN` when no unit produced one.
pub fn aggregate(units: &[ClimateUnitState]) -> f64 {
    units
        .iter()
        .map(estimate)
        .filter(|w| !w.is_nan())
        .fold(None, |acc: Option<f64>, w| Some(acc.unwrap_or(0.0) + w))
        .unwrap_or(f64::NAN)
}

/// Fleet ceiling used to cap increase requests.
pub fn fleet_max_consumption(units: &[ClimateUnitState]) -> f64 {
    units.iter().map(|u| u.capacity.max_consumption_w).sum()
}
