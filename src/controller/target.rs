use serde::Serialize;

use crate::config::ControllerConfig;

/// Why the calculator settled on its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TargetReason {
    /// Grid import or consumption unknown
    Unknown,
    /// Import already within the band
    DeadBand,
    Reduce,
    Increase,
    /// Over the band but the air conditioners draw nothing
    CannotReduce,
    /// Under the band but the fleet is already at its ceiling
    CannotIncrease,
}

/// Signed watts the fleet should absorb (positive) or release (negative).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TargetDecision {
    pub watts: f64,
    pub reason: TargetReason,
}

impl TargetDecision {
    fn new(watts: f64, reason: TargetReason) -> Self {
        Self { watts, reason }
    }

    /// True when the allocator has something to do.
    pub fn is_actionable(&self) -> bool {
        !self.watts.is_nan() && self.watts != 0.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TargetCalculator {
    min_load: f64,
    max_load: f64,
    midpoint: f64,
    fleet_max_w: f64,
}

impl TargetCalculator {
    pub fn new(cfg: &ControllerConfig, fleet_max_w: f64) -> Self {
        Self {
            min_load: cfg.min_load,
            max_load: cfg.max_load,
            midpoint: cfg.midpoint(),
            fleet_max_w,
        }
    }

    pub fn target(&self, grid_import_w: f64, ac_consumption_w: f64) -> f64 {
        self.evaluate(grid_import_w, ac_consumption_w).watts
    }

    pub fn evaluate(&self, grid_import_w: f64, ac_consumption_w: f64) -> TargetDecision {
        if grid_import_w.is_nan() || ac_consumption_w.is_nan() {
            return TargetDecision::new(f64::NAN, TargetReason::Unknown);
        }
        if self.min_load < grid_import_w && grid_import_w < self.max_load {
            return TargetDecision::new(0.0, TargetReason::DeadBand);
        }
        if grid_import_w > self.max_load {
            if ac_consumption_w > 0.0 {
                let watts = -(grid_import_w - self.midpoint).min(ac_consumption_w);
                return TargetDecision::new(watts, TargetReason::Reduce);
            }
            return TargetDecision::new(0.0, TargetReason::CannotReduce);
        }
        if grid_import_w < self.min_load {
            if ac_consumption_w < self.fleet_max_w {
                let headroom = self.fleet_max_w - ac_consumption_w;
                let watts = (self.midpoint - grid_import_w).min(headroom);
                return TargetDecision::new(watts, TargetReason::Increase);
            }
            return TargetDecision::new(0.0, TargetReason::CannotIncrease);
        }
        // Exactly on a band edge
        TargetDecision::new(0.0, TargetReason::DeadBand)
    }
}
