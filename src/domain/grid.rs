use serde::{Deserialize, Serialize};

/// Grid connection reading for one poll.
///
/// Either both values are known or both are `NaN`; construct through
/// [`GridState::new`] or [`GridState::unknown`] to keep it that way.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GridState {
    /// Net import from the grid in watts, negative when exporting.
    grid_import_w: f64,
    /// Instantaneous PV generation in watts.
    pv_generation_w: f64,
}

impl GridState {
    pub fn new(grid_import_w: f64, pv_generation_w: f64) -> Self {
        if grid_import_w.is_nan() || pv_generation_w.is_nan() {
            return Self::unknown();
        }
        Self {
            grid_import_w,
            pv_generation_w,
        }
    }

    /// Reading of a failed poll.
    pub fn unknown() -> Self {
        Self {
            grid_import_w: f64::NAN,
            pv_generation_w: f64::NAN,
        }
    }

    pub fn grid_import_w(&self) -> f64 {
        self.grid_import_w
    }

    pub fn pv_generation_w(&self) -> f64 {
        self.pv_generation_w
    }

    pub fn is_known(&self) -> bool {
        !self.grid_import_w.is_nan()
    }

    pub fn is_exporting(&self) -> bool {
        self.grid_import_w < 0.0
    }
}

impl Default for GridState {
    fn default() -> Self {
        Self::unknown()
    }
}
