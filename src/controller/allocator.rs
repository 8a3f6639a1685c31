//! Adaptive setpoint allocation across the air conditioner fleet.
//!
//! The heuristics assume heating: raising a setpoint raises consumption and
//! lowering it reduces consumption, until the unit gets within about 4 °C
//! under room temperature where it cuts heating off entirely. The decrease
//! path therefore tracks a margin to that cutoff instead of an absolute
//! floor and stops half a degree short of it so compressors stay primed.

use itertools::Itertools;
use ordered_float::OrderedFloat;
use std::cmp::Reverse;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::ControllerConfig;
use crate::domain::{AcMode, ClimateUnitState, MAX_SETPOINT_C, MIN_SETPOINT_C};

/// Setpoint headroom kept above the heating cutoff, °C.
const RESTART_MARGIN_C: f64 = 3.5;
/// Setpoint at or under which humidification is switched off when reducing.
const HUMIDITY_OFF_SETPOINT_C: f64 = 26.0;

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("{unit} is on in {mode} mode, only HEAT can be steered")]
    NotHeating { unit: String, mode: String },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocatorSettings {
    pub max_htemp: f64,
    pub control_humidity: bool,
}

impl From<&ControllerConfig> for AllocatorSettings {
    fn from(cfg: &ControllerConfig) -> Self {
        Self {
            max_htemp: cfg.max_htemp,
            control_humidity: cfg.control_humidity,
        }
    }
}

/// One single-step setpoint change made by the temperature phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adjustment {
    pub index: usize,
    pub from: f64,
    pub to: f64,
}

#[derive(Debug, Clone)]
struct Slot {
    index: usize,
    name: String,
    htemp: f64,
    stemp: f64,
    shum: u8,
    watts_per_degree: f64,
    humidifier_w: f64,
    max_humidity: u8,
    initial_stemp: f64,
    initial_shum: u8,
    /// Overheat guard pulled this unit down; no further increase logic applies
    guarded: bool,
}

impl Slot {
    fn from_unit(unit: &ClimateUnitState) -> Option<Self> {
        if !unit.is_active() {
            return None;
        }
        let stemp = unit.controls.setpoint_temperature?;
        let shum = unit.controls.setpoint_humidity?;
        Some(Self {
            index: unit.index,
            name: unit.name.clone(),
            htemp: unit.sensors.htemp?,
            stemp,
            shum,
            watts_per_degree: unit.capacity.watts_per_degree_step,
            humidifier_w: unit.capacity.humidifier_w,
            max_humidity: unit.capacity.max_humidity,
            initial_stemp: stemp,
            initial_shum: shum,
            guarded: false,
        })
    }

    fn comfort_metric(&self) -> OrderedFloat<f64> {
        OrderedFloat(self.stemp + self.htemp)
    }

    fn margin(&self) -> f64 {
        self.stemp - self.htemp + RESTART_MARGIN_C
    }

    fn is_changed(&self) -> bool {
        self.stemp != self.initial_stemp || self.shum != self.initial_shum
    }
}

fn is_whole_degree(celsius: f64) -> bool {
    celsius.fract() == 0.0
}

fn raise_step(stemp: f64) -> f64 {
    let step: f64 = if is_whole_degree(stemp) { 1.0 } else { 0.5 };
    step.min(MAX_SETPOINT_C - stemp)
}

fn lower_step(stemp: f64, margin: f64) -> f64 {
    let step: f64 = if is_whole_degree(stemp) && margin >= 1.0 {
        1.0
    } else {
        0.5
    };
    step.min(stemp - MIN_SETPOINT_C)
}

/// Working copy of the active units and the decisions taken on them.
#[derive(Debug, Clone)]
pub struct Plan {
    slots: Vec<Slot>,
    pub adjustments: Vec<Adjustment>,
    /// Target left over once every phase ran
    pub remaining_w: f64,
}

impl Plan {
    fn new(units: &[ClimateUnitState]) -> Self {
        Self {
            slots: units.iter().filter_map(Slot::from_unit).collect(),
            adjustments: Vec::new(),
            remaining_w: 0.0,
        }
    }

    pub fn is_change(&self) -> bool {
        self.slots.iter().any(Slot::is_changed)
    }

    fn record(&mut self, pos: usize, to: f64) {
        let slot = &mut self.slots[pos];
        self.adjustments.push(Adjustment {
            index: slot.index,
            from: slot.stemp,
            to,
        });
        slot.stemp = to;
    }

    fn increase(&mut self, target_w: f64, settings: &AllocatorSettings) {
        let mut remaining = target_w;

        while remaining > 0.0 {
            let candidates: Vec<usize> = self
                .slots
                .iter()
                .positions(|s| s.stemp < MAX_SETPOINT_C)
                .sorted_by_key(|&p| {
                    let s = &self.slots[p];
                    (s.comfort_metric(), OrderedFloat(s.stemp))
                })
                .collect();
            if candidates.is_empty() {
                info!("all air conditioners at max setpoint, cannot increase further");
                break;
            }
            // Coolest unit whose next step still fits the remaining target
            let Some((pos, step)) = candidates
                .into_iter()
                .map(|p| (p, raise_step(self.slots[p].stemp)))
                .find(|&(p, step)| step * self.slots[p].watts_per_degree <= remaining)
            else {
                break;
            };
            let slot = &self.slots[pos];
            let credit = step * slot.watts_per_degree;
            let to = slot.stemp + step;
            info!(unit = %slot.name, setpoint_c = to, "increasing setpoint");
            self.record(pos, to);
            remaining -= credit;
        }

        for slot in self.slots.iter_mut().filter(|s| s.htemp > settings.max_htemp) {
            let mirrored = ((2.0 * settings.max_htemp - slot.htemp) * 2.0).floor() / 2.0;
            let mirrored = mirrored.clamp(MIN_SETPOINT_C, MAX_SETPOINT_C);
            if mirrored < slot.stemp {
                warn!(
                    unit = %slot.name,
                    htemp_c = slot.htemp,
                    max_htemp_c = settings.max_htemp,
                    setpoint_c = mirrored,
                    "room above max temperature, pulling setpoint down"
                );
                remaining += (slot.stemp - mirrored) * slot.watts_per_degree;
                slot.stemp = mirrored;
                slot.guarded = true;
            }
        }

        if settings.control_humidity && remaining > 0.0 {
            let order: Vec<usize> = (0..self.slots.len())
                .filter(|&p| !self.slots[p].guarded)
                .sorted_by_key(|&p| self.slots[p].comfort_metric())
                .collect();
            for pos in order {
                if remaining <= 0.0 {
                    break;
                }
                let slot = &mut self.slots[pos];
                if slot.shum >= slot.max_humidity {
                    continue;
                }
                if slot.shum == 0 {
                    remaining -= slot.humidifier_w;
                }
                slot.shum = slot.max_humidity;
                info!(unit = %slot.name, humidity = slot.shum, "turning humidification on");
            }
        }

        self.remaining_w = remaining;
    }

    fn decrease(&mut self, target_w: f64, settings: &AllocatorSettings) {
        let mut remaining = target_w;

        while remaining < 0.0 {
            let Some(pos) = self
                .slots
                .iter()
                .positions(|s| s.stemp > MIN_SETPOINT_C)
                .min_by_key(|&p| Reverse(OrderedFloat(self.slots[p].margin())))
            else {
                info!("all air conditioners at min setpoint, cannot decrease further");
                break;
            };
            let slot = &self.slots[pos];
            let margin = slot.margin();
            if margin <= 0.0 {
                info!("all air conditioners at heating cutoff margin, cannot decrease further");
                break;
            }
            let step = lower_step(slot.stemp, margin);
            let to = slot.stemp - step;
            remaining += step * slot.watts_per_degree;
            info!(unit = %slot.name, setpoint_c = to, "decreasing setpoint");
            self.record(pos, to);
        }

        if settings.control_humidity {
            for slot in self
                .slots
                .iter_mut()
                .filter(|s| s.stemp <= HUMIDITY_OFF_SETPOINT_C && s.shum > 0)
            {
                slot.shum = 0;
                info!(unit = %slot.name, "turning humidification off");
            }
        }

        self.remaining_w = remaining;
    }

    fn commit(&self, units: &mut [ClimateUnitState]) {
        for slot in self.slots.iter().filter(|s| s.is_changed()) {
            if let Some(unit) = units.iter_mut().find(|u| u.index == slot.index) {
                unit.controls.setpoint_temperature = Some(slot.stemp);
                unit.controls.setpoint_humidity = Some(slot.shum);
                unit.setting_change = true;
            }
        }
    }
}

/// Refuse to steer when any powered unit is outside heating mode.
pub fn check_heating_mode(units: &[ClimateUnitState]) -> Result<(), AllocationError> {
    for unit in units.iter().filter(|u| u.is_powered_on()) {
        if unit.controls.mode != Some(AcMode::Heat) {
            return Err(AllocationError::NotHeating {
                unit: unit.name.clone(),
                mode: unit
                    .controls
                    .mode
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub struct SetpointAllocator {
    settings: AllocatorSettings,
}

impl SetpointAllocator {
    pub fn new(settings: AllocatorSettings) -> Self {
        Self { settings }
    }

    /// Decide new setpoints without touching the units.
    pub fn plan(
        &self,
        units: &[ClimateUnitState],
        target_w: f64,
    ) -> Result<Plan, AllocationError> {
        check_heating_mode(units)?;
        let mut plan = Plan::new(units);
        if target_w.is_nan() || target_w == 0.0 {
            return Ok(plan);
        }
        if target_w > 0.0 {
            plan.increase(target_w, &self.settings);
        } else {
            plan.decrease(target_w, &self.settings);
        }
        Ok(plan)
    }

    /// Move setpoints towards `target_w` and flag changed units for dispatch.
    ///
    /// Returns whether any unit changed. A unit powered on outside heating
    /// mode aborts the whole allocation.
    pub fn allocate(&self, units: &mut [ClimateUnitState], target_w: f64) -> bool {
        if target_w.is_nan() || target_w == 0.0 {
            return false;
        }
        for unit in units.iter().filter(|u| !u.is_powered_on()) {
            warn!(unit = %unit.name, "air conditioner is turned off or unresponsive");
        }
        let plan = match self.plan(units, target_w) {
            Ok(plan) => plan,
            Err(e) => {
                error!(error = %e, "aborting setpoint allocation");
                return false;
            }
        };
        if !plan.is_change() {
            info!(target_w, "no setpoint change possible");
            return false;
        }
        plan.commit(units);
        info!(
            target_w,
            remaining_w = plan.remaining_w,
            steps = plan.adjustments.len(),
            "setpoints allocated"
        );
        true
    }
}
