//! Unit I/O: timed polls and fire-and-forget control writes, serialized per
//! unit so a poll never overlaps a write that is still in flight.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::domain::{ClimateError, ClimateUnit, ClimateUnitState, ControlCommand, Controls, Sensors};

/// Result of one poll. `None` fields failed and keep their previous value.
#[derive(Debug, Default)]
pub struct UnitReading {
    pub sensors: Option<Sensors>,
    pub controls: Option<Controls>,
    pub name: Option<String>,
}

impl UnitReading {
    pub fn apply(self, state: &mut ClimateUnitState) {
        if let Some(sensors) = self.sensors {
            state.sensors = sensors;
        }
        if let Some(controls) = self.controls {
            state.controls = controls;
        }
        if let Some(name) = self.name {
            state.resolve_name(name);
        }
    }
}

/// Handle on one physical unit.
#[derive(Clone)]
pub struct UnitLink {
    device: Arc<dyn ClimateUnit>,
    io_lock: Arc<Mutex<()>>,
}

async fn timed<T>(
    io_timeout: Duration,
    what: &'static str,
    unit: &str,
    fut: impl std::future::Future<Output = Result<T, ClimateError>>,
) -> Option<T> {
    match timeout(io_timeout, fut).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            warn!(unit, error = %e, "{what} failed");
            None
        }
        Err(_) => {
            warn!(unit, error = %ClimateError::Timeout, "{what} failed");
            None
        }
    }
}

impl UnitLink {
    pub fn new(device: Arc<dyn ClimateUnit>) -> Self {
        Self {
            device,
            io_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Read sensors and controls concurrently, plus the name while it is still
    /// unresolved.
    pub async fn poll(&self, state: &ClimateUnitState, io_timeout: Duration) -> UnitReading {
        let _io = self.io_lock.lock().await;
        let unit = state.name.as_str();
        let name = async {
            if state.name_resolved {
                return None;
            }
            match timed(io_timeout, "name lookup", unit, self.device.read_name()).await {
                Some(Some(name)) => Some(name),
                // Unit has no name of its own; keep the placeholder
                Some(None) => Some(state.name.clone()),
                None => None,
            }
        };
        let device = &self.device;
        let (sensors, controls, name) = tokio::join!(
            timed(io_timeout, "sensor read", unit, device.read_sensors()),
            timed(io_timeout, "control read", unit, device.read_controls()),
            name,
        );
        UnitReading {
            sensors,
            controls,
            name,
        }
    }

    /// Send `command` in the background.
    ///
    /// The unit lock is taken before returning, so the next poll of this unit
    /// waits for the write to settle.
    pub async fn write(
        &self,
        unit: String,
        command: ControlCommand,
        io_timeout: Duration,
    ) -> JoinHandle<()> {
        let guard = self.io_lock.clone().lock_owned().await;
        let device = self.device.clone();
        tokio::spawn(async move {
            let _io = guard;
            match timeout(io_timeout, device.write_controls(&command)).await {
                Ok(Ok(())) => info!(
                    unit = %unit,
                    power = %command.power,
                    mode = %command.mode,
                    setpoint_c = command.setpoint_temperature,
                    humidity = command.setpoint_humidity,
                    "controls written"
                ),
                Ok(Err(e)) if e.is_protocol_failure() => {
                    error!(unit = %unit, error = %e, "unit rejected controls")
                }
                Ok(Err(e)) => warn!(unit = %unit, error = %e, "control write failed"),
                Err(_) => {
                    warn!(unit = %unit, error = %ClimateError::Timeout, "control write failed")
                }
            }
        })
    }
}

/// Push the controls of every unit flagged with `setting_change` and clear the
/// flag. With `operation_enabled` off the commands are only logged.
pub async fn dispatch_changes(
    links: &[UnitLink],
    states: &mut [ClimateUnitState],
    operation_enabled: bool,
    io_timeout: Duration,
) -> Vec<JoinHandle<()>> {
    let mut writes = Vec::new();
    for (link, state) in links.iter().zip(states.iter_mut()) {
        if !std::mem::take(&mut state.setting_change) {
            continue;
        }
        let Some(command) = state.controls.to_command() else {
            warn!(unit = %state.name, "incomplete controls, not dispatching");
            continue;
        };
        if !operation_enabled {
            warn!(
                unit = %state.name,
                setpoint_c = command.setpoint_temperature,
                humidity = command.setpoint_humidity,
                "operation disabled, controls not sent"
            );
            continue;
        }
        writes.push(link.write(state.name.clone(), command, io_timeout).await);
    }
    writes
}

/// Best-effort push of one command to every unit.
pub async fn broadcast(
    links: &[UnitLink],
    states: &[ClimateUnitState],
    command: ControlCommand,
    operation_enabled: bool,
    io_timeout: Duration,
) -> Vec<JoinHandle<()>> {
    if !operation_enabled {
        warn!(
            setpoint_c = command.setpoint_temperature,
            "operation disabled, sleep profile not sent"
        );
        return Vec::new();
    }
    let mut writes = Vec::with_capacity(links.len());
    for (link, state) in links.iter().zip(states) {
        writes.push(link.write(state.name.clone(), command, io_timeout).await);
    }
    writes
}
