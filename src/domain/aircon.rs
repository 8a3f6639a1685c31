use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Lowest setpoint the controller will ever press.
pub const MIN_SETPOINT_C: f64 = 10.0;
/// Highest setpoint the controller will ever press.
pub const MAX_SETPOINT_C: f64 = 30.0;

/// Air conditioner specific errors
#[derive(Debug, Error)]
pub enum ClimateError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Request timed out")]
    Timeout,
    #[error("Command rejected by unit: {0}")]
    Rejected(String),
    #[error("Malformed reply: {0}")]
    Malformed(String),
}

impl ClimateError {
    /// True when the unit answered but refused the command.
    pub fn is_protocol_failure(&self) -> bool {
        matches!(self, ClimateError::Rejected(_))
    }
}

/// Climate unit trait - abstraction over a Daikin wifi adapter or a simulated unit
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClimateUnit: Send + Sync {
    async fn read_sensors(&self) -> Result<Sensors, ClimateError>;
    async fn read_controls(&self) -> Result<Controls, ClimateError>;
    async fn write_controls(&self, command: &ControlCommand) -> Result<(), ClimateError>;

    /// Device-reported display name, if the unit exposes one.
    async fn read_name(&self) -> Result<Option<String>, ClimateError>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Power {
    Off,
    On,
}

impl Power {
    pub fn code(self) -> &'static str {
        match self {
            Power::Off => "0",
            Power::On => "1",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "0" => Some(Power::Off),
            "1" => Some(Power::On),
            _ => None,
        }
    }
}

/// Operating mode. Only `Heat` is steerable by the allocator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AcMode {
    Humidify,
    Auto,
    Dry,
    Cool,
    Heat,
    FanOnly,
}

impl AcMode {
    pub fn code(self) -> &'static str {
        match self {
            AcMode::Humidify => "",
            AcMode::Auto => "1",
            AcMode::Dry => "2",
            AcMode::Cool => "3",
            AcMode::Heat => "4",
            AcMode::FanOnly => "6",
        }
    }

    /// Codes `0`, `5` and `7` are reported by some firmwares but carry no
    /// documented meaning.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "" => Some(AcMode::Humidify),
            "1" => Some(AcMode::Auto),
            "2" => Some(AcMode::Dry),
            "3" => Some(AcMode::Cool),
            "4" => Some(AcMode::Heat),
            "6" => Some(AcMode::FanOnly),
            _ => None,
        }
    }
}

/// Measured values from the last successful sensor poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sensors {
    /// Indoor temperature, °C
    pub htemp: Option<f64>,
    /// Outdoor temperature, °C
    pub otemp: Option<f64>,
    /// Indoor relative humidity, %
    pub hhum: Option<f64>,
    /// Outdoor compressor frequency, Hz
    pub cmpfreq: Option<f64>,
}

/// Target values from the last successful control poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Controls {
    pub power: Option<Power>,
    pub mode: Option<AcMode>,
    pub setpoint_temperature: Option<f64>,
    /// Humidification level, 0 is off
    pub setpoint_humidity: Option<u8>,
}

impl Controls {
    /// Full command for these controls, `None` when any field is unknown.
    pub fn to_command(&self) -> Option<ControlCommand> {
        Some(ControlCommand {
            power: self.power?,
            mode: self.mode?,
            setpoint_temperature: self.setpoint_temperature?,
            setpoint_humidity: self.setpoint_humidity?,
        })
    }
}

/// Complete control write sent to a unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub power: Power,
    pub mode: AcMode,
    pub setpoint_temperature: f64,
    pub setpoint_humidity: u8,
}

impl From<ControlCommand> for Controls {
    fn from(cmd: ControlCommand) -> Self {
        Self {
            power: Some(cmd.power),
            mode: Some(cmd.mode),
            setpoint_temperature: Some(cmd.setpoint_temperature),
            setpoint_humidity: Some(cmd.setpoint_humidity),
        }
    }
}

/// Static electrical parameters of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitCapacity {
    #[serde(default = "default_max_consumption_w")]
    pub max_consumption_w: f64,
    /// Estimated watts per setpoint degree
    #[serde(default = "default_watts_per_degree_step")]
    pub watts_per_degree_step: f64,
    #[serde(default = "default_humidifier_w")]
    pub humidifier_w: f64,
    /// Humidity level used when the controller turns humidification on
    #[serde(default = "default_max_humidity")]
    pub max_humidity: u8,
}

fn default_max_consumption_w() -> f64 {
    1400.0
}
fn default_watts_per_degree_step() -> f64 {
    200.0
}
fn default_humidifier_w() -> f64 {
    200.0
}
fn default_max_humidity() -> u8 {
    50
}

impl Default for UnitCapacity {
    fn default() -> Self {
        Self {
            max_consumption_w: default_max_consumption_w(),
            watts_per_degree_step: default_watts_per_degree_step(),
            humidifier_w: default_humidifier_w(),
            max_humidity: default_max_humidity(),
        }
    }
}

/// Controller-side view of one physical unit.
#[derive(Debug, Clone, Serialize)]
pub struct ClimateUnitState {
    pub index: usize,
    pub name: String,
    #[serde(skip)]
    pub name_resolved: bool,
    pub sensors: Sensors,
    pub controls: Controls,
    pub capacity: UnitCapacity,
    /// Controls were modified this cycle and must be pushed to the unit
    #[serde(skip)]
    pub setting_change: bool,
}

impl ClimateUnitState {
    pub fn new(index: usize, capacity: UnitCapacity) -> Self {
        Self {
            index,
            name: Self::placeholder_name(index),
            name_resolved: false,
            sensors: Sensors::default(),
            controls: Controls::default(),
            capacity,
            setting_change: false,
        }
    }

    pub fn placeholder_name(index: usize) -> String {
        format!("aircon{index}")
    }

    pub fn resolve_name(&mut self, name: String) {
        self.name = name;
        self.name_resolved = true;
    }

    pub fn is_powered_on(&self) -> bool {
        self.controls.power == Some(Power::On)
    }

    /// Units the allocator may steer this cycle.
    pub fn is_active(&self) -> bool {
        self.is_powered_on()
            && self.controls.setpoint_temperature.is_some()
            && self.controls.setpoint_humidity.is_some()
            && self.sensors.htemp.is_some()
    }
}

#[derive(Debug, Clone)]
struct SimulatedAirconState {
    name: Option<String>,
    sensors: Sensors,
    controls: Controls,
    fail_reads: bool,
    reject_writes: bool,
    writes: Vec<ControlCommand>,
}

/// Simulated air conditioner for development and testing
///
/// Compressor frequency follows the gap between setpoint and room
/// temperature so the estimator sees a plausible load.
#[derive(Debug, Clone)]
pub struct SimulatedAircon {
    state: Arc<RwLock<SimulatedAirconState>>,
}

impl SimulatedAircon {
    pub fn new(name: Option<String>, sensors: Sensors, controls: Controls) -> Self {
        Self {
            state: Arc::new(RwLock::new(SimulatedAirconState {
                name,
                sensors,
                controls,
                fail_reads: false,
                reject_writes: false,
                writes: Vec::new(),
            })),
        }
    }

    /// A unit heating a 20 °C room towards 22 °C.
    pub fn heating(name: &str) -> Self {
        let sensors = Sensors {
            htemp: Some(20.0),
            otemp: Some(8.0),
            hhum: Some(40.0),
            cmpfreq: Some(30.0),
        };
        let controls = Controls {
            power: Some(Power::On),
            mode: Some(AcMode::Heat),
            setpoint_temperature: Some(22.0),
            setpoint_humidity: Some(0),
        };
        Self::new(Some(name.to_string()), sensors, controls)
    }

    pub async fn set_sensors(&self, sensors: Sensors) {
        self.state.write().await.sensors = sensors;
    }

    pub async fn set_controls(&self, controls: Controls) {
        self.state.write().await.controls = controls;
    }

    pub async fn set_fail_reads(&self, fail: bool) {
        self.state.write().await.fail_reads = fail;
    }

    pub async fn set_reject_writes(&self, reject: bool) {
        self.state.write().await.reject_writes = reject;
    }

    /// Every command accepted so far, oldest first.
    pub async fn writes(&self) -> Vec<ControlCommand> {
        self.state.read().await.writes.clone()
    }
}

fn simulated_compressor_hz(command: &ControlCommand, htemp: Option<f64>) -> f64 {
    if command.power == Power::Off {
        return 0.0;
    }
    let room = htemp.unwrap_or(command.setpoint_temperature);
    ((command.setpoint_temperature - room + 4.0).max(0.0) * 6.0).min(70.0)
}

#[async_trait]
impl ClimateUnit for SimulatedAircon {
    async fn read_sensors(&self) -> Result<Sensors, ClimateError> {
        let st = self.state.read().await;
        if st.fail_reads {
            return Err(ClimateError::Timeout);
        }
        Ok(st.sensors.clone())
    }

    async fn read_controls(&self) -> Result<Controls, ClimateError> {
        let st = self.state.read().await;
        if st.fail_reads {
            return Err(ClimateError::Timeout);
        }
        Ok(st.controls.clone())
    }

    async fn write_controls(&self, command: &ControlCommand) -> Result<(), ClimateError> {
        let mut st = self.state.write().await;
        if st.reject_writes {
            return Err(ClimateError::Rejected("ret=PARAM NG".to_string()));
        }
        st.sensors.cmpfreq = Some(simulated_compressor_hz(command, st.sensors.htemp));
        st.controls = (*command).into();
        st.writes.push(*command);
        Ok(())
    }

    async fn read_name(&self) -> Result<Option<String>, ClimateError> {
        let st = self.state.read().await;
        if st.fail_reads {
            return Err(ClimateError::Timeout);
        }
        Ok(st.name.clone())
    }
}
