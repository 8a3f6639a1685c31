//! Daikin BRP072A42 wifi adapter.
//!
//! Every endpoint is a plain GET answering `key=value` pairs separated by
//! commas, e.g. `ret=OK,htemp=21.0,hhum=-,otemp=7.0,err=0,cmpfreq=32`.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::domain::{AcMode, ClimateError, ClimateUnit, ControlCommand, Controls, Power, Sensors};

const SENSOR_INFO: &str = "/aircon/get_sensor_info";
const CONTROL_INFO: &str = "/aircon/get_control_info";
const SET_CONTROL_INFO: &str = "/aircon/set_control_info";
const BASIC_INFO: &str = "/common/basic_info";

/// Humidity level reported for continuous humidification
const SHUM_CONTINUE: u8 = 100;

#[derive(Debug, Clone)]
pub struct DaikinAircon {
    base_url: String,
    client: reqwest::Client,
}

/// Parsed adapter reply.
#[derive(Debug, Default, PartialEq)]
pub struct Reply(HashMap<String, String>);

impl Reply {
    pub fn parse(body: &str) -> Result<Self, ClimateError> {
        let pairs: HashMap<String, String> = body
            .trim()
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();
        if pairs.is_empty() {
            return Err(ClimateError::Malformed(body.to_string()));
        }
        let reply = Self(pairs);
        match reply.get("ret") {
            Some(ret) if !ret.eq_ignore_ascii_case("OK") => {
                Err(ClimateError::Rejected(format!("ret={ret}")))
            }
            _ => Ok(reply),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Numeric value; `-`, `--` and similar placeholders are absent.
    pub fn number(&self, key: &str) -> Option<f64> {
        let value = self.get(key)?;
        value.parse::<f64>().ok().filter(|v| v.is_finite())
    }

    pub fn sensors(&self) -> Sensors {
        Sensors {
            htemp: self.number("htemp"),
            otemp: self.number("otemp"),
            hhum: self.number("hhum"),
            cmpfreq: self.number("cmpfreq"),
        }
    }

    pub fn controls(&self) -> Controls {
        let setpoint_humidity = self.get("shum").and_then(|v| {
            if v.eq_ignore_ascii_case("CONTINUE") {
                Some(SHUM_CONTINUE)
            } else {
                v.parse().ok()
            }
        });
        Controls {
            power: self.get("pow").and_then(Power::from_code),
            mode: self.get("mode").and_then(AcMode::from_code),
            setpoint_temperature: self.number("stemp"),
            setpoint_humidity,
        }
    }

    pub fn name(&self) -> Option<String> {
        let raw = self.get("name")?;
        let decoded = match urlencoding::decode(raw) {
            Ok(name) => name.into_owned(),
            Err(_) => raw.to_string(),
        };
        (!decoded.is_empty()).then_some(decoded)
    }
}

fn transport_error(e: reqwest::Error) -> ClimateError {
    if e.is_timeout() {
        ClimateError::Timeout
    } else {
        ClimateError::Transport(e.to_string())
    }
}

impl DaikinAircon {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Reply, ClimateError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "daikin request");
        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;
        let status = resp.status();
        let body = resp.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(ClimateError::Transport(format!("HTTP {status}: {body}")));
        }
        Reply::parse(&body)
    }
}

pub fn command_query(command: &ControlCommand) -> Vec<(&'static str, String)> {
    vec![
        ("pow", command.power.code().to_string()),
        ("mode", command.mode.code().to_string()),
        ("stemp", format!("{:.1}", command.setpoint_temperature)),
        ("shum", command.setpoint_humidity.to_string()),
    ]
}

#[async_trait]
impl ClimateUnit for DaikinAircon {
    async fn read_sensors(&self) -> Result<Sensors, ClimateError> {
        Ok(self.get(SENSOR_INFO, &[]).await?.sensors())
    }

    async fn read_controls(&self) -> Result<Controls, ClimateError> {
        Ok(self.get(CONTROL_INFO, &[]).await?.controls())
    }

    async fn write_controls(&self, command: &ControlCommand) -> Result<(), ClimateError> {
        self.get(SET_CONTROL_INFO, &command_query(command)).await?;
        Ok(())
    }

    async fn read_name(&self) -> Result<Option<String>, ClimateError> {
        Ok(self.get(BASIC_INFO, &[]).await?.name())
    }
}
