use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::daikin::DaikinAircon;
#[cfg(feature = "modbus")]
use super::modbus::SolarEdgeModbus;
use super::solaredge::SolarEdgeWeb;
use crate::config::{AirconConfig, AirconKind, Config, PowerSourceConfig};
use crate::domain::{
    ClimateUnit, PowerSource, SimulatedAircon, SimulatedPowerSource, UnitCapacity,
};

/// Collaborators the control loop runs against.
pub struct Devices {
    pub power_source: Arc<dyn PowerSource>,
    pub aircons: Vec<(Arc<dyn ClimateUnit>, UnitCapacity)>,
}

/// Factory for creating hardware device instances
///
/// Modbus inverters are only available with the `modbus` feature; asking for
/// one in a build without it is a configuration error.
pub struct DeviceFactory {
    io_timeout: Duration,
}

impl DeviceFactory {
    pub fn new(io_timeout: Duration) -> Self {
        Self { io_timeout }
    }

    pub fn build(cfg: &Config) -> Result<Devices> {
        let factory = Self::new(cfg.controller.io_timeout());
        let power_source = factory.create_power_source(&cfg.power_source)?;
        let aircons = cfg
            .aircons
            .iter()
            .enumerate()
            .map(|(index, aircon)| {
                let unit = factory
                    .create_aircon(index, aircon)
                    .with_context(|| format!("air conditioner #{index}"))?;
                Ok((unit, aircon.capacity))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Devices {
            power_source,
            aircons,
        })
    }

    pub fn create_power_source(&self, cfg: &PowerSourceConfig) -> Result<Arc<dyn PowerSource>> {
        match cfg {
            PowerSourceConfig::Simulated {
                grid_import_w,
                pv_generation_w,
                jitter_w,
            } => {
                info!(grid_import_w, pv_generation_w, "using simulated inverter");
                let source = SimulatedPowerSource::new(*grid_import_w, *pv_generation_w);
                Ok(Arc::new(source.with_jitter(*jitter_w)))
            }
            PowerSourceConfig::SolaredgeWeb { url, headers } => {
                info!(%url, "using SolarEdge web API");
                let source = SolarEdgeWeb::new(url.clone(), headers, self.io_timeout)?;
                Ok(Arc::new(source))
            }
            #[cfg(feature = "modbus")]
            PowerSourceConfig::SolaredgeModbus {
                host,
                port,
                unit_id,
            } => {
                info!(%host, port, unit_id, "using SolarEdge Modbus TCP");
                let source = SolarEdgeModbus::new(host, *port, *unit_id, self.io_timeout);
                Ok(Arc::new(source))
            }
            #[cfg(not(feature = "modbus"))]
            PowerSourceConfig::SolaredgeModbus { .. } => {
                anyhow::bail!("solaredge_modbus power source requires the 'modbus' feature")
            }
        }
    }

    pub fn create_aircon(&self, index: usize, cfg: &AirconConfig) -> Result<Arc<dyn ClimateUnit>> {
        match cfg.kind {
            AirconKind::Simulated => {
                let name = cfg
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("Simulated {index}"));
                Ok(Arc::new(SimulatedAircon::heating(&name)))
            }
            AirconKind::Daikin => {
                if cfg.host.is_empty() {
                    anyhow::bail!("daikin air conditioner needs a host");
                }
                info!(host = %cfg.host, "using Daikin wifi adapter");
                let unit = DaikinAircon::new(cfg.host.clone(), self.io_timeout)?;
                Ok(Arc::new(unit))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
        [server]
        host = "127.0.0.1"
        port = 8080

        [controller]
        min_load = 0
        max_load = 400
        sleep_threshold = 0
        wakeup_threshold = 200
        read_interval_secs = 5
        set_interval_secs = 60
        max_htemp = 24.0
        control_humidity = true
        operation_enabled = false

        [controller.sleep_profile]
        power = "on"
        mode = "heat"
        setpoint_temperature = 22.0
        setpoint_humidity = 0
    "#;

    #[tokio::test]
    async fn test_factory_creates_simulated_devices() {
        let toml = format!(
            "{BASE}\n[power_source]\nkind = \"simulated\"\ngrid_import_w = 250\n\n[[aircons]]\nname = \"Den\"\n"
        );
        let cfg = Config::from_toml_str(&toml).unwrap();
        let devices = DeviceFactory::build(&cfg).unwrap();

        assert_eq!(devices.power_source.poll().await.grid_import_w(), 250.0);
        assert_eq!(devices.aircons.len(), 1);
        let (unit, capacity) = &devices.aircons[0];
        assert_eq!(unit.read_name().await.unwrap().as_deref(), Some("Den"));
        assert_eq!(capacity.max_consumption_w, 1400.0);
    }

    #[test]
    fn test_daikin_without_host_is_rejected() {
        let toml = format!(
            "{BASE}\n[power_source]\nkind = \"simulated\"\n\n[[aircons]]\nkind = \"daikin\"\n"
        );
        let cfg = Config::from_toml_str(&toml).unwrap();
        assert!(DeviceFactory::build(&cfg).is_err());
    }

    #[cfg(not(feature = "modbus"))]
    #[test]
    fn test_modbus_source_needs_feature() {
        let toml = format!(
            "{BASE}\n[power_source]\nkind = \"solaredge_modbus\"\nhost = \"192.168.1.50\"\n"
        );
        let cfg = Config::from_toml_str(&toml).unwrap();
        assert!(DeviceFactory::build(&cfg).is_err());
    }
}
