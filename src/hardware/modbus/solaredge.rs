use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::domain::{GridState, PowerSource, PowerSourceError};
use crate::modbus::client::ModbusClient;
use crate::modbus::sunspec::{
    decode_inverter, decode_meter, InverterReading, MeterReading, INVERTER_COUNT,
    INVERTER_START, METER_COUNT, METER_START,
};

/// SolarEdge inverter with a meter in Export+Import mode, read over Modbus TCP.
///
/// The connection is opened lazily and dropped after any failure so the next
/// poll reconnects.
pub struct SolarEdgeModbus {
    addr: String,
    unit_id: u8,
    timeout: Duration,
    client: Mutex<Option<ModbusClient>>,
    last_meter: Mutex<Option<MeterReading>>,
}

impl SolarEdgeModbus {
    pub fn new(host: &str, port: u16, unit_id: u8, timeout: Duration) -> Self {
        Self {
            addr: format!("{host}:{port}"),
            unit_id,
            timeout,
            client: Mutex::new(None),
            last_meter: Mutex::new(None),
        }
    }

    /// Per-phase and lifetime values of the last successful read.
    pub async fn last_meter_reading(&self) -> Option<MeterReading> {
        *self.last_meter.lock().await
    }

    async fn read(&self) -> Result<(InverterReading, MeterReading)> {
        let mut slot = self.client.lock().await;
        if slot.is_none() {
            let client = ModbusClient::connect_with_timeout(&self.addr, self.unit_id, self.timeout)
                .await
                .with_context(|| format!("connecting to inverter at {}", self.addr))?;
            *slot = Some(client);
        }
        let Some(client) = slot.as_ref() else {
            anyhow::bail!("no Modbus connection");
        };
        let (inverter, meter) = tokio::join!(
            client.read_holding_registers(INVERTER_START, INVERTER_COUNT),
            client.read_holding_registers(METER_START, METER_COUNT),
        );
        let (inverter, meter) = match (inverter, meter) {
            (Ok(inverter), Ok(meter)) => (inverter, meter),
            (Err(e), _) | (_, Err(e)) => {
                *slot = None;
                return Err(e);
            }
        };
        let inverter = decode_inverter(&inverter)
            .ok_or_else(|| PowerSourceError::Modbus("short inverter block".into()))?;
        let meter = decode_meter(&meter)
            .ok_or_else(|| PowerSourceError::Modbus("short meter block".into()))?;
        Ok((inverter, meter))
    }
}

#[async_trait]
impl PowerSource for SolarEdgeModbus {
    async fn poll(&self) -> GridState {
        match self.read().await {
            Ok((inverter, meter)) => {
                debug!(
                    grid_import_w = meter.grid_import_w,
                    phase_a_w = meter.phase_import_w[0],
                    phase_b_w = meter.phase_import_w[1],
                    phase_c_w = meter.phase_import_w[2],
                    pv_generation_w = inverter.pv_generation_w,
                    lifetime_production_kwh = inverter.lifetime_production_kwh,
                    "solaredge modbus reading"
                );
                *self.last_meter.lock().await = Some(meter);
                GridState::new(meter.grid_import_w, inverter.pv_generation_w)
            }
            Err(e) => {
                error!(error = ?e, addr = %self.addr, "SolarEdge Modbus TCP read failed");
                GridState::unknown()
            }
        }
    }
}
