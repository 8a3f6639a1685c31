#[cfg(feature = "modbus")]
pub mod client {
    use anyhow::{Context as AnyhowContext, Result};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use tokio::time::timeout;
    use tokio_modbus::client::tcp;
    use tokio_modbus::prelude::*;
    use tracing::{debug, warn};

    const MAX_RETRIES: u32 = 2;

    pub struct ModbusClient {
        context: Arc<Mutex<tokio_modbus::client::Context>>,
        unit_id: u8,
        addr: String,
        timeout_duration: Duration,
    }

    impl ModbusClient {
        /// Connect to a Modbus TCP device with custom timeout
        pub async fn connect_with_timeout(
            addr: &str,
            unit_id: u8,
            timeout_duration: Duration,
        ) -> Result<Self> {
            let socket_addr = addr.parse().context("Invalid address format")?;

            debug!(addr, unit_id, "connecting to Modbus device");

            let ctx = timeout(timeout_duration, tcp::connect(socket_addr))
                .await
                .context("Connection timeout")?
                .context("Failed to connect")?;

            Ok(Self {
                context: Arc::new(Mutex::new(ctx)),
                unit_id,
                addr: addr.to_string(),
                timeout_duration,
            })
        }

        /// Read holding registers with automatic retry
        pub async fn read_holding_registers(&self, start: u16, count: u16) -> Result<Vec<u16>> {
            let max_attempts = MAX_RETRIES.max(1);
            let mut attempt = 1;
            loop {
                let failure = {
                    let mut ctx = self.context.lock().await;
                    ctx.set_slave(Slave(self.unit_id));
                    let read = ctx.read_holding_registers(start, count);
                    match timeout(self.timeout_duration, read).await {
                        Ok(Ok(registers)) => {
                            if attempt > 1 {
                                debug!(attempt, start, "Modbus read succeeded after retry");
                            }
                            return Ok(registers);
                        }
                        Ok(Err(e)) => e.to_string(),
                        Err(_) => "timeout".to_string(),
                    }
                };
                warn!(attempt, addr = %self.addr, start, error = %failure, "Modbus read failed");
                if attempt >= max_attempts {
                    anyhow::bail!(
                        "Failed to read {count} holding registers at {start} after {max_attempts} attempts: {failure}"
                    );
                }
                // Small delay between retries
                tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
                attempt += 1;
            }
        }
    }
}

/// Modbus data parsing utilities
pub mod parser {
    /// Parse i16 from register
    pub fn parse_i16(registers: &[u16]) -> Option<i16> {
        registers.first().map(|&r| r as i16)
    }

    /// Parse u32 from two registers (big-endian)
    pub fn parse_u32(registers: &[u16]) -> Option<u32> {
        match registers {
            [hi, lo, ..] => Some((u32::from(*hi) << 16) | u32::from(*lo)),
            _ => None,
        }
    }

    /// SunSpec value with a base-10 scale factor register.
    pub fn apply_scale(raw: f64, scale_factor: i16) -> f64 {
        let exp = i32::from(scale_factor);
        // Divide for negative exponents, 10^-n is not exact
        if exp < 0 {
            raw / 10f64.powi(-exp)
        } else {
            raw * 10f64.powi(exp)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_parse_i16() {
            assert_eq!(parse_i16(&[0x8000]), Some(-32768));
            assert_eq!(parse_i16(&[0x7FFF]), Some(32767));
            assert_eq!(parse_i16(&[]), None);
        }

        #[test]
        fn test_parse_u32() {
            assert_eq!(parse_u32(&[0x1234, 0x5678]), Some(0x12345678));
            assert_eq!(parse_u32(&[0x1234]), None);
        }

        #[test]
        fn test_apply_scale() {
            assert_eq!(apply_scale(2345.0, -1), 234.5);
            assert_eq!(apply_scale(12.0, 2), 1200.0);
        }
    }
}

/// SolarEdge SunSpec register layout, inverter model 101-103 and meter
/// model 201-204.
pub mod sunspec {
    use super::parser::{apply_scale, parse_i16, parse_u32};
    use serde::Serialize;

    /// AC power, its scale factor, then up to the lifetime energy counter
    pub const INVERTER_START: u16 = 40083;
    pub const INVERTER_COUNT: u16 = 40096 - INVERTER_START;
    /// Voltages, real power and energy counters of meter 1
    pub const METER_START: u16 = 40195;
    pub const METER_COUNT: u16 = 40243 - METER_START;

    const AC_POWER: u16 = 40083;
    const AC_POWER_SF: u16 = 40084;
    const AC_LIFETIME_WH: u16 = 40093;
    const AC_LIFETIME_SF: u16 = 40095;

    const PHASE_VOLTAGE_A: u16 = 40196;
    const VOLTAGE_SF: u16 = 40203;
    const TOTAL_REAL_POWER: u16 = 40206;
    const REAL_POWER_SF: u16 = 40210;
    const TOTAL_EXPORTED_WH: u16 = 40226;
    const TOTAL_IMPORTED_WH: u16 = 40234;
    const ENERGY_SF: u16 = 40242;

    #[derive(Debug, Clone, Copy, PartialEq, Serialize)]
    pub struct InverterReading {
        pub pv_generation_w: f64,
        pub lifetime_production_kwh: f64,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Serialize)]
    pub struct MeterReading {
        /// Positive when importing; the meter counts export positive
        pub grid_import_w: f64,
        pub phase_import_w: [f64; 3],
        pub phase_voltage_v: [f64; 3],
        pub lifetime_export_kwh: f64,
        pub lifetime_import_kwh: f64,
    }

    fn at(block: &[u16], start: u16, register: u16) -> &[u16] {
        block.get(usize::from(register - start)..).unwrap_or(&[])
    }

    fn i16_at(block: &[u16], start: u16, register: u16) -> Option<i16> {
        parse_i16(at(block, start, register))
    }

    fn u32_at(block: &[u16], start: u16, register: u16) -> Option<u32> {
        parse_u32(at(block, start, register))
    }

    pub fn decode_inverter(block: &[u16]) -> Option<InverterReading> {
        let s = INVERTER_START;
        let power = i16_at(block, s, AC_POWER)?;
        let power_sf = i16_at(block, s, AC_POWER_SF)?;
        let lifetime = u32_at(block, s, AC_LIFETIME_WH)?;
        let lifetime_sf = i16_at(block, s, AC_LIFETIME_SF)?;
        Some(InverterReading {
            pv_generation_w: apply_scale(f64::from(power), power_sf),
            lifetime_production_kwh: apply_scale(f64::from(lifetime), lifetime_sf) / 1000.0,
        })
    }

    pub fn decode_meter(block: &[u16]) -> Option<MeterReading> {
        let s = METER_START;
        let voltage_sf = i16_at(block, s, VOLTAGE_SF)?;
        let power_sf = i16_at(block, s, REAL_POWER_SF)?;
        let energy_sf = i16_at(block, s, ENERGY_SF)?;

        let mut phase_voltage_v = [0.0; 3];
        let mut phase_import_w = [0.0; 3];
        for phase in 0..3u16 {
            let v = i16_at(block, s, PHASE_VOLTAGE_A + phase)?;
            phase_voltage_v[usize::from(phase)] = apply_scale(f64::from(v), voltage_sf);
            let p = i16_at(block, s, TOTAL_REAL_POWER + 1 + phase)?;
            phase_import_w[usize::from(phase)] = -apply_scale(f64::from(p), power_sf);
        }
        let total = i16_at(block, s, TOTAL_REAL_POWER)?;
        let exported = u32_at(block, s, TOTAL_EXPORTED_WH)?;
        let imported = u32_at(block, s, TOTAL_IMPORTED_WH)?;

        Some(MeterReading {
            grid_import_w: -apply_scale(f64::from(total), power_sf),
            phase_import_w,
            phase_voltage_v,
            lifetime_export_kwh: apply_scale(f64::from(exported), energy_sf) / 1000.0,
            lifetime_import_kwh: apply_scale(f64::from(imported), energy_sf) / 1000.0,
        })
    }

}
