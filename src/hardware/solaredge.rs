//! SolarEdge monitoring portal, `currentPowerFlow` endpoint.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error};

use crate::domain::{GridState, PowerSource, PowerSourceError};

#[derive(Debug, Deserialize)]
struct PowerFlowResponse {
    #[serde(rename = "siteCurrentPowerFlow")]
    site_current_power_flow: PowerFlow,
}

#[derive(Debug, Deserialize)]
struct PowerFlow {
    #[serde(default)]
    connections: Vec<Connection>,
    #[serde(rename = "GRID")]
    grid: Node,
    #[serde(rename = "PV")]
    pv: Node,
}

/// Capitalisation of the node names differs between `from` and `to`.
#[derive(Debug, Deserialize)]
struct Connection {
    #[serde(default)]
    to: String,
}

#[derive(Debug, Deserialize)]
struct Node {
    #[serde(rename = "currentPower")]
    current_power_kw: f64,
}

const KW_TO_W: f64 = 1000.0;

/// Decode a `siteCurrentPowerFlow` document into watts.
///
/// The portal reports grid power unsigned; a connection flowing to the grid
/// marks it as export.
pub fn parse_power_flow(body: &str) -> Result<GridState, PowerSourceError> {
    let flow = serde_json::from_str::<PowerFlowResponse>(body)
        .map_err(|e| PowerSourceError::Payload(e.to_string()))?
        .site_current_power_flow;
    let grid_w = (flow.grid.current_power_kw * KW_TO_W).round();
    let pv_w = (flow.pv.current_power_kw * KW_TO_W).round();
    let exporting = flow
        .connections
        .iter()
        .any(|c| c.to.eq_ignore_ascii_case("grid"));
    Ok(GridState::new(if exporting { -grid_w } else { grid_w }, pv_w))
}

pub struct SolarEdgeWeb {
    client: reqwest::Client,
    url: String,
}

impl SolarEdgeWeb {
    pub fn new(
        url: impl Into<String>,
        headers: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            header_map.insert(
                HeaderName::from_bytes(name.as_bytes())
                    .with_context(|| format!("invalid header name {name}"))?,
                HeaderValue::from_str(value)
                    .with_context(|| format!("invalid value for header {name}"))?,
            );
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(header_map)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn fetch(&self) -> Result<GridState, PowerSourceError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| PowerSourceError::Communication(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| PowerSourceError::Communication(e.to_string()))?;
        if !status.is_success() {
            return Err(PowerSourceError::Communication(format!("HTTP {status}")));
        }
        parse_power_flow(&body)
    }
}

#[async_trait]
impl PowerSource for SolarEdgeWeb {
    async fn poll(&self) -> GridState {
        match self.fetch().await {
            Ok(state) => {
                debug!(
                    grid_import_w = state.grid_import_w(),
                    pv_generation_w = state.pv_generation_w(),
                    "solaredge power flow"
                );
                state
            }
            Err(e) => {
                error!(error = %e, "SolarEdge current power flow request failed");
                GridState::unknown()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_with_generation() {
        let body = r#"{"siteCurrentPowerFlow": {"updateRefreshRate": 3, "unit": "kW",
            "connections": [{"from": "GRID", "to": "Load"}, {"from": "PV", "to": "Load"}],
            "GRID": {"status": "Active", "currentPower": 0.13},
            "LOAD": {"status": "Active", "currentPower": 3.15},
            "PV": {"status": "Active", "currentPower": 3.02}}}"#;
        let state = parse_power_flow(body).unwrap();
        assert_eq!(state.grid_import_w(), 130.0);
        assert_eq!(state.pv_generation_w(), 3020.0);
    }

    #[test]
    fn test_export_is_negative() {
        let body = r#"{"siteCurrentPowerFlow":{"updateRefreshRate":3,"unit":"kW",
            "connections":[{"from":"LOAD","to":"Grid"},{"from":"PV","to":"Load"}],
            "GRID":{"status":"Active","currentPower":0.19},
            "LOAD":{"status":"Active","currentPower":2.2},
            "PV":{"status":"Active","currentPower":2.39}}}"#;
        let state = parse_power_flow(body).unwrap();
        assert_eq!(state.grid_import_w(), -190.0);
        assert!(state.is_exporting());
    }

    #[test]
    fn test_missing_node_is_payload_error() {
        let err = parse_power_flow(r#"{"siteCurrentPowerFlow":{"GRID":{"currentPower":1.0}}}"#)
            .unwrap_err();
        assert!(matches!(err, PowerSourceError::Payload(_)));
    }
}
