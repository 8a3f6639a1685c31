//! Brick Battery: steers air conditioner setpoints so household consumption
//! follows solar surplus, using the building's thermal mass as storage.

pub mod analytics;
pub mod api;
pub mod config;
pub mod controller;
pub mod domain;
pub mod hardware;
pub mod modbus;
pub mod telemetry;
