pub mod daikin;
pub mod factory;
#[cfg(feature = "modbus")]
pub mod modbus;
pub mod solaredge;

pub use daikin::DaikinAircon;
pub use factory::{DeviceFactory, Devices};
pub use solaredge::SolarEdgeWeb;
