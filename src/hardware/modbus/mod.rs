pub mod solaredge;

pub use solaredge::SolarEdgeModbus;
