pub mod aircon;
pub mod grid;
pub mod power_source;

pub use aircon::*;
pub use grid::*;
pub use power_source::*;
