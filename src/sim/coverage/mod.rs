//! Max-hold power aggregation and per-layer coverage statistics.

pub mod legend;
pub mod power_map;

pub use legend::{LayerLegend, PowerMapLegend};
pub use power_map::PowerMap;
