//! File I/O for voxel snapshots, building footprints, requests and results.

pub mod geojson;
pub mod result;
pub mod snapshot;

pub use geojson::{footprints_from_geojson, read_geojson_footprints};
pub use result::{read_request_json, write_power_map_binary, write_result_json};
pub use snapshot::{ElementWidth, SnapshotFormat, read_snapshot, write_snapshot};
