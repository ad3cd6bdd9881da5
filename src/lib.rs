//! Ray-launching radio propagation over voxelized building maps.
//!
//! A transmitter placed in a [`VoxelGrid`] fires an azimuth × elevation lattice
//! of rays. Each ray is walked voxel by voxel, bounces off walls, roofs and the
//! ground, fans out at building edges, and loses power with distance and at every
//! interaction. [`RayLaunch`] returns the strongest power per voxel, a per-layer
//! coverage legend and, on request, the ray paths.

pub mod error;
pub mod geom;
pub mod io;
pub mod sim;

// Prelude
pub use error::{ErrorReport, RayLaunchError};
pub use geom::footprint::Footprint;
pub use geom::point::Point;
pub use geom::vector::Vector;
pub use sim::engine::voxel_grid::{Cell, VoxelGrid};
pub use sim::launch::{
    LaunchSettings, RayLaunch, RayLaunchRequest, RayLaunchResult, compute_ray_launch,
};
