pub mod buildings;
pub mod directions;
pub mod propagation;
pub mod reflection;
pub mod tracer;
pub mod voxel_grid;
