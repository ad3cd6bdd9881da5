use serde::{Serialize, Serializer};

use crate::sim::coverage::{PowerMap, PowerMapLegend};
use crate::sim::engine::tracer::Ray;

/// Output of a ray-launch run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RayLaunchResult {
    /// Retained rays; serialized as lists of `{x, y, z, power}` samples.
    #[serde(serialize_with = "samples_only")]
    pub ray_paths: Vec<Ray>,
    pub power_map: PowerMap,
    pub power_map_legend: PowerMapLegend,
    #[serde(skip)]
    pub stats: LaunchStats,
}

/// Counters collected during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaunchStats {
    /// Launch directions traced.
    pub launches: usize,
    /// Rays produced, diffraction sub-rays included.
    pub rays: usize,
    /// Launches dropped because of a numerical failure.
    pub failed: usize,
    /// Voxels holding a received power.
    pub reached_voxels: usize,
}

fn samples_only<S: Serializer>(rays: &[Ray], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(rays.iter().map(|r| &r.samples))
}
