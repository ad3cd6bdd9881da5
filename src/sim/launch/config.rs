use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::Point;
use crate::error::{LaunchResult, RayLaunchError};
use crate::sim::engine::directions::{RayBudget, SingleRay};
use crate::sim::engine::propagation::ReflectionLoss;
use crate::sim::engine::voxel_grid::VoxelGrid;

/// Most single rays a request may ask for.
pub const MAX_SINGLE_RAYS: usize = 4;

pub const INTERACTIONS_RANGE: (usize, usize) = (1, 10);
pub const REFLECTION_FACTOR_RANGE: (f64, f64) = (0.0, 1.0);
pub const STATION_POWER_W_RANGE: (f64, f64) = (0.01, 100.0);
pub const MINIMAL_RAY_POWER_RANGE: (f64, f64) = (-160.0, -60.0);
pub const FREQUENCY_GHZ_RANGE: (f64, f64) = (0.1, 100.0);
pub const DIFFRACTION_RAYS_RANGE: (usize, usize) = (0, 120);

/// A ray-launch request as sent by the web layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RayLaunchRequest {
    /// Station position in voxel indices. Fractional coordinates round to
    /// the nearest index, halves away from zero: `5.5` is voxel 6.
    pub station_pos: Point,
    /// Horizontal grid size; must match the loaded grid.
    pub size: usize,
    /// Carrier frequency in GHz.
    pub frequency: f64,
    /// Transmit power in W.
    pub station_power: f64,
    pub reflection_factor: f64,
    pub number_of_interactions: usize,
    /// Rays fading below this power (dBm) stop.
    pub minimal_ray_power: f64,
    pub number_of_rays_azimuth: usize,
    pub number_of_rays_elevation: usize,
    #[serde(default)]
    pub diffraction_ray_number: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub single_rays: Vec<SingleRay>,
}

impl RayLaunchRequest {
    pub fn new(station_pos: Point, size: usize) -> Self {
        Self {
            station_pos,
            size,
            frequency: 2.4,
            station_power: 1.0,
            reflection_factor: 0.5,
            number_of_interactions: 3,
            minimal_ray_power: -160.0,
            number_of_rays_azimuth: 360,
            number_of_rays_elevation: 8,
            diffraction_ray_number: 0,
            single_rays: Vec::new(),
        }
    }

    /// Checks every numeric parameter against its allowed range.
    pub fn check_ranges(&self) -> LaunchResult<()> {
        check_count(
            "numberOfRaysAzimuth",
            self.number_of_rays_azimuth,
            (1, usize::MAX),
        )?;
        check_count(
            "numberOfRaysElevation",
            self.number_of_rays_elevation,
            (1, usize::MAX),
        )?;
        check_count(
            "numberOfInteractions",
            self.number_of_interactions,
            INTERACTIONS_RANGE,
        )?;
        check_count(
            "diffractionRayNumber",
            self.diffraction_ray_number,
            DIFFRACTION_RAYS_RANGE,
        )?;
        check_value("reflectionFactor", self.reflection_factor, REFLECTION_FACTOR_RANGE)?;
        check_value("stationPower", self.station_power, STATION_POWER_W_RANGE)?;
        check_value("minimalRayPower", self.minimal_ray_power, MINIMAL_RAY_POWER_RANGE)?;
        check_value("frequency", self.frequency, FREQUENCY_GHZ_RANGE)?;
        Ok(())
    }

    /// Voxel nearest to the station position, checked against the grid.
    pub fn station_voxel(&self, grid: &VoxelGrid) -> LaunchResult<(usize, usize, usize)> {
        let p = self.station_pos;
        let (x, y, z) = (p.x.round() as i64, p.y.round() as i64, p.z.round() as i64);
        if !p.is_finite() || !grid.contains(x, y, z) {
            return Err(RayLaunchError::InvalidStation {
                x: p.x,
                y: p.y,
                z: p.z,
                size: grid.size(),
                depth: grid.depth(),
            });
        }
        let voxel = (x as usize, y as usize, z as usize);
        if grid.is_solid(x, y, z) == Some(true) {
            return Err(RayLaunchError::StationInsideSolid {
                x: voxel.0,
                y: voxel.1,
                z: voxel.2,
            });
        }
        Ok(voxel)
    }

    /// Checks the single-ray list against the lattice that will be traced.
    pub fn check_single_rays(&self, azimuth: usize, elevation: usize) -> LaunchResult<()> {
        if self.single_rays.len() > MAX_SINGLE_RAYS {
            return Err(RayLaunchError::InvalidSingleRay {
                index: MAX_SINGLE_RAYS,
                reason: format!(
                    "{} single rays requested, at most {MAX_SINGLE_RAYS} allowed",
                    self.single_rays.len()
                ),
            });
        }
        let mut seen = HashSet::new();
        for (index, ray) in self.single_rays.iter().enumerate() {
            if ray.azimuth >= azimuth || ray.elevation >= elevation {
                return Err(RayLaunchError::InvalidSingleRay {
                    index,
                    reason: format!(
                        "({}, {}) is outside the {azimuth}x{elevation} ray lattice",
                        ray.azimuth, ray.elevation
                    ),
                });
            }
            if !seen.insert(*ray) {
                return Err(RayLaunchError::InvalidSingleRay {
                    index,
                    reason: format!("({}, {}) is listed twice", ray.azimuth, ray.elevation),
                });
            }
        }
        Ok(())
    }
}

fn check_value(name: &'static str, value: f64, (min, max): (f64, f64)) -> LaunchResult<()> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(RayLaunchError::InvalidParameter {
            name,
            value,
            min,
            max,
        })
    }
}

fn check_count(name: &'static str, value: usize, (min, max): (usize, usize)) -> LaunchResult<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(RayLaunchError::InvalidParameter {
            name,
            value: value as f64,
            min: min as f64,
            max: max as f64,
        })
    }
}

/// Engine-side settings that are not part of a user request.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSettings {
    /// Edge length of one voxel in meters.
    pub voxel_size_m: f64,
    /// Path loss is never evaluated closer than this.
    pub reference_distance_m: f64,
    /// Fixed loss of one diffraction, before it is split across the fan.
    pub diffraction_loss_db: f64,
    pub ground_reflection: bool,
    pub reflection_loss: ReflectionLoss,
    pub ray_budget: RayBudget,
    /// Keep ray paths in full-sphere runs. Single-ray runs always keep them.
    pub retain_ray_paths: bool,
    /// Voxels one ray may visit. `None` derives a cap from the grid size.
    pub max_steps_per_ray: Option<usize>,
}

impl LaunchSettings {
    pub fn new() -> Self {
        Self {
            voxel_size_m: 1.0,
            reference_distance_m: 1.0,
            diffraction_loss_db: 6.0,
            ground_reflection: true,
            reflection_loss: ReflectionLoss::Constant,
            ray_budget: RayBudget::default(),
            retain_ray_paths: false,
            max_steps_per_ray: None,
        }
    }

    /// Step cap for one ray: every segment can cross the grid once, plus slack.
    pub fn max_steps(&self, grid: &VoxelGrid, interactions: usize) -> usize {
        self.max_steps_per_ray
            .unwrap_or_else(|| (2 * grid.size() + grid.depth() + 2) * (interactions + 1) * 2)
    }
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self::new()
    }
}
