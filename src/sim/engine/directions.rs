//! Launch directions and the ray budget.

use std::f64::consts::{FRAC_PI_2, PI};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::Vector;
use crate::error::{LaunchResult, RayLaunchError};

/// Default product budget `azimuth × elevation`.
pub const MAX_TOTAL_RAYS: usize = 2880;

/// One explicitly requested launch direction, given as grid indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SingleRay {
    pub azimuth: usize,
    pub elevation: usize,
}

impl SingleRay {
    pub fn new(azimuth: usize, elevation: usize) -> Self {
        Self {
            azimuth,
            elevation,
        }
    }
}

/// Which part of the sphere the elevation indices cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hemisphere {
    /// `φ = π·j/elevation − π/2`, from straight down upward.
    Full,
    /// `φ = (π/2)·j/elevation`, horizon upward. Used for stations on the ground layer.
    Upper,
}

impl Hemisphere {
    pub fn for_station_layer(z: usize) -> Self {
        if z == 0 {
            Hemisphere::Upper
        } else {
            Hemisphere::Full
        }
    }
}

/// Azimuth × elevation direction lattice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionGrid {
    pub azimuth: usize,
    pub elevation: usize,
    pub hemisphere: Hemisphere,
}

impl DirectionGrid {
    pub fn new(azimuth: usize, elevation: usize, hemisphere: Hemisphere) -> Self {
        Self {
            azimuth,
            elevation,
            hemisphere,
        }
    }

    /// Unit direction for indices `(i, j)`.
    pub fn direction(&self, i: usize, j: usize) -> Vector {
        let theta = 2.0 * PI * i as f64 / self.azimuth as f64;
        let phi = match self.hemisphere {
            Hemisphere::Full => PI * j as f64 / self.elevation as f64 - FRAC_PI_2,
            Hemisphere::Upper => FRAC_PI_2 * j as f64 / self.elevation as f64,
        };
        Vector::from_angles(theta, phi).snapped()
    }
}

/// What gets traced in a run.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceMode {
    /// Every lattice direction, ray paths usually discarded.
    FullSphere { azimuth: usize, elevation: usize },
    /// Only the listed lattice directions, ray paths kept.
    SingleRays {
        azimuth: usize,
        elevation: usize,
        rays: Vec<SingleRay>,
    },
}

/// One direction to trace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Launch {
    /// Position in the launch order.
    pub index: usize,
    pub azimuth: usize,
    pub elevation: usize,
    pub direction: Vector,
}

impl TraceMode {
    pub fn new(azimuth: usize, elevation: usize, single_rays: &[SingleRay]) -> Self {
        if single_rays.is_empty() {
            TraceMode::FullSphere {
                azimuth,
                elevation,
            }
        } else {
            TraceMode::SingleRays {
                azimuth,
                elevation,
                rays: single_rays.to_vec(),
            }
        }
    }

    pub fn is_single_rays(&self) -> bool {
        matches!(self, TraceMode::SingleRays { .. })
    }

    pub fn launches(&self, hemisphere: Hemisphere) -> Vec<Launch> {
        match self {
            TraceMode::FullSphere {
                azimuth,
                elevation,
            } => {
                let lattice = DirectionGrid::new(*azimuth, *elevation, hemisphere);
                (0..*azimuth)
                    .flat_map(|i| (0..*elevation).map(move |j| (i, j)))
                    .enumerate()
                    .map(|(index, (i, j))| Launch {
                        index,
                        azimuth: i,
                        elevation: j,
                        direction: lattice.direction(i, j),
                    })
                    .collect()
            }
            TraceMode::SingleRays {
                azimuth,
                elevation,
                rays,
            } => {
                let lattice = DirectionGrid::new(*azimuth, *elevation, hemisphere);
                rays.iter()
                    .enumerate()
                    .map(|(index, r)| Launch {
                        index,
                        azimuth: r.azimuth,
                        elevation: r.elevation,
                        direction: lattice.direction(r.azimuth, r.elevation),
                    })
                    .collect()
            }
        }
    }
}

/// What to do when `azimuth × elevation` exceeds the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BudgetPolicy {
    #[default]
    Reject,
    /// Reduce the elevation count first, then the azimuth count.
    Clamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RayBudget {
    pub max_total_rays: usize,
    pub policy: BudgetPolicy,
}

impl Default for RayBudget {
    fn default() -> Self {
        Self {
            max_total_rays: MAX_TOTAL_RAYS,
            policy: BudgetPolicy::Reject,
        }
    }
}

impl RayBudget {
    pub fn max_azimuth(&self, elevation: usize) -> usize {
        self.max_total_rays / elevation.max(1)
    }

    pub fn max_elevation(&self, azimuth: usize) -> usize {
        self.max_total_rays / azimuth.max(1)
    }

    /// Returns the `(azimuth, elevation)` counts to trace.
    pub fn apply(&self, azimuth: usize, elevation: usize) -> LaunchResult<(usize, usize)> {
        let total = azimuth.saturating_mul(elevation);
        if total <= self.max_total_rays {
            return Ok((azimuth, elevation));
        }
        match self.policy {
            BudgetPolicy::Reject => Err(RayLaunchError::RayBudgetExceeded {
                azimuth,
                elevation,
                total,
                max_total_rays: self.max_total_rays,
            }),
            BudgetPolicy::Clamp => {
                let max = self.max_total_rays.max(1);
                let azimuth_c = azimuth.min(max);
                let elevation_c = self.max_elevation(azimuth_c).clamp(1, elevation);
                warn!(
                    "ray budget {max}: clamping {azimuth}x{elevation} to {azimuth_c}x{elevation_c}"
                );
                Ok((azimuth_c, elevation_c))
            }
        }
    }
}
