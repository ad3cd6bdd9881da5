use serde::{Deserialize, Serialize};

use crate::Vector;

/// `20·log10(4π / c)` for distances in meters and frequencies in GHz.
pub const FSPL_CONSTANT_DB: f64 = 32.45;

/// Power value meaning "no signal" and marking walls in the power map.
pub const NO_SIGNAL_DBM: f64 = -160.0;

/// Defines how power decays with distance.
pub trait PropagationModel {
    /// Path loss in dB after an unfolded path of `distance_m` meters.
    fn path_loss_db(&self, distance_m: f64) -> f64;
}

/// Free-space (Friis) path loss.
#[derive(Debug, Clone, Copy)]
pub struct FreeSpace {
    pub frequency_ghz: f64,
    /// Distances below this are evaluated at this distance.
    pub reference_distance_m: f64,
}

impl FreeSpace {
    pub fn new(frequency_ghz: f64, reference_distance_m: f64) -> Self {
        Self {
            frequency_ghz,
            reference_distance_m,
        }
    }
}

impl PropagationModel for FreeSpace {
    fn path_loss_db(&self, distance_m: f64) -> f64 {
        fspl_db(distance_m.max(self.reference_distance_m), self.frequency_ghz)
    }
}

/// Free-space path loss in dB for a distance in meters and a frequency in GHz, floored at 0.
pub fn fspl_db(distance_m: f64, frequency_ghz: f64) -> f64 {
    let loss = 20.0 * distance_m.log10() + 20.0 * frequency_ghz.log10() + FSPL_CONSTANT_DB;
    loss.max(0.0)
}

pub fn watts_to_dbm(watts: f64) -> f64 {
    10.0 * watts.log10() + 30.0
}

/// Loss in dB of a power factor in `(0, 1]`.
pub fn factor_to_db(factor: f64) -> f64 {
    -10.0 * factor.log10()
}

/// Which surface a ray bounced off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Wall,
    Ground,
}

/// Dielectric materials for the Fresnel reflection model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Material {
    Concrete,
    CeilingBoard,
    MediumDryGround,
}

impl Material {
    /// Relative permittivity.
    pub fn eta(self) -> f64 {
        match self {
            Material::Concrete => 5.31,
            Material::CeilingBoard => 1.50,
            Material::MediumDryGround => 15.0,
        }
    }

    /// Power reflectance averaged over TE and TM polarisations.
    ///
    /// `angle` is the incidence angle from the surface normal in radians.
    pub fn reflectance(self, angle: f64) -> f64 {
        let angle = if angle > std::f64::consts::FRAC_PI_2 {
            std::f64::consts::PI - angle
        } else {
            angle
        };
        let eta = self.eta();
        let (sin, cos) = angle.sin_cos();
        let cos = cos.clamp(-1.0, 1.0);
        let root = (eta - sin * sin).max(0.0).sqrt();
        let r_te = (cos - root) / (cos + root);
        let r_tm = (eta * cos - root) / (eta * cos + root);
        (r_te * r_te + r_tm * r_tm) / 2.0
    }
}

/// How reflection loss is computed from the request's reflection factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum ReflectionLoss {
    /// Fixed `-10·log10(factor)` per bounce.
    #[default]
    Constant,
    /// Factor scaled by the angle-dependent Fresnel reflectance.
    Fresnel { walls: Material, ground: Material },
}

impl ReflectionLoss {
    pub fn fresnel() -> Self {
        ReflectionLoss::Fresnel {
            walls: Material::Concrete,
            ground: Material::MediumDryGround,
        }
    }

    /// Loss in dB of one reflection, or `None` if nothing is reflected.
    pub fn loss_db(
        &self,
        factor: f64,
        incident: Vector,
        normal: Vector,
        surface: Surface,
    ) -> Option<f64> {
        let effective = match *self {
            ReflectionLoss::Constant => factor,
            ReflectionLoss::Fresnel { walls, ground } => {
                let material = match surface {
                    Surface::Wall => walls,
                    Surface::Ground => ground,
                };
                let cos = (-incident.dot(normal)).clamp(-1.0, 1.0);
                factor * material.reflectance(cos.acos())
            }
        };
        (effective > 0.0 && effective.is_finite()).then(|| factor_to_db(effective.min(1.0)))
    }
}

/// Loss in dB for each of `rays` sub-rays spawned at an edge.
///
/// The edge loss is split evenly across the fan, so each sub-ray carries
/// `1/rays` of the diffracted power on top of the fixed edge loss.
pub fn diffraction_loss_db(edge_loss_db: f64, rays: usize) -> f64 {
    edge_loss_db + 10.0 * (rays.max(1) as f64).log10()
}
