mod config;
mod result;
mod simulation;

pub use config::{
    DIFFRACTION_RAYS_RANGE, FREQUENCY_GHZ_RANGE, INTERACTIONS_RANGE, LaunchSettings,
    MAX_SINGLE_RAYS, MINIMAL_RAY_POWER_RANGE, REFLECTION_FACTOR_RANGE, RayLaunchRequest,
    STATION_POWER_W_RANGE,
};
pub use result::{LaunchStats, RayLaunchResult};
pub use simulation::{LaunchProgress, LaunchState, RayLaunch, compute_ray_launch};

// Request types that live with the engine
pub use crate::sim::engine::directions::{BudgetPolicy, RayBudget, SingleRay};
pub use crate::sim::engine::propagation::{Material, ReflectionLoss};
