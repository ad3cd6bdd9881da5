//! Error types for ray-launch runs.
//!
//! Only [`RayLaunchError`] ever reaches the caller. [`GeometryWarning`] and
//! [`RayFailure`] are recovered where they happen and only logged.

use serde::Serialize;
use thiserror::Error;

/// Result type for ray-launch operations.
pub type LaunchResult<T> = Result<T, RayLaunchError>;

/// Run-level failure. A run that returns one of these produced no results.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RayLaunchError {
    /// Station coordinates fall outside the voxel grid.
    #[error("station position ({x}, {y}, {z}) is outside the grid {size}x{size}x{depth}")]
    InvalidStation {
        x: f64,
        y: f64,
        z: f64,
        size: usize,
        depth: usize,
    },

    /// Station sits inside a wall or building.
    #[error("station position ({x}, {y}, {z}) lies inside a solid voxel")]
    StationInsideSolid { x: usize, y: usize, z: usize },

    /// Azimuth × elevation exceeds the ray budget.
    #[error(
        "total number of rays ({azimuth}x{elevation}={total}) exceeds the maximum of {max_total_rays}"
    )]
    RayBudgetExceeded {
        azimuth: usize,
        elevation: usize,
        total: usize,
        max_total_rays: usize,
    },

    /// Malformed single-ray list.
    #[error("invalid single ray #{index}: {reason}")]
    InvalidSingleRay { index: usize, reason: String },

    /// A request parameter is out of its allowed range.
    #[error("parameter '{name}' = {value} is out of range [{min}, {max}]")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Request size does not match the loaded voxel grid.
    #[error("request size {requested} does not match grid size {grid}")]
    GridSizeMismatch { requested: usize, grid: usize },

    /// Grid has no cells.
    #[error("voxel grid is empty or degenerate: {0}")]
    EmptyGrid(String),

    /// The run was cancelled between rays.
    #[error("ray launch cancelled after {traced} of {total} rays")]
    Cancelled { traced: usize, total: usize },

    /// Voxel snapshot could not be decoded.
    #[error("voxel snapshot error: {0}")]
    Snapshot(String),
}

impl RayLaunchError {
    /// HTTP-style status code for the web layer.
    pub fn status(&self) -> u16 {
        match self {
            RayLaunchError::Cancelled { .. } => 409,
            RayLaunchError::Snapshot(_) => 500,
            _ => 400,
        }
    }

    /// Whether the caller can fix the request and resubmit.
    pub fn is_configuration_error(&self) -> bool {
        !matches!(
            self,
            RayLaunchError::Cancelled { .. } | RayLaunchError::Snapshot(_)
        )
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            status: self.status(),
            message: self.to_string(),
        }
    }
}

/// Structured `{status, message}` error body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub status: u16,
    pub message: String,
}

impl From<RayLaunchError> for ErrorReport {
    fn from(err: RayLaunchError) -> Self {
        err.report()
    }
}

/// Recoverable geometry problem. Logged, the offending input is skipped.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GeometryWarning {
    #[error("skipping degenerate footprint '{name}': {reason}")]
    DegenerateFootprint { name: String, reason: &'static str },

    #[error("footprint '{name}' lies entirely outside the grid")]
    FootprintOutsideGrid { name: String },

    #[error("skipping '{name}': {kind} geometry is not a polygon")]
    UnsupportedGeometry { name: String, kind: String },
}

/// Numerical failure inside a single ray. The ray is dropped, the run continues.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RayFailure {
    #[error("ray ({azimuth}, {elevation}) has a non-finite direction")]
    NonFiniteDirection { azimuth: usize, elevation: usize },

    #[error("ray ({azimuth}, {elevation}) produced a degenerate reflection at ({x}, {y}, {z})")]
    DegenerateReflection {
        azimuth: usize,
        elevation: usize,
        x: usize,
        y: usize,
        z: usize,
    },

    #[error("ray ({azimuth}, {elevation}) produced a non-finite power value")]
    NonFinitePower { azimuth: usize, elevation: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let err = RayLaunchError::StationInsideSolid { x: 1, y: 2, z: 3 };
        assert_eq!(err.status(), 400);
        assert!(err.is_configuration_error());

        let err = RayLaunchError::Cancelled {
            traced: 10,
            total: 20,
        };
        assert_eq!(err.status(), 409);
        assert!(!err.is_configuration_error());
    }

    #[test]
    fn test_report_serializes() {
        let err = RayLaunchError::RayBudgetExceeded {
            azimuth: 2880,
            elevation: 2,
            total: 5760,
            max_total_rays: 2880,
        };
        let json = serde_json::to_value(err.report()).unwrap();
        assert_eq!(json["status"], 400);
        assert!(
            json["message"]
                .as_str()
                .unwrap()
                .contains("exceeds the maximum of 2880")
        );
    }
}
