use crate::Vector;
use serde::{Deserialize, Serialize};
use crate::geom::EPS;
use std::fmt;
use std::ops::{Add, Sub};

/// A point in continuous voxel space.
///
/// Voxel `(i, j, k)` covers `[i, i + 1) × [j, j + 1) × [k, k + 1)`,
/// so its center is `(i + 0.5, j + 0.5, k + 0.5)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Center of the voxel with the given indices.
    pub fn voxel_center(x: usize, y: usize, z: usize) -> Self {
        Self::new(x as f64 + 0.5, y as f64 + 0.5, z as f64 + 0.5)
    }

    /// Returns true if both points are very close to each other.
    pub fn is_close(&self, other: &Self) -> bool {
        (self.x - other.x).abs() < EPS
            && (self.y - other.y).abs() < EPS
            && (self.z - other.z).abs() < EPS
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Signed indices of the voxel containing this point.
    pub fn voxel(&self) -> (i64, i64, i64) {
        (
            self.x.floor() as i64,
            self.y.floor() as i64,
            self.z.floor() as i64,
        )
    }

    pub fn distance(&self, other: &Self) -> f64 {
        (*other - *self).length()
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prec = f.precision().unwrap_or(2); // Default 2 decimals
        write!(
            f,
            "Point({:.prec$}, {:.prec$}, {:.prec$})",
            self.x,
            self.y,
            self.z,
            prec = prec
        )
    }
}

// Implement +
impl Add<Vector> for Point {
    type Output = Point;
    fn add(self, other: Vector) -> Self {
        Self {
            x: self.x + other.dx,
            y: self.y + other.dy,
            z: self.z + other.dz,
        }
    }
}

// Implement - (difference of two points is a vector)
impl Sub for Point {
    type Output = Vector;
    fn sub(self, other: Self) -> Vector {
        Vector::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_close() {
        let pa = Point::new(5., 5., 5.);
        let pb = Point::new(5.0000000000001, 5., 5.);
        let pc = Point::new(5.1, 5., 5.);
        assert!(pa.is_close(&pb));
        assert!(!pa.is_close(&pc));
    }

    #[test]
    fn test_voxel_indices() {
        assert_eq!(Point::new(0.5, 1.99, 2.0).voxel(), (0, 1, 2));
        assert_eq!(Point::new(-0.1, 0.0, 0.0).voxel(), (-1, 0, 0));
        assert_eq!(Point::voxel_center(3, 4, 5).voxel(), (3, 4, 5));
    }

    #[test]
    fn test_add_and_sub() {
        let p = Point::new(1., 2., 3.);
        let q = p + Vector::new(1., 1., 1.);
        assert_eq!(q, Point::new(2., 3., 4.));
        assert_eq!(q - p, Vector::new(1., 1., 1.));
        assert!((p.distance(&Point::new(4., 6., 3.)) - 5.0).abs() < 1e-12);
    }
}
