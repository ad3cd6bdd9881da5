use std::f64::consts::FRAC_PI_2;

use crate::Vector;

/// Defines how rays reflect off surfaces.
pub trait ReflectionModel {
    /// Computes the reflected direction given incident direction and surface normal.
    fn reflect(&self, incident: Vector, normal: Vector) -> Vector;
}

/// Perfect specular (mirror) reflection.
#[derive(Debug, Clone, Copy, Default)]
pub struct Specular;

impl ReflectionModel for Specular {
    fn reflect(&self, incident: Vector, normal: Vector) -> Vector {
        let dot = incident.dot(normal);
        incident - 2.0 * dot * normal
    }
}

/// Directions of `count` diffraction sub-rays spawned where `incoming` hits an edge
/// with outward normal `normal`.
///
/// The fan lies in the plane spanned by the incoming direction and the normal. It
/// starts at the grazing tangent `g = normalize(d - (d·n)n)` and sweeps toward `n`
/// in steps of `π/2 / count`. A head-on hit has no tangent in that plane, so any
/// direction perpendicular to `n` is used.
pub fn diffraction_fan(incoming: Vector, normal: Vector, count: usize) -> Vec<Vector> {
    let Some(n) = normal.normalize() else {
        return Vec::new();
    };
    let Some(g) = (incoming - incoming.dot(n) * n)
        .normalize()
        .or_else(|| perpendicular(n))
    else {
        return Vec::new();
    };

    (0..count)
        .filter_map(|k| {
            let angle = k as f64 / count as f64 * FRAC_PI_2;
            (g * angle.cos() + n * angle.sin()).normalize()
        })
        .collect()
}

fn perpendicular(n: Vector) -> Option<Vector> {
    let axis = if n.dz.abs() < 0.9 {
        Vector::new(0.0, 0.0, 1.0)
    } else {
        Vector::new(1.0, 0.0, 0.0)
    };
    n.cross(axis).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specular_reflection() {
        let model = Specular;
        let incident = Vector::new(1.0, -1.0, 0.0);
        let normal = Vector::new(0.0, 1.0, 0.0);
        let reflected = model.reflect(incident, normal);
        assert!((reflected.dx - 1.0).abs() < 1e-10);
        assert!((reflected.dy - 1.0).abs() < 1e-10);
        assert!((reflected.dz - 0.0).abs() < 1e-10);
    }

    #[test]
    fn test_specular_preserves_length() {
        let incident = Vector::new(0.3, -0.5, 0.8).normalize().unwrap();
        let normal = Vector::new(0.0, 0.6, 0.8).normalize().unwrap();
        let reflected = Specular.reflect(incident, normal);
        assert!((reflected.length() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_fan_sweeps_from_tangent_to_normal() {
        let incoming = Vector::new(1.0, 0.0, -1.0).normalize().unwrap();
        let normal = Vector::new(0.0, 0.0, 1.0);
        let fan = diffraction_fan(incoming, normal, 4);
        assert_eq!(fan.len(), 4);
        // First ray grazes along the surface in the incoming direction
        assert!(fan[0].is_close(&Vector::new(1.0, 0.0, 0.0)));
        // Rays turn monotonically toward the normal
        for pair in fan.windows(2) {
            assert!(pair[1].dot(normal) > pair[0].dot(normal));
        }
        for v in &fan {
            assert!((v.length() - 1.0).abs() < 1e-12);
            assert!(v.dot(normal) >= -1e-12);
            assert!(v.dy.abs() < 1e-12);
        }
    }

    #[test]
    fn test_fan_head_on_hit() {
        let fan = diffraction_fan(Vector::new(-1.0, 0.0, 0.0), Vector::new(1.0, 0.0, 0.0), 3);
        assert_eq!(fan.len(), 3);
        assert!(fan[0].dot(Vector::new(1.0, 0.0, 0.0)).abs() < 1e-12);
    }

    #[test]
    fn test_fan_is_deterministic() {
        let d = Vector::new(0.2, 0.9, -0.1).normalize().unwrap();
        let n = Vector::new(0.0, -1.0, 0.0);
        assert_eq!(diffraction_fan(d, n, 7), diffraction_fan(d, n, 7));
        assert!(diffraction_fan(d, n, 0).is_empty());
    }
}
