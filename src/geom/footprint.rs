//! Building footprints: closed 2D rings extruded to a height.

use serde::{Deserialize, Serialize};

use crate::geom::EPS;

/// A building outline in grid space (`x`, `y` in voxel units) with a height in meters.
///
/// The ring may be given open or closed (first vertex repeated at the end).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Footprint {
    #[serde(default)]
    pub name: String,
    pub vertices: Vec<[f64; 2]>,
    pub height: f64,
}

impl Footprint {
    pub fn new(name: &str, vertices: Vec<[f64; 2]>, height: f64) -> Self {
        Self {
            name: name.to_string(),
            vertices,
            height,
        }
    }

    /// Axis-aligned rectangle `[x0, x1] × [y0, y1]`.
    pub fn rectangle(name: &str, x0: f64, y0: f64, x1: f64, y1: f64, height: f64) -> Self {
        Self::new(
            name,
            vec![[x0, y0], [x1, y0], [x1, y1], [x0, y1]],
            height,
        )
    }

    /// Vertices without the closing duplicate and without consecutive repeats.
    pub fn ring(&self) -> Vec<[f64; 2]> {
        let mut ring: Vec<[f64; 2]> = Vec::with_capacity(self.vertices.len());
        for &v in &self.vertices {
            if let Some(last) = ring.last()
                && is_same(*last, v)
            {
                continue;
            }
            ring.push(v);
        }
        if ring.len() > 1 && is_same(ring[0], ring[ring.len() - 1]) {
            ring.pop();
        }
        ring
    }

    /// Signed area from the shoelace formula (positive for counter-clockwise rings).
    pub fn signed_area(&self) -> f64 {
        let ring = self.ring();
        let n = ring.len();
        if n < 3 {
            return 0.0;
        }
        let mut sum = 0.0;
        for i in 0..n {
            let [x0, y0] = ring[i];
            let [x1, y1] = ring[(i + 1) % n];
            sum += x0 * y1 - x1 * y0;
        }
        sum / 2.0
    }

    /// Returns the reason this footprint cannot be rasterized, if any.
    pub fn degeneracy(&self) -> Option<&'static str> {
        if self
            .vertices
            .iter()
            .any(|v| !v[0].is_finite() || !v[1].is_finite())
        {
            return Some("non-finite vertex");
        }
        if !self.height.is_finite() || self.height <= 0.0 {
            return Some("non-positive height");
        }
        if self.ring().len() < 3 {
            return Some("fewer than 3 distinct vertices");
        }
        if self.signed_area().abs() < EPS {
            return Some("zero area");
        }
        None
    }

    /// Even-odd point-in-polygon test. Points exactly on the boundary may fall either way.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let ring = self.ring();
        let n = ring.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let [xi, yi] = ring[i];
            let [xj, yj] = ring[j];
            if (yi > y) != (yj > y) {
                let x_cross = xi + (y - yi) * (xj - xi) / (yj - yi);
                if x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }

    /// Bounding box `(xmin, ymin, xmax, ymax)` of the ring.
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let ring = self.ring();
        let first = ring.first()?;
        let init = (first[0], first[1], first[0], first[1]);
        Some(ring.iter().fold(init, |(x0, y0, x1, y1), v| {
            (x0.min(v[0]), y0.min(v[1]), x1.max(v[0]), y1.max(v[1]))
        }))
    }
}

fn is_same(a: [f64; 2], b: [f64; 2]) -> bool {
    (a[0] - b[0]).abs() < EPS && (a[1] - b[1]).abs() < EPS
}
