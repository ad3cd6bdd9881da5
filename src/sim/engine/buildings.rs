//! Rasterization of building footprints into a [`VoxelGrid`].

use log::warn;

use crate::error::GeometryWarning;
use crate::geom::footprint::Footprint;
use crate::{Point, Vector};

use super::voxel_grid::{Cell, GeoBounds, VoxelGrid, VoxelWalk};

/// Builds a voxel grid from extruded building footprints.
///
/// Footprint vertices are in grid space: voxel `(i, j)` covers `[i, i + 1) × [j, j + 1)`.
pub struct GridBuilder {
    grid: VoxelGrid,
    voxel_size_m: f64,
    warnings: Vec<GeometryWarning>,
}

impl GridBuilder {
    pub fn new(size: usize, depth: usize, voxel_size_m: f64) -> Self {
        Self {
            grid: VoxelGrid::new(size, depth),
            voxel_size_m,
            warnings: Vec::new(),
        }
    }

    pub fn with_bounds(mut self, bounds: GeoBounds) -> Self {
        self.grid = self.grid.with_bounds(bounds);
        self
    }

    /// Number of solid layers for a height in meters, at least 1 and at most the grid depth.
    pub fn layers(&self, height_m: f64) -> usize {
        let layers = (height_m / self.voxel_size_m).round();
        if !layers.is_finite() || layers < 1.0 {
            1
        } else {
            (layers as usize).min(self.grid.depth())
        }
    }

    /// Adds a footprint with grid-space vertices.
    ///
    /// Degenerate footprints are skipped and logged, never fatal.
    pub fn add_footprint(&mut self, footprint: &Footprint) -> &mut Self {
        if let Some(reason) = footprint.degeneracy() {
            self.skip(GeometryWarning::DegenerateFootprint {
                name: footprint.name.clone(),
                reason,
            });
            return self;
        }

        let layers = self.layers(footprint.height);
        let mut marked = 0_usize;

        // Interior
        if let Some((x0, y0, x1, y1)) = footprint.bounds() {
            let size = self.grid.size() as i64;
            let (ix0, iy0) = ((x0.floor() as i64).max(0), (y0.floor() as i64).max(0));
            let (ix1, iy1) = ((x1.ceil() as i64).min(size - 1), (y1.ceil() as i64).min(size - 1));
            for j in iy0..=iy1 {
                for i in ix0..=ix1 {
                    if footprint.contains(i as f64 + 0.5, j as f64 + 0.5)
                        && self.fill_interior(i, j, layers)
                    {
                        marked += 1;
                    }
                }
            }
        }

        // Outline, face-connected
        let ring = footprint.ring();
        let mut outline: Vec<(i64, i64)> = Vec::new();
        for (k, &a) in ring.iter().enumerate() {
            let b = ring[(k + 1) % ring.len()];
            outline.extend(supercover(a, b));
        }
        for &(i, j) in &outline {
            if self.fill_column(i, j, layers, Cell::Wall) {
                marked += 1;
            }
        }

        if marked == 0 {
            self.skip(GeometryWarning::FootprintOutsideGrid {
                name: footprint.name.clone(),
            });
            return self;
        }

        // Roof rim, then corners over the full height
        let top = layers as i64 - 1;
        for &(i, j) in &outline {
            self.grid.set(i, j, top, Cell::Edge);
        }
        for v in &ring {
            let (i, j) = (v[0].floor() as i64, v[1].floor() as i64);
            self.fill_column(i, j, layers, Cell::Edge);
        }

        self
    }

    /// Adds a footprint whose vertices are `[lon, lat]` pairs.
    ///
    /// Requires geographic bounds; without them the footprint is skipped.
    pub fn add_geo_footprint(&mut self, footprint: &Footprint) -> &mut Self {
        let Some(bounds) = self.grid.bounds().copied() else {
            self.skip(GeometryWarning::FootprintOutsideGrid {
                name: footprint.name.clone(),
            });
            return self;
        };
        let size = self.grid.size();
        let projected = Footprint {
            name: footprint.name.clone(),
            vertices: footprint
                .vertices
                .iter()
                .map(|v| bounds.project(v[0], v[1], size))
                .collect(),
            height: footprint.height,
        };
        self.add_footprint(&projected)
    }

    pub fn warnings(&self) -> &[GeometryWarning] {
        &self.warnings
    }

    pub fn build(self) -> VoxelGrid {
        self.grid
    }

    fn skip(&mut self, warning: GeometryWarning) {
        warn!("{warning}");
        self.warnings.push(warning);
    }

    /// Interior column under a reflecting roof voxel.
    fn fill_interior(&mut self, i: i64, j: i64, layers: usize) -> bool {
        let top = layers.saturating_sub(1);
        let any = self.fill_column(i, j, top, Cell::Interior);
        self.grid.set(i, j, top as i64, Cell::Wall) || any
    }

    /// Marks layers `0..layers` of column `(i, j)`. Returns false outside the grid.
    fn fill_column(&mut self, i: i64, j: i64, layers: usize, cell: Cell) -> bool {
        let mut any = false;
        for z in 0..layers as i64 {
            any |= self.grid.set(i, j, z, cell);
        }
        any
    }
}

/// Voxel columns crossed by the 2D segment `a -> b`, face-connected.
fn supercover(a: [f64; 2], b: [f64; 2]) -> Vec<(i64, i64)> {
    let p0 = Point::new(a[0], a[1], 0.5);
    let p1 = Point::new(b[0], b[1], 0.5);
    let length = p0.distance(&p1);
    let walk = match Vector::new(b[0] - a[0], b[1] - a[1], 0.0).normalize() {
        Some(dir) => VoxelWalk::new(p0, dir, length),
        None => VoxelWalk::single(p0),
    };
    walk.map(|s| (s.voxel.0, s.voxel.1)).collect()
}
