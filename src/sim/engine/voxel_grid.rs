use serde::{Deserialize, Serialize};

use crate::error::{LaunchResult, RayLaunchError};
use crate::{Point, Vector};

/// Snapshot code of the lowest wall value (walls are `1000 + wall_index`).
pub const WALL_CODE: i64 = 1000;
/// Snapshot code of a building corner.
pub const CORNER_CODE: i64 = 10000;
/// Snapshot code of a roof corner.
pub const ROOF_CORNER_CODE: i64 = 10001;
/// Snapshot code of a building interior voxel.
pub const INTERIOR_CODE: i64 = 20000;

/// State of a single voxel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Cell {
    #[default]
    Free,
    /// Solid wall or roof. Rays reflect here.
    Wall,
    /// Solid building corner or roof rim. Diffraction happens here.
    Edge,
    /// Inside a building. Rays that get here stop.
    Interior,
}

impl Cell {
    pub fn is_solid(self) -> bool {
        !matches!(self, Cell::Free)
    }

    /// Decodes a snapshot value.
    ///
    /// Values below `solid_threshold` are free whatever their code. Solid values
    /// keep their kind: corners are edges, the interior code absorbs and
    /// everything else reflects.
    pub fn from_code(code: i64, solid_threshold: i64) -> Self {
        match code {
            c if c < solid_threshold => Cell::Free,
            CORNER_CODE | ROOF_CORNER_CODE => Cell::Edge,
            INTERIOR_CODE => Cell::Interior,
            _ => Cell::Wall,
        }
    }

    pub fn to_code(self) -> i64 {
        match self {
            Cell::Free => 0,
            Cell::Wall => WALL_CODE,
            Cell::Edge => CORNER_CODE,
            Cell::Interior => INTERIOR_CODE,
        }
    }
}

/// Geographic extent covered by the grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_min: f64,
    pub lat_max: f64,
}

impl GeoBounds {
    pub fn new(lon_min: f64, lon_max: f64, lat_min: f64, lat_max: f64) -> Self {
        Self {
            lon_min,
            lon_max,
            lat_min,
            lat_max,
        }
    }

    /// Continuous grid-space `(x, y)` of a geographic coordinate.
    ///
    /// `lon_min`/`lat_min` land on the center of voxel 0 and `lon_max`/`lat_max`
    /// on the center of voxel `size - 1`.
    pub fn project(&self, lon: f64, lat: f64, size: usize) -> [f64; 2] {
        let span = size.saturating_sub(1) as f64;
        let x = (lon - self.lon_min) / (self.lon_max - self.lon_min) * span;
        let y = (lat - self.lat_min) / (self.lat_max - self.lat_min) * span;
        [x + 0.5, y + 0.5]
    }

    /// Voxel column `(x, y)` containing a geographic coordinate, or `None` outside the bounds.
    pub fn to_index(&self, lon: f64, lat: f64, size: usize) -> Option<(usize, usize)> {
        let [x, y] = self.project(lon, lat, size);
        if !x.is_finite() || !y.is_finite() || x < 0.0 || y < 0.0 {
            return None;
        }
        let (i, j) = (x.floor() as usize, y.floor() as usize);
        (i < size && j < size).then_some((i, j))
    }
}

/// Dense 3D occupancy grid of `size × size × depth` voxels.
///
/// Storage order is `z * size * size + y * size + x`.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelGrid {
    cells: Vec<Cell>,
    size: usize,
    depth: usize,
    bounds: Option<GeoBounds>,
}

impl VoxelGrid {
    /// Creates an empty (all free) grid.
    pub fn new(size: usize, depth: usize) -> Self {
        Self {
            cells: vec![Cell::Free; size * size * depth],
            size,
            depth,
            bounds: None,
        }
    }

    /// Creates a grid where every voxel is solid.
    pub fn solid(size: usize, depth: usize) -> Self {
        Self {
            cells: vec![Cell::Wall; size * size * depth],
            size,
            depth,
            bounds: None,
        }
    }

    pub fn from_cells(size: usize, depth: usize, cells: Vec<Cell>) -> LaunchResult<Self> {
        if cells.len() != size * size * depth {
            return Err(RayLaunchError::Snapshot(format!(
                "expected {} cells for {size}x{size}x{depth}, got {}",
                size * size * depth,
                cells.len()
            )));
        }
        Ok(Self {
            cells,
            size,
            depth,
            bounds: None,
        })
    }

    /// Decodes snapshot codes (see [`Cell::from_code`]).
    pub fn from_codes(
        size: usize,
        depth: usize,
        codes: &[i64],
        solid_threshold: i64,
    ) -> LaunchResult<Self> {
        let cells = codes
            .iter()
            .map(|&c| Cell::from_code(c, solid_threshold))
            .collect();
        Self::from_cells(size, depth, cells)
    }

    pub fn with_bounds(mut self, bounds: GeoBounds) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn bounds(&self) -> Option<&GeoBounds> {
        self.bounds.as_ref()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn contains(&self, x: i64, y: i64, z: i64) -> bool {
        x >= 0
            && y >= 0
            && z >= 0
            && (x as usize) < self.size
            && (y as usize) < self.size
            && (z as usize) < self.depth
    }

    fn index(&self, x: i64, y: i64, z: i64) -> Option<usize> {
        self.contains(x, y, z)
            .then(|| (z as usize) * self.size * self.size + (y as usize) * self.size + x as usize)
    }

    /// Cell at signed indices, `None` outside the grid.
    pub fn cell(&self, x: i64, y: i64, z: i64) -> Option<Cell> {
        self.index(x, y, z).map(|i| self.cells[i])
    }

    /// `Some(true)` for solid voxels, `None` ("no data") outside the grid.
    pub fn is_solid(&self, x: i64, y: i64, z: i64) -> Option<bool> {
        self.cell(x, y, z).map(Cell::is_solid)
    }

    /// Sets a cell. Out-of-range indices are ignored and reported as `false`.
    pub fn set(&mut self, x: i64, y: i64, z: i64, cell: Cell) -> bool {
        match self.index(x, y, z) {
            Some(i) => {
                self.cells[i] = cell;
                true
            }
            None => false,
        }
    }

    pub fn solid_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_solid()).count()
    }

    pub fn free_count(&self) -> usize {
        self.len() - self.solid_count()
    }

    /// First solid voxel along the segment `p0 -> p1`, including the voxel of `p0`.
    ///
    /// Every voxel the segment passes through is visited, so a diagonal segment
    /// cannot slip between two face-adjacent solid voxels. Voxels outside the
    /// grid are treated as free.
    pub fn trace_occupancy(&self, p0: Point, p1: Point) -> Option<VoxelHit> {
        let length = p0.distance(&p1);
        let walk = match (p1 - p0).normalize() {
            Some(dir) => VoxelWalk::new(p0, dir, length),
            None => VoxelWalk::single(p0),
        };
        for step in walk {
            let (x, y, z) = step.voxel;
            if let Some(cell) = self.cell(x, y, z)
                && cell.is_solid()
            {
                return Some(VoxelHit {
                    voxel: (x as usize, y as usize, z as usize),
                    cell,
                    t: step.t_enter,
                    entry_normal: step.entry_normal,
                });
            }
        }
        None
    }

    /// Outward surface normal at a solid voxel hit by a ray travelling along `incoming`.
    ///
    /// The normal is the negated occupancy gradient over the 26-neighborhood,
    /// `n = -Σ occ(v + o) · o`. When the gradient vanishes (thin walls, fully
    /// enclosed voxels) or does not face the incoming ray, the face through
    /// which the ray entered the voxel is used instead.
    pub fn surface_normal(
        &self,
        voxel: (usize, usize, usize),
        incoming: Vector,
        entry_normal: Option<Vector>,
    ) -> Option<Vector> {
        let (vx, vy, vz) = (voxel.0 as i64, voxel.1 as i64, voxel.2 as i64);
        let mut gradient = Vector::new(0.0, 0.0, 0.0);
        for oz in -1..=1_i64 {
            for oy in -1..=1_i64 {
                for ox in -1..=1_i64 {
                    if ox == 0 && oy == 0 && oz == 0 {
                        continue;
                    }
                    if self.is_solid(vx + ox, vy + oy, vz + oz) == Some(true) {
                        gradient = gradient - Vector::new(ox as f64, oy as f64, oz as f64);
                    }
                }
            }
        }

        if let Some(n) = gradient.normalize()
            && n.dot(incoming) < -1e-9
        {
            return Some(n);
        }
        match entry_normal {
            Some(n) => Some(n),
            // Ray started inside the voxel: bounce straight back.
            None => (-incoming).normalize(),
        }
    }
}

/// First solid voxel found by [`VoxelGrid::trace_occupancy`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelHit {
    pub voxel: (usize, usize, usize),
    pub cell: Cell,
    /// Distance from the segment start to the voxel entry point.
    pub t: f64,
    /// Normal of the face the segment entered through (`None` if it started inside).
    pub entry_normal: Option<Vector>,
}

/// One voxel visited by a [`VoxelWalk`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WalkStep {
    pub voxel: (i64, i64, i64),
    /// Ray parameter where the voxel is entered.
    pub t_enter: f64,
    /// Ray parameter where the voxel is left.
    pub t_exit: f64,
    /// Normal of the entry face, pointing back toward the ray origin.
    pub entry_normal: Option<Vector>,
}

/// Amanatides & Woo 3D DDA over unit voxels.
///
/// Yields the voxel containing the origin first, then every voxel whose
/// interior the ray crosses, in order, until the ray parameter exceeds `t_limit`.
/// Bounds are not checked; callers decide what lies outside the grid.
#[derive(Debug, Clone)]
pub struct VoxelWalk {
    voxel: (i64, i64, i64),
    step: (i64, i64, i64),
    t_max: (f64, f64, f64),
    t_delta: (f64, f64, f64),
    t_enter: f64,
    t_limit: f64,
    entry_normal: Option<Vector>,
    done: bool,
}

impl VoxelWalk {
    /// `direction` must be normalized for `t` to be a distance in voxel units.
    pub fn new(origin: Point, direction: Vector, t_limit: f64) -> Self {
        let sign = |d: f64| -> i64 {
            if d > 0.0 {
                1
            } else if d < 0.0 {
                -1
            } else {
                0
            }
        };
        let step = (sign(direction.dx), sign(direction.dy), sign(direction.dz));

        let next_boundary = |p: f64, s: i64, d: f64| -> f64 {
            if s == 0 {
                return f64::INFINITY;
            }
            let f = p - p.floor();
            let dist = if s > 0 { 1.0 - f } else { f };
            dist / d.abs()
        };
        let delta = |s: i64, d: f64| -> f64 {
            if s == 0 {
                f64::INFINITY
            } else {
                1.0 / d.abs()
            }
        };

        let done = !origin.is_finite() || !direction.is_finite();
        Self {
            voxel: origin.voxel(),
            step,
            t_max: (
                next_boundary(origin.x, step.0, direction.dx),
                next_boundary(origin.y, step.1, direction.dy),
                next_boundary(origin.z, step.2, direction.dz),
            ),
            t_delta: (
                delta(step.0, direction.dx),
                delta(step.1, direction.dy),
                delta(step.2, direction.dz),
            ),
            t_enter: 0.0,
            t_limit,
            entry_normal: None,
            done,
        }
    }

    /// A walk that yields only the voxel containing `origin`.
    pub fn single(origin: Point) -> Self {
        Self::new(origin, Vector::new(0.0, 0.0, 0.0), 0.0)
    }
}

impl Iterator for VoxelWalk {
    type Item = WalkStep;

    fn next(&mut self) -> Option<WalkStep> {
        if self.done || self.t_enter > self.t_limit {
            return None;
        }

        let (tx, ty, tz) = self.t_max;
        let t_exit = tx.min(ty).min(tz);
        let current = WalkStep {
            voxel: self.voxel,
            t_enter: self.t_enter,
            t_exit,
            entry_normal: self.entry_normal,
        };

        if !t_exit.is_finite() {
            // Zero direction: only the origin voxel.
            self.done = true;
            return Some(current);
        }

        // Step along the smallest t_max
        if tx <= ty && tx <= tz {
            self.voxel.0 += self.step.0;
            self.t_max.0 += self.t_delta.0;
            self.entry_normal = Some(Vector::new(-self.step.0 as f64, 0.0, 0.0));
        } else if ty <= tz {
            self.voxel.1 += self.step.1;
            self.t_max.1 += self.t_delta.1;
            self.entry_normal = Some(Vector::new(0.0, -self.step.1 as f64, 0.0));
        } else {
            self.voxel.2 += self.step.2;
            self.t_max.2 += self.t_delta.2;
            self.entry_normal = Some(Vector::new(0.0, 0.0, -self.step.2 as f64));
        }
        self.t_enter = t_exit;

        Some(current)
    }
}
