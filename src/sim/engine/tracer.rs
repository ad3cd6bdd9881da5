//! Voxel-by-voxel tracing of one launch direction.

use std::collections::VecDeque;

use log::{debug, warn};
use serde::Serialize;

use crate::error::RayFailure;
use crate::{Point, Vector};

use super::directions::Launch;
use super::propagation::{
    NO_SIGNAL_DBM, PropagationModel, ReflectionLoss, Surface, diffraction_loss_db,
};
use super::reflection::{ReflectionModel, diffraction_fan};
use super::voxel_grid::{Cell, VoxelGrid, VoxelWalk};

/// Power recorded for a sample taken inside a wall.
pub const WALL_SENTINEL_DBM: f64 = NO_SIGNAL_DBM;

/// Distance a continuation segment starts behind its hit point, in voxels.
const BACKOFF: f64 = 1e-6;

/// One voxel visited by a ray.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RaySample {
    pub x: usize,
    pub y: usize,
    pub z: usize,
    /// Power in dBm, or [`WALL_SENTINEL_DBM`] for a wall crossing.
    pub power: f64,
}

impl RaySample {
    pub fn is_wall(&self) -> bool {
        self.power <= WALL_SENTINEL_DBM
    }
}

/// Why a ray stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Termination {
    ExitedGrid,
    InteractionBudget,
    PowerFloor,
    /// Reflection factor left nothing to reflect.
    Absorbed,
    /// Replaced by diffraction sub-rays.
    Diffracted,
    /// Could not leave the surface it bounced off.
    Trapped,
    /// Reached the inside of a building.
    Interior,
    StepLimit,
}

/// An unbranched chain of samples. Reflections continue the same ray.
#[derive(Debug, Clone, PartialEq)]
pub struct Ray {
    /// Index of the launch this ray belongs to.
    pub launch: usize,
    pub azimuth: usize,
    pub elevation: usize,
    /// Index of the diffracting ray within the same launch.
    pub parent: Option<usize>,
    pub interactions: usize,
    pub samples: Vec<RaySample>,
    pub termination: Termination,
}

/// Per-run tracing parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceParams {
    pub tx_power_dbm: f64,
    pub voxel_size_m: f64,
    pub reflection_factor: f64,
    pub reflection_loss: ReflectionLoss,
    pub max_interactions: usize,
    pub minimal_power_dbm: f64,
    pub diffraction_rays: usize,
    pub diffraction_loss_db: f64,
    pub ground_reflection: bool,
    /// Voxels one ray may visit before it is cut off.
    pub max_steps: usize,
}

/// A segment waiting to be traced.
#[derive(Debug, Clone, Copy)]
struct Branch {
    origin: Point,
    direction: Vector,
    /// Unfolded path length at `origin`, in voxels.
    path_length: f64,
    loss_db: f64,
    interactions: usize,
    parent: Option<usize>,
    can_diffract: bool,
}

/// Where a segment ended.
enum SegmentEnd {
    Stop(Termination),
    Continue(Branch),
}

/// Traces launches through an immutable voxel grid.
///
/// Tracing is a pure function of the grid, the station and the launch, so
/// launches can be traced in any order and on any thread.
pub struct Tracer<'a, P: PropagationModel, R: ReflectionModel> {
    grid: &'a VoxelGrid,
    station: Point,
    params: TraceParams,
    propagation: P,
    reflection: R,
}

impl<'a, P: PropagationModel, R: ReflectionModel> Tracer<'a, P, R> {
    pub fn new(
        grid: &'a VoxelGrid,
        station: Point,
        params: TraceParams,
        propagation: P,
        reflection: R,
    ) -> Self {
        Self {
            grid,
            station,
            params,
            propagation,
            reflection,
        }
    }

    pub fn params(&self) -> &TraceParams {
        &self.params
    }

    /// Traces one launch direction, returning the launched ray followed by its
    /// diffraction sub-rays.
    ///
    /// A failing sub-ray is logged and left out. Only a failure of the
    /// launched ray itself fails the launch.
    pub fn trace(&self, launch: &Launch) -> Result<Vec<Ray>, RayFailure> {
        let direction = launch
            .direction
            .normalize()
            .ok_or(RayFailure::NonFiniteDirection {
                azimuth: launch.azimuth,
                elevation: launch.elevation,
            })?;

        let mut queue = VecDeque::from([Branch {
            origin: self.station,
            direction,
            path_length: 0.0,
            loss_db: 0.0,
            interactions: 0,
            parent: None,
            can_diffract: true,
        }]);
        let mut rays = Vec::new();
        while let Some(branch) = queue.pop_front() {
            let index = rays.len();
            match self.follow(launch, branch, index, &mut queue) {
                Ok(ray) => rays.push(ray),
                Err(failure) if branch.parent.is_some() => {
                    warn!("dropping diffraction ray: {failure}");
                }
                Err(failure) => return Err(failure),
            }
        }
        Ok(rays)
    }

    /// Follows one branch through all its reflections.
    fn follow(
        &self,
        launch: &Launch,
        branch: Branch,
        index: usize,
        queue: &mut VecDeque<Branch>,
    ) -> Result<Ray, RayFailure> {
        let mut ray = Ray {
            launch: launch.index,
            azimuth: launch.azimuth,
            elevation: launch.elevation,
            parent: branch.parent,
            interactions: branch.interactions,
            samples: Vec::new(),
            termination: Termination::ExitedGrid,
        };
        let mut steps = 0_usize;
        let mut segment = branch;

        loop {
            match self.segment(launch, &segment, index, &mut ray, &mut steps, queue)? {
                SegmentEnd::Stop(termination) => {
                    ray.termination = termination;
                    return Ok(ray);
                }
                SegmentEnd::Continue(next) => {
                    ray.interactions = next.interactions;
                    segment = next;
                }
            }
        }
    }

    /// Walks one straight segment until it leaves the grid, fades out or hits something.
    fn segment(
        &self,
        launch: &Launch,
        seg: &Branch,
        index: usize,
        ray: &mut Ray,
        steps: &mut usize,
        queue: &mut VecDeque<Branch>,
    ) -> Result<SegmentEnd, RayFailure> {
        let p = &self.params;
        let walk = VoxelWalk::new(seg.origin, seg.direction, f64::INFINITY);

        // The origin voxel is the station or was already sampled.
        for step in walk.skip(1) {
            *steps += 1;
            if *steps > p.max_steps {
                return Ok(SegmentEnd::Stop(Termination::StepLimit));
            }

            let (x, y, z) = step.voxel;
            let hit_point = seg.origin + seg.direction * step.t_enter;

            if z < 0 && self.grid.contains(x, y, 0) {
                if !p.ground_reflection {
                    return Ok(SegmentEnd::Stop(Termination::ExitedGrid));
                }
                let normal = Vector::new(0.0, 0.0, 1.0);
                return self.bounce(launch, seg, step.t_enter, hit_point, normal, Surface::Ground);
            }

            let Some(cell) = self.grid.cell(x, y, z) else {
                return Ok(SegmentEnd::Stop(Termination::ExitedGrid));
            };
            let (ux, uy, uz) = (x as usize, y as usize, z as usize);

            if cell.is_solid() {
                ray.samples.push(RaySample {
                    x: ux,
                    y: uy,
                    z: uz,
                    power: WALL_SENTINEL_DBM,
                });
                if cell == Cell::Interior {
                    return Ok(SegmentEnd::Stop(Termination::Interior));
                }
                if seg.interactions >= p.max_interactions {
                    return Ok(SegmentEnd::Stop(Termination::InteractionBudget));
                }
                let Some(normal) =
                    self.grid
                        .surface_normal((ux, uy, uz), seg.direction, step.entry_normal)
                else {
                    return Err(RayFailure::DegenerateReflection {
                        azimuth: launch.azimuth,
                        elevation: launch.elevation,
                        x: ux,
                        y: uy,
                        z: uz,
                    });
                };

                if cell == Cell::Edge && seg.can_diffract && p.diffraction_rays > 0 {
                    self.diffract(seg, step.t_enter, hit_point, normal, index, queue);
                    return Ok(SegmentEnd::Stop(Termination::Diffracted));
                }
                return self.bounce(launch, seg, step.t_enter, hit_point, normal, Surface::Wall);
            }

            let distance = seg.path_length + 0.5 * (step.t_enter + step.t_exit);
            let power = p.tx_power_dbm
                - self.propagation.path_loss_db(distance * p.voxel_size_m)
                - seg.loss_db;
            if !power.is_finite() {
                return Err(RayFailure::NonFinitePower {
                    azimuth: launch.azimuth,
                    elevation: launch.elevation,
                });
            }
            if power < p.minimal_power_dbm {
                return Ok(SegmentEnd::Stop(Termination::PowerFloor));
            }
            ray.samples.push(RaySample {
                x: ux,
                y: uy,
                z: uz,
                power,
            });
        }

        Ok(SegmentEnd::Stop(Termination::ExitedGrid))
    }

    /// Specular reflection off a wall or the ground.
    fn bounce(
        &self,
        launch: &Launch,
        seg: &Branch,
        t_hit: f64,
        hit_point: Point,
        normal: Vector,
        surface: Surface,
    ) -> Result<SegmentEnd, RayFailure> {
        let p = &self.params;
        if seg.interactions >= p.max_interactions {
            return Ok(SegmentEnd::Stop(Termination::InteractionBudget));
        }
        let Some(loss) =
            p.reflection_loss
                .loss_db(p.reflection_factor, seg.direction, normal, surface)
        else {
            return Ok(SegmentEnd::Stop(Termination::Absorbed));
        };

        let (hx, hy, hz) = hit_point.voxel();
        let reflected = self.reflection.reflect(seg.direction, normal).normalize();
        let Some(direction) = reflected else {
            return Err(RayFailure::DegenerateReflection {
                azimuth: launch.azimuth,
                elevation: launch.elevation,
                x: hx.max(0) as usize,
                y: hy.max(0) as usize,
                z: hz.max(0) as usize,
            });
        };

        let next = Branch {
            origin: hit_point + seg.direction * -BACKOFF,
            direction,
            path_length: seg.path_length + t_hit,
            loss_db: seg.loss_db + loss,
            interactions: seg.interactions + 1,
            parent: seg.parent,
            can_diffract: seg.can_diffract,
        };
        Ok(match self.leave_surface(next, normal) {
            Some(branch) => SegmentEnd::Continue(branch),
            None => SegmentEnd::Stop(Termination::Trapped),
        })
    }

    /// Queues the diffraction fan spawned at an edge.
    fn diffract(
        &self,
        seg: &Branch,
        t_hit: f64,
        hit_point: Point,
        normal: Vector,
        index: usize,
        queue: &mut VecDeque<Branch>,
    ) {
        let p = &self.params;
        let count = p.diffraction_rays;
        let loss = diffraction_loss_db(p.diffraction_loss_db, count);
        for direction in diffraction_fan(seg.direction, normal, count) {
            let sub = Branch {
                origin: hit_point + seg.direction * -BACKOFF,
                direction,
                path_length: seg.path_length + t_hit,
                loss_db: seg.loss_db + loss,
                interactions: seg.interactions + 1,
                parent: Some(index),
                can_diffract: false,
            };
            if let Some(sub) = self.leave_surface(sub, normal) {
                queue.push_back(sub);
            }
        }
    }

    /// Pushes a continuation segment one voxel along `normal` if its first step
    /// would re-enter a solid voxel. `None` if it still cannot get free.
    fn leave_surface(&self, branch: Branch, normal: Vector) -> Option<Branch> {
        if !self.first_step_blocked(&branch) {
            return Some(branch);
        }
        let nudged = Branch {
            origin: branch.origin + normal,
            path_length: branch.path_length + 1.0,
            ..branch
        };
        let (x, y, z) = nudged.origin.voxel();
        if self.grid.is_solid(x, y, z) == Some(true) || self.first_step_blocked(&nudged) {
            debug!("ray stuck at {} after nudge", nudged.origin);
            return None;
        }
        Some(nudged)
    }

    fn first_step_blocked(&self, branch: &Branch) -> bool {
        let mut walk = VoxelWalk::new(branch.origin, branch.direction, f64::INFINITY);
        match walk.nth(1) {
            Some(step) => {
                let (x, y, z) = step.voxel;
                self.grid.is_solid(x, y, z) == Some(true)
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::engine::propagation::{FreeSpace, watts_to_dbm};
    use crate::sim::engine::reflection::Specular;

    fn params() -> TraceParams {
        TraceParams {
            tx_power_dbm: watts_to_dbm(1.0),
            voxel_size_m: 1.0,
            reflection_factor: 1.0,
            reflection_loss: ReflectionLoss::Constant,
            max_interactions: 3,
            minimal_power_dbm: -160.0,
            diffraction_rays: 0,
            diffraction_loss_db: 6.0,
            ground_reflection: true,
            max_steps: 10_000,
        }
    }

    fn launch(direction: Vector) -> Launch {
        Launch {
            index: 0,
            azimuth: 0,
            elevation: 0,
            direction,
        }
    }

    fn tracer(grid: &VoxelGrid, station: Point, params: TraceParams) -> Tracer<'_, FreeSpace, Specular> {
        Tracer::new(grid, station, params, FreeSpace::new(2.4, 1.0), Specular)
    }

    #[test]
    fn test_free_space_ray_exits_grid() {
        let grid = VoxelGrid::new(10, 3);
        let t = tracer(&grid, Point::voxel_center(0, 5, 1), params());
        let rays = t.trace(&launch(Vector::new(1.0, 0.0, 0.0))).unwrap();
        assert_eq!(rays.len(), 1);
        let ray = &rays[0];
        assert_eq!(ray.termination, Termination::ExitedGrid);
        assert_eq!(ray.samples.len(), 9);
        assert_eq!((ray.samples[0].x, ray.samples[8].x), (1, 9));
        // 9 voxels from the station: 30 dBm - FSPL(9 m, 2.4 GHz)
        let expected = 30.0 - (20.0 * 9.0_f64.log10() + 20.0 * 2.4_f64.log10() + 32.45);
        assert!((ray.samples[8].power - expected).abs() < 1e-9);
    }

    #[test]
    fn test_wall_reflection_reverses_direction() {
        let mut grid = VoxelGrid::new(10, 3);
        for y in 0..10 {
            for z in 0..3 {
                grid.set(6, y, z, Cell::Wall);
            }
        }
        let t = tracer(&grid, Point::voxel_center(2, 5, 1), params());
        let rays = t.trace(&launch(Vector::new(1.0, 0.0, 0.0))).unwrap();
        let ray = &rays[0];
        assert_eq!(ray.interactions, 1);
        assert!(ray.samples.iter().any(|s| s.is_wall() && s.x == 6));
        // After the bounce the ray travels back past the station
        assert_eq!(ray.samples.last().map(|s| s.x), Some(0));
        assert_eq!(ray.termination, Termination::ExitedGrid);
    }

    #[test]
    fn test_power_is_non_increasing() {
        let mut grid = VoxelGrid::new(16, 6);
        for y in 0..16 {
            for z in 0..6 {
                grid.set(12, y, z, Cell::Wall);
                grid.set(1, y, z, Cell::Wall);
            }
        }
        let mut p = params();
        p.reflection_factor = 0.7;
        p.max_interactions = 6;
        let t = tracer(&grid, Point::voxel_center(5, 7, 2), p);
        let dir = Vector::new(1.0, 0.3, 0.2).normalize().unwrap();
        for ray in t.trace(&launch(dir)).unwrap() {
            let powers: Vec<f64> = ray
                .samples
                .iter()
                .filter(|s| !s.is_wall())
                .map(|s| s.power)
                .collect();
            for pair in powers.windows(2) {
                assert!(pair[1] <= pair[0] + 1e-9, "{} -> {}", pair[0], pair[1]);
            }
        }
    }

    #[test]
    fn test_interaction_budget() {
        // Ray bouncing between two parallel walls
        let mut grid = VoxelGrid::new(10, 3);
        for y in 0..10 {
            for z in 0..3 {
                grid.set(0, y, z, Cell::Wall);
                grid.set(9, y, z, Cell::Wall);
            }
        }
        let mut p = params();
        p.max_interactions = 4;
        let t = tracer(&grid, Point::voxel_center(4, 5, 1), p);
        let rays = t.trace(&launch(Vector::new(1.0, 0.0, 0.0))).unwrap();
        assert_eq!(rays[0].interactions, 4);
        assert_eq!(rays[0].termination, Termination::InteractionBudget);
    }

    #[test]
    fn test_zero_reflection_factor_absorbs() {
        let mut grid = VoxelGrid::new(10, 3);
        grid.set(7, 5, 1, Cell::Wall);
        let mut p = params();
        p.reflection_factor = 0.0;
        let t = tracer(&grid, Point::voxel_center(2, 5, 1), p);
        let rays = t.trace(&launch(Vector::new(1.0, 0.0, 0.0))).unwrap();
        assert_eq!(rays[0].termination, Termination::Absorbed);
        assert_eq!(rays[0].interactions, 0);
    }

    #[test]
    fn test_power_floor_terminates() {
        let grid = VoxelGrid::new(200, 3);
        let mut p = params();
        // 30 dBm falls below -40 dBm after roughly 31 m at 2.4 GHz
        p.minimal_power_dbm = -40.0;
        let t = tracer(&grid, Point::voxel_center(0, 1, 1), p);
        let rays = t.trace(&launch(Vector::new(1.0, 0.0, 0.0))).unwrap();
        assert_eq!(rays[0].termination, Termination::PowerFloor);
        assert!(rays[0].samples.iter().all(|s| s.power >= -40.0));
        assert!(rays[0].samples.len() < 40);
    }

    #[test]
    fn test_ground_reflection() {
        let grid = VoxelGrid::new(20, 10);
        let dir = Vector::new(1.0, 0.0, -1.0).normalize().unwrap();
        let t = tracer(&grid, Point::voxel_center(2, 5, 4), params());
        let rays = t.trace(&launch(dir)).unwrap();
        assert_eq!(rays[0].interactions, 1);
        assert!(rays[0].samples.last().unwrap().z > 0);

        let mut p = params();
        p.ground_reflection = false;
        let t = tracer(&grid, Point::voxel_center(2, 5, 4), p);
        let rays = t.trace(&launch(dir)).unwrap();
        assert_eq!(rays[0].interactions, 0);
        assert_eq!(rays[0].samples.last().unwrap().z, 0);
    }

    #[test]
    fn test_edge_spawns_diffraction_rays() {
        let mut grid = VoxelGrid::new(20, 4);
        grid.set(10, 5, 1, Cell::Edge);
        let mut p = params();
        p.diffraction_rays = 5;
        let t = tracer(&grid, Point::voxel_center(2, 5, 1), p);
        let rays = t.trace(&launch(Vector::new(1.0, 0.0, 0.0))).unwrap();
        assert_eq!(rays[0].termination, Termination::Diffracted);
        assert!(rays.len() > 1 && rays.len() <= 6);
        for sub in &rays[1..] {
            assert_eq!(sub.parent, Some(0));
            assert_eq!(sub.interactions, 1);
            assert_ne!(sub.termination, Termination::Diffracted);
        }
    }

    #[test]
    fn test_failed_sub_ray_keeps_the_rest_of_the_launch() {
        let mut grid = VoxelGrid::new(20, 4);
        grid.set(10, 5, 1, Cell::Edge);
        let mut p = params();
        p.diffraction_rays = 5;
        // Every sub-ray ends up with non-finite power
        p.diffraction_loss_db = f64::INFINITY;
        let t = tracer(&grid, Point::voxel_center(2, 5, 1), p);
        let rays = t.trace(&launch(Vector::new(1.0, 0.0, 0.0))).unwrap();
        assert_eq!(rays.len(), 1);
        assert_eq!(rays[0].termination, Termination::Diffracted);
        assert_eq!(rays[0].samples.len(), 8);
    }

    #[test]
    fn test_interior_stops_the_ray() {
        let mut grid = VoxelGrid::new(12, 3);
        grid.set(6, 5, 1, Cell::Interior);
        let t = tracer(&grid, Point::voxel_center(2, 5, 1), params());
        let rays = t.trace(&launch(Vector::new(1.0, 0.0, 0.0))).unwrap();
        let ray = &rays[0];
        assert_eq!(ray.termination, Termination::Interior);
        assert_eq!(ray.interactions, 0);
        assert_eq!(ray.samples.last().map(|s| (s.x, s.is_wall())), Some((6, true)));
    }

    #[test]
    fn test_trace_is_deterministic() {
        let mut grid = VoxelGrid::new(24, 6);
        for y in 4..12 {
            for z in 0..4 {
                grid.set(15, y, z, Cell::Wall);
            }
        }
        grid.set(15, 4, 3, Cell::Edge);
        let mut p = params();
        p.diffraction_rays = 4;
        let t = tracer(&grid, Point::voxel_center(3, 8, 2), p);
        let dir = Vector::new(0.9, -0.2, 0.1).normalize().unwrap();
        assert_eq!(t.trace(&launch(dir)).unwrap(), t.trace(&launch(dir)).unwrap());
    }

    #[test]
    fn test_non_finite_direction_fails() {
        let grid = VoxelGrid::new(4, 2);
        let t = tracer(&grid, Point::voxel_center(1, 1, 1), params());
        let err = t.trace(&launch(Vector::new(f64::NAN, 0.0, 0.0))).unwrap_err();
        assert!(matches!(err, RayFailure::NonFiniteDirection { .. }));
    }
}
