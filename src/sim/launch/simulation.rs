use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Instant;

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::Point;
use crate::error::{LaunchResult, RayLaunchError};
use crate::sim::coverage::{PowerMap, PowerMapLegend};
use crate::sim::engine::directions::{Hemisphere, Launch, TraceMode};
use crate::sim::engine::propagation::{FreeSpace, watts_to_dbm};
use crate::sim::engine::reflection::Specular;
use crate::sim::engine::tracer::{Ray, TraceParams, Tracer};
use crate::sim::engine::voxel_grid::VoxelGrid;

use super::config::{LaunchSettings, RayLaunchRequest};
use super::result::{LaunchStats, RayLaunchResult};

/// Lifecycle of a [`RayLaunch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    Idle,
    Validating,
    Tracing,
    Aggregating,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub struct LaunchProgress {
    /// Launch directions finished so far (0..=launches_total).
    pub launches_done: usize,
    pub launches_total: usize,
    /// Rays produced so far, diffraction sub-rays included.
    pub rays: usize,
}

trait ProgressReporter {
    fn every_launches(&self) -> usize;
    fn report(&mut self, progress: &LaunchProgress);
}

struct NoProgress;
impl ProgressReporter for NoProgress {
    fn every_launches(&self) -> usize {
        0
    }
    fn report(&mut self, _progress: &LaunchProgress) {}
}

struct FnProgress<F> {
    every_launches: usize,
    f: F,
}
impl<F> ProgressReporter for FnProgress<F>
where
    F: FnMut(&LaunchProgress),
{
    fn every_launches(&self) -> usize {
        self.every_launches
    }
    fn report(&mut self, progress: &LaunchProgress) {
        (self.f)(progress);
    }
}

/// Everything validation resolves before tracing starts.
struct LaunchPlan {
    mode: TraceMode,
    hemisphere: Hemisphere,
    station_voxel: (usize, usize, usize),
    station: Point,
    params: TraceParams,
}

/// Per-worker accumulator.
struct Partial {
    map: PowerMap,
    rays: Vec<Ray>,
    ray_count: usize,
    failed: usize,
    skipped: usize,
}

impl Partial {
    fn new(grid: &VoxelGrid) -> Self {
        Self {
            map: PowerMap::for_grid(grid),
            rays: Vec::new(),
            ray_count: 0,
            failed: 0,
            skipped: 0,
        }
    }

    fn merge(mut self, other: Partial) -> Partial {
        self.map.merge(&other.map);
        self.rays.extend(other.rays);
        self.ray_count += other.ray_count;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self
    }
}

/// Shared state of one tracing pass over all launch directions.
struct TracePass<'a> {
    grid: &'a VoxelGrid,
    tracer: Tracer<'a, FreeSpace, Specular>,
    retain: bool,
    cancel: &'a AtomicBool,
    /// Launches traced so far.
    done: AtomicUsize,
    /// Rays produced so far.
    rays: AtomicUsize,
}

impl TracePass<'_> {
    /// Traces every launch. Each rayon worker folds into one [`Partial`] over
    /// its whole share of the launches, and the partials are max-merged once.
    ///
    /// With `ticks`, the number of finished launches is sent each time it
    /// crosses a multiple of the given interval.
    fn run(&self, launches: &[Launch], ticks: Option<(Sender<usize>, usize)>) -> Partial {
        let min_len = launches.len().div_ceil(rayon::current_num_threads()).max(1);
        launches
            .par_iter()
            .with_min_len(min_len)
            .fold(
                || Partial::new(self.grid),
                |mut part, launch| {
                    if self.cancel.load(Ordering::Relaxed) {
                        part.skipped += 1;
                        return part;
                    }
                    match self.tracer.trace(launch) {
                        Ok(rays) => {
                            part.ray_count += rays.len();
                            self.rays.fetch_add(rays.len(), Ordering::Relaxed);
                            for ray in &rays {
                                part.map.record_ray(ray);
                            }
                            if self.retain {
                                part.rays.extend(rays);
                            }
                        }
                        Err(failure) => {
                            warn!("dropping ray: {failure}");
                            part.failed += 1;
                        }
                    }
                    let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some((tx, every)) = &ticks
                        && done % every == 0
                    {
                        // The receiver only goes away once tracing is over.
                        let _ = tx.send(done);
                    }
                    part
                },
            )
            .reduce_with(Partial::merge)
            .unwrap_or_else(|| Partial::new(self.grid))
    }
}

/// One ray-launch run over a shared voxel grid.
pub struct RayLaunch<'g> {
    grid: &'g VoxelGrid,
    request: RayLaunchRequest,
    settings: LaunchSettings,
    state: LaunchState,
}

impl<'g> RayLaunch<'g> {
    pub fn new(grid: &'g VoxelGrid, request: RayLaunchRequest, settings: LaunchSettings) -> Self {
        Self {
            grid,
            request,
            settings,
            state: LaunchState::Idle,
        }
    }

    pub fn state(&self) -> LaunchState {
        self.state
    }

    pub fn request(&self) -> &RayLaunchRequest {
        &self.request
    }

    pub fn settings(&self) -> &LaunchSettings {
        &self.settings
    }

    pub fn run(&mut self) -> LaunchResult<RayLaunchResult> {
        self.execute(&AtomicBool::new(false), NoProgress)
    }

    /// Runs until done or until `cancel` is set.
    ///
    /// The flag is checked before every launch direction. A cancelled run
    /// returns [`RayLaunchError::Cancelled`] and no partial results.
    pub fn run_with_cancel(&mut self, cancel: &AtomicBool) -> LaunchResult<RayLaunchResult> {
        self.execute(cancel, NoProgress)
    }

    /// Runs the launch while periodically reporting progress.
    ///
    /// - `every_launches=0` disables progress reporting.
    /// - The reporter is called once at start (`launches_done=0`), then each
    ///   time another `every_launches` directions are finished, and once at the
    ///   end if the total is not a multiple of `every_launches`.
    /// - Tracing runs on the rayon pool while the reporter runs on the calling thread.
    pub fn run_with_progress<F>(
        &mut self,
        every_launches: usize,
        report: F,
    ) -> LaunchResult<RayLaunchResult>
    where
        F: FnMut(&LaunchProgress),
    {
        let reporter = FnProgress {
            every_launches,
            f: report,
        };
        self.execute(&AtomicBool::new(false), reporter)
    }

    fn transition(&mut self, next: LaunchState) {
        debug!("ray launch: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn execute<R: ProgressReporter>(
        &mut self,
        cancel: &AtomicBool,
        reporter: R,
    ) -> LaunchResult<RayLaunchResult> {
        let outcome = self.try_execute(cancel, reporter);
        match &outcome {
            Ok(_) => self.transition(LaunchState::Done),
            Err(err) => {
                debug!("ray launch failed: {err}");
                self.transition(LaunchState::Failed);
            }
        }
        outcome
    }

    fn try_execute<R: ProgressReporter>(
        &mut self,
        cancel: &AtomicBool,
        mut reporter: R,
    ) -> LaunchResult<RayLaunchResult> {
        self.transition(LaunchState::Validating);
        let plan = self.plan()?;

        self.transition(LaunchState::Tracing);
        let started = Instant::now();
        let grid = self.grid;
        let launches = plan.mode.launches(plan.hemisphere);
        let total = launches.len();
        let pass = TracePass {
            grid,
            tracer: Tracer::new(
                grid,
                plan.station,
                plan.params,
                FreeSpace::new(self.request.frequency, self.settings.reference_distance_m),
                Specular,
            ),
            retain: plan.mode.is_single_rays() || self.settings.retain_ray_paths,
            cancel,
            done: AtomicUsize::new(0),
            rays: AtomicUsize::new(0),
        };

        let every = reporter.every_launches();
        let acc = if every == 0 {
            pass.run(&launches, None)
        } else {
            let progress = |launches_done| LaunchProgress {
                launches_done,
                launches_total: total,
                rays: pass.rays.load(Ordering::Relaxed),
            };
            reporter.report(&progress(0));
            let (tx, rx) = mpsc::channel();
            let acc = thread::scope(|scope| {
                let worker = scope.spawn(|| pass.run(&launches, Some((tx, every))));
                // Ticks can arrive out of order; report every boundary once, in order.
                let mut reported = 0;
                for boundary in rx {
                    while reported + every <= boundary {
                        reported += every;
                        reporter.report(&progress(reported));
                    }
                }
                worker
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            });
            let done = pass.done.load(Ordering::Relaxed);
            if acc.skipped == 0 && done % every != 0 {
                reporter.report(&progress(done));
            }
            acc
        };

        if acc.skipped > 0 {
            return Err(RayLaunchError::Cancelled {
                traced: pass.done.load(Ordering::Relaxed),
                total,
            });
        }
        debug!(
            "traced {total} launches ({} rays) in {:.2?}",
            acc.ray_count,
            started.elapsed()
        );

        self.transition(LaunchState::Aggregating);
        let mut power_map = acc.map;
        power_map.set_station(plan.station_voxel, plan.params.tx_power_dbm);
        let power_map_legend =
            PowerMapLegend::from_power_map(&power_map, grid, self.request.minimal_ray_power);

        let stats = LaunchStats {
            launches: total,
            rays: acc.ray_count,
            failed: acc.failed,
            reached_voxels: power_map.reached_count(),
        };
        info!(
            "ray launch finished: {} launches, {} rays, {} failed, {} voxels reached in {:.2?}",
            stats.launches,
            stats.rays,
            stats.failed,
            stats.reached_voxels,
            started.elapsed()
        );

        Ok(RayLaunchResult {
            ray_paths: acc.rays,
            power_map,
            power_map_legend,
            stats,
        })
    }

    /// Validates the request against the grid and settings.
    fn plan(&self) -> LaunchResult<LaunchPlan> {
        let request = &self.request;
        let grid = self.grid;

        request.check_ranges()?;
        if grid.is_empty() {
            return Err(RayLaunchError::EmptyGrid(format!(
                "{}x{}x{} grid has no cells",
                grid.size(),
                grid.size(),
                grid.depth()
            )));
        }
        if request.size != grid.size() {
            return Err(RayLaunchError::GridSizeMismatch {
                requested: request.size,
                grid: grid.size(),
            });
        }
        let station_voxel = request.station_voxel(grid)?;

        let (azimuth, elevation) = self
            .settings
            .ray_budget
            .apply(request.number_of_rays_azimuth, request.number_of_rays_elevation)?;
        request.check_single_rays(azimuth, elevation)?;

        let mode = TraceMode::new(azimuth, elevation, &request.single_rays);
        let hemisphere = Hemisphere::for_station_layer(station_voxel.2);
        debug!(
            "ray launch plan: {mode:?}, {hemisphere:?}, station voxel {station_voxel:?}"
        );

        let params = TraceParams {
            tx_power_dbm: watts_to_dbm(request.station_power),
            voxel_size_m: self.settings.voxel_size_m,
            reflection_factor: request.reflection_factor,
            reflection_loss: self.settings.reflection_loss,
            max_interactions: request.number_of_interactions,
            minimal_power_dbm: request.minimal_ray_power,
            diffraction_rays: request.diffraction_ray_number,
            diffraction_loss_db: self.settings.diffraction_loss_db,
            ground_reflection: self.settings.ground_reflection,
            max_steps: self
                .settings
                .max_steps(grid, request.number_of_interactions),
        };

        Ok(LaunchPlan {
            mode,
            hemisphere,
            station_voxel,
            station: Point::voxel_center(station_voxel.0, station_voxel.1, station_voxel.2),
            params,
        })
    }
}

/// Runs a request with default settings.
pub fn compute_ray_launch(
    grid: &VoxelGrid,
    request: RayLaunchRequest,
) -> LaunchResult<RayLaunchResult> {
    RayLaunch::new(grid, request, LaunchSettings::default()).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::engine::directions::SingleRay;
    use crate::sim::engine::voxel_grid::Cell;

    fn request(size: usize) -> RayLaunchRequest {
        let mut r = RayLaunchRequest::new(Point::new(5.0, 5.0, 2.0), size);
        r.number_of_rays_azimuth = 16;
        r.number_of_rays_elevation = 8;
        r
    }

    #[test]
    fn test_state_transitions() {
        let grid = VoxelGrid::new(12, 5);
        let mut launch = RayLaunch::new(&grid, request(12), LaunchSettings::new());
        assert_eq!(launch.state(), LaunchState::Idle);
        let result = launch.run().unwrap();
        assert_eq!(launch.state(), LaunchState::Done);
        assert_eq!(result.stats.launches, 16 * 8);
        assert!(result.ray_paths.is_empty());
    }

    #[test]
    fn test_validation_failure_sets_failed_state() {
        let grid = VoxelGrid::new(12, 5);
        let mut launch = RayLaunch::new(&grid, request(20), LaunchSettings::new());
        let err = launch.run().unwrap_err();
        assert_eq!(
            err,
            RayLaunchError::GridSizeMismatch {
                requested: 20,
                grid: 12
            }
        );
        assert_eq!(launch.state(), LaunchState::Failed);
    }

    #[test]
    fn test_empty_grid_is_rejected() {
        let grid = VoxelGrid::new(0, 0);
        let err = compute_ray_launch(&grid, request(0)).unwrap_err();
        assert!(matches!(err, RayLaunchError::EmptyGrid(_)));
    }

    #[test]
    fn test_station_voxel_holds_tx_power() {
        let grid = VoxelGrid::new(12, 5);
        let mut r = request(12);
        r.station_power = 0.1;
        let result = compute_ray_launch(&grid, r).unwrap();
        assert!((result.power_map.get(5, 5, 2).unwrap() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_cancel_before_start() {
        let grid = VoxelGrid::new(12, 5);
        let cancel = AtomicBool::new(true);
        let mut launch = RayLaunch::new(&grid, request(12), LaunchSettings::new());
        let err = launch.run_with_cancel(&cancel).unwrap_err();
        assert_eq!(
            err,
            RayLaunchError::Cancelled {
                traced: 0,
                total: 128
            }
        );
        assert_eq!(launch.state(), LaunchState::Failed);
    }

    #[test]
    fn test_progress_reports() {
        let grid = VoxelGrid::new(12, 5);
        let mut seen = Vec::new();
        let mut launch = RayLaunch::new(&grid, request(12), LaunchSettings::new());
        launch
            .run_with_progress(50, |p| seen.push(p.launches_done))
            .unwrap();
        assert_eq!(seen, vec![0, 50, 100, 128]);
    }

    #[test]
    fn test_parallel_pass_matches_serial_trace() {
        let mut grid = VoxelGrid::new(24, 6);
        for y in 6..18 {
            for z in 0..4 {
                grid.set(16, y, z, Cell::Wall);
            }
        }
        grid.set(16, 6, 3, Cell::Edge);
        let mut r = RayLaunchRequest::new(Point::new(8.0, 12.0, 2.0), 24);
        r.number_of_rays_azimuth = 60;
        r.number_of_rays_elevation = 24;
        r.diffraction_ray_number = 3;
        let mut settings = LaunchSettings::new();
        settings.ray_budget.max_total_rays = 60 * 24;

        let mut launch = RayLaunch::new(&grid, r, settings);
        let plan = launch.plan().unwrap();
        let tracer = Tracer::new(
            &grid,
            plan.station,
            plan.params,
            FreeSpace::new(launch.request().frequency, 1.0),
            Specular,
        );
        let mut serial = PowerMap::for_grid(&grid);
        let mut rays = 0;
        for l in plan.mode.launches(plan.hemisphere) {
            for ray in tracer.trace(&l).into_iter().flatten() {
                serial.record_ray(&ray);
                rays += 1;
            }
        }
        serial.set_station(plan.station_voxel, plan.params.tx_power_dbm);

        let result = launch.run().unwrap();
        assert_eq!(result.power_map, serial);
        assert_eq!(result.stats.rays, rays);
        assert_eq!(result.stats.launches, 60 * 24);
    }

    #[test]
    fn test_progress_is_ordered_and_complete() {
        let grid = VoxelGrid::new(16, 5);
        let mut r = request(16);
        r.number_of_rays_azimuth = 90;
        r.number_of_rays_elevation = 30;
        let mut settings = LaunchSettings::new();
        settings.ray_budget.max_total_rays = 90 * 30;

        let mut seen = Vec::new();
        let mut launch = RayLaunch::new(&grid, r, settings);
        let result = launch
            .run_with_progress(7, |p| seen.push((p.launches_done, p.launches_total)))
            .unwrap();

        let expected: Vec<usize> = (0..=2700).step_by(7).chain([2700]).collect();
        assert_eq!(seen.iter().map(|p| p.0).collect::<Vec<_>>(), expected);
        assert!(seen.iter().all(|p| p.1 == 2700));
        assert_eq!(result.stats.launches, 2700);
    }

    #[test]
    fn test_single_rays_keep_paths() {
        let mut grid = VoxelGrid::new(12, 5);
        grid.set(10, 5, 2, Cell::Wall);
        let mut r = request(12);
        r.single_rays = vec![SingleRay::new(0, 4), SingleRay::new(4, 4)];
        let result = compute_ray_launch(&grid, r).unwrap();
        assert_eq!(result.ray_paths.len(), 2);
        assert_eq!(result.ray_paths[0].azimuth, 0);
        assert_eq!(result.ray_paths[1].azimuth, 4);
        assert!(result.ray_paths[0].samples.iter().any(|s| s.is_wall()));
    }
}
