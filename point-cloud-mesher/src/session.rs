//! Explicit ownership of every pipeline component for one meshing session.
//!
//! The session is driven from a single consumer thread: callers feed point
//! batches and tracking updates, call [`MeshingSession::tick`] once per frame
//! and drain [`SessionEvent`]s afterwards.

use std::collections::VecDeque;
use std::sync::Arc;

use bevy::color::LinearRgba;
use bevy::log::{info, warn};
use bevy::math::Vec3;
use bevy::prelude::Transform;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::PipelineConfig;
use crate::driver::{Recovery, SurfaceDriver};
use crate::memory::{CleanupReport, MemoryPolicy, MemoryStats};
use crate::planes::{self, PlaneRegistry, PlaneUpdate};
use crate::point::Point;
use crate::reconstruction::{self, AlgorithmKind, Triangle};
use crate::scheduler::{JobId, JobStatus, Scheduler, SchedulerEvent, SchedulerStats};
use crate::spatial::{SpatialIndex, SpatialStats};
use crate::storage::{PointStore, PointsChanged};
use crate::tracking::{TrackingEvent, TrackingState, TrackingStats, TrackingTracker};

/// Outcome of a generation request.
#[derive(Debug, Clone, PartialEq)]
pub enum Generated {
    /// Ran inline on the calling thread.
    Mesh(Vec<Triangle>),
    /// Accepted by the scheduler, result arrives through `tick`.
    Job(JobId),
    /// Not accepted, the caller may retry later.
    Rejected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PointsChanged(PointsChanged),
    Cleanup(CleanupReport),
    Tracking(TrackingEvent),
    JobProgress {
        id: JobId,
        progress: f32,
    },
    JobFinished {
        id: JobId,
        algorithm: AlgorithmKind,
        status: JobStatus,
        triangle_count: usize,
    },
    SurfaceUpdated {
        revision: u64,
        triangle_count: usize,
    },
    SurfaceFrozen,
    SurfaceRestored {
        anchor: Option<Transform>,
    },
    UpdateIntervalChanged(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionStats {
    pub point_count: usize,
    pub memory_usage_bytes: usize,
    pub memory: MemoryStats,
    pub spatial: SpatialStats,
    pub scheduler: SchedulerStats,
    pub tracking: TrackingStats,
    pub plane_count: usize,
    pub surface_triangles: usize,
    pub surface_revision: u64,
}

pub struct MeshingSession {
    config: PipelineConfig,
    store: PointStore,
    memory: MemoryPolicy,
    index: SpatialIndex,
    scheduler: Scheduler,
    tracker: TrackingTracker,
    planes: PlaneRegistry,
    driver: SurfaceDriver,
    rng: ChaCha8Rng,
    events: Arc<Mutex<VecDeque<SessionEvent>>>,
}

impl Default for MeshingSession {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

impl MeshingSession {
    pub fn new(config: PipelineConfig) -> Self {
        let config = config.validated();
        let events = Arc::new(Mutex::new(VecDeque::new()));

        let mut store = PointStore::new(
            config.memory.max_points,
            config.memory.max_point_age as f64,
        );
        let sink = Arc::clone(&events);
        store.subscribe(move |changed: &PointsChanged| {
            sink.lock().push_back(SessionEvent::PointsChanged(*changed));
        });

        info!(
            "Meshing session started ({}, capacity {}, {} workers)",
            config.reconstruction.algorithm,
            config.memory.max_points,
            config.scheduler.worker_threads()
        );

        Self {
            memory: MemoryPolicy::new(&config.memory),
            index: SpatialIndex::new(config.spatial.cell_size),
            scheduler: Scheduler::new(&config.scheduler),
            tracker: TrackingTracker::new(&config.tracking),
            planes: PlaneRegistry::new(&config.planes),
            driver: SurfaceDriver::new(&config.stream),
            rng: ChaCha8Rng::seed_from_u64(config.planes.seed),
            store,
            events,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &PointStore {
        &self.store
    }

    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn tracker(&self) -> &TrackingTracker {
        &self.tracker
    }

    pub fn planes(&self) -> &PlaneRegistry {
        &self.planes
    }

    pub fn driver(&self) -> &SurfaceDriver {
        &self.driver
    }

    pub fn memory(&self) -> &MemoryPolicy {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut MemoryPolicy {
        &mut self.memory
    }

    /// Takes effect on the next cleanup pass
    pub fn set_point_capacity(&mut self, capacity: usize) {
        self.store.set_capacity(capacity);
    }

    pub fn set_max_point_age(&mut self, seconds: f64) {
        self.store.set_max_age(seconds);
    }

    pub fn point_count(&self) -> usize {
        self.store.len()
    }

    pub fn add_point(&mut self, position: Vec3, color: LinearRgba, now: f64) {
        let point = Point::new(position, color, now);
        self.store.add(point);
        self.index.add_point(point);
        self.driver.mark_dirty();
    }

    /// Ingest parallel position and color arrays stamped with `now`.
    /// Missing colors default to white.
    pub fn add_points(&mut self, positions: &[Vec3], colors: &[LinearRgba], now: f64) -> usize {
        let points: Vec<Point> = positions
            .iter()
            .enumerate()
            .map(|(i, &position)| {
                let color = colors.get(i).copied().unwrap_or(LinearRgba::WHITE);
                Point::new(position, color, now)
            })
            .collect();
        self.add_batch(points)
    }

    /// Ingest fully formed points in order with one change notification
    pub fn add_batch(&mut self, points: Vec<Point>) -> usize {
        if points.is_empty() {
            return 0;
        }
        self.index.add_points(&points);
        let added = self.store.add_batch(points);
        self.driver.mark_dirty();
        added
    }

    pub fn points_in_radius(&self, center: Vec3, radius: f32) -> Vec<Point> {
        self.index.find_in_radius(center, radius)
    }

    pub fn find_nearest(&self, center: Vec3, max_distance: f32) -> Option<Point> {
        self.index.find_nearest(center, max_distance)
    }

    pub fn find_k_nearest(&self, center: Vec3, k: usize, max_distance: f32) -> Vec<Point> {
        self.index.find_k_nearest(center, k, max_distance)
    }

    pub fn find_in_box(&self, min: Vec3, max: Vec3) -> Vec<Point> {
        self.index.find_in_box(min, max)
    }

    pub fn find_along_ray(
        &self,
        origin: Vec3,
        direction: Vec3,
        tolerance: f32,
        max_distance: f32,
    ) -> Vec<Point> {
        self.index
            .find_along_ray(origin, direction, tolerance, max_distance)
    }

    /// Generate from the newest cached points
    pub fn generate(&mut self, algorithm: AlgorithmKind) -> Generated {
        let points = self
            .store
            .newest(self.config.stream.max_cached_points)
            .to_vec();
        self.generate_from(algorithm, points)
    }

    /// Generate from an explicit point set, inline below the async threshold
    pub fn generate_from(&mut self, algorithm: AlgorithmKind, points: Vec<Point>) -> Generated {
        if !self.scheduler.should_run_async(points.len()) {
            let triangles = reconstruction::generate(algorithm, &points, &self.config.reconstruction);
            return Generated::Mesh(triangles);
        }

        match self
            .scheduler
            .submit(algorithm, points, &self.config.reconstruction)
        {
            Ok(id) => Generated::Job(id),
            Err(err) => {
                warn!("Generation request rejected: {}", err);
                Generated::Rejected
            }
        }
    }

    pub fn cancel(&mut self, id: JobId) -> bool {
        self.scheduler.cancel(id)
    }

    pub fn progress(&self, id: JobId) -> Option<f32> {
        self.scheduler.progress(id)
    }

    /// Feed one tracking update and apply the surface reaction
    pub fn update_tracking(
        &mut self,
        state: TrackingState,
        confidence: f32,
        pose: Transform,
        now: f64,
        loss_reason: Option<&str>,
    ) {
        let events = self
            .tracker
            .update(state, confidence, pose, now, loss_reason);

        for event in events {
            match &event {
                TrackingEvent::Lost { .. } => {
                    self.push(event.clone());
                    self.on_tracking_lost();
                    continue;
                }
                TrackingEvent::Recovered { .. } => {
                    self.push(event.clone());
                    self.on_tracking_recovered();
                    continue;
                }
                TrackingEvent::QualityChanged { to, .. } => {
                    if let Some(interval) = self.driver.on_quality(*to) {
                        self.push(SessionEvent::UpdateIntervalChanged(interval));
                    }
                }
                TrackingEvent::StateChanged { .. } => {}
            }
            self.push(event);
        }
    }

    fn on_tracking_lost(&mut self) {
        self.driver.on_tracking_lost(self.store.points());
        self.scheduler.cancel_all();
        self.events.lock().push_back(SessionEvent::SurfaceFrozen);
    }

    fn on_tracking_recovered(&mut self) {
        match self.driver.on_tracking_recovered() {
            Recovery::Anchored(anchor) => self.events.lock().push_back(SessionEvent::SurfaceRestored {
                anchor: Some(anchor),
            }),
            Recovery::Unfrozen => self
                .events
                .lock()
                .push_back(SessionEvent::SurfaceRestored { anchor: None }),
            Recovery::Regenerate(snapshot) => {
                let algorithm = self.config.reconstruction.algorithm;
                match self.generate_from(algorithm, snapshot) {
                    Generated::Mesh(triangles) => self.apply_surface(None, triangles),
                    Generated::Job(id) => self.driver.set_recovery_job(id),
                    Generated::Rejected => {
                        self.driver.unfreeze();
                        self.events
                            .lock()
                            .push_back(SessionEvent::SurfaceRestored { anchor: None });
                    }
                }
            }
            Recovery::NotFrozen => {}
        }
    }

    /// Store the transform the surface is restored under after a loss
    pub fn set_anchor(&mut self, anchor: Option<Transform>) {
        self.driver.set_anchor(anchor);
    }

    /// Per frame work: timed eviction, plane validation, job delivery and
    /// the automatic surface update
    pub fn tick(&mut self, now: f64) {
        if let Some(report) = self.memory.tick(&mut self.store, now) {
            self.after_cleanup(report);
        }

        self.planes.tick(now);

        for event in self.scheduler.poll() {
            match event {
                SchedulerEvent::Progress { id, progress } => {
                    self.push(SessionEvent::JobProgress { id, progress });
                }
                SchedulerEvent::Finished(job) => {
                    self.push(SessionEvent::JobFinished {
                        id: job.id,
                        algorithm: job.algorithm,
                        status: job.status,
                        triangle_count: job.triangles.len(),
                    });
                    if !self.driver.accepts_result(job.id) {
                        continue;
                    }
                    if job.status == JobStatus::Completed {
                        self.apply_surface(Some(job.id), job.triangles);
                    } else if self.driver.abandon(job.id) {
                        self.push(SessionEvent::SurfaceRestored { anchor: None });
                    }
                }
            }
        }

        if self.driver.should_update(now, self.tracker.state()) {
            self.update_surface(now);
        }
    }

    /// Regenerate the live surface now, ignoring the update timer
    pub fn update_surface(&mut self, now: f64) {
        self.driver.begin_update(now);
        match self.generate(self.config.reconstruction.algorithm) {
            Generated::Mesh(triangles) => self.apply_surface(None, triangles),
            Generated::Job(id) => self.driver.set_pending(id),
            Generated::Rejected => self.driver.mark_dirty(),
        }
    }

    fn apply_surface(&mut self, id: Option<JobId>, triangles: Vec<Triangle>) {
        let restored = self.driver.apply_result(id, triangles);
        self.push(SessionEvent::SurfaceUpdated {
            revision: self.driver.revision(),
            triangle_count: self.driver.surface().len(),
        });
        if restored {
            self.push(SessionEvent::SurfaceRestored { anchor: None });
        }
    }

    /// Run eviction immediately regardless of the timer
    pub fn force_cleanup(&mut self, now: f64) -> CleanupReport {
        let report = self.memory.force_cleanup(&mut self.store, now);
        self.after_cleanup(report);
        report
    }

    fn after_cleanup(&mut self, report: CleanupReport) {
        if report.removed == 0 {
            return;
        }
        self.index.sync_from(self.store.points());
        self.driver.mark_dirty();
        self.push(SessionEvent::Cleanup(report));
    }

    /// Run RANSAC over the stored points and merge the result into the registry
    pub fn detect_planes(&mut self, now: f64) -> Vec<PlaneUpdate> {
        let detected = planes::detect_planes(
            self.store.points(),
            &self.config.planes,
            &mut self.rng,
            now,
        );
        detected
            .into_iter()
            .filter_map(|plane| self.planes.register(plane))
            .collect()
    }

    /// Drop all points, jobs, planes and tracking history
    pub fn reset(&mut self) {
        self.scheduler.cancel_all();
        self.store.clear();
        self.index.clear();
        self.tracker.reset_session();
        self.planes.clear();
        self.driver.reset();
        info!("Meshing session reset");
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.events.lock().drain(..).collect()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            point_count: self.store.len(),
            memory_usage_bytes: self.store.memory_usage_bytes() + self.index.memory_usage_bytes(),
            memory: self.memory.stats(),
            spatial: self.index.stats(),
            scheduler: self.scheduler.stats(),
            tracking: self.tracker.stats(),
            plane_count: self.planes.planes().len(),
            surface_triangles: self.driver.surface().len(),
            surface_revision: self.driver.revision(),
        }
    }

    fn push(&self, event: impl Into<SessionEvent>) {
        self.events.lock().push_back(event.into());
    }
}

impl From<TrackingEvent> for SessionEvent {
    fn from(event: TrackingEvent) -> Self {
        SessionEvent::Tracking(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemoryConfig, SchedulerConfig, StreamConfig};

    fn session(config: PipelineConfig) -> MeshingSession {
        MeshingSession::new(config)
    }

    fn manual_config() -> PipelineConfig {
        PipelineConfig {
            stream: StreamConfig {
                auto_update: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn batch_ingest_notifies_once_and_indexes() {
        let mut session = session(manual_config());
        let positions = [Vec3::ZERO, Vec3::X * 10.0, Vec3::Y * 10.0];
        let added = session.add_points(&positions, &[LinearRgba::RED], 2.0);

        assert_eq!(added, 3);
        assert_eq!(session.index().len(), 3);
        assert_eq!(session.store().get(0).color, LinearRgba::RED);
        assert_eq!(session.store().get(2).color, LinearRgba::WHITE);

        let events = session.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            SessionEvent::PointsChanged(PointsChanged { count: 3, .. })
        ));
    }

    #[test]
    fn small_requests_run_inline() {
        let mut session = session(manual_config());
        session.add_points(&[Vec3::ZERO, Vec3::X, Vec3::Y], &[], 0.0);

        let Generated::Mesh(triangles) = session.generate(AlgorithmKind::Mesh) else {
            panic!("expected inline mesh");
        };
        assert_eq!(triangles.len(), 1);
    }

    #[test]
    fn saturated_scheduler_rejects_request() {
        let mut config = manual_config();
        config.scheduler = SchedulerConfig {
            async_threshold: 2,
            max_worker_threads: 1,
            max_queued_jobs: 0,
            ..Default::default()
        };
        let mut session = session(config);
        let points: Vec<Point> = (0..4)
            .map(|i| Point::new(Vec3::splat(i as f32 * 20.0), LinearRgba::WHITE, 0.0))
            .collect();

        assert!(matches!(
            session.generate_from(AlgorithmKind::Voxel, points.clone()),
            Generated::Job(_)
        ));
        assert_eq!(
            session.generate_from(AlgorithmKind::Voxel, points),
            Generated::Rejected
        );
    }

    #[test]
    fn eviction_resyncs_index() {
        let mut config = manual_config();
        config.memory = MemoryConfig {
            max_points: 5,
            max_point_age: 0.0,
            ..Default::default()
        };
        let mut session = session(config);
        let positions: Vec<Vec3> = (0..8).map(|i| Vec3::X * i as f32).collect();
        session.add_points(&positions, &[], 0.0);

        let report = session.force_cleanup(1.0);
        assert_eq!(report.removed, 3);
        assert_eq!(session.point_count(), 5);
        assert_eq!(session.index().len(), 5);
        assert!(session
            .drain_events()
            .iter()
            .any(|event| matches!(event, SessionEvent::Cleanup(report) if report.removed == 3)));
    }

    #[test]
    fn auto_update_builds_surface_inline() {
        let mut config = PipelineConfig::default();
        config.reconstruction.algorithm = AlgorithmKind::PointCloud;
        let mut session = session(config);
        session.add_points(&[Vec3::ZERO, Vec3::X * 5.0, Vec3::Y * 5.0], &[], 0.0);
        session.tick(0.0);

        assert_eq!(session.driver().revision(), 1);
        assert_eq!(session.driver().surface().len(), 3 * 12);

        session.tick(1.0);
        assert_eq!(session.driver().revision(), 1);
    }

    #[test]
    fn tracking_loss_freezes_and_anchor_restores() {
        let mut session = session(manual_config());
        session.add_points(&[Vec3::ZERO, Vec3::X, Vec3::Y], &[], 0.0);
        let anchor = Transform::from_xyz(0.0, 0.0, 1.0);
        session.set_anchor(Some(anchor));

        session.update_tracking(TrackingState::Full, 0.95, Transform::IDENTITY, 0.0, None);
        session.update_tracking(TrackingState::Lost, 0.1, Transform::IDENTITY, 0.5, Some("occluded"));
        assert!(session.driver().is_frozen());
        assert_eq!(session.driver().snapshot().len(), 3);

        session.update_tracking(TrackingState::Full, 0.95, Transform::IDENTITY, 1.0, None);
        assert!(!session.driver().is_frozen());

        let events = session.drain_events();
        assert!(events.contains(&SessionEvent::SurfaceFrozen));
        assert!(events.contains(&SessionEvent::SurfaceRestored {
            anchor: Some(anchor)
        }));
    }

    #[test]
    fn update_cancelled_by_loss_reruns_after_anchored_recovery() {
        let mut config = PipelineConfig::default();
        config.reconstruction.algorithm = AlgorithmKind::Voxel;
        config.scheduler = SchedulerConfig {
            async_threshold: 3,
            ..Default::default()
        };
        let mut session = session(config);
        session.update_tracking(TrackingState::Full, 0.95, Transform::IDENTITY, 0.0, None);
        let positions: Vec<Vec3> = (0..200).map(|i| Vec3::X * i as f32 * 15.0).collect();
        session.add_points(&positions, &[], 0.0);

        session.tick(0.0);
        assert!(session.driver().pending_job().is_some());

        session.update_tracking(TrackingState::Lost, 0.0, Transform::IDENTITY, 0.5, None);
        session.set_anchor(Some(Transform::IDENTITY));
        session.update_tracking(TrackingState::Full, 0.95, Transform::IDENTITY, 1.0, None);
        assert!(!session.driver().is_frozen());

        for step in 0..2_000 {
            session.tick(1.0 + step as f64 * 0.1);
            if !session.driver().surface().is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(session.driver().revision() > 0);
        assert!(!session.driver().surface().is_empty());
    }

    #[test]
    fn point_limits_apply_on_next_cleanup() {
        let mut session = session(manual_config());
        let positions: Vec<Vec3> = (0..10).map(|i| Vec3::X * i as f32).collect();
        session.add_points(&positions, &[], 0.0);

        session.set_point_capacity(4);
        assert_eq!(session.force_cleanup(1.0).removed, 6);
        assert_eq!(session.index().len(), 4);

        session.add_point(Vec3::Y, LinearRgba::WHITE, 100.0);
        session.set_max_point_age(10.0);
        assert_eq!(session.force_cleanup(105.0).remaining, 1);
        assert_eq!(session.store().max_age(), 10.0);
    }

    #[test]
    fn recovery_without_anchor_regenerates_snapshot() {
        let mut config = manual_config();
        config.reconstruction.algorithm = AlgorithmKind::PointCloud;
        let mut session = session(config);
        session.add_points(&[Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z], &[], 0.0);

        session.update_tracking(TrackingState::Full, 0.95, Transform::IDENTITY, 0.0, None);
        session.update_tracking(TrackingState::NotTracking, 0.0, Transform::IDENTITY, 0.5, None);
        session.update_tracking(TrackingState::Limited, 0.8, Transform::IDENTITY, 1.0, None);

        assert!(!session.driver().is_frozen());
        assert_eq!(session.driver().surface().len(), 4 * 12);
    }

    #[test]
    fn plane_detection_registers_floor() {
        let mut session = session(manual_config());
        let positions: Vec<Vec3> = (0..15)
            .flat_map(|x| (0..15).map(move |y| Vec3::new(x as f32 * 10.0, y as f32 * 10.0, 0.0)))
            .collect();
        session.add_points(&positions, &[], 0.0);

        let updates = session.detect_planes(0.0);
        assert_eq!(updates, vec![PlaneUpdate::Added(1)]);
        assert_eq!(session.planes().planes()[0].inlier_count, 225);
    }

    #[test]
    fn reset_clears_everything() {
        let mut session = session(manual_config());
        session.add_points(&[Vec3::ZERO, Vec3::X], &[], 0.0);
        session.reset();

        assert_eq!(session.point_count(), 0);
        assert!(session.index().is_empty());
        assert_eq!(session.stats().surface_triangles, 0);
    }
}
