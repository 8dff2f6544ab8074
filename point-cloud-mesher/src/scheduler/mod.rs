//! Off-thread surface generation.
//!
//! Each accepted job runs on its own named worker thread. The job registry is
//! the only state shared with workers and every access goes through its lock.
//! Workers never deliver results themselves: the consumer drains them with
//! [`Scheduler::poll`] in completion order.

mod job;

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use bevy::log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::{ReconstructionConfig, SchedulerConfig};
use crate::error::{MesherError, Result};
use crate::point::Point;
use crate::reconstruction::{self, AlgorithmKind, Checkpoint, Triangle};

pub use job::{JobId, JobInfo, JobStats, JobStatus};
use job::Job;

/// Returned by [`Scheduler::progress_or_sentinel`] for unknown jobs.
pub const PROGRESS_NOT_FOUND: f32 = -1.0;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Result of a job delivered to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedJob {
    pub id: JobId,
    pub algorithm: AlgorithmKind,
    pub status: JobStatus,
    pub triangles: Vec<Triangle>,
    pub stats: JobStats,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    Progress { id: JobId, progress: f32 },
    Finished(FinishedJob),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub running: usize,
    pub pending: usize,
}

#[derive(Default)]
struct Registry {
    jobs: HashMap<JobId, Job>,
    /// Accepted jobs waiting for a worker slot, oldest first.
    queued: VecDeque<JobId>,
    /// Terminal jobs not yet delivered, in completion order.
    finished: VecDeque<JobId>,
    /// Worker slots held. A slot is released when `poll` collects the result.
    active: usize,
    stats: SchedulerStats,
}

impl Registry {
    fn record_terminal(&mut self, status: JobStatus) {
        match status {
            JobStatus::Completed => self.stats.completed += 1,
            JobStatus::Failed => self.stats.failed += 1,
            JobStatus::Cancelled => self.stats.cancelled += 1,
            JobStatus::Pending | JobStatus::Running => {}
        }
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    worker_threads: usize,
    next_id: AtomicU64,
    registry: Arc<Mutex<Registry>>,
}

impl Scheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        let worker_threads = config.worker_threads();
        debug!(
            "Scheduler ready: {} worker threads, {} queued jobs max",
            worker_threads, config.max_queued_jobs
        );
        Self {
            config: config.clone(),
            worker_threads,
            next_id: AtomicU64::new(1),
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn async_threshold(&self) -> usize {
        self.config.async_threshold
    }

    /// Whether a request of `point_count` points belongs on a worker
    pub fn should_run_async(&self, point_count: usize) -> bool {
        self.config.enable_async && self.worker_threads > 0 && point_count >= self.config.async_threshold
    }

    /// Accept a generation job. The job starts immediately when a worker slot
    /// is free, otherwise it waits in the queue.
    pub fn submit(
        &self,
        algorithm: AlgorithmKind,
        points: Vec<Point>,
        config: &ReconstructionConfig,
    ) -> Result<JobId> {
        if !self.config.enable_async {
            return Err(MesherError::AsyncDisabled);
        }

        let mut registry = self.registry.lock();
        let slot_free = registry.active < self.worker_threads;
        if !slot_free {
            if self.config.max_queued_jobs == 0 {
                return Err(MesherError::WorkerCapReached(self.worker_threads));
            }
            if registry.queued.len() >= self.config.max_queued_jobs {
                return Err(MesherError::QueueFull(registry.queued.len()));
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let point_count = points.len();
        registry.jobs.insert(id, Job::new(id, algorithm, points, config));

        if slot_free {
            if let Err(err) = spawn_worker(&self.registry, &mut registry, id) {
                registry.jobs.remove(&id);
                warn!("{}", err);
                return Err(err);
            }
        } else {
            registry.queued.push_back(id);
        }
        registry.stats.submitted += 1;

        debug!(
            "Submitted job {} ({}, {} points, {})",
            id,
            algorithm,
            point_count,
            if slot_free { "started" } else { "queued" }
        );
        Ok(id)
    }

    /// Drain progress updates and finished jobs, start queued jobs on the
    /// released slots and purge delivered jobs past the retention window
    pub fn poll(&self) -> Vec<SchedulerEvent> {
        let mut events = Vec::new();
        let mut registry = self.registry.lock();

        let mut ids: Vec<JobId> = registry.jobs.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            if let Some(job) = registry.jobs.get_mut(&id) {
                let percent = job.progress.load(Ordering::Relaxed).min(100);
                if percent > job.reported_percent && job.status != JobStatus::Cancelled {
                    job.reported_percent = percent;
                    events.push(SchedulerEvent::Progress {
                        id,
                        progress: percent as f32 / 100.0,
                    });
                }
            }
        }

        while let Some(id) = registry.finished.pop_front() {
            let Some(job) = registry.jobs.get_mut(&id) else {
                continue;
            };
            let held_slot = job.handle.take().is_some();
            events.push(SchedulerEvent::Finished(FinishedJob {
                id,
                algorithm: job.algorithm,
                status: job.status,
                triangles: job.result.take().unwrap_or_default(),
                stats: job.stats,
            }));
            if held_slot {
                registry.active = registry.active.saturating_sub(1);
            }
        }

        while registry.active < self.worker_threads {
            let Some(id) = registry.queued.pop_front() else {
                break;
            };
            if let Err(err) = spawn_worker(&self.registry, &mut registry, id) {
                warn!("{}", err);
                if let Some(job) = registry.jobs.get_mut(&id) {
                    job.finish(JobStatus::Failed);
                }
                registry.record_terminal(JobStatus::Failed);
                registry.finished.push_back(id);
            }
        }

        let retention = Duration::from_secs_f32(self.config.job_retention.max(0.0));
        let before = registry.jobs.len();
        let undelivered: Vec<JobId> = registry.finished.iter().copied().collect();
        registry.jobs.retain(|id, job| {
            undelivered.contains(id)
                || !job
                    .finished_at
                    .is_some_and(|finished| finished.elapsed() > retention)
        });
        let purged = before - registry.jobs.len();
        if purged > 0 {
            debug!("Purged {} finished jobs", purged);
        }

        events
    }

    /// Request cancellation. Queued jobs are cancelled at once, running jobs
    /// stop at their next checkpoint.
    pub fn cancel(&self, id: JobId) -> bool {
        let mut registry = self.registry.lock();
        let registry = &mut *registry;
        let Some(job) = registry.jobs.get_mut(&id) else {
            return false;
        };
        if job.status.is_terminal() {
            return false;
        }

        job.cancel.store(true, Ordering::Relaxed);
        if let Some(position) = registry.queued.iter().position(|queued| *queued == id) {
            registry.queued.remove(position);
            job.finish(JobStatus::Cancelled);
            registry.stats.cancelled += 1;
            registry.finished.push_back(id);
        }
        debug!("Cancellation requested for job {}", id);
        true
    }

    /// Cancel every job that has not finished, returning how many were asked
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<JobId> = {
            let registry = self.registry.lock();
            let mut ids: Vec<JobId> = registry
                .jobs
                .values()
                .filter(|job| !job.status.is_terminal())
                .map(|job| job.id)
                .collect();
            ids.sort_unstable();
            ids
        };

        let cancelled = ids.into_iter().filter(|id| self.cancel(*id)).count();
        if cancelled > 0 {
            info!("Cancelled {} generation jobs", cancelled);
        }
        cancelled
    }

    /// Progress in [0, 1], `None` for unknown or purged jobs
    pub fn progress(&self, id: JobId) -> Option<f32> {
        self.registry.lock().jobs.get(&id).map(Job::progress)
    }

    pub fn progress_or_sentinel(&self, id: JobId) -> f32 {
        self.progress(id).unwrap_or(PROGRESS_NOT_FOUND)
    }

    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.registry.lock().jobs.get(&id).map(|job| job.status)
    }

    pub fn job_info(&self, id: JobId) -> Option<JobInfo> {
        self.registry.lock().jobs.get(&id).map(Job::info)
    }

    pub fn jobs(&self) -> Vec<JobInfo> {
        let mut jobs: Vec<JobInfo> = self.registry.lock().jobs.values().map(Job::info).collect();
        jobs.sort_unstable_by_key(|info| info.id);
        jobs
    }

    pub fn running_count(&self) -> usize {
        self.registry
            .lock()
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Running)
            .count()
    }

    pub fn queued_count(&self) -> usize {
        self.registry.lock().queued.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        let registry = self.registry.lock();
        let mut stats = registry.stats;
        stats.running = registry
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Running)
            .count();
        stats.pending = registry
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Pending)
            .count();
        stats
    }

    /// Block the caller until the job is terminal or `timeout` elapses.
    /// Returns the last observed status, `None` for unknown jobs.
    pub fn wait_for(&self, id: JobId, timeout: Duration) -> Option<JobStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.status(id)?;
            if status.is_terminal() || Instant::now() >= deadline {
                return Some(status);
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// Cancel everything and join the worker threads
    pub fn shutdown(&self) {
        self.cancel_all();
        let handles: Vec<_> = {
            let mut registry = self.registry.lock();
            registry
                .jobs
                .values_mut()
                .filter_map(|job| job.handle.take())
                .collect()
        };
        for handle in handles {
            if handle.join().is_err() {
                warn!("Worker thread panicked during shutdown");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_worker(shared: &Arc<Mutex<Registry>>, registry: &mut Registry, id: JobId) -> Result<()> {
    let Some(job) = registry.jobs.get_mut(&id) else {
        return Ok(());
    };
    let Some(points) = job.input.take() else {
        return Ok(());
    };

    let task = WorkerTask {
        id,
        algorithm: job.algorithm,
        config: job.config.clone(),
        points,
        cancel: Arc::clone(&job.cancel),
        progress: Arc::clone(&job.progress),
        registry: Arc::clone(shared),
    };
    let handle = thread::Builder::new()
        .name(format!("mesh-gen-{id}"))
        .spawn(move || task.run())
        .map_err(|source| MesherError::ThreadSpawn { id, source })?;

    job.handle = Some(handle);
    registry.active += 1;
    Ok(())
}

struct WorkerTask {
    id: JobId,
    algorithm: AlgorithmKind,
    config: ReconstructionConfig,
    points: Arc<Vec<Point>>,
    cancel: Arc<AtomicBool>,
    progress: Arc<AtomicU32>,
    registry: Arc<Mutex<Registry>>,
}

impl WorkerTask {
    fn run(self) {
        if let Some(job) = self.registry.lock().jobs.get_mut(&self.id) {
            job.status = JobStatus::Running;
        }

        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut checkpoint = Checkpoint::new(&self.cancel, &self.progress);
            reconstruction::reconstruct(self.algorithm, &self.points, &self.config, &mut checkpoint)
        }));
        let execution_secs = started.elapsed().as_secs_f64();

        let (status, triangles) = match outcome {
            Ok(Some(triangles)) => (JobStatus::Completed, Some(triangles)),
            Ok(None) => (JobStatus::Cancelled, None),
            Err(_) => (JobStatus::Failed, None),
        };

        let mut registry = self.registry.lock();
        let Some(job) = registry.jobs.get_mut(&self.id) else {
            return;
        };
        let triangle_count = triangles.as_ref().map_or(0, Vec::len);
        job.stats = JobStats {
            execution_secs,
            triangle_count,
            memory_bytes: triangle_count * Triangle::SIZE_BYTES,
        };
        job.result = triangles;
        job.finish(status);
        registry.record_terminal(status);
        registry.finished.push_back(self.id);

        match status {
            JobStatus::Completed => info!(
                "Job {} ({}) completed: {} triangles in {:.3}s",
                self.id, self.algorithm, triangle_count, execution_secs
            ),
            JobStatus::Cancelled => info!("Job {} cancelled", self.id),
            _ => warn!("Job {} ({}) failed", self.id, self.algorithm),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::color::LinearRgba;
    use bevy::math::Vec3;

    fn cloud(count: usize) -> Vec<Point> {
        (0..count)
            .map(|i| {
                let position = Vec3::new((i % 40) as f32 * 3.0, (i / 40 % 40) as f32 * 3.0, (i / 1600) as f32 * 3.0);
                Point::new(position, LinearRgba::WHITE, 0.0)
            })
            .collect()
    }

    fn scheduler(workers: usize, queued: usize) -> Scheduler {
        Scheduler::new(&SchedulerConfig {
            max_worker_threads: workers,
            max_queued_jobs: queued,
            ..Default::default()
        })
    }

    fn drain_until_finished(scheduler: &Scheduler, id: JobId) -> Vec<SchedulerEvent> {
        assert!(scheduler
            .wait_for(id, Duration::from_secs(30))
            .is_some_and(JobStatus::is_terminal));
        scheduler.poll()
    }

    #[test]
    fn disabled_async_rejects_submission() {
        let scheduler = Scheduler::new(&SchedulerConfig {
            enable_async: false,
            ..Default::default()
        });
        let result = scheduler.submit(AlgorithmKind::Voxel, cloud(10), &ReconstructionConfig::default());
        assert!(matches!(result, Err(MesherError::AsyncDisabled)));
        assert!(!scheduler.should_run_async(1_000_000));
    }

    #[test]
    fn threshold_decides_async() {
        let scheduler = scheduler(2, 4);
        assert!(!scheduler.should_run_async(9_999));
        assert!(scheduler.should_run_async(10_000));
    }

    #[test]
    fn completed_job_delivers_triangles_once() {
        let scheduler = scheduler(2, 4);
        let id = scheduler
            .submit(AlgorithmKind::Voxel, cloud(100), &ReconstructionConfig::default())
            .expect("accepted");
        assert_eq!(id, 1);

        let events = drain_until_finished(&scheduler, id);
        let finished: Vec<&FinishedJob> = events
            .iter()
            .filter_map(|event| match event {
                SchedulerEvent::Finished(job) => Some(job),
                _ => None,
            })
            .collect();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].status, JobStatus::Completed);
        assert!(!finished[0].triangles.is_empty());
        assert_eq!(finished[0].stats.triangle_count, finished[0].triangles.len());

        assert_eq!(scheduler.progress(id), Some(1.0));
        assert!(scheduler
            .poll()
            .iter()
            .all(|event| !matches!(event, SchedulerEvent::Finished(_))));
        assert_eq!(scheduler.stats().completed, 1);
    }

    #[test]
    fn full_slots_queue_then_reject() {
        let scheduler = scheduler(1, 1);
        let config = ReconstructionConfig::default();

        let first = scheduler.submit(AlgorithmKind::Voxel, cloud(10), &config).expect("started");
        let second = scheduler.submit(AlgorithmKind::Voxel, cloud(10), &config).expect("queued");
        assert_eq!(second, first + 1);
        assert_eq!(scheduler.queued_count(), 1);
        assert!(matches!(
            scheduler.submit(AlgorithmKind::Voxel, cloud(10), &config),
            Err(MesherError::QueueFull(1))
        ));

        drain_until_finished(&scheduler, first);
        assert_eq!(scheduler.queued_count(), 0);
        let events = drain_until_finished(&scheduler, second);
        assert!(events.iter().any(|event| matches!(
            event,
            SchedulerEvent::Finished(job) if job.id == second && job.status == JobStatus::Completed
        )));
    }

    #[test]
    fn no_queue_reports_worker_cap() {
        let scheduler = scheduler(1, 0);
        let config = ReconstructionConfig::default();
        scheduler.submit(AlgorithmKind::Voxel, cloud(10), &config).expect("started");
        assert!(matches!(
            scheduler.submit(AlgorithmKind::Voxel, cloud(10), &config),
            Err(MesherError::WorkerCapReached(1))
        ));
    }

    #[test]
    fn queued_job_cancels_immediately() {
        let scheduler = scheduler(1, 2);
        let config = ReconstructionConfig::default();
        let running = scheduler.submit(AlgorithmKind::Voxel, cloud(10), &config).expect("started");
        let queued = scheduler.submit(AlgorithmKind::Voxel, cloud(10), &config).expect("queued");

        assert!(scheduler.cancel(queued));
        assert_eq!(scheduler.status(queued), Some(JobStatus::Cancelled));
        assert!(!scheduler.cancel(queued));

        let events = drain_until_finished(&scheduler, running);
        assert!(events.iter().any(|event| matches!(
            event,
            SchedulerEvent::Finished(job) if job.id == queued && job.triangles.is_empty()
        )));
        assert_eq!(scheduler.stats().cancelled, 1);
    }

    #[test]
    fn unknown_job_is_not_found() {
        let scheduler = scheduler(1, 1);
        assert_eq!(scheduler.progress(42), None);
        assert_eq!(scheduler.progress_or_sentinel(42), PROGRESS_NOT_FOUND);
        assert_eq!(scheduler.status(42), None);
        assert!(!scheduler.cancel(42));
        assert_eq!(scheduler.wait_for(42, Duration::from_millis(10)), None);
    }

    #[test]
    fn finished_jobs_purge_after_retention() {
        let scheduler = Scheduler::new(&SchedulerConfig {
            max_worker_threads: 1,
            job_retention: 0.0,
            ..Default::default()
        });
        let id = scheduler
            .submit(AlgorithmKind::PointCloud, cloud(5), &ReconstructionConfig::default())
            .expect("accepted");
        drain_until_finished(&scheduler, id);
        thread::sleep(Duration::from_millis(5));
        scheduler.poll();
        assert_eq!(scheduler.status(id), None);
    }
}
