/// Job records shared between the scheduler and its worker threads
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::ReconstructionConfig;
use crate::point::Point;
use crate::reconstruction::{AlgorithmKind, Triangle};

pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Execution statistics recorded when a job reaches a terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct JobStats {
    pub execution_secs: f64,
    pub triangle_count: usize,
    pub memory_bytes: usize,
}

/// Snapshot of a job for queries from the consumer side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobInfo {
    pub id: JobId,
    pub algorithm: AlgorithmKind,
    pub status: JobStatus,
    pub progress: f32,
    pub point_count: usize,
    pub stats: JobStats,
}

pub(crate) struct Job {
    pub id: JobId,
    pub algorithm: AlgorithmKind,
    pub config: ReconstructionConfig,
    pub point_count: usize,
    /// Taken by the worker when the job is started.
    pub input: Option<Arc<Vec<Point>>>,
    pub status: JobStatus,
    pub cancel: Arc<AtomicBool>,
    pub progress: Arc<AtomicU32>,
    /// Last percentage forwarded by `poll`.
    pub reported_percent: u32,
    pub finished_at: Option<Instant>,
    pub stats: JobStats,
    pub result: Option<Vec<Triangle>>,
    pub handle: Option<JoinHandle<()>>,
}

impl Job {
    pub fn new(
        id: JobId,
        algorithm: AlgorithmKind,
        points: Vec<Point>,
        config: &ReconstructionConfig,
    ) -> Self {
        Self {
            id,
            algorithm,
            config: config.clone(),
            point_count: points.len(),
            input: Some(Arc::new(points)),
            status: JobStatus::Pending,
            cancel: Arc::new(AtomicBool::new(false)),
            progress: Arc::new(AtomicU32::new(0)),
            reported_percent: 0,
            finished_at: None,
            stats: JobStats::default(),
            result: None,
            handle: None,
        }
    }

    /// Progress as a fraction in [0, 1]
    pub fn progress(&self) -> f32 {
        self.progress.load(Ordering::Relaxed).min(100) as f32 / 100.0
    }

    pub fn info(&self) -> JobInfo {
        JobInfo {
            id: self.id,
            algorithm: self.algorithm,
            status: self.status,
            progress: self.progress(),
            point_count: self.point_count,
            stats: self.stats,
        }
    }

    /// Move into a terminal state
    pub fn finish(&mut self, status: JobStatus) {
        self.status = status;
        self.finished_at = Some(Instant::now());
        self.input = None;
    }
}
