/// Pipeline configuration loaded from JSON
use std::fs;
use std::path::Path;

use constants::{memory, planes, reconstruction, scheduler, spatial, streaming, tracking};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::reconstruction::AlgorithmKind;
use crate::tracking::TrackingQuality;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Point capacity, 0 for unbounded.
    pub max_points: usize,
    /// Maximum point age in seconds, 0 for unbounded.
    pub max_point_age: f32,
    /// Seconds between automatic cleanup passes.
    pub cleanup_interval: f32,
    pub auto_cleanup: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_points: memory::DEFAULT_MAX_POINTS,
            max_point_age: memory::DEFAULT_MAX_POINT_AGE_SECS,
            cleanup_interval: memory::DEFAULT_CLEANUP_INTERVAL_SECS,
            auto_cleanup: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    pub cell_size: f32,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            cell_size: spatial::DEFAULT_CELL_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// Algorithm used by automatic surface updates.
    pub algorithm: AlgorithmKind,
    pub voxel_size: f32,
    pub iso_value: f32,
    /// Nodes per axis when `grid_bounds` is set.
    pub grid_resolution: u32,
    /// Explicit `[min, max]` grid corners. Derived from the points when absent.
    pub grid_bounds: Option<[[f32; 3]; 2]>,
    /// Margin around derived bounds, twice the voxel size when absent.
    pub padding: Option<f32>,
    pub smooth_normals: bool,
    pub smoothing_factor: f32,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            algorithm: AlgorithmKind::MarchingCubes,
            voxel_size: reconstruction::DEFAULT_VOXEL_SIZE,
            iso_value: reconstruction::DEFAULT_ISO_VALUE,
            grid_resolution: reconstruction::DEFAULT_GRID_RESOLUTION,
            grid_bounds: None,
            padding: None,
            smooth_normals: false,
            smoothing_factor: reconstruction::DEFAULT_SMOOTHING_FACTOR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enable_async: bool,
    /// Point count at which requests leave the consumer thread.
    pub async_threshold: usize,
    /// Worker cap, 0 for hardware threads minus one.
    pub max_worker_threads: usize,
    pub max_queued_jobs: usize,
    /// Seconds a finished job stays queryable.
    pub job_retention: f32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enable_async: true,
            async_threshold: scheduler::DEFAULT_ASYNC_THRESHOLD,
            max_worker_threads: 0,
            max_queued_jobs: scheduler::DEFAULT_MAX_QUEUED_JOBS,
            job_retention: scheduler::DEFAULT_JOB_RETENTION_SECS,
        }
    }
}

impl SchedulerConfig {
    /// Worker cap with the automatic default resolved, clamped to 1..=8
    pub fn worker_threads(&self) -> usize {
        let requested = if self.max_worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|threads| threads.get().saturating_sub(1))
                .unwrap_or(scheduler::MIN_WORKER_THREADS)
        } else {
            self.max_worker_threads
        };
        requested.clamp(scheduler::MIN_WORKER_THREADS, scheduler::MAX_WORKER_THREADS)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub excellent_threshold: f32,
    pub good_threshold: f32,
    pub poor_threshold: f32,
    /// Window in seconds for the stability verdict.
    pub min_stable_tracking_time: f32,
    /// Longest loss in seconds that still warrants recovery.
    pub max_tracking_loss_time: f32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            excellent_threshold: tracking::DEFAULT_EXCELLENT_THRESHOLD,
            good_threshold: tracking::DEFAULT_GOOD_THRESHOLD,
            poor_threshold: tracking::DEFAULT_POOR_THRESHOLD,
            min_stable_tracking_time: tracking::DEFAULT_MIN_STABLE_TRACKING_SECS,
            max_tracking_loss_time: tracking::DEFAULT_MAX_TRACKING_LOSS_SECS,
        }
    }
}

impl TrackingConfig {
    /// Clamp thresholds to 0..1 and push misordered ones below their upper neighbour
    pub fn corrected_thresholds(&self) -> (f32, f32, f32) {
        let excellent = self.excellent_threshold.clamp(0.0, 1.0);
        let mut good = self.good_threshold.clamp(0.0, 1.0);
        let mut poor = self.poor_threshold.clamp(0.0, 1.0);

        if good >= excellent {
            good = (excellent - tracking::THRESHOLD_CORRECTION).max(0.0);
        }
        if poor >= good {
            poor = (good - tracking::THRESHOLD_CORRECTION).max(0.0);
        }
        (excellent, good, poor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaneDetectionConfig {
    pub max_planes: usize,
    pub iterations: usize,
    pub distance_threshold: f32,
    pub min_points: usize,
    pub min_area: f32,
    pub max_plane_age: f32,
    pub validation_interval: f32,
    pub floor_height: f32,
    pub table_height: f32,
    /// Seed for the session's RANSAC sampler.
    pub seed: u64,
}

impl Default for PlaneDetectionConfig {
    fn default() -> Self {
        Self {
            max_planes: planes::MAX_PLANES,
            iterations: planes::RANSAC_ITERATIONS,
            distance_threshold: planes::DEFAULT_DISTANCE_THRESHOLD,
            min_points: planes::MIN_PLANE_POINTS,
            min_area: planes::DEFAULT_MIN_PLANE_AREA,
            max_plane_age: planes::DEFAULT_MAX_PLANE_AGE_SECS,
            validation_interval: planes::PLANE_VALIDATION_INTERVAL_SECS,
            floor_height: planes::FLOOR_HEIGHT_LIMIT,
            table_height: planes::TABLE_HEIGHT_LIMIT,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Regenerate the surface automatically when points change.
    pub auto_update: bool,
    /// Seconds between automatic updates at full quality.
    pub update_interval: f32,
    /// Newest points handed to a single generation request.
    pub max_cached_points: usize,
    /// Update frequency halves while quality is below this class.
    pub throttle_below: TrackingQuality,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            auto_update: true,
            update_interval: streaming::DEFAULT_UPDATE_INTERVAL_SECS,
            max_cached_points: streaming::DEFAULT_MAX_CACHED_POINTS,
            throttle_below: TrackingQuality::Normal,
        }
    }
}

/// Every tunable of a meshing session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub memory: MemoryConfig,
    pub spatial: SpatialConfig,
    pub reconstruction: ReconstructionConfig,
    pub scheduler: SchedulerConfig,
    pub tracking: TrackingConfig,
    pub planes: PlaneDetectionConfig,
    pub stream: StreamConfig,
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config.validated())
    }

    /// Load and validate a JSON configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Clamp out of range values to usable ones
    pub fn validated(mut self) -> Self {
        let positive_or = |value: f32, fallback: f32| {
            if value.is_finite() && value > 0.0 {
                value
            } else {
                fallback
            }
        };

        self.memory.max_point_age = self.memory.max_point_age.max(0.0);
        self.memory.cleanup_interval = self
            .memory
            .cleanup_interval
            .max(memory::MIN_CLEANUP_INTERVAL_SECS);

        self.spatial.cell_size = positive_or(self.spatial.cell_size, spatial::DEFAULT_CELL_SIZE);

        let recon = &mut self.reconstruction;
        recon.voxel_size = positive_or(recon.voxel_size, reconstruction::DEFAULT_VOXEL_SIZE);
        recon.grid_resolution = recon.grid_resolution.clamp(
            reconstruction::MIN_GRID_RESOLUTION,
            reconstruction::MAX_GRID_RESOLUTION,
        );
        recon.smoothing_factor = recon.smoothing_factor.max(0.0);

        if self.scheduler.max_worker_threads != 0 {
            self.scheduler.max_worker_threads = self
                .scheduler
                .max_worker_threads
                .clamp(scheduler::MIN_WORKER_THREADS, scheduler::MAX_WORKER_THREADS);
        }
        self.scheduler.job_retention = self.scheduler.job_retention.max(0.0);

        let (excellent, good, poor) = self.tracking.corrected_thresholds();
        self.tracking.excellent_threshold = excellent;
        self.tracking.good_threshold = good;
        self.tracking.poor_threshold = poor;

        self.stream.update_interval = self.stream.update_interval.max(0.0);
        self
    }
}
