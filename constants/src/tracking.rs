/// Tracking quality thresholds and stability windows

/// Confidence at or above which quality is Excellent
pub const DEFAULT_EXCELLENT_THRESHOLD: f32 = 0.9;

/// Confidence at or above which quality is Normal
pub const DEFAULT_GOOD_THRESHOLD: f32 = 0.7;

/// Confidence at or above which quality is Limited
pub const DEFAULT_POOR_THRESHOLD: f32 = 0.3;

/// Gap enforced between misordered thresholds
pub const THRESHOLD_CORRECTION: f32 = 0.1;

/// Tracking history ring capacity
pub const HISTORY_CAPACITY: usize = 100;

/// Minimum samples before stability is assessed
pub const MIN_STABLE_SAMPLES: usize = 10;

/// Fraction of good samples required for stability
pub const STABLE_SAMPLE_RATIO: f32 = 0.8;

/// Window for the stability verdict
pub const DEFAULT_MIN_STABLE_TRACKING_SECS: f32 = 5.0;

/// Longest loss that still warrants recovery
pub const DEFAULT_MAX_TRACKING_LOSS_SECS: f32 = 30.0;
