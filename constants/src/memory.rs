/// Point store capacity and eviction timing

/// Default maximum number of stored points (0 = unbounded)
pub const DEFAULT_MAX_POINTS: usize = 50_000;

/// Default maximum point age in seconds (0 = unbounded)
pub const DEFAULT_MAX_POINT_AGE_SECS: f32 = 300.0;

/// Default interval between automatic cleanup passes
pub const DEFAULT_CLEANUP_INTERVAL_SECS: f32 = 30.0;

/// Lower bound for the cleanup interval
pub const MIN_CLEANUP_INTERVAL_SECS: f32 = 1.0;
