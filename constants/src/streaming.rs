/// Surface update cadence and generation caching

/// Default seconds between automatic surface updates
pub const DEFAULT_UPDATE_INTERVAL_SECS: f32 = 0.1;

/// Maximum points handed to a single generation request
pub const DEFAULT_MAX_CACHED_POINTS: usize = 100_000;

/// Multiplier applied to the update interval while quality is poor
pub const THROTTLED_INTERVAL_FACTOR: f32 = 2.0;

/// Default points per replayed sensor batch
pub const DEFAULT_BATCH_SIZE: usize = 5_000;

/// Default seconds between replayed sensor batches
pub const DEFAULT_BATCH_INTERVAL_SECS: f32 = 0.5;
