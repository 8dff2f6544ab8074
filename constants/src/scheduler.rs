/// Generation scheduler limits

/// Point count at which generation moves off the consumer thread
pub const DEFAULT_ASYNC_THRESHOLD: usize = 10_000;

/// Worker thread cap bounds
pub const MIN_WORKER_THREADS: usize = 1;
pub const MAX_WORKER_THREADS: usize = 8;

/// Default pending job limit
pub const DEFAULT_MAX_QUEUED_JOBS: usize = 10;

/// Seconds a finished job stays queryable before purge
pub const DEFAULT_JOB_RETENTION_SECS: f32 = 30.0;
