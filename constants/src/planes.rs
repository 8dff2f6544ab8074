/// RANSAC plane detection defaults

/// Maximum planes extracted per detection pass
pub const MAX_PLANES: usize = 10;

/// RANSAC iterations per plane
pub const RANSAC_ITERATIONS: usize = 100;

/// Inlier distance from a candidate plane
pub const DEFAULT_DISTANCE_THRESHOLD: f32 = 2.0;

/// Minimum inliers for a plane to be accepted
pub const MIN_PLANE_POINTS: usize = 10;

/// Inlier counts for confidence classes
pub const HIGH_CONFIDENCE_POINTS: usize = 50;
pub const MEDIUM_CONFIDENCE_POINTS: usize = 25;

/// Minimum plane area in square scene units
pub const DEFAULT_MIN_PLANE_AREA: f32 = 0.25;

/// Seconds before an unrefreshed plane is dropped
pub const DEFAULT_MAX_PLANE_AGE_SECS: f32 = 60.0;

/// Seconds between plane validation passes
pub const PLANE_VALIDATION_INTERVAL_SECS: f32 = 5.0;

/// Height limits (scene units) separating floor and table planes
pub const FLOOR_HEIGHT_LIMIT: f32 = 50.0;
pub const TABLE_HEIGHT_LIMIT: f32 = 150.0;
