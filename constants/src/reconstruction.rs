/// Surface reconstruction defaults

/// Default voxel edge length for cube, voxel and isosurface output
pub const DEFAULT_VOXEL_SIZE: f32 = 10.0;

/// Default density threshold for isosurface extraction
pub const DEFAULT_ISO_VALUE: f32 = 0.5;

/// Default grid resolution per axis when explicit bounds are used
pub const DEFAULT_GRID_RESOLUTION: u32 = 50;

/// Grid resolution clamp applied per axis
pub const MIN_GRID_RESOLUTION: u32 = 10;
pub const MAX_GRID_RESOLUTION: u32 = 200;

/// Density sampling radius as a multiple of voxel size
pub const DENSITY_RADIUS_FACTOR: f32 = 2.0;

/// Default distance for normal smoothing
pub const DEFAULT_SMOOTHING_FACTOR: f32 = 0.5;

/// Interpolation snap tolerance at iso crossings
pub const ISO_EPSILON: f32 = 1e-5;

/// Input elements processed between cancellation checks
pub const CHECKPOINT_INTERVAL: usize = 1_000;

/// Triangle count above which smoothing is skipped
pub const MAX_SMOOTHING_TRIANGLES: usize = 20_000;
