/// Uniform grid index defaults

/// Default cell edge length in scene units
pub const DEFAULT_CELL_SIZE: f32 = 100.0;
