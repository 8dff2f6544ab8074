/// Timestamped point sample produced by a sensing device
use bevy::color::LinearRgba;
use bevy::math::Vec3;

/// Immutable point value. Points are only ever added or evicted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// World position in scene units.
    pub position: Vec3,
    /// Sample colour.
    pub color: LinearRgba,
    /// Scalar weight applied during density sampling.
    pub intensity: f32,
    /// Capture time in seconds on the session clock.
    pub timestamp: f64,
    /// Surface normal, +Z when the device reports none.
    pub normal: Vec3,
}

impl Default for Point {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            color: LinearRgba::WHITE,
            intensity: 1.0,
            timestamp: 0.0,
            normal: Vec3::Z,
        }
    }
}

impl Point {
    /// Size of a single stored point in bytes
    pub const SIZE_BYTES: usize = std::mem::size_of::<Point>();

    pub fn new(position: Vec3, color: LinearRgba, timestamp: f64) -> Self {
        Self {
            position,
            color,
            timestamp,
            ..Default::default()
        }
    }

    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = intensity;
        self
    }

    /// Attach a surface normal, falling back to +Z for degenerate input
    pub fn with_normal(mut self, normal: Vec3) -> Self {
        self.normal = normal.try_normalize().unwrap_or(Vec3::Z);
        self
    }

    /// Seconds elapsed since capture
    pub fn age(&self, now: f64) -> f64 {
        now - self.timestamp
    }
}
