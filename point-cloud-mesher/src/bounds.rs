/// Axis aligned bounds tracking for point sets and reconstruction grids
use bevy::math::Vec3;

use crate::point::Point;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Bounds {
    fn default() -> Self {
        Self::new()
    }
}

impl Bounds {
    /// Create new bounds initialised to infinity values
    pub fn new() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    pub fn from_corners(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Accumulate bounds over every point position
    pub fn from_points(points: &[Point]) -> Self {
        let mut bounds = Self::new();
        for point in points {
            bounds.update(point.position);
        }
        bounds
    }

    /// Update bounds with a new position
    pub fn update(&mut self, position: Vec3) {
        self.min = self.min.min(position);
        self.max = self.max.max(position);
    }

    /// False until at least one position has been accumulated
    pub fn is_valid(&self) -> bool {
        self.min.cmple(self.max).all()
    }

    pub fn dimensions(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Grow every face outward by the given margin
    pub fn expanded(&self, margin: f32) -> Self {
        Self {
            min: self.min - Vec3::splat(margin),
            max: self.max + Vec3::splat(margin),
        }
    }

    pub fn contains(&self, position: Vec3) -> bool {
        position.cmpge(self.min).all() && position.cmple(self.max).all()
    }
}
