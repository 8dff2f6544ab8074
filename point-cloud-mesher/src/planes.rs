/// RANSAC plane detection over the point cloud and a registry of tracked planes
use bevy::log::{debug, info};
use bevy::math::{Vec2, Vec3};
use constants::planes::{HIGH_CONFIDENCE_POINTS, MEDIUM_CONFIDENCE_POINTS};
use rand::Rng;
use rand::seq::index;
use serde::{Deserialize, Serialize};

use crate::config::PlaneDetectionConfig;
use crate::point::Point;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaneClassification {
    Floor,
    Table,
    Ceiling,
    Wall,
    Horizontal,
    Angled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaneConfidence {
    Low,
    Medium,
    High,
}

impl PlaneConfidence {
    pub fn from_inliers(inliers: usize) -> Self {
        if inliers > HIGH_CONFIDENCE_POINTS {
            PlaneConfidence::High
        } else if inliers > MEDIUM_CONFIDENCE_POINTS {
            PlaneConfidence::Medium
        } else {
            PlaneConfidence::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedPlane {
    /// Registry id, 0 until registered.
    pub id: u64,
    pub center: Vec3,
    pub normal: Vec3,
    /// Half size along the two in-plane axes.
    pub extent: Vec2,
    pub classification: PlaneClassification,
    pub confidence: PlaneConfidence,
    pub inlier_count: usize,
    pub last_seen: f64,
}

impl DetectedPlane {
    pub fn area(&self) -> f32 {
        4.0 * self.extent.x * self.extent.y
    }

    pub fn distance_to(&self, position: Vec3) -> f32 {
        (position - self.center).dot(self.normal).abs()
    }

    pub fn project(&self, position: Vec3) -> Vec3 {
        position - self.normal * (position - self.center).dot(self.normal)
    }
}

/// Classify a plane from its unit normal and centre height
pub fn classify_plane(normal: Vec3, center: Vec3, config: &PlaneDetectionConfig) -> PlaneClassification {
    let abs = normal.abs();
    if abs.z > 0.8 {
        if normal.z < 0.0 {
            PlaneClassification::Ceiling
        } else if center.z < config.floor_height {
            PlaneClassification::Floor
        } else if center.z < config.table_height {
            PlaneClassification::Table
        } else {
            PlaneClassification::Horizontal
        }
    } else if abs.z < 0.3 && (abs.x > 0.7 || abs.y > 0.7) {
        PlaneClassification::Wall
    } else {
        PlaneClassification::Angled
    }
}

/// Extract up to `max_planes` planes, removing each plane's inliers before
/// searching for the next. Stops at the first attempt without a usable plane.
pub fn detect_planes<R: Rng>(
    points: &[Point],
    config: &PlaneDetectionConfig,
    rng: &mut R,
    now: f64,
) -> Vec<DetectedPlane> {
    let mut remaining: Vec<&Point> = points.iter().collect();
    let mut planes = Vec::new();

    while planes.len() < config.max_planes && remaining.len() >= config.min_points.max(3) {
        let Some(inliers) = best_plane_inliers(&remaining, config, rng) else {
            break;
        };

        let plane = fit_plane(&remaining, &inliers, config, now);
        if plane.area() < config.min_area {
            break;
        }
        planes.push(plane);

        let mut is_inlier = vec![false; remaining.len()];
        for &i in &inliers {
            is_inlier[i] = true;
        }
        let mut position = 0;
        remaining.retain(|_| {
            let keep = !is_inlier[position];
            position += 1;
            keep
        });
    }

    debug!("Detected {} planes from {} points", planes.len(), points.len());
    planes
}

/// Inlier indices of the best RANSAC hypothesis with at least `min_points` support
fn best_plane_inliers<R: Rng>(
    points: &[&Point],
    config: &PlaneDetectionConfig,
    rng: &mut R,
) -> Option<Vec<usize>> {
    let mut best: Option<Vec<usize>> = None;

    for _ in 0..config.iterations {
        let sample = index::sample(rng, points.len(), 3);
        let (a, b, c) = (
            points[sample.index(0)].position,
            points[sample.index(1)].position,
            points[sample.index(2)].position,
        );
        let Some(normal) = (b - a).cross(c - a).try_normalize() else {
            continue;
        };

        let inliers: Vec<usize> = points
            .iter()
            .enumerate()
            .filter(|(_, point)| (point.position - a).dot(normal).abs() <= config.distance_threshold)
            .map(|(i, _)| i)
            .collect();

        let best_count = best.as_ref().map_or(0, Vec::len);
        if inliers.len() > best_count && inliers.len() >= config.min_points {
            best = Some(inliers);
        }
    }

    best
}

/// Refit centre, normal orientation and extent from the inlier set
fn fit_plane(
    points: &[&Point],
    inliers: &[usize],
    config: &PlaneDetectionConfig,
    now: f64,
) -> DetectedPlane {
    let count = inliers.len() as f32;
    let center = inliers.iter().map(|&i| points[i].position).sum::<Vec3>() / count;
    let mean_normal = inliers.iter().map(|&i| points[i].normal).sum::<Vec3>();

    let (a, b, c) = (
        points[inliers[0]].position,
        points[inliers[inliers.len() / 2]].position,
        points[inliers[inliers.len() - 1]].position,
    );
    let mut normal = least_squares_normal(points, inliers, center)
        .or_else(|| (b - a).cross(c - a).try_normalize())
        .unwrap_or(Vec3::Z);
    // Face the plane the same way as the sampled surface normals.
    if normal.dot(mean_normal) < 0.0 {
        normal = -normal;
    }

    let u = Vec3::Y.cross(normal).try_normalize().unwrap_or(Vec3::X);
    let v = normal.cross(u);
    let (mut min, mut max) = (Vec2::splat(f32::INFINITY), Vec2::splat(f32::NEG_INFINITY));
    for &i in inliers {
        let offset = points[i].position - center;
        let projected = Vec2::new(offset.dot(u), offset.dot(v));
        min = min.min(projected);
        max = max.max(projected);
    }

    DetectedPlane {
        id: 0,
        center,
        normal,
        extent: (max - min) * 0.5,
        classification: classify_plane(normal, center, config),
        confidence: PlaneConfidence::from_inliers(inliers.len()),
        inlier_count: inliers.len(),
        last_seen: now,
    }
}

/// Smallest eigenvector of the inlier covariance via the axis with the
/// largest determinant
fn least_squares_normal(points: &[&Point], inliers: &[usize], center: Vec3) -> Option<Vec3> {
    let (mut xx, mut xy, mut xz, mut yy, mut yz, mut zz) = (0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
    for &i in inliers {
        let r = points[i].position - center;
        xx += r.x * r.x;
        xy += r.x * r.y;
        xz += r.x * r.z;
        yy += r.y * r.y;
        yz += r.y * r.z;
        zz += r.z * r.z;
    }

    let det_x = yy * zz - yz * yz;
    let det_y = xx * zz - xz * xz;
    let det_z = xx * yy - xy * xy;
    let det_max = det_x.max(det_y).max(det_z);
    if det_max <= f32::EPSILON {
        return None;
    }

    let direction = if det_max == det_x {
        Vec3::new(det_x, xz * yz - xy * zz, xy * yz - xz * yy)
    } else if det_max == det_y {
        Vec3::new(xz * yz - xy * zz, det_y, xy * xz - yz * xx)
    } else {
        Vec3::new(xy * yz - xz * yy, xy * xz - yz * xx, det_z)
    };
    direction.try_normalize()
}

/// Outcome of registering a detected plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneUpdate {
    Added(u64),
    Updated(u64),
}

/// Tracked planes with ids, refreshed by repeated detection and aged out
/// when no longer observed.
pub struct PlaneRegistry {
    config: PlaneDetectionConfig,
    planes: Vec<DetectedPlane>,
    next_id: u64,
    last_validation: Option<f64>,
}

impl PlaneRegistry {
    pub fn new(config: &PlaneDetectionConfig) -> Self {
        Self {
            config: config.clone(),
            planes: Vec::new(),
            next_id: 1,
            last_validation: None,
        }
    }

    /// Add a plane or refresh the matching tracked one
    pub fn register(&mut self, mut plane: DetectedPlane) -> Option<PlaneUpdate> {
        if plane.area() < self.config.min_area || !plane.normal.is_normalized() {
            return None;
        }

        let threshold = self.config.distance_threshold;
        let existing = self.planes.iter_mut().find(|existing| {
            existing.classification == plane.classification
                && existing.normal.dot(plane.normal) > 0.95
                && existing.distance_to(plane.center) <= threshold
        });

        if let Some(existing) = existing {
            plane.id = existing.id;
            *existing = plane;
            return Some(PlaneUpdate::Updated(plane.id));
        }

        plane.id = self.next_id;
        self.next_id += 1;
        info!(
            "Added plane {} ({:?}, {:.1} area)",
            plane.id,
            plane.classification,
            plane.area()
        );
        self.planes.push(plane);
        Some(PlaneUpdate::Added(plane.id))
    }

    /// Run validation when the validation interval has elapsed
    pub fn tick(&mut self, now: f64) -> usize {
        let last = *self.last_validation.get_or_insert(now);
        if now - last < self.config.validation_interval as f64 {
            return 0;
        }
        self.validate(now)
    }

    /// Drop planes not refreshed within the maximum plane age
    pub fn validate(&mut self, now: f64) -> usize {
        let max_age = self.config.max_plane_age as f64;
        let before = self.planes.len();
        self.planes.retain(|plane| now - plane.last_seen <= max_age);
        self.last_validation = Some(now);

        let removed = before - self.planes.len();
        if removed > 0 {
            info!("Plane validation removed {} stale planes", removed);
        }
        removed
    }

    pub fn remove(&mut self, id: u64) -> bool {
        let before = self.planes.len();
        self.planes.retain(|plane| plane.id != id);
        self.planes.len() != before
    }

    pub fn clear(&mut self) {
        self.planes.clear();
        self.last_validation = None;
    }

    pub fn planes(&self) -> &[DetectedPlane] {
        &self.planes
    }

    pub fn by_classification(&self, classification: PlaneClassification) -> Vec<DetectedPlane> {
        self.planes
            .iter()
            .filter(|plane| plane.classification == classification)
            .copied()
            .collect()
    }

    /// Largest plane, optionally restricted to one classification
    pub fn largest(&self, classification: Option<PlaneClassification>) -> Option<DetectedPlane> {
        self.planes
            .iter()
            .filter(|plane| classification.is_none_or(|c| plane.classification == c))
            .max_by(|a, b| a.area().total_cmp(&b.area()))
            .copied()
    }

    /// Plane with the smallest point-to-plane distance
    pub fn nearest(&self, position: Vec3) -> Option<DetectedPlane> {
        self.planes
            .iter()
            .min_by(|a, b| a.distance_to(position).total_cmp(&b.distance_to(position)))
            .copied()
    }

    /// Snap a position onto the nearest plane, unchanged when none are tracked
    pub fn project_to_nearest(&self, position: Vec3) -> Vec3 {
        self.nearest(position)
            .map_or(position, |plane| plane.project(position))
    }
}
