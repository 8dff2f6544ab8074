/// Fan triangulation over ordered points
use bevy::log::warn;
use bevy::math::{Vec2, Vec3};

use super::{Checkpoint, Triangle};
use crate::bounds::Bounds;
use crate::point::Point;

/// Triangles `(0, i, i + 1)` for every `i` in `1..n-1`. Order dependent: callers
/// supply boundary ordered points for meaningful output.
pub fn generate(points: &[Point], checkpoint: &mut Checkpoint) -> Option<Vec<Triangle>> {
    if points.len() < 3 {
        warn!(
            "Fan triangulation needs at least 3 points, got {}",
            points.len()
        );
        return Some(Vec::new());
    }

    let bounds = Bounds::from_points(points);
    let uv = |position: Vec3| planar_uv(position, &bounds);
    let anchor = &points[0];
    let mut triangles = Vec::with_capacity(points.len() - 2);

    for i in 1..points.len() - 1 {
        if !checkpoint.step(i, points.len(), (0.0, 1.0)) {
            return None;
        }

        let (b, c) = (&points[i], &points[i + 1]);
        let vertices = [anchor.position, b.position, c.position];
        let face = (vertices[1] - vertices[0])
            .cross(vertices[2] - vertices[0])
            .try_normalize()
            .unwrap_or(anchor.normal);

        triangles.push(Triangle {
            vertices,
            normals: [face; 3],
            colors: [anchor.color, b.color, c.color],
            uvs: vertices.map(uv),
        });
    }

    Some(triangles)
}

/// XY position normalised against the point set bounds
fn planar_uv(position: Vec3, bounds: &Bounds) -> Vec2 {
    let size = bounds.dimensions().truncate().max(Vec2::splat(f32::EPSILON));
    (position.truncate() - bounds.min.truncate()) / size
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn point(x: f32, y: f32) -> Point {
        Point::new(Vec3::new(x, y, 0.0), Default::default(), 0.0)
    }

    #[test]
    fn right_triangle_yields_single_face() {
        let points = [point(0.0, 0.0), point(1.0, 0.0), point(0.0, 1.0)];

        let triangles = generate(&points, &mut Checkpoint::inline()).unwrap();

        assert_eq!(triangles.len(), 1);
        assert_eq!(
            triangles[0].vertices,
            [points[0].position, points[1].position, points[2].position]
        );
        assert_relative_eq!(triangles[0].normals[0].z, 1.0);
        assert_eq!(triangles[0].uvs[1], Vec2::new(1.0, 0.0));
    }

    #[test]
    fn fan_count_is_points_minus_two() {
        let points: Vec<Point> = (0..7)
            .map(|i| {
                let angle = i as f32 * 0.8;
                point(angle.cos(), angle.sin())
            })
            .collect();

        let triangles = generate(&points, &mut Checkpoint::inline()).unwrap();

        assert_eq!(triangles.len(), 5);
        assert!(triangles.iter().all(|t| t.vertices[0] == points[0].position));
    }

    #[test]
    fn too_few_points_yield_nothing() {
        let points = [point(0.0, 0.0), point(1.0, 0.0)];
        assert!(generate(&points, &mut Checkpoint::inline()).unwrap().is_empty());
    }
}
