/// Occupied voxel blocks at the configured voxel size
use std::collections::HashSet;

use bevy::color::LinearRgba;
use bevy::math::Vec3;

use super::cubes::{TRIANGLES_PER_CUBE, push_cube};
use super::{Checkpoint, Triangle};
use crate::config::ReconstructionConfig;
use crate::point::Point;

/// Snap points to cells, deduplicate, emit one white block per occupied cell
pub fn generate(
    points: &[Point],
    config: &ReconstructionConfig,
    checkpoint: &mut Checkpoint,
) -> Option<Vec<Triangle>> {
    let voxel_size = config.voxel_size;
    let mut seen = HashSet::new();
    let mut cells = Vec::new();

    for (index, point) in points.iter().enumerate() {
        if !checkpoint.step(index, points.len(), (0.0, 0.5)) {
            return None;
        }
        let cell = (point.position / voxel_size).floor().as_ivec3();
        if seen.insert(cell) {
            cells.push(cell);
        }
    }

    let mut triangles = Vec::with_capacity(cells.len() * TRIANGLES_PER_CUBE);
    for (index, cell) in cells.iter().enumerate() {
        if !checkpoint.step(index, cells.len(), (0.5, 1.0)) {
            return None;
        }
        let center = (cell.as_vec3() + Vec3::splat(0.5)) * voxel_size;
        push_cube(
            &mut triangles,
            center,
            voxel_size * 0.5,
            LinearRgba::WHITE,
            Vec3::Z,
        );
    }

    Some(triangles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn points_in_same_cell_share_one_block() {
        let points: Vec<Point> = [
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(9.0, 2.0, 3.0),
            Vec3::new(11.0, 1.0, 1.0),
            Vec3::new(-1.0, 1.0, 1.0),
        ]
        .into_iter()
        .map(|p| Point::new(p, LinearRgba::new(0.2, 0.4, 0.6, 1.0), 0.0))
        .collect();
        let config = ReconstructionConfig {
            voxel_size: 10.0,
            ..Default::default()
        };

        let triangles = generate(&points, &config, &mut Checkpoint::inline()).unwrap();
        assert_eq!(triangles.len(), 3 * TRIANGLES_PER_CUBE);
        assert!(triangles.iter().all(|t| t.colors == [LinearRgba::WHITE; 3]));
        assert!(triangles.iter().all(|t| t.normals == [Vec3::Z; 3]));
    }
}
