/// One cube per point, sized by half the voxel size
use super::cubes::{TRIANGLES_PER_CUBE, push_cube};
use super::{Checkpoint, Triangle};
use crate::config::ReconstructionConfig;
use crate::point::Point;

pub fn generate(
    points: &[Point],
    config: &ReconstructionConfig,
    checkpoint: &mut Checkpoint,
) -> Option<Vec<Triangle>> {
    let half_size = config.voxel_size * 0.5;
    let mut triangles = Vec::with_capacity(points.len() * TRIANGLES_PER_CUBE);

    for (index, point) in points.iter().enumerate() {
        if !checkpoint.step(index, points.len(), (0.0, 1.0)) {
            return None;
        }
        push_cube(
            &mut triangles,
            point.position,
            half_size,
            point.color,
            point.normal,
        );
    }

    Some(triangles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::color::LinearRgba;
    use bevy::math::Vec3;

    #[test]
    fn cubes_carry_point_colour_and_size() {
        let red = LinearRgba::new(1.0, 0.0, 0.0, 1.0);
        let points = [
            Point::new(Vec3::ZERO, red, 0.0),
            Point::new(Vec3::new(50.0, 0.0, 0.0), LinearRgba::WHITE, 0.0),
        ];
        let config = ReconstructionConfig {
            voxel_size: 4.0,
            ..Default::default()
        };

        let triangles = generate(&points, &config, &mut Checkpoint::inline()).unwrap();

        assert_eq!(triangles.len(), 24);
        assert!(triangles[..12].iter().all(|t| t.colors == [red; 3]));
        let max_x = triangles[..12]
            .iter()
            .flat_map(|t| t.vertices)
            .map(|v| v.x)
            .fold(f32::MIN, f32::max);
        assert_eq!(max_x, 2.0);
    }
}
