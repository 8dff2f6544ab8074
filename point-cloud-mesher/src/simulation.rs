/// Synthetic sensor feed for demos and tests
use std::f32::consts::TAU;

use bevy::color::LinearRgba;
use bevy::math::Vec3;
use rand::Rng;

use crate::point::Point;

/// Random points on a sphere shell around `center`, facing outward, with
/// random colors. Every point is stamped with `now`.
pub fn simulate_sensor_batch<R: Rng>(
    rng: &mut R,
    center: Vec3,
    radius: f32,
    count: usize,
    now: f64,
) -> Vec<Point> {
    (0..count)
        .map(|_| {
            let direction = random_unit_vector(rng);
            let color = LinearRgba::rgb(
                rng.gen_range(0.0..=1.0),
                rng.gen_range(0.0..=1.0),
                rng.gen_range(0.0..=1.0),
            );
            Point::new(center + direction * radius, color, now).with_normal(direction)
        })
        .collect()
}

fn random_unit_vector<R: Rng>(rng: &mut R) -> Vec3 {
    let z: f32 = rng.gen_range(-1.0..=1.0);
    let theta: f32 = rng.gen_range(0.0..TAU);
    let ring = (1.0 - z * z).max(0.0).sqrt();
    Vec3::new(ring * theta.cos(), ring * theta.sin(), z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn points_lie_on_shell_facing_outward() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let center = Vec3::new(100.0, -50.0, 20.0);
        let points = simulate_sensor_batch(&mut rng, center, 40.0, 200, 3.5);

        assert_eq!(points.len(), 200);
        for point in &points {
            let offset = point.position - center;
            assert_relative_eq!(offset.length(), 40.0, epsilon = 1e-3);
            assert!(point.normal.dot(offset.normalize()) > 0.999);
            assert_eq!(point.timestamp, 3.5);
        }
    }

    #[test]
    fn same_seed_same_batch() {
        let a = simulate_sensor_batch(&mut ChaCha8Rng::seed_from_u64(3), Vec3::ZERO, 10.0, 50, 0.0);
        let b = simulate_sensor_batch(&mut ChaCha8Rng::seed_from_u64(3), Vec3::ZERO, 10.0, 50, 0.0);
        assert_eq!(a, b);
    }
}
