use bevy::color::LinearRgba;
use bevy::math::Vec3;
use point_cloud_mesher::config::ReconstructionConfig;
use point_cloud_mesher::memory::MemoryPolicy;
use point_cloud_mesher::reconstruction;
use point_cloud_mesher::simulation::simulate_sensor_batch;
use point_cloud_mesher::spatial::SpatialIndex;
use point_cloud_mesher::storage::PointStore;
use point_cloud_mesher::{AlgorithmKind, Point};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn random_point(rng: &mut ChaCha8Rng, timestamp: f64) -> Point {
    let position = Vec3::new(
        rng.gen_range(-500.0..500.0),
        rng.gen_range(-500.0..500.0),
        rng.gen_range(-500.0..500.0),
    );
    Point::new(position, LinearRgba::WHITE, timestamp)
}

fn sorted_positions(points: &[Point]) -> Vec<[u32; 3]> {
    let mut keys: Vec<[u32; 3]> = points
        .iter()
        .map(|point| point.position.to_array().map(f32::to_bits))
        .collect();
    keys.sort_unstable();
    keys
}

#[test]
fn cleanup_always_honours_capacity_and_age() {
    let mut rng = ChaCha8Rng::seed_from_u64(21);

    for round in 0..20 {
        let capacity = rng.gen_range(1..400);
        let max_age = rng.gen_range(1.0..60.0);
        let mut store = PointStore::new(capacity, max_age);
        let mut policy = MemoryPolicy::new(&Default::default());

        let mut now = 0.0;
        for _ in 0..rng.gen_range(1..10) {
            let batch: Vec<Point> = (0..rng.gen_range(0..200))
                .map(|_| {
                    let timestamp = now - rng.gen_range(0.0..90.0);
                    random_point(&mut rng, timestamp)
                })
                .collect();
            store.add_batch(batch);
            now += rng.gen_range(0.0..20.0);

            policy.force_cleanup(&mut store, now);
            assert!(store.len() <= capacity, "round {round}: over capacity");
            assert!(
                store.points().iter().all(|point| point.age(now) <= max_age + 1e-9),
                "round {round}: stale point survived"
            );
        }
    }
}

#[test]
fn index_matches_store_after_sync() {
    let mut rng = ChaCha8Rng::seed_from_u64(8);
    let mut store = PointStore::default();
    let mut index = SpatialIndex::new(50.0);

    for step in 0..50 {
        let batch: Vec<Point> = (0..rng.gen_range(1..40))
            .map(|_| random_point(&mut rng, step as f64))
            .collect();
        index.add_points(&batch);
        store.add_batch(batch);

        if rng.gen_bool(0.4) && !store.is_empty() {
            let victim = rng.gen_range(0..store.len());
            if let Some(point) = store.remove_at(victim) {
                assert!(index.remove_point(&point));
            }
        }
        if step % 10 == 9 {
            let cutoff = step as f64 - 5.0;
            store.remove_where(|point| point.timestamp < cutoff);
            index.sync_from(store.points());
        }

        assert_eq!(index.len(), store.len());
        assert_eq!(sorted_positions(&index.all_points()), sorted_positions(store.points()));
    }
}

#[test]
fn radius_and_knn_agree_with_brute_force() {
    let mut rng = ChaCha8Rng::seed_from_u64(99);
    let points: Vec<Point> = (0..2000).map(|_| random_point(&mut rng, 0.0)).collect();
    let mut index = SpatialIndex::new(75.0);
    index.add_points(&points);

    for _ in 0..25 {
        let center = random_point(&mut rng, 0.0).position;
        let radius = rng.gen_range(1.0..300.0);

        let expected: Vec<Point> = points
            .iter()
            .filter(|point| point.position.distance(center) <= radius)
            .copied()
            .collect();
        assert_eq!(
            sorted_positions(&index.find_in_radius(center, radius)),
            sorted_positions(&expected)
        );

        let k = rng.gen_range(1..20);
        let nearest = index.find_k_nearest(center, k, f32::INFINITY);
        let mut distances: Vec<f32> = points
            .iter()
            .map(|point| point.position.distance_squared(center))
            .collect();
        distances.sort_by(f32::total_cmp);
        let found: Vec<f32> = nearest
            .iter()
            .map(|point| point.position.distance_squared(center))
            .collect();
        assert_eq!(found, distances[..k].to_vec());
    }
}

#[test]
fn isosurface_is_reproducible_for_the_same_cloud() {
    let mut rng = ChaCha8Rng::seed_from_u64(4);
    let points = simulate_sensor_batch(&mut rng, Vec3::new(50.0, 50.0, 50.0), 60.0, 4000, 0.0);
    let config = ReconstructionConfig {
        smooth_normals: true,
        ..Default::default()
    };

    let first = reconstruction::generate(AlgorithmKind::MarchingCubes, &points, &config);
    let second = reconstruction::generate(AlgorithmKind::MarchingCubes, &points, &config);

    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
fn degenerate_inputs_yield_empty_meshes() {
    let config = ReconstructionConfig::default();
    let two = [
        Point::new(Vec3::ZERO, LinearRgba::WHITE, 0.0),
        Point::new(Vec3::X, LinearRgba::WHITE, 0.0),
    ];

    assert!(reconstruction::generate(AlgorithmKind::Mesh, &two, &config).is_empty());
    assert!(reconstruction::generate(AlgorithmKind::MarchingCubes, &[], &config).is_empty());
    assert!(reconstruction::generate_named("delaunay", &two, &config).is_empty());
}
