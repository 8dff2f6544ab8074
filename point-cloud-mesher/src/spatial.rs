/// Uniform grid spatial index over stored points
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use bevy::math::{IVec3, Vec3};

use crate::point::Point;

/// Occupancy summary for the grid.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpatialStats {
    pub total_points: usize,
    pub active_cells: usize,
    pub max_points_per_cell: usize,
    pub average_points_per_cell: f32,
}

/// Partitions space into cubic cells keyed by `floor(position / cell_size)`.
/// Empty cells are pruned as soon as their last point is removed.
pub struct SpatialIndex {
    cell_size: f32,
    cells: HashMap<IVec3, Vec<Point>>,
    point_count: usize,
}

/// Max-heap entry keyed by squared distance.
struct Candidate {
    distance_sq: f32,
    point: Point,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance_sq.total_cmp(&other.distance_sq)
    }
}

impl SpatialIndex {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size: sanitize_cell_size(cell_size),
            cells: HashMap::new(),
            point_count: 0,
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Change the cell size, redistributing every point
    pub fn set_cell_size(&mut self, cell_size: f32) {
        let cell_size = sanitize_cell_size(cell_size);
        if cell_size != self.cell_size {
            self.cell_size = cell_size;
            self.rebuild();
        }
    }

    pub fn len(&self) -> usize {
        self.point_count
    }

    pub fn is_empty(&self) -> bool {
        self.point_count == 0
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn cell_key(&self, position: Vec3) -> IVec3 {
        (position / self.cell_size).floor().as_ivec3()
    }

    fn cell_center(&self, key: IVec3) -> Vec3 {
        (key.as_vec3() + Vec3::splat(0.5)) * self.cell_size
    }

    fn half_diagonal(&self) -> f32 {
        self.cell_size * 3.0_f32.sqrt() * 0.5
    }

    pub fn add_point(&mut self, point: Point) {
        let key = self.cell_key(point.position);
        self.cells.entry(key).or_default().push(point);
        self.point_count += 1;
    }

    pub fn add_points(&mut self, points: &[Point]) {
        for point in points {
            self.add_point(*point);
        }
    }

    /// Remove one point matching by value
    pub fn remove_point(&mut self, point: &Point) -> bool {
        let key = self.cell_key(point.position);
        let Some(cell) = self.cells.get_mut(&key) else {
            return false;
        };
        let Some(slot) = cell.iter().position(|candidate| candidate == point) else {
            return false;
        };

        cell.swap_remove(slot);
        if cell.is_empty() {
            self.cells.remove(&key);
        }
        self.point_count -= 1;
        true
    }

    /// Remove every point matching the predicate
    pub fn remove_where<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&Point) -> bool,
    {
        let mut removed = 0;
        self.cells.retain(|_, cell| {
            let before = cell.len();
            cell.retain(|point| !predicate(point));
            removed += before - cell.len();
            !cell.is_empty()
        });
        self.point_count -= removed;
        removed
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.point_count = 0;
    }

    /// Drain and reinsert every point
    pub fn rebuild(&mut self) {
        let points = self.all_points();
        self.clear();
        self.add_points(&points);
    }

    /// Replace the index contents with the given points
    pub fn sync_from(&mut self, points: &[Point]) {
        self.clear();
        self.add_points(points);
    }

    pub fn all_points(&self) -> Vec<Point> {
        self.cells.values().flatten().copied().collect()
    }

    /// Points with `distance(point, center) <= radius`
    pub fn find_in_radius(&self, center: Vec3, radius: f32) -> Vec<Point> {
        if radius < 0.0 || self.is_empty() {
            return Vec::new();
        }

        let radius_sq = radius * radius;
        self.cells_in_sphere(center, radius)
            .into_iter()
            .filter_map(|key| self.cells.get(&key))
            .flatten()
            .filter(|point| point.position.distance_squared(center) <= radius_sq)
            .copied()
            .collect()
    }

    /// Closest point within `max_distance`
    pub fn find_nearest(&self, center: Vec3, max_distance: f32) -> Option<Point> {
        self.find_k_nearest(center, 1, max_distance).into_iter().next()
    }

    /// Up to `k` closest points within `max_distance`, ascending by distance
    pub fn find_k_nearest(&self, center: Vec3, k: usize, max_distance: f32) -> Vec<Point> {
        if k == 0 || max_distance < 0.0 || self.is_empty() {
            return Vec::new();
        }

        let max_distance_sq = max_distance * max_distance;
        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k + 1);

        let cells = self.cells_in_sphere(center, max_distance);
        for point in cells.iter().filter_map(|key| self.cells.get(key)).flatten() {
            let distance_sq = point.position.distance_squared(center);
            if distance_sq > max_distance_sq {
                continue;
            }

            if heap.len() < k {
                heap.push(Candidate {
                    distance_sq,
                    point: *point,
                });
            } else if heap
                .peek()
                .is_some_and(|farthest| distance_sq < farthest.distance_sq)
            {
                heap.pop();
                heap.push(Candidate {
                    distance_sq,
                    point: *point,
                });
            }
        }

        heap.into_sorted_vec()
            .into_iter()
            .map(|candidate| candidate.point)
            .collect()
    }

    /// Points inside the axis aligned box, boundaries inclusive
    pub fn find_in_box(&self, min: Vec3, max: Vec3) -> Vec<Point> {
        let (min, max) = (min.min(max), min.max(max));
        let (min_key, max_key) = (self.cell_key(min), self.cell_key(max));

        self.candidate_cells(min_key, max_key, |_| true)
            .into_iter()
            .filter_map(|key| self.cells.get(&key))
            .flatten()
            .filter(|point| point.position.cmpge(min).all() && point.position.cmple(max).all())
            .copied()
            .collect()
    }

    /// Points within `tolerance` of the ray segment, ordered along the ray
    pub fn find_along_ray(
        &self,
        origin: Vec3,
        direction: Vec3,
        tolerance: f32,
        max_distance: f32,
    ) -> Vec<Point> {
        let Some(direction) = direction.try_normalize() else {
            return Vec::new();
        };
        if tolerance < 0.0 || max_distance < 0.0 {
            return Vec::new();
        }

        // Box around the segment approximates the cylinder before the exact test.
        let end = origin + direction * max_distance;
        let margin = Vec3::splat(tolerance);
        let candidates = self.find_in_box(origin.min(end) - margin, origin.max(end) + margin);

        let tolerance_sq = tolerance * tolerance;
        let mut hits: Vec<(f32, Point)> = candidates
            .into_iter()
            .filter_map(|point| {
                let along = (point.position - origin).dot(direction).clamp(0.0, max_distance);
                let closest = origin + direction * along;
                (point.position.distance_squared(closest) <= tolerance_sq).then_some((along, point))
            })
            .collect();

        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        hits.into_iter().map(|(_, point)| point).collect()
    }

    pub fn stats(&self) -> SpatialStats {
        let max_points_per_cell = self.cells.values().map(Vec::len).max().unwrap_or(0);
        let average_points_per_cell = if self.cells.is_empty() {
            0.0
        } else {
            self.point_count as f32 / self.cells.len() as f32
        };

        SpatialStats {
            total_points: self.point_count,
            active_cells: self.cells.len(),
            max_points_per_cell,
            average_points_per_cell,
        }
    }

    pub fn memory_usage_bytes(&self) -> usize {
        let cell_overhead = std::mem::size_of::<IVec3>() + std::mem::size_of::<Vec<Point>>();
        let stored: usize = self
            .cells
            .values()
            .map(|cell| cell.capacity() * Point::SIZE_BYTES)
            .sum();
        std::mem::size_of::<Self>() + self.cells.capacity() * cell_overhead + stored
    }

    /// Cells whose centre lies within `radius + half diagonal` of the query centre
    fn cells_in_sphere(&self, center: Vec3, radius: f32) -> Vec<IVec3> {
        let reach = radius + self.half_diagonal() + self.cell_size * 1e-4;
        let reach_sq = reach * reach;
        let min_key = self
            .cell_key(center - Vec3::splat(radius))
            .saturating_sub(IVec3::ONE);
        let max_key = self
            .cell_key(center + Vec3::splat(radius))
            .saturating_add(IVec3::ONE);

        self.candidate_cells(min_key, max_key, |key| {
            self.cell_center(key).distance_squared(center) <= reach_sq
        })
    }

    /// Occupied cells in the key range that pass `accept`. Walks the occupied
    /// cells directly when the key range is larger than the occupancy.
    fn candidate_cells<F>(&self, min_key: IVec3, max_key: IVec3, accept: F) -> Vec<IVec3>
    where
        F: Fn(IVec3) -> bool,
    {
        let span = |lo: i32, hi: i32| (hi as f64 - lo as f64 + 1.0).max(0.0);
        let range_size = span(min_key.x, max_key.x)
            * span(min_key.y, max_key.y)
            * span(min_key.z, max_key.z);

        if range_size > self.cells.len() as f64 {
            return self
                .cells
                .keys()
                .filter(|key| key.cmpge(min_key).all() && key.cmple(max_key).all())
                .filter(|key| accept(**key))
                .copied()
                .collect();
        }

        let mut keys = Vec::new();
        for z in min_key.z..=max_key.z {
            for y in min_key.y..=max_key.y {
                for x in min_key.x..=max_key.x {
                    let key = IVec3::new(x, y, z);
                    if self.cells.contains_key(&key) && accept(key) {
                        keys.push(key);
                    }
                }
            }
        }
        keys
    }
}

fn sanitize_cell_size(cell_size: f32) -> f32 {
    if cell_size.is_finite() && cell_size > 0.0 {
        cell_size
    } else {
        constants::spatial::DEFAULT_CELL_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn random_points(rng: &mut ChaCha8Rng, count: usize, extent: f32) -> Vec<Point> {
        (0..count)
            .map(|i| {
                let position = Vec3::new(
                    rng.gen_range(-extent..extent),
                    rng.gen_range(-extent..extent),
                    rng.gen_range(-extent..extent),
                );
                Point::new(position, Default::default(), i as f64)
            })
            .collect()
    }

    fn sorted_timestamps(points: &[Point]) -> Vec<f64> {
        let mut stamps: Vec<f64> = points.iter().map(|p| p.timestamp).collect();
        stamps.sort_by(f64::total_cmp);
        stamps
    }

    #[test]
    fn radius_query_matches_brute_force() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let points = random_points(&mut rng, 2000, 500.0);
        let mut index = SpatialIndex::new(60.0);
        index.add_points(&points);

        for _ in 0..25 {
            let center = random_points(&mut rng, 1, 500.0)[0].position;
            let radius = rng.gen_range(0.0..250.0);
            let expected: Vec<Point> = points
                .iter()
                .filter(|p| p.position.distance_squared(center) <= radius * radius)
                .copied()
                .collect();

            let found = index.find_in_radius(center, radius);
            assert_eq!(sorted_timestamps(&found), sorted_timestamps(&expected));
        }
    }

    #[test]
    fn k_nearest_is_sorted_and_exact() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let points = random_points(&mut rng, 1000, 300.0);
        let mut index = SpatialIndex::new(50.0);
        index.add_points(&points);

        let center = Vec3::new(10.0, -20.0, 5.0);
        let found = index.find_k_nearest(center, 12, f32::MAX);

        let mut expected = points.clone();
        expected.sort_by(|a, b| {
            a.position
                .distance_squared(center)
                .total_cmp(&b.position.distance_squared(center))
        });

        assert_eq!(found.len(), 12);
        for (found, expected) in found.iter().zip(expected.iter()) {
            assert_eq!(found.timestamp, expected.timestamp);
        }
    }

    #[test]
    fn k_nearest_respects_max_distance() {
        let mut index = SpatialIndex::new(10.0);
        for x in 0..5 {
            index.add_point(Point::new(
                Vec3::new(x as f32 * 10.0, 0.0, 0.0),
                Default::default(),
                x as f64,
            ));
        }

        let found = index.find_k_nearest(Vec3::ZERO, 10, 25.0);
        let xs: Vec<f32> = found.iter().map(|p| p.position.x).collect();
        assert_eq!(xs, vec![0.0, 10.0, 20.0]);
        assert_eq!(
            index.find_nearest(Vec3::new(31.0, 0.0, 0.0), 5.0).map(|p| p.position.x),
            Some(30.0)
        );
        assert!(index.find_nearest(Vec3::new(500.0, 0.0, 0.0), 5.0).is_none());
    }

    #[test]
    fn box_query_is_inclusive() {
        let mut index = SpatialIndex::new(1.0);
        index.add_point(Point::new(Vec3::new(1.0, 1.0, 1.0), Default::default(), 0.0));
        index.add_point(Point::new(Vec3::new(2.5, 1.0, 1.0), Default::default(), 1.0));

        let found = index.find_in_box(Vec3::ZERO, Vec3::ONE);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].timestamp, 0.0);
    }

    #[test]
    fn ray_query_orders_hits_along_ray() {
        let mut index = SpatialIndex::new(5.0);
        for (i, x) in [30.0, 10.0, 20.0].into_iter().enumerate() {
            index.add_point(Point::new(Vec3::new(x, 0.5, 0.0), Default::default(), i as f64));
        }
        index.add_point(Point::new(Vec3::new(15.0, 4.0, 0.0), Default::default(), 9.0));

        let hits = index.find_along_ray(Vec3::ZERO, Vec3::X, 1.0, 25.0);
        let xs: Vec<f32> = hits.iter().map(|p| p.position.x).collect();
        assert_eq!(xs, vec![10.0, 20.0]);
    }

    #[test]
    fn removal_prunes_empty_cells() {
        let mut index = SpatialIndex::new(10.0);
        let a = Point::new(Vec3::new(1.0, 1.0, 1.0), Default::default(), 0.0);
        let b = Point::new(Vec3::new(55.0, 1.0, 1.0), Default::default(), 1.0);
        index.add_points(&[a, b]);
        assert_eq!(index.cell_count(), 2);

        assert!(index.remove_point(&a));
        assert!(!index.remove_point(&a));
        assert_eq!(index.cell_count(), 1);
        assert_eq!(index.len(), 1);

        assert_eq!(index.remove_where(|p| p.timestamp >= 1.0), 1);
        assert!(index.is_empty());
        assert_eq!(index.cell_count(), 0);
    }

    #[test]
    fn rebuild_with_new_cell_size_keeps_points() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let points = random_points(&mut rng, 300, 100.0);
        let mut index = SpatialIndex::new(10.0);
        index.add_points(&points);

        index.set_cell_size(35.0);

        assert_eq!(index.len(), 300);
        assert_eq!(sorted_timestamps(&index.all_points()), sorted_timestamps(&points));
        let stats = index.stats();
        assert_eq!(stats.total_points, 300);
        assert!(stats.max_points_per_cell >= 1);
    }
}
