/// Insertion ordered point storage with capacity and age eviction
use bevy::math::Vec3;

use crate::bounds::Bounds;
use crate::point::Point;

/// Kind of mutation reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointsChange {
    Added(usize),
    Removed(usize),
    Cleared,
}

/// Aggregated notification fired once per store mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointsChanged {
    pub change: PointsChange,
    /// Point count after the mutation.
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Observer = Box<dyn FnMut(&PointsChanged) + Send + Sync>;

/// Canonical point collection for a session.
/// Capacity and age limits are enforced by eviction, never by rejecting inserts.
pub struct PointStore {
    points: Vec<Point>,
    /// Maximum stored points, 0 for unbounded.
    capacity: usize,
    /// Maximum point age in seconds, 0 for unbounded.
    max_age: f64,
    observers: Vec<(SubscriptionId, Observer)>,
    next_subscription: u64,
}

impl Default for PointStore {
    fn default() -> Self {
        Self::new(0, 0.0)
    }
}

impl PointStore {
    pub fn new(capacity: usize, max_age: f64) -> Self {
        Self {
            points: Vec::new(),
            capacity,
            max_age: max_age.max(0.0),
            observers: Vec::new(),
            next_subscription: 0,
        }
    }

    /// Register a change observer
    pub fn subscribe<F>(&mut self, observer: F) -> SubscriptionId
    where
        F: FnMut(&PointsChanged) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(existing, _)| *existing != id);
        self.observers.len() != before
    }

    fn notify(&mut self, change: PointsChange) {
        let event = PointsChanged {
            change,
            count: self.points.len(),
        };
        for (_, observer) in self.observers.iter_mut() {
            observer(&event);
        }
    }

    pub fn add(&mut self, point: Point) {
        self.points.push(point);
        self.notify(PointsChange::Added(1));
    }

    /// Append a batch in order with a single change notification
    pub fn add_batch<I>(&mut self, points: I) -> usize
    where
        I: IntoIterator<Item = Point>,
    {
        let before = self.points.len();
        self.points.extend(points);
        let added = self.points.len() - before;
        if added > 0 {
            self.notify(PointsChange::Added(added));
        }
        added
    }

    /// Remove every point matching the predicate, preserving order of the rest
    pub fn remove_where<F>(&mut self, predicate: F) -> usize
    where
        F: FnMut(&Point) -> bool,
    {
        let removed = self.retain_silently(predicate);
        if removed > 0 {
            self.notify(PointsChange::Removed(removed));
        }
        removed
    }

    pub fn remove_at(&mut self, index: usize) -> Option<Point> {
        if index >= self.points.len() {
            return None;
        }
        let point = self.points.remove(index);
        self.notify(PointsChange::Removed(1));
        Some(point)
    }

    pub fn clear(&mut self) {
        if self.points.is_empty() {
            return;
        }
        self.points.clear();
        self.notify(PointsChange::Cleared);
    }

    /// Point at index, or a default point when out of range
    pub fn get(&self, index: usize) -> Point {
        self.points.get(index).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn positions(&self) -> Vec<Vec3> {
        self.points.iter().map(|point| point.position).collect()
    }

    /// Newest `limit` points in insertion order
    pub fn newest(&self, limit: usize) -> &[Point] {
        let start = self.points.len().saturating_sub(limit);
        &self.points[start..]
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    pub fn max_age(&self) -> f64 {
        self.max_age
    }

    pub fn set_max_age(&mut self, max_age: f64) {
        self.max_age = max_age.max(0.0);
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::from_points(&self.points)
    }

    pub fn memory_usage_bytes(&self) -> usize {
        std::mem::size_of::<Self>() + self.points.capacity() * Point::SIZE_BYTES
    }

    /// Apply age then capacity limits with one aggregated notification.
    /// Excess points are chosen oldest timestamp first; survivors keep insertion order.
    pub fn evict(&mut self, now: f64) -> usize {
        let mut removed = 0;

        if self.max_age > 0.0 {
            let cutoff = now - self.max_age;
            removed += self.retain_silently(|point| point.timestamp < cutoff);
        }

        if self.capacity > 0 && self.points.len() > self.capacity {
            removed += self.evict_oldest(self.points.len() - self.capacity);
        }

        if removed > 0 {
            self.notify(PointsChange::Removed(removed));
        }
        removed
    }

    fn evict_oldest(&mut self, excess: usize) -> usize {
        let in_time_order = self
            .points
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp);

        if in_time_order {
            self.points.drain(..excess);
            return excess;
        }

        // Stable sort keeps insertion order between equal timestamps.
        let mut order: Vec<usize> = (0..self.points.len()).collect();
        order.sort_by(|&a, &b| {
            self.points[a]
                .timestamp
                .total_cmp(&self.points[b].timestamp)
        });

        let mut evicted = vec![false; self.points.len()];
        for &index in &order[..excess] {
            evicted[index] = true;
        }

        let mut index = 0;
        self.points.retain(|_| {
            let keep = !evicted[index];
            index += 1;
            keep
        });
        excess
    }

    fn retain_silently<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&Point) -> bool,
    {
        let before = self.points.len();
        self.points.retain(|point| !predicate(point));
        before - self.points.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::math::Vec3;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn point_at(x: f32, timestamp: f64) -> Point {
        Point::new(Vec3::new(x, 0.0, 0.0), Default::default(), timestamp)
    }

    fn counting_store(store: &mut PointStore) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        let observed = calls.clone();
        store.subscribe(move |_| {
            observed.fetch_add(1, Ordering::SeqCst);
        });
        calls
    }

    #[test]
    fn batch_add_notifies_once() {
        let mut store = PointStore::default();
        let calls = counting_store(&mut store);

        let added = store.add_batch((0..250).map(|i| point_at(i as f32, i as f64)));

        assert_eq!(added, 250);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get(10).position.x, 10.0);
    }

    #[test]
    fn get_out_of_range_returns_default() {
        let store = PointStore::default();
        assert_eq!(store.get(42), Point::default());
    }

    #[test]
    fn capacity_eviction_drops_oldest() {
        let mut store = PointStore::new(1000, 0.0);
        store.add_batch((0..1500).map(|i| point_at(i as f32, i as f64)));
        let calls = counting_store(&mut store);

        let removed = store.evict(2000.0);

        assert_eq!(removed, 500);
        assert_eq!(store.len(), 1000);
        assert_eq!(store.get(0).timestamp, 500.0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn capacity_eviction_handles_out_of_order_timestamps() {
        let mut store = PointStore::new(2, 0.0);
        store.add_batch([point_at(0.0, 5.0), point_at(1.0, 1.0), point_at(2.0, 3.0)]);

        store.evict(10.0);

        let remaining: Vec<f32> = store.points().iter().map(|p| p.position.x).collect();
        assert_eq!(remaining, vec![0.0, 2.0]);
    }

    #[test]
    fn age_eviction_removes_stale_points() {
        let mut store = PointStore::new(0, 10.0);
        store.add_batch((0..20).map(|i| point_at(i as f32, i as f64)));

        let removed = store.evict(25.0);

        assert_eq!(removed, 15);
        assert!(store.points().iter().all(|p| p.age(25.0) <= 10.0));
    }

    #[test]
    fn unsubscribed_observer_is_silent() {
        let mut store = PointStore::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let observed = calls.clone();
        let id = store.subscribe(move |_| {
            observed.fetch_add(1, Ordering::SeqCst);
        });

        store.add(point_at(0.0, 0.0));
        assert!(store.unsubscribe(id));
        store.add(point_at(1.0, 0.0));
        store.clear();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_at_preserves_order() {
        let mut store = PointStore::default();
        store.add_batch((0..4).map(|i| point_at(i as f32, 0.0)));

        assert_eq!(store.remove_at(1).map(|p| p.position.x), Some(1.0));
        assert!(store.remove_at(10).is_none());

        let remaining: Vec<f32> = store.points().iter().map(|p| p.position.x).collect();
        assert_eq!(remaining, vec![0.0, 2.0, 3.0]);
    }
}
