/// Periodic and on-demand eviction applied to the point store
use bevy::log::info;
use constants::memory::MIN_CLEANUP_INTERVAL_SECS;

use crate::config::MemoryConfig;
use crate::point::Point;
use crate::storage::PointStore;

/// Outcome of a single cleanup pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CleanupReport {
    pub removed: usize,
    pub freed_kb: f64,
    pub remaining: usize,
}

/// Cumulative cleanup statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemoryStats {
    pub cleanup_count: u64,
    pub total_removed: u64,
    pub total_freed_kb: f64,
    pub last_cleanup: Option<f64>,
}

/// Runs store eviction on a fixed interval. Disabling auto cleanup stops the
/// timer but `force_cleanup` keeps working.
pub struct MemoryPolicy {
    cleanup_interval: f64,
    auto_cleanup: bool,
    /// Start of the current timer period, set on the first tick.
    period_start: Option<f64>,
    stats: MemoryStats,
}

impl MemoryPolicy {
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            cleanup_interval: (config.cleanup_interval.max(MIN_CLEANUP_INTERVAL_SECS)) as f64,
            auto_cleanup: config.auto_cleanup,
            period_start: None,
            stats: MemoryStats::default(),
        }
    }

    /// Advance the cleanup timer, running a pass when the interval has elapsed
    pub fn tick(&mut self, store: &mut PointStore, now: f64) -> Option<CleanupReport> {
        if !self.auto_cleanup {
            return None;
        }

        let start = *self.period_start.get_or_insert(now);
        if now - start < self.cleanup_interval {
            return None;
        }

        Some(self.force_cleanup(store, now))
    }

    /// Run age and capacity eviction immediately
    pub fn force_cleanup(&mut self, store: &mut PointStore, now: f64) -> CleanupReport {
        let removed = store.evict(now);
        let freed_kb = (removed * Point::SIZE_BYTES) as f64 / 1024.0;

        self.period_start = Some(now);
        self.stats.cleanup_count += 1;
        self.stats.total_removed += removed as u64;
        self.stats.total_freed_kb += freed_kb;
        self.stats.last_cleanup = Some(now);

        if removed > 0 {
            info!(
                "Memory cleanup removed {} points ({:.1} KB), {} remaining",
                removed,
                freed_kb,
                store.len()
            );
        }

        CleanupReport {
            removed,
            freed_kb,
            remaining: store.len(),
        }
    }

    pub fn stats(&self) -> MemoryStats {
        self.stats
    }

    pub fn cleanup_interval(&self) -> f64 {
        self.cleanup_interval
    }

    pub fn set_cleanup_interval(&mut self, seconds: f32) {
        self.cleanup_interval = seconds.max(MIN_CLEANUP_INTERVAL_SECS) as f64;
    }

    pub fn auto_cleanup(&self) -> bool {
        self.auto_cleanup
    }

    pub fn set_auto_cleanup(&mut self, enabled: bool) {
        self.auto_cleanup = enabled;
        if !enabled {
            self.period_start = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::math::Vec3;

    fn filled_store(count: usize, capacity: usize) -> PointStore {
        let mut store = PointStore::new(capacity, 0.0);
        store.add_batch(
            (0..count).map(|i| Point::new(Vec3::splat(i as f32), Default::default(), i as f64)),
        );
        store
    }

    fn config(interval: f32, auto_cleanup: bool) -> MemoryConfig {
        MemoryConfig {
            cleanup_interval: interval,
            auto_cleanup,
            ..Default::default()
        }
    }

    #[test]
    fn tick_waits_for_interval() {
        let mut store = filled_store(1500, 1000);
        let mut policy = MemoryPolicy::new(&config(30.0, true));

        assert!(policy.tick(&mut store, 0.0).is_none());
        assert!(policy.tick(&mut store, 29.0).is_none());
        let report = policy.tick(&mut store, 30.0).expect("cleanup should run");

        assert_eq!(report.removed, 500);
        assert_eq!(store.len(), 1000);
        assert!(policy.tick(&mut store, 31.0).is_none());
    }

    #[test]
    fn disabled_timer_still_allows_forced_cleanup() {
        let mut store = filled_store(20, 10);
        let mut policy = MemoryPolicy::new(&config(1.0, false));

        assert!(policy.tick(&mut store, 100.0).is_none());
        assert_eq!(store.len(), 20);

        let report = policy.force_cleanup(&mut store, 100.0);
        assert_eq!(report.removed, 10);
        assert_eq!(policy.stats().cleanup_count, 1);
        assert_eq!(policy.stats().total_removed, 10);
    }

    #[test]
    fn interval_is_clamped() {
        let policy = MemoryPolicy::new(&config(0.01, true));
        assert_eq!(policy.cleanup_interval(), MIN_CLEANUP_INTERVAL_SECS as f64);
    }
}
