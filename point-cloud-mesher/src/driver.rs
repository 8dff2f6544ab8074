/// Consumer side owner of the live surface and its reaction to tracking quality
use bevy::log::{debug, info};
use bevy::prelude::Transform;
use constants::streaming::THROTTLED_INTERVAL_FACTOR;
use serde::{Deserialize, Serialize};

use crate::config::StreamConfig;
use crate::point::Point;
use crate::reconstruction::Triangle;
use crate::scheduler::JobId;
use crate::tracking::{TrackingQuality, TrackingState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceState {
    #[default]
    Visible,
    /// Hidden but kept while tracking is lost.
    Frozen,
}

/// What the session must do after tracking recovered.
#[derive(Debug, Clone, PartialEq)]
pub enum Recovery {
    /// Surface shown again under the stored anchor.
    Anchored(Transform),
    /// Surface stays frozen until the snapshot is regenerated.
    Regenerate(Vec<Point>),
    /// Nothing to restore from, surface shown as it was.
    Unfrozen,
    /// Surface was not frozen.
    NotFrozen,
}

pub struct SurfaceDriver {
    auto_update: bool,
    base_interval: f64,
    effective_interval: f64,
    throttle_below: TrackingQuality,
    state: SurfaceState,
    /// Points held at the moment tracking was lost.
    snapshot: Vec<Point>,
    anchor: Option<Transform>,
    dirty: bool,
    last_update: Option<f64>,
    pending_job: Option<JobId>,
    recovery_job: Option<JobId>,
    surface: Vec<Triangle>,
    revision: u64,
}

impl SurfaceDriver {
    pub fn new(config: &StreamConfig) -> Self {
        let interval = config.update_interval.max(0.0) as f64;
        Self {
            auto_update: config.auto_update,
            base_interval: interval,
            effective_interval: interval,
            throttle_below: config.throttle_below,
            state: SurfaceState::Visible,
            snapshot: Vec::new(),
            anchor: None,
            dirty: false,
            last_update: None,
            pending_job: None,
            recovery_job: None,
            surface: Vec::new(),
            revision: 0,
        }
    }

    pub fn state(&self) -> SurfaceState {
        self.state
    }

    pub fn is_frozen(&self) -> bool {
        self.state == SurfaceState::Frozen
    }

    pub fn surface(&self) -> &[Triangle] {
        &self.surface
    }

    /// Incremented each time a new surface is applied
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn snapshot(&self) -> &[Point] {
        &self.snapshot
    }

    pub fn anchor(&self) -> Option<Transform> {
        self.anchor
    }

    pub fn set_anchor(&mut self, anchor: Option<Transform>) {
        self.anchor = anchor;
    }

    pub fn update_interval(&self) -> f64 {
        self.effective_interval
    }

    pub fn is_throttled(&self) -> bool {
        self.effective_interval > self.base_interval
    }

    pub fn auto_update(&self) -> bool {
        self.auto_update
    }

    pub fn set_auto_update(&mut self, enabled: bool) {
        self.auto_update = enabled;
    }

    pub fn pending_job(&self) -> Option<JobId> {
        self.pending_job.or(self.recovery_job)
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Whether the auto update timer should regenerate the surface now
    pub fn should_update(&self, now: f64, tracking: TrackingState) -> bool {
        self.auto_update
            && self.dirty
            && !self.is_frozen()
            && tracking != TrackingState::Lost
            && self.pending_job().is_none()
            && self
                .last_update
                .is_none_or(|last| now - last >= self.effective_interval)
    }

    pub fn begin_update(&mut self, now: f64) {
        self.dirty = false;
        self.last_update = Some(now);
    }

    pub fn set_pending(&mut self, id: JobId) {
        self.pending_job = Some(id);
    }

    pub fn set_recovery_job(&mut self, id: JobId) {
        self.recovery_job = Some(id);
    }

    /// Whether a finished job's triangles belong to the live surface
    pub fn accepts_result(&self, id: JobId) -> bool {
        self.pending_job == Some(id) || self.recovery_job == Some(id)
    }

    /// Replace the live surface. A result for the recovery job, or a direct
    /// result while frozen, unfreezes the surface. Returns true when it did.
    pub fn apply_result(&mut self, id: Option<JobId>, triangles: Vec<Triangle>) -> bool {
        let recovering = match id {
            Some(id) if self.recovery_job == Some(id) => {
                self.recovery_job = None;
                true
            }
            Some(id) => {
                if self.pending_job == Some(id) {
                    self.pending_job = None;
                }
                false
            }
            None => self.is_frozen(),
        };

        self.surface = triangles;
        self.revision += 1;
        debug!(
            "Surface revision {} with {} triangles",
            self.revision,
            self.surface.len()
        );

        if recovering {
            self.unfreeze();
        }
        recovering
    }

    /// Forget a job that finished without a usable result. Returns true when
    /// the surface was unfrozen because the recovery job was abandoned.
    pub fn abandon(&mut self, id: JobId) -> bool {
        if self.pending_job == Some(id) {
            self.pending_job = None;
            self.dirty = true;
        }
        if self.recovery_job == Some(id) {
            self.recovery_job = None;
            self.unfreeze();
            return true;
        }
        false
    }

    /// Freeze the surface and keep the points seen before the loss
    pub fn on_tracking_lost(&mut self, points: &[Point]) {
        self.state = SurfaceState::Frozen;
        self.snapshot = points.to_vec();
        if self.pending_job.take().is_some() {
            self.dirty = true;
        }
        self.recovery_job = None;
        info!(
            "Surface frozen, {} points snapshotted",
            self.snapshot.len()
        );
    }

    pub fn on_tracking_recovered(&mut self) -> Recovery {
        if !self.is_frozen() {
            return Recovery::NotFrozen;
        }

        if let Some(anchor) = self.anchor {
            self.unfreeze();
            return Recovery::Anchored(anchor);
        }

        if self.snapshot.is_empty() {
            self.unfreeze();
            return Recovery::Unfrozen;
        }

        info!(
            "Regenerating surface from {} snapshotted points",
            self.snapshot.len()
        );
        Recovery::Regenerate(std::mem::take(&mut self.snapshot))
    }

    pub fn unfreeze(&mut self) {
        if self.is_frozen() {
            self.state = SurfaceState::Visible;
            self.snapshot.clear();
            info!("Surface restored");
        }
    }

    /// Throttle or restore the update interval for a new quality class.
    /// Returns the new interval when it changed.
    pub fn on_quality(&mut self, quality: TrackingQuality) -> Option<f64> {
        let target = if quality < self.throttle_below {
            self.base_interval * f64::from(THROTTLED_INTERVAL_FACTOR)
        } else {
            self.base_interval
        };
        if target == self.effective_interval {
            return None;
        }

        self.effective_interval = target;
        info!(
            "Update interval now {:.2}s (tracking quality {:?})",
            target, quality
        );
        Some(target)
    }

    pub fn reset(&mut self) {
        self.state = SurfaceState::Visible;
        self.snapshot.clear();
        self.dirty = false;
        self.last_update = None;
        self.pending_job = None;
        self.recovery_job = None;
        self.effective_interval = self.base_interval;
        self.surface.clear();
        self.revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::color::LinearRgba;
    use bevy::math::{Vec2, Vec3};

    fn triangle() -> Triangle {
        Triangle::flat(
            [Vec3::ZERO, Vec3::X, Vec3::Y],
            Vec3::Z,
            LinearRgba::WHITE,
            [Vec2::ZERO; 3],
        )
    }

    fn points(count: usize) -> Vec<Point> {
        (0..count)
            .map(|i| Point::new(Vec3::splat(i as f32), LinearRgba::WHITE, 0.0))
            .collect()
    }

    #[test]
    fn updates_wait_for_interval_and_changes() {
        let mut driver = SurfaceDriver::new(&StreamConfig::default());
        assert!(!driver.should_update(0.0, TrackingState::Full));

        driver.mark_dirty();
        assert!(driver.should_update(0.0, TrackingState::Full));
        driver.begin_update(0.0);
        driver.mark_dirty();
        assert!(!driver.should_update(0.05, TrackingState::Full));
        assert!(driver.should_update(0.2, TrackingState::Full));
        assert!(!driver.should_update(0.2, TrackingState::Lost));

        driver.set_pending(3);
        assert!(!driver.should_update(1.0, TrackingState::Full));
        assert!(driver.accepts_result(3));
        assert!(!driver.apply_result(Some(3), vec![triangle()]));
        assert_eq!(driver.surface().len(), 1);
        assert_eq!(driver.pending_job(), None);
    }

    #[test]
    fn low_quality_doubles_interval_until_recovered() {
        let mut driver = SurfaceDriver::new(&StreamConfig::default());
        let base = driver.update_interval();

        assert_eq!(driver.on_quality(TrackingQuality::Limited), Some(base * 2.0));
        assert!(driver.is_throttled());
        assert_eq!(driver.on_quality(TrackingQuality::None), None);
        assert_eq!(driver.on_quality(TrackingQuality::Excellent), Some(base));
        assert!(!driver.is_throttled());
    }

    #[test]
    fn loss_freezes_and_anchor_restores() {
        let mut driver = SurfaceDriver::new(&StreamConfig::default());
        driver.apply_result(None, vec![triangle()]);
        driver.set_pending(9);

        driver.on_tracking_lost(&points(4));
        assert!(driver.is_frozen());
        assert_eq!(driver.snapshot().len(), 4);
        assert!(!driver.accepts_result(9));
        assert_eq!(driver.surface().len(), 1);

        let anchor = Transform::from_xyz(1.0, 2.0, 3.0);
        driver.set_anchor(Some(anchor));
        assert_eq!(driver.on_tracking_recovered(), Recovery::Anchored(anchor));
        assert_eq!(driver.state(), SurfaceState::Visible);
        assert_eq!(driver.on_tracking_recovered(), Recovery::NotFrozen);
    }

    #[test]
    fn update_in_flight_at_loss_is_retried_after_recovery() {
        let mut driver = SurfaceDriver::new(&StreamConfig::default());
        driver.mark_dirty();
        driver.begin_update(0.0);
        driver.set_pending(5);

        driver.on_tracking_lost(&points(3));
        driver.set_anchor(Some(Transform::IDENTITY));
        assert_eq!(
            driver.on_tracking_recovered(),
            Recovery::Anchored(Transform::IDENTITY)
        );
        assert!(driver.should_update(1.0, TrackingState::Full));
    }

    #[test]
    fn recovery_without_anchor_regenerates_snapshot() {
        let mut driver = SurfaceDriver::new(&StreamConfig::default());
        driver.on_tracking_lost(&points(5));

        let Recovery::Regenerate(snapshot) = driver.on_tracking_recovered() else {
            panic!("expected regeneration");
        };
        assert_eq!(snapshot.len(), 5);
        assert!(driver.is_frozen());

        driver.set_recovery_job(11);
        assert!(driver.apply_result(Some(11), vec![triangle(), triangle()]));
        assert!(!driver.is_frozen());
        assert_eq!(driver.surface().len(), 2);
    }

    #[test]
    fn abandoned_recovery_still_unfreezes() {
        let mut driver = SurfaceDriver::new(&StreamConfig::default());
        driver.on_tracking_lost(&points(2));
        let _ = driver.on_tracking_recovered();
        driver.set_recovery_job(4);

        assert!(driver.abandon(4));
        assert!(!driver.is_frozen());
    }
}
