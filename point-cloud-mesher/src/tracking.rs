/// Tracking reliability state machine with quality smoothing and stability analysis
use std::collections::VecDeque;

use bevy::log::{info, warn};
use bevy::prelude::Transform;
use constants::tracking::{HISTORY_CAPACITY, MIN_STABLE_SAMPLES, STABLE_SAMPLE_RATIO};
use serde::{Deserialize, Serialize};

use crate::config::TrackingConfig;

/// Device tracking state. `Lost` marks a session that had tracking and lost it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingState {
    #[default]
    NotTracking,
    Limited,
    Full,
    Lost,
}

impl TrackingState {
    pub fn is_tracking(self) -> bool {
        matches!(self, TrackingState::Limited | TrackingState::Full)
    }
}

/// Confidence class derived from the three descending thresholds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TrackingQuality {
    #[default]
    None,
    Limited,
    Normal,
    Excellent,
}

/// One entry of the history ring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingSample {
    pub state: TrackingState,
    pub confidence: f32,
    pub pose: Transform,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackingEvent {
    StateChanged {
        from: TrackingState,
        to: TrackingState,
    },
    /// Tracking dropped after `tracked_for` seconds since the last recovery.
    Lost {
        reason: Option<String>,
        tracked_for: f64,
    },
    /// Tracking returned after `lost_for` seconds.
    Recovered { lost_for: f64 },
    QualityChanged {
        from: TrackingQuality,
        to: TrackingQuality,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackingStats {
    pub state: TrackingState,
    pub quality: TrackingQuality,
    pub average_confidence: f32,
    pub interruption_count: u32,
    pub uptime_secs: f64,
    pub uptime_percentage: f32,
    pub stable: bool,
    pub last_loss_reason: Option<String>,
}

pub struct TrackingTracker {
    excellent_threshold: f32,
    good_threshold: f32,
    poor_threshold: f32,
    min_stable_time: f64,
    max_loss_time: f64,
    state: TrackingState,
    quality: TrackingQuality,
    pose: Transform,
    history: VecDeque<TrackingSample>,
    interruption_count: u32,
    session_start: Option<f64>,
    last_update: Option<f64>,
    lost_at: Option<f64>,
    recovered_at: Option<f64>,
    tracked_secs: f64,
    confidence_sum: f64,
    sample_count: u64,
    last_loss_reason: Option<String>,
}

impl TrackingTracker {
    pub fn new(config: &TrackingConfig) -> Self {
        let (excellent, good, poor) = config.corrected_thresholds();
        Self {
            excellent_threshold: excellent,
            good_threshold: good,
            poor_threshold: poor,
            min_stable_time: config.min_stable_tracking_time.max(0.0) as f64,
            max_loss_time: config.max_tracking_loss_time.max(0.0) as f64,
            state: TrackingState::NotTracking,
            quality: TrackingQuality::None,
            pose: Transform::IDENTITY,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            interruption_count: 0,
            session_start: None,
            last_update: None,
            lost_at: None,
            recovered_at: None,
            tracked_secs: 0.0,
            confidence_sum: 0.0,
            sample_count: 0,
            last_loss_reason: None,
        }
    }

    /// Record a tracking feed update and return the events it caused
    pub fn update(
        &mut self,
        state: TrackingState,
        confidence: f32,
        pose: Transform,
        now: f64,
        loss_reason: Option<&str>,
    ) -> Vec<TrackingEvent> {
        let confidence = confidence.clamp(0.0, 1.0);
        let session_start = *self.session_start.get_or_insert(now);

        if let Some(last) = self.last_update {
            if self.state.is_tracking() {
                self.tracked_secs += (now - last).max(0.0);
            }
        }
        self.last_update = Some(now);
        self.pose = pose;
        self.confidence_sum += confidence as f64;
        self.sample_count += 1;

        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(TrackingSample {
            state,
            confidence,
            pose,
            timestamp: now,
        });

        let mut events = Vec::new();

        if state != self.state {
            let previous = self.state;
            self.state = state;
            events.push(TrackingEvent::StateChanged {
                from: previous,
                to: state,
            });

            if previous.is_tracking() && !state.is_tracking() {
                self.interruption_count += 1;
                self.lost_at = Some(now);
                self.last_loss_reason = loss_reason.map(str::to_string);
                let tracked_for = now - self.recovered_at.unwrap_or(session_start);
                warn!(
                    "Tracking lost after {:.2}s ({})",
                    tracked_for,
                    loss_reason.unwrap_or("no reason given")
                );
                events.push(TrackingEvent::Lost {
                    reason: self.last_loss_reason.clone(),
                    tracked_for,
                });
            } else if !previous.is_tracking() && state.is_tracking() {
                if let Some(lost_at) = self.lost_at.take() {
                    let lost_for = now - lost_at;
                    self.recovered_at = Some(now);
                    info!("Tracking recovered after {:.2}s", lost_for);
                    events.push(TrackingEvent::Recovered { lost_for });
                }
            }
        }

        let quality = self.quality_for(confidence);
        if quality != self.quality {
            events.push(TrackingEvent::QualityChanged {
                from: self.quality,
                to: quality,
            });
            self.quality = quality;
        }

        events
    }

    /// Quality class for a raw confidence value
    pub fn quality_for(&self, confidence: f32) -> TrackingQuality {
        if confidence >= self.excellent_threshold {
            TrackingQuality::Excellent
        } else if confidence >= self.good_threshold {
            TrackingQuality::Normal
        } else if confidence >= self.poor_threshold {
            TrackingQuality::Limited
        } else {
            TrackingQuality::None
        }
    }

    pub fn set_thresholds(&mut self, excellent: f32, good: f32, poor: f32) {
        let config = TrackingConfig {
            excellent_threshold: excellent,
            good_threshold: good,
            poor_threshold: poor,
            ..Default::default()
        };
        let (excellent, good, poor) = config.corrected_thresholds();
        self.excellent_threshold = excellent;
        self.good_threshold = good;
        self.poor_threshold = poor;
    }

    pub fn thresholds(&self) -> (f32, f32, f32) {
        (
            self.excellent_threshold,
            self.good_threshold,
            self.poor_threshold,
        )
    }

    /// Currently tracking, at least 10 samples, and 80% of those inside the
    /// stability window tracking with at least Normal confidence
    pub fn is_stable(&self) -> bool {
        if !self.state.is_tracking() || self.history.len() < MIN_STABLE_SAMPLES {
            return false;
        }
        let Some(now) = self.last_update else {
            return false;
        };

        let window_start = now - self.min_stable_time;
        let (good, total) = self
            .history
            .iter()
            .filter(|sample| sample.timestamp >= window_start)
            .fold((0usize, 0usize), |(good, total), sample| {
                let is_good =
                    sample.state.is_tracking() && sample.confidence >= self.good_threshold;
                (good + is_good as usize, total + 1)
            });

        total > 0 && good as f32 / total as f32 >= STABLE_SAMPLE_RATIO
    }

    /// True while a loss is recent enough to try restoring the session
    pub fn should_attempt_recovery(&self, now: f64) -> bool {
        !self.state.is_tracking()
            && self
                .lost_at
                .is_some_and(|lost_at| now - lost_at < self.max_loss_time)
    }

    pub fn time_since_loss(&self, now: f64) -> Option<f64> {
        self.lost_at.map(|lost_at| now - lost_at)
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn quality(&self) -> TrackingQuality {
        self.quality
    }

    pub fn pose(&self) -> Transform {
        self.pose
    }

    pub fn history(&self) -> &VecDeque<TrackingSample> {
        &self.history
    }

    pub fn interruption_count(&self) -> u32 {
        self.interruption_count
    }

    pub fn stats(&self) -> TrackingStats {
        let average_confidence = if self.sample_count == 0 {
            0.0
        } else {
            (self.confidence_sum / self.sample_count as f64) as f32
        };
        let elapsed = match (self.session_start, self.last_update) {
            (Some(start), Some(last)) => last - start,
            _ => 0.0,
        };
        let uptime_percentage = if elapsed > 0.0 {
            (self.tracked_secs / elapsed * 100.0) as f32
        } else {
            0.0
        };

        TrackingStats {
            state: self.state,
            quality: self.quality,
            average_confidence,
            interruption_count: self.interruption_count,
            uptime_secs: self.tracked_secs,
            uptime_percentage,
            stable: self.is_stable(),
            last_loss_reason: self.last_loss_reason.clone(),
        }
    }

    /// Forget history and counters, keeping thresholds
    pub fn reset_session(&mut self) {
        self.state = TrackingState::NotTracking;
        self.quality = TrackingQuality::None;
        self.pose = Transform::IDENTITY;
        self.history.clear();
        self.interruption_count = 0;
        self.session_start = None;
        self.last_update = None;
        self.lost_at = None;
        self.recovered_at = None;
        self.tracked_secs = 0.0;
        self.confidence_sum = 0.0;
        self.sample_count = 0;
        self.last_loss_reason = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tracker() -> TrackingTracker {
        TrackingTracker::new(&TrackingConfig::default())
    }

    fn feed(tracker: &mut TrackingTracker, state: TrackingState, confidence: f32, now: f64) -> Vec<TrackingEvent> {
        tracker.update(state, confidence, Transform::IDENTITY, now, None)
    }

    fn count_lost(events: &[TrackingEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, TrackingEvent::Lost { .. }))
            .count()
    }

    fn count_recovered(events: &[TrackingEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, TrackingEvent::Recovered { .. }))
            .count()
    }

    #[test]
    fn quick_loss_and_recovery_fire_one_event_each() {
        let mut tracker = tracker();
        let mut events = feed(&mut tracker, TrackingState::Full, 0.95, 0.0);
        events.extend(feed(&mut tracker, TrackingState::Lost, 0.1, 0.5));
        events.extend(feed(&mut tracker, TrackingState::Lost, 0.1, 1.0));
        events.extend(feed(&mut tracker, TrackingState::Full, 0.95, 1.8));

        assert_eq!(count_lost(&events), 1);
        assert_eq!(count_recovered(&events), 1);
        assert_eq!(tracker.interruption_count(), 1);

        let lost_for = events.iter().find_map(|e| match e {
            TrackingEvent::Recovered { lost_for } => Some(*lost_for),
            _ => None,
        });
        assert_relative_eq!(lost_for.unwrap(), 1.3);
    }

    #[test]
    fn first_acquisition_is_not_a_recovery() {
        let mut tracker = tracker();
        let events = feed(&mut tracker, TrackingState::Limited, 0.5, 0.0);

        assert_eq!(count_recovered(&events), 0);
        assert!(events.contains(&TrackingEvent::StateChanged {
            from: TrackingState::NotTracking,
            to: TrackingState::Limited,
        }));
    }

    #[test]
    fn lost_to_not_tracking_is_not_another_interruption() {
        let mut tracker = tracker();
        feed(&mut tracker, TrackingState::Full, 0.9, 0.0);
        feed(&mut tracker, TrackingState::NotTracking, 0.0, 1.0);
        feed(&mut tracker, TrackingState::Lost, 0.0, 2.0);

        assert_eq!(tracker.interruption_count(), 1);
    }

    #[test]
    fn confidence_maps_to_quality_classes() {
        let tracker = tracker();
        assert_eq!(tracker.quality_for(0.95), TrackingQuality::Excellent);
        assert_eq!(tracker.quality_for(0.7), TrackingQuality::Normal);
        assert_eq!(tracker.quality_for(0.5), TrackingQuality::Limited);
        assert_eq!(tracker.quality_for(0.1), TrackingQuality::None);
    }

    #[test]
    fn quality_change_is_reported() {
        let mut tracker = tracker();
        feed(&mut tracker, TrackingState::Full, 0.95, 0.0);
        let events = feed(&mut tracker, TrackingState::Full, 0.5, 0.1);

        assert_eq!(
            events,
            vec![TrackingEvent::QualityChanged {
                from: TrackingQuality::Excellent,
                to: TrackingQuality::Limited,
            }]
        );
    }

    #[test]
    fn stability_needs_enough_good_samples() {
        let mut tracker = tracker();
        for i in 0..9 {
            feed(&mut tracker, TrackingState::Full, 0.9, i as f64 * 0.1);
        }
        assert!(!tracker.is_stable());

        feed(&mut tracker, TrackingState::Full, 0.9, 0.9);
        assert!(tracker.is_stable());

        for i in 10..14 {
            feed(&mut tracker, TrackingState::Limited, 0.2, i as f64 * 0.1);
        }
        // 10 good out of 14 in the window.
        assert!(!tracker.is_stable());
    }

    #[test]
    fn lost_tracking_is_never_stable() {
        let mut tracker = tracker();
        for i in 0..20 {
            feed(&mut tracker, TrackingState::Full, 0.95, i as f64 * 0.1);
        }
        assert!(tracker.is_stable());

        feed(&mut tracker, TrackingState::Lost, 0.0, 2.0);
        assert_eq!(tracker.state(), TrackingState::Lost);
        assert!(!tracker.is_stable());
    }

    #[test]
    fn old_samples_fall_out_of_stability_window() {
        let mut tracker = tracker();
        for i in 0..10 {
            feed(&mut tracker, TrackingState::Limited, 0.1, i as f64 * 0.1);
        }
        for i in 0..10 {
            feed(&mut tracker, TrackingState::Full, 0.95, 10.0 + i as f64 * 0.1);
        }
        assert!(tracker.is_stable());
    }

    #[test]
    fn history_ring_is_bounded() {
        let mut tracker = tracker();
        for i in 0..250 {
            feed(&mut tracker, TrackingState::Full, 0.9, i as f64);
        }
        assert_eq!(tracker.history().len(), HISTORY_CAPACITY);
        assert_eq!(tracker.history().front().map(|s| s.timestamp), Some(150.0));
    }

    #[test]
    fn recovery_window_expires() {
        let mut tracker = tracker();
        feed(&mut tracker, TrackingState::Full, 0.9, 0.0);
        tracker.update(TrackingState::Lost, 0.0, Transform::IDENTITY, 1.0, Some("excessive motion"));

        assert!(tracker.should_attempt_recovery(10.0));
        assert!(!tracker.should_attempt_recovery(40.0));
        assert_eq!(tracker.stats().last_loss_reason.as_deref(), Some("excessive motion"));
    }

    #[test]
    fn stats_track_uptime_and_confidence() {
        let mut tracker = tracker();
        feed(&mut tracker, TrackingState::Full, 1.0, 0.0);
        feed(&mut tracker, TrackingState::Lost, 0.0, 3.0);
        feed(&mut tracker, TrackingState::Full, 0.5, 4.0);

        let stats = tracker.stats();
        assert_relative_eq!(stats.uptime_secs, 3.0);
        assert_relative_eq!(stats.uptime_percentage, 75.0);
        assert_relative_eq!(stats.average_confidence, 0.5);

        tracker.reset_session();
        assert_eq!(tracker.interruption_count(), 0);
        assert!(tracker.history().is_empty());
    }
}
