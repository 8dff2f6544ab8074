/// Cooperative cancellation and progress milestones for reconstruction loops
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use constants::reconstruction::CHECKPOINT_INTERVAL;

/// Progress is stored as an integer percentage in 10% milestones.
pub struct Checkpoint<'a> {
    cancel: Option<&'a AtomicBool>,
    progress: Option<&'a AtomicU32>,
    last_percent: u32,
}

impl<'a> Checkpoint<'a> {
    /// Checkpoint for inline execution, never cancelled
    pub fn inline() -> Self {
        Self {
            cancel: None,
            progress: None,
            last_percent: 0,
        }
    }

    /// Checkpoint bound to a job's cancellation flag and progress counter
    pub fn new(cancel: &'a AtomicBool, progress: &'a AtomicU32) -> Self {
        Self {
            cancel: Some(cancel),
            progress: Some(progress),
            last_percent: 0,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Flag shared with parallel loops that cannot hold the checkpoint itself
    pub fn cancel_flag(&self) -> Option<&'a AtomicBool> {
        self.cancel
    }

    /// Called once per processed element. Every `CHECKPOINT_INTERVAL` elements
    /// progress within `phase` is reported and cancellation is checked.
    /// Returns false when the loop should stop.
    pub fn step(&mut self, index: usize, total: usize, phase: (f32, f32)) -> bool {
        if index % CHECKPOINT_INTERVAL != 0 {
            return true;
        }
        let fraction = if total == 0 {
            1.0
        } else {
            index as f32 / total as f32
        };
        self.report(phase.0 + (phase.1 - phase.0) * fraction);
        !self.is_cancelled()
    }

    /// Report overall progress, rounded down to the last 10% milestone
    pub fn report(&mut self, fraction: f32) {
        let percent = ((fraction.clamp(0.0, 1.0) * 10.0).floor() as u32) * 10;
        if percent <= self.last_percent {
            return;
        }
        self.last_percent = percent;
        if let Some(progress) = self.progress {
            progress.fetch_max(percent, Ordering::Relaxed);
        }
    }

    pub fn complete(&mut self) {
        self.report(1.0);
    }

    pub fn percent(&self) -> u32 {
        self.last_percent
    }
}
