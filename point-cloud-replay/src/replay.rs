/// Timed replay of a point feed through a meshing session
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use bevy::math::Vec3;
use bevy::prelude::Transform;
use point_cloud_mesher::simulation::simulate_sensor_batch;
use point_cloud_mesher::tracking::{TrackingEvent, TrackingState};
use point_cloud_mesher::{AlgorithmKind, Generated, MeshingSession, PipelineConfig, Point, SessionEvent};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::laz;

const SIMULATION_SEED: u64 = 42;
const SIMULATED_RADIUS: f32 = 300.0;
/// Simulated seconds per tick while waiting on worker threads.
const SETTLE_TICK_SECS: f64 = 0.05;

pub enum Source {
    File(PathBuf),
    Simulate(usize),
}

pub struct ReplayOptions {
    pub source: Source,
    pub config: PipelineConfig,
    pub algorithm: AlgorithmKind,
    pub batch_size: usize,
    pub batch_interval: f64,
    /// Start and duration of an injected tracking loss.
    pub outage: Option<(f64, f64)>,
    pub detect_planes: bool,
    pub limit: Option<usize>,
}

#[derive(Default)]
struct EventCounts {
    batches: usize,
    cleanups: usize,
    points_evicted: usize,
    tracking_lost: usize,
    tracking_recovered: usize,
    jobs_finished: usize,
    surface_updates: usize,
    interval_changes: usize,
}

impl EventCounts {
    fn record(&mut self, events: &[SessionEvent]) {
        for event in events {
            match event {
                SessionEvent::Cleanup(report) => {
                    self.cleanups += 1;
                    self.points_evicted += report.removed;
                }
                SessionEvent::Tracking(TrackingEvent::Lost { .. }) => self.tracking_lost += 1,
                SessionEvent::Tracking(TrackingEvent::Recovered { .. }) => {
                    self.tracking_recovered += 1
                }
                SessionEvent::JobFinished { .. } => self.jobs_finished += 1,
                SessionEvent::SurfaceUpdated { .. } => self.surface_updates += 1,
                SessionEvent::UpdateIntervalChanged(_) => self.interval_changes += 1,
                _ => {}
            }
        }
    }
}

pub struct Replay {
    options: ReplayOptions,
    session: MeshingSession,
    now: f64,
    counts: EventCounts,
}

impl Replay {
    pub fn new(options: ReplayOptions) -> Self {
        let session = MeshingSession::new(options.config.clone());
        Self {
            options,
            session,
            now: 0.0,
            counts: EventCounts::default(),
        }
    }

    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let points = self.load_feed()?;
        self.stream(&points)?;
        self.settle();
        self.generate_final()?;

        if self.options.detect_planes {
            self.detect_planes();
        }
        self.print_summary()
    }

    fn load_feed(&self) -> Result<Vec<Point>, Box<dyn std::error::Error>> {
        match &self.options.source {
            Source::File(path) => {
                laz::log_file_info(path)?;
                laz::load_points(path, self.options.limit)
            }
            Source::Simulate(count) => {
                println!("Simulating {} sensor points", count);
                let mut rng = ChaCha8Rng::seed_from_u64(SIMULATION_SEED);
                let batch_size = self.options.batch_size.max(1);
                let mut points = Vec::with_capacity(*count);
                while points.len() < *count {
                    // Sensor sweeps drift along X between batches.
                    let center = Vec3::new(points.len() as f32 * 0.01, 0.0, SIMULATED_RADIUS);
                    let size = batch_size.min(count - points.len());
                    points.extend(simulate_sensor_batch(
                        &mut rng,
                        center,
                        SIMULATED_RADIUS,
                        size,
                        0.0,
                    ));
                }
                Ok(points)
            }
        }
    }

    /// Feed batches on the simulated clock, one tick per batch
    fn stream(&mut self, points: &[Point]) -> Result<(), Box<dyn std::error::Error>> {
        let batch_size = self.options.batch_size.max(1);
        let batch_count = points.len().div_ceil(batch_size);
        let pb = laz::progress_bar(
            batch_count as u64,
            "[{bar:40.green/blue}] {pos}/{len} batches ({percent}%) {msg}",
        )?;
        pb.set_message("Streaming");

        for batch in points.chunks(batch_size) {
            let now = self.now;
            let stamped: Vec<Point> = batch
                .iter()
                .map(|point| Point {
                    timestamp: now,
                    ..*point
                })
                .collect();
            self.session.add_batch(stamped);
            self.feed_tracking();
            self.session.tick(now);
            let events = self.session.drain_events();
            self.counts.record(&events);
            self.counts.batches += 1;

            pb.inc(1);
            pb.set_message(format!(
                "{} points, surface rev {}",
                self.session.point_count(),
                self.session.driver().revision()
            ));
            self.now += self.options.batch_interval;
        }

        pb.finish_with_message("Feed replayed");
        Ok(())
    }

    fn feed_tracking(&mut self) {
        let in_outage = self
            .options
            .outage
            .is_some_and(|(start, duration)| self.now >= start && self.now < start + duration);
        let (state, confidence, reason) = if in_outage {
            (TrackingState::Lost, 0.1, Some("simulated outage"))
        } else {
            (TrackingState::Full, 0.95, None)
        };
        self.session
            .update_tracking(state, confidence, Transform::IDENTITY, self.now, reason);
    }

    /// Tick until the live surface has no job in flight
    fn settle(&mut self) {
        while self.session.driver().pending_job().is_some() {
            self.advance();
        }
    }

    /// One settle tick. Every drained event is counted before it is returned.
    fn advance(&mut self) -> Vec<SessionEvent> {
        thread::sleep(Duration::from_millis(10));
        self.now += SETTLE_TICK_SECS;
        self.session.tick(self.now);
        let events = self.session.drain_events();
        self.counts.record(&events);
        events
    }

    fn generate_final(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let algorithm = self.options.algorithm;
        println!(
            "Generating {} surface from {} points...",
            algorithm,
            self.session.point_count()
        );

        match self.session.generate(algorithm) {
            Generated::Mesh(triangles) => {
                println!("Generated {} triangles inline", triangles.len());
            }
            Generated::Rejected => println!("Generation request rejected by the scheduler"),
            Generated::Job(id) => {
                let pb = laz::progress_bar(
                    100,
                    "[{bar:40.cyan/blue}] {pos}/{len} percent ({percent}%) {msg}",
                )?;
                pb.set_message(format!("Job {}", id));

                let mut finished = None;
                while finished.is_none() {
                    for event in self.advance() {
                        match &event {
                            SessionEvent::JobProgress { id: job, progress } if *job == id => {
                                pb.set_position((progress * 100.0) as u64);
                            }
                            SessionEvent::JobFinished {
                                id: job,
                                status,
                                triangle_count,
                                ..
                            } if *job == id => finished = Some((*status, *triangle_count)),
                            _ => {}
                        }
                    }
                    if finished.is_none() && self.session.progress(id).is_none() {
                        break;
                    }
                }

                match finished {
                    Some((status, triangles)) => {
                        pb.finish_with_message(format!("Job {} {:?}: {} triangles", id, status, triangles))
                    }
                    None => pb.finish_with_message(format!("Job {} was purged", id)),
                }
            }
        }
        Ok(())
    }

    fn detect_planes(&mut self) {
        let updates = self.session.detect_planes(self.now);
        println!("Plane detection: {} planes registered", updates.len());
        for plane in self.session.planes().planes() {
            println!(
                "  #{} {:?} ({:?}) centre ({:.1}, {:.1}, {:.1}), area {:.1}, {} inliers",
                plane.id,
                plane.classification,
                plane.confidence,
                plane.center.x,
                plane.center.y,
                plane.center.z,
                plane.area(),
                plane.inlier_count
            );
        }
    }

    fn print_summary(&self) -> Result<(), Box<dyn std::error::Error>> {
        let stats = self.session.stats();
        let summary = serde_json::json!({
            "points": stats.point_count,
            "memory_usage_kb": stats.memory_usage_bytes as f64 / 1024.0,
            "batches": self.counts.batches,
            "cleanup": {
                "passes": self.counts.cleanups,
                "evicted": self.counts.points_evicted,
                "total_freed_kb": stats.memory.total_freed_kb,
            },
            "spatial_index": {
                "active_cells": stats.spatial.active_cells,
                "max_points_per_cell": stats.spatial.max_points_per_cell,
                "average_points_per_cell": stats.spatial.average_points_per_cell,
            },
            "scheduler": stats.scheduler,
            "tracking": {
                "state": stats.tracking.state,
                "quality": stats.tracking.quality,
                "interruptions": stats.tracking.interruption_count,
                "lost_events": self.counts.tracking_lost,
                "recovered_events": self.counts.tracking_recovered,
                "uptime_percentage": stats.tracking.uptime_percentage,
                "last_loss_reason": stats.tracking.last_loss_reason,
            },
            "surface": {
                "triangles": stats.surface_triangles,
                "revision": stats.surface_revision,
                "updates": self.counts.surface_updates,
                "interval_changes": self.counts.interval_changes,
                "jobs_finished": self.counts.jobs_finished,
            },
            "planes": stats.plane_count,
        });

        println!("{}", serde_json::to_string_pretty(&summary)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use point_cloud_mesher::config::SchedulerConfig;

    fn simulated_replay(count: usize) -> Replay {
        let mut config = PipelineConfig::default();
        config.reconstruction.algorithm = AlgorithmKind::Voxel;
        config.scheduler = SchedulerConfig {
            async_threshold: 3,
            ..Default::default()
        };
        Replay::new(ReplayOptions {
            source: Source::Simulate(count),
            config,
            algorithm: AlgorithmKind::Voxel,
            batch_size: count,
            batch_interval: 0.5,
            outage: None,
            detect_planes: false,
            limit: None,
        })
    }

    #[test]
    fn settling_counts_delivered_jobs() {
        let mut replay = simulated_replay(50);
        let points = replay.load_feed().expect("simulated feed");
        replay.stream(&points).expect("streamed");
        assert!(replay.session.driver().pending_job().is_some());
        assert_eq!(replay.counts.jobs_finished, 0);

        replay.settle();
        assert!(replay.counts.jobs_finished >= 1);
        assert!(replay.counts.surface_updates >= 1);
        assert!(replay.session.drain_events().is_empty());
    }
}
