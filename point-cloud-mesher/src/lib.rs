//! Streaming point cloud to mesh pipeline.
//!
//! Points arrive in timestamped batches, live in a bounded [`storage::PointStore`]
//! mirrored by a uniform grid [`spatial::SpatialIndex`], and are turned into
//! triangles by one of the [`reconstruction`] algorithms. Large requests run on
//! worker threads owned by the [`scheduler::Scheduler`]; tracking quality from
//! the sensing device throttles, freezes and restores the live surface.
//!
//! ## Data Flow
//!
//! ```text
//! sensor batch
//!   └─> MeshingSession::add_points()
//!       ├─> PointStore::add_batch()      (one change notification)
//!       └─> SpatialIndex::add_points()
//! MeshingSession::tick()
//!   ├─> MemoryPolicy::tick()            (age + capacity eviction, index sync)
//!   ├─> Scheduler::poll()               (finished jobs in completion order)
//!   └─> SurfaceDriver auto-update       (sync mesh or async job)
//! MeshingSession::update_tracking()
//!   └─> TrackingTracker::update()       (lost/recovered/quality events)
//!       └─> SurfaceDriver               (freeze, snapshot, cancel, restore)
//! ```
//!
//! [`plugin::SurfaceReconstructionPlugin`] wires a session into a Bevy app.

pub mod bounds;
pub mod config;
pub mod driver;
pub mod error;
pub mod memory;
pub mod planes;
pub mod plugin;
pub mod point;
pub mod reconstruction;
pub mod scheduler;
pub mod session;
pub mod simulation;
pub mod spatial;
pub mod storage;
pub mod tracking;

pub use config::PipelineConfig;
pub use error::MesherError;
pub use point::Point;
pub use reconstruction::{AlgorithmKind, Triangle};
pub use session::{Generated, MeshingSession, SessionEvent};
