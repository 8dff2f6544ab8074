/// Shared defaults for the streaming point cloud meshing pipeline
pub mod coordinate_system;
pub mod memory;
pub mod planes;
pub mod reconstruction;
pub mod scheduler;
pub mod spatial;
pub mod streaming;
pub mod tracking;
