/// Error types for the meshing pipeline
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MesherError {
    #[error("failed to read configuration: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("unknown algorithm kind: {0}")]
    UnknownAlgorithm(String),

    #[error("asynchronous generation is disabled")]
    AsyncDisabled,

    #[error("all {0} worker threads are busy and queueing is disabled")]
    WorkerCapReached(usize),

    #[error("job queue full ({0} jobs waiting)")]
    QueueFull(usize),

    #[error("failed to spawn worker thread for job {id}: {source}")]
    ThreadSpawn {
        id: u64,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, MesherError>;
