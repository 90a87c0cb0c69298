//! Chunked, acknowledged file transfer jobs.
//!
//! A [`TransferJob`] is a state machine driven by [`TransferToken`]s: it
//! consumes at most one token per step and produces at most one in return.
//! A [`JobPool`] owns the jobs of one connection and routes tokens to them.
//!
//! [`TransferToken`]: swiftlink_protocol::TransferToken

use std::time::Duration;

mod job;
mod pool;
mod throughput;
mod types;
mod validation;

pub use job::TransferJob;
pub use pool::{JobPool, PoolConfig};
pub use throughput::ThroughputSampler;
pub use types::{Direction, JobEvent, JobObserver, JobSnapshot, JobStatus};
pub use validation::{remote_name, resolve_destination};

/// Maximum bytes carried by one data token.
pub const CHUNK_SIZE: usize = 65535;

/// Time a running job waits for the peer before failing.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Time a queued job may stay paused before failing.
pub const QUEUE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Interval between throughput samples.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of concurrently running jobs per pool.
pub const DEFAULT_MAX_JOBS: usize = 16;

/// Default directory for automatically received files.
pub const DEFAULT_RECEIVE_DIR: &str = "Received";

/// Finished jobs a pool keeps for reporting.
pub const DEFAULT_FINISHED_HISTORY: usize = 32;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("file already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid chunk encoding: {0}")]
    Chunk(String),

    #[error("chunk count mismatch: peer sent {expected}, received {received}")]
    ChunkCountMismatch { expected: u64, received: u64 },

    #[error("timed out waiting for peer")]
    Expired,

    #[error(transparent)]
    Id(#[from] swiftlink_protocol::IdError),
}
