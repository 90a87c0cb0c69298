use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Which side of a transfer a job is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Transmit,
    Receive,
}

/// Lifecycle state of a transfer job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    /// Created but not started (transmit not yet ticked, receive waiting
    /// for a header).
    Disabled,
    /// Paused by either peer.
    Queued,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Running or queued; these are the states subject to expiry.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Running | Self::Queued)
    }
}

/// Point-in-time view of a job.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub id: String,
    pub direction: Direction,
    pub status: JobStatus,
    /// Local file: the source when transmitting, the destination when
    /// receiving. Empty until a receive job has seen its header.
    pub file_path: PathBuf,
    /// Relative path announced in the header.
    pub remote_path: String,
    pub expected_length: u64,
    pub current_length: u64,
    pub chunk_count: u64,
    pub bytes_per_second: f64,
    /// Remaining time at the last sampled rate, while running.
    pub eta: Option<Duration>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl JobSnapshot {
    /// Progress in percent, 0 to 100.
    pub fn percentage(&self) -> f64 {
        if self.expected_length == 0 {
            return if self.status == JobStatus::Success {
                100.0
            } else {
                0.0
            };
        }
        (self.current_length as f64 * 100.0 / self.expected_length as f64).min(100.0)
    }

    /// Time since the job started, frozen once it ends.
    pub fn elapsed(&self) -> Duration {
        let Some(started) = self.started_at else {
            return Duration::ZERO;
        };
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - started).to_std().unwrap_or_default()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Notification emitted by a job.
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// The status changed.
    Updated(JobSnapshot),
    /// Periodic throughput sample while running.
    Progress(JobSnapshot),
    /// The job reached Success or Failed. Emitted once.
    Completed(JobSnapshot),
}

impl JobEvent {
    pub fn snapshot(&self) -> &JobSnapshot {
        match self {
            Self::Updated(s) | Self::Progress(s) | Self::Completed(s) => s,
        }
    }
}

/// Callback invoked with job events.
pub type JobObserver = Arc<dyn Fn(&JobEvent) + Send + Sync>;
