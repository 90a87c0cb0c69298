//! Transfer job state machine.
//!
//! Each call to [`TransferJob::process`] is one step: it consumes an optional
//! inbound token and returns at most one outbound token. A transmit job sends
//! one chunk, then waits for the matching `SWAK` before sending the next.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use swiftlink_protocol::{TransferToken, decode_chunk, generate_id};
use tracing::{debug, info, trace, warn};

use crate::throughput::ThroughputSampler;
use crate::types::{Direction, JobEvent, JobObserver, JobSnapshot, JobStatus};
use crate::validation::{remote_name, resolve_destination};
use crate::{ACK_TIMEOUT, CHUNK_SIZE, QUEUE_TIMEOUT, TransferError};

type Step = Result<Option<TransferToken>, TransferError>;

/// One file moving in one direction.
pub struct TransferJob {
    id: String,
    direction: Direction,
    status: JobStatus,
    file_path: PathBuf,
    remote_path: String,
    /// Receive only: directory header paths are resolved against when no
    /// fixed destination was given.
    receive_dir: PathBuf,
    expected_length: u64,
    current_length: u64,
    chunk_count: u64,
    ack_required: bool,
    expires_at: Option<Instant>,
    file: Option<File>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    throughput: ThroughputSampler,
    error: Option<String>,
    observer: Option<JobObserver>,
}

impl TransferJob {
    fn new(direction: Direction) -> Self {
        Self {
            id: String::new(),
            direction,
            status: JobStatus::Disabled,
            file_path: PathBuf::new(),
            remote_path: String::new(),
            receive_dir: PathBuf::new(),
            expected_length: 0,
            current_length: 0,
            chunk_count: 0,
            ack_required: false,
            expires_at: None,
            file: None,
            started_at: None,
            ended_at: None,
            throughput: ThroughputSampler::default(),
            error: None,
            observer: None,
        }
    }

    /// Sends `path`, announcing it under its file name.
    pub fn transmit(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let remote = remote_name(&path);
        Self::transmit_as(path, remote)
    }

    /// Sends `path`, announcing it as `remote_path` (relative, `/`-separated).
    pub fn transmit_as(path: impl Into<PathBuf>, remote_path: impl Into<String>) -> Self {
        let mut job = Self::new(Direction::Transmit);
        job.file_path = path.into();
        job.remote_path = remote_path.into();
        job
    }

    /// Waits for a header and stores the file under `receive_dir` at the
    /// path the header announces.
    pub fn receive(receive_dir: impl Into<PathBuf>) -> Self {
        let mut job = Self::new(Direction::Receive);
        job.receive_dir = receive_dir.into();
        job
    }

    /// Waits for a header and stores the file at `destination`, ignoring the
    /// announced path.
    pub fn receive_to(destination: impl Into<PathBuf>) -> Self {
        let mut job = Self::new(Direction::Receive);
        job.file_path = destination.into();
        job
    }

    /// Builds a receive job from an unsolicited header.
    ///
    /// Returns `None` if `token` is not a header. The job is Running, or
    /// Failed if the destination could not be created.
    pub fn from_header(token: &TransferToken, receive_dir: &Path) -> Option<Self> {
        if !matches!(token, TransferToken::Header { .. }) {
            return None;
        }
        let mut job = Self::receive(receive_dir);
        job.process(Some(token));
        Some(job)
    }

    /// Sets the job ID. Only a job that has not started yet can be renamed.
    pub fn assign_id(&mut self, id: impl Into<String>) {
        if self.status == JobStatus::Disabled {
            self.id = id.into();
        }
    }

    pub fn set_observer(&mut self, observer: JobObserver) {
        self.observer = Some(observer);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            direction: self.direction,
            status: self.status,
            file_path: self.file_path.clone(),
            remote_path: self.remote_path.clone(),
            expected_length: self.expected_length,
            current_length: self.current_length,
            chunk_count: self.chunk_count,
            bytes_per_second: self.throughput.bytes_per_second(),
            eta: if self.status == JobStatus::Running {
                self.throughput
                    .eta(self.expected_length.saturating_sub(self.current_length))
            } else {
                None
            },
            started_at: self.started_at,
            ended_at: self.ended_at,
            error: self.error.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Stepping
    // -----------------------------------------------------------------------

    /// Advances the job by one step. `None` is a plain tick.
    pub fn process(&mut self, token: Option<&TransferToken>) -> Option<TransferToken> {
        self.process_at(token, Instant::now())
    }

    /// [`process`](Self::process) with an explicit clock.
    pub fn process_at(&mut self, token: Option<&TransferToken>, now: Instant) -> Option<TransferToken> {
        if self.status.is_terminal() {
            return None;
        }

        let step = if self.status.is_live() && self.expires_at.is_some_and(|at| now >= at) {
            Err(TransferError::Expired)
        } else {
            match self.direction {
                Direction::Transmit => self.step_transmit(token, now),
                Direction::Receive => self.step_receive(token, now),
            }
        };

        match step {
            Ok(out) => {
                if self.status == JobStatus::Running
                    && self.throughput.sample(now, self.current_length).is_some()
                {
                    self.emit(JobEvent::Progress);
                }
                out
            }
            Err(e) => {
                self.fail(e);
                None
            }
        }
    }

    /// Pauses a running job. Returns the `SWQS` token for the peer.
    pub fn request_queue_begin(&mut self) -> Option<TransferToken> {
        if self.status != JobStatus::Running {
            return None;
        }
        self.arm(Instant::now(), QUEUE_TIMEOUT);
        self.set_status(JobStatus::Queued);
        Some(TransferToken::QueueBegin {
            id: self.id.clone(),
        })
    }

    /// Resumes a queued job. Returns the `SWQE` token for the peer.
    pub fn request_queue_end(&mut self) -> Option<TransferToken> {
        if self.status != JobStatus::Queued {
            return None;
        }
        self.arm(Instant::now(), ACK_TIMEOUT);
        self.set_status(JobStatus::Running);
        Some(TransferToken::QueueEnd {
            id: self.id.clone(),
        })
    }

    fn step_transmit(&mut self, token: Option<&TransferToken>, now: Instant) -> Step {
        match self.status {
            JobStatus::Disabled => self.open_source(now),
            JobStatus::Running => match token {
                Some(TransferToken::QueueBegin { id }) if *id == self.id => {
                    self.arm(now, QUEUE_TIMEOUT);
                    self.set_status(JobStatus::Queued);
                    Ok(None)
                }
                Some(TransferToken::Ack { id }) if *id == self.id && self.ack_required => {
                    self.ack_required = false;
                    self.send_chunk(now)
                }
                _ if self.ack_required => Ok(None),
                _ => self.send_chunk(now),
            },
            JobStatus::Queued => {
                match token {
                    Some(TransferToken::QueueEnd { id }) if *id == self.id => {
                        self.arm(now, ACK_TIMEOUT);
                        self.set_status(JobStatus::Running);
                    }
                    Some(TransferToken::Ack { id }) if *id == self.id => {
                        self.ack_required = false;
                    }
                    _ => {}
                }
                Ok(None)
            }
            JobStatus::Success | JobStatus::Failed => Ok(None),
        }
    }

    fn open_source(&mut self, now: Instant) -> Step {
        if self.id.is_empty() {
            self.id = generate_id();
        }
        self.started_at = Some(Utc::now());

        let file = File::open(&self.file_path)?;
        self.expected_length = file.metadata()?.len();
        self.file = Some(file);

        self.arm(now, ACK_TIMEOUT);
        self.throughput.start(now, 0);
        self.set_status(JobStatus::Running);
        info!(
            job = %self.id,
            path = %self.file_path.display(),
            bytes = self.expected_length,
            "transmit started"
        );

        Ok(Some(TransferToken::Header {
            path: self.remote_path.clone(),
            id: self.id.clone(),
            length: self.expected_length,
        }))
    }

    fn send_chunk(&mut self, now: Instant) -> Step {
        let Some(file) = self.file.as_mut() else {
            return Ok(None);
        };

        let mut buf = Vec::with_capacity(CHUNK_SIZE);
        Read::by_ref(file)
            .take(CHUNK_SIZE as u64)
            .read_to_end(&mut buf)?;

        if buf.is_empty() {
            let done = TransferToken::Done {
                id: self.id.clone(),
                chunks: self.chunk_count,
            };
            info!(
                job = %self.id,
                bytes = self.current_length,
                chunks = self.chunk_count,
                "transmit complete"
            );
            self.finish(JobStatus::Success);
            return Ok(Some(done));
        }

        self.chunk_count += 1;
        self.current_length += buf.len() as u64;
        self.ack_required = true;
        self.arm(now, ACK_TIMEOUT);
        trace!(job = %self.id, chunk = self.chunk_count, len = buf.len(), "sending chunk");
        Ok(Some(TransferToken::data(self.id.clone(), &buf)))
    }

    fn step_receive(&mut self, token: Option<&TransferToken>, now: Instant) -> Step {
        let Some(token) = token else {
            return Ok(None);
        };

        match (self.status, token) {
            (JobStatus::Disabled, TransferToken::Header { path, id, length }) if self.id.is_empty() => {
                self.accept_header(path, id, *length, now)
            }
            (JobStatus::Running, TransferToken::QueueBegin { id }) if *id == self.id => {
                self.arm(now, QUEUE_TIMEOUT);
                self.set_status(JobStatus::Queued);
                Ok(None)
            }
            (JobStatus::Running, TransferToken::Data { id, chunk }) if *id == self.id => {
                self.write_chunk(chunk, now)
            }
            (JobStatus::Running, TransferToken::Done { id, chunks }) if *id == self.id => {
                self.complete_receive(*chunks)
            }
            (JobStatus::Queued, TransferToken::QueueEnd { id }) if *id == self.id => {
                self.arm(now, ACK_TIMEOUT);
                self.set_status(JobStatus::Running);
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    fn accept_header(&mut self, path: &str, id: &str, length: u64, now: Instant) -> Step {
        self.id = id.to_string();
        self.remote_path = path.to_string();
        self.expected_length = length;
        self.started_at = Some(Utc::now());

        if self.file_path.as_os_str().is_empty() {
            self.file_path = resolve_destination(&self.receive_dir, path)?;
        }
        self.file = Some(create_destination(&self.file_path)?);

        self.arm(now, ACK_TIMEOUT);
        self.throughput.start(now, 0);
        self.set_status(JobStatus::Running);
        info!(
            job = %self.id,
            path = %self.file_path.display(),
            bytes = length,
            "receive started"
        );
        Ok(None)
    }

    fn write_chunk(&mut self, chunk: &str, now: Instant) -> Step {
        let Some(file) = self.file.as_mut() else {
            return Ok(None);
        };
        let bytes = decode_chunk(chunk).map_err(|e| TransferError::Chunk(e.to_string()))?;
        file.write_all(&bytes)?;

        self.current_length += bytes.len() as u64;
        self.chunk_count += 1;
        self.arm(now, ACK_TIMEOUT);
        trace!(job = %self.id, chunk = self.chunk_count, len = bytes.len(), "received chunk");
        Ok(Some(TransferToken::Ack {
            id: self.id.clone(),
        }))
    }

    fn complete_receive(&mut self, chunks: u64) -> Step {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        if chunks != self.chunk_count {
            return Err(TransferError::ChunkCountMismatch {
                expected: chunks,
                received: self.chunk_count,
            });
        }
        info!(
            job = %self.id,
            bytes = self.current_length,
            chunks,
            "receive complete"
        );
        self.finish(JobStatus::Success);
        Ok(None)
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    fn arm(&mut self, now: Instant, timeout: Duration) {
        self.expires_at = Some(now + timeout);
    }

    fn set_status(&mut self, status: JobStatus) {
        if self.status != status {
            debug!(job = %self.id, from = ?self.status, to = ?status, "job status changed");
            self.status = status;
            self.emit(JobEvent::Updated);
        }
    }

    fn fail(&mut self, error: TransferError) {
        warn!(job = %self.id, direction = ?self.direction, "transfer failed: {error}");
        self.error = Some(error.to_string());
        self.finish(JobStatus::Failed);
    }

    /// Terminal transition: closes the file and notifies completion.
    fn finish(&mut self, status: JobStatus) {
        self.file = None;
        self.ack_required = false;
        self.expires_at = None;
        self.ended_at = Some(Utc::now());
        self.set_status(status);
        self.emit(JobEvent::Completed);
    }

    fn emit(&self, event: fn(JobSnapshot) -> JobEvent) {
        if let Some(observer) = &self.observer {
            observer(&event(self.snapshot()));
        }
    }
}

impl fmt::Debug for TransferJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferJob")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("status", &self.status)
            .field("file_path", &self.file_path)
            .field("current_length", &self.current_length)
            .field("expected_length", &self.expected_length)
            .finish_non_exhaustive()
    }
}

/// Creates a new destination file, refusing to overwrite.
fn create_destination(path: &Path) -> Result<File, TransferError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => {
                TransferError::AlreadyExists(path.display().to_string())
            }
            _ => TransferError::Io(e),
        })
}
