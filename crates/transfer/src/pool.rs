//! The set of transfer jobs belonging to one connection.

use std::collections::VecDeque;
use std::path::PathBuf;

use swiftlink_protocol::{TransferToken, generate_unique_id};
use tracing::{debug, info};

use crate::job::TransferJob;
use crate::types::{Direction, JobObserver, JobSnapshot, JobStatus};
use crate::{DEFAULT_FINISHED_HISTORY, DEFAULT_MAX_JOBS, DEFAULT_RECEIVE_DIR, TransferError};

/// Job pool options.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Directory unsolicited files are written to.
    pub receive_dir: PathBuf,
    /// Create a receive job for every header no job claims.
    pub auto_receive: bool,
    /// Running jobs allowed before new submissions are queued.
    pub max_jobs: usize,
    /// Queue submissions beyond `max_jobs`.
    pub enforce_capacity: bool,
    /// Finished jobs kept after each poll; older ones are dropped.
    pub finished_history: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            receive_dir: PathBuf::from(DEFAULT_RECEIVE_DIR),
            auto_receive: true,
            max_jobs: DEFAULT_MAX_JOBS,
            enforce_capacity: false,
            finished_history: DEFAULT_FINISHED_HISTORY,
        }
    }
}

/// Ordered jobs plus a FIFO of jobs waiting for capacity.
#[derive(Debug, Default)]
pub struct JobPool {
    config: PoolConfig,
    jobs: Vec<TransferJob>,
    pending: VecDeque<String>,
    observer: Option<ObserverSlot>,
}

struct ObserverSlot(JobObserver);

impl std::fmt::Debug for ObserverSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JobObserver")
    }
}

impl JobPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Attaches `observer` to every current and future job.
    pub fn set_observer(&mut self, observer: JobObserver) {
        for job in &mut self.jobs {
            job.set_observer(observer.clone());
        }
        self.observer = Some(ObserverSlot(observer));
    }

    /// Adds a job and ticks it once.
    ///
    /// Returns the job ID and the tokens to send (a transmit job's header,
    /// followed by `SWQS` if the pool is over capacity).
    pub fn submit(&mut self, mut job: TransferJob) -> Result<(String, Vec<TransferToken>), TransferError> {
        if job.id().is_empty() {
            let id = generate_unique_id(|id| self.is_active_id(id))?;
            job.assign_id(id);
        }
        self.attach(&mut job);

        let mut out = Vec::new();
        out.extend(job.process(None));
        let id = job.id().to_string();
        self.jobs.push(job);

        if self.config.enforce_capacity && self.active_count() > self.config.max_jobs {
            if let Some(queued) = self.find_mut(&id).and_then(TransferJob::request_queue_begin) {
                debug!(job = %id, max = self.config.max_jobs, "pool full, job queued");
                out.push(queued);
                self.pending.push_back(id.clone());
            }
        }
        Ok((id, out))
    }

    /// Registers a receive job that claims the next unmatched header.
    ///
    /// With `destination` the file is written there; otherwise under the
    /// pool's receive directory at the announced path.
    pub fn register_receive(&mut self, destination: Option<PathBuf>) {
        let mut job = match destination {
            Some(path) => TransferJob::receive_to(path),
            None => TransferJob::receive(self.config.receive_dir.clone()),
        };
        self.attach(&mut job);
        self.jobs.push(job);
    }

    /// Routes inbound tokens to the jobs and collects their replies.
    pub fn dispatch(&mut self, tokens: &[TransferToken]) -> Vec<TransferToken> {
        let mut out = Vec::new();
        for token in tokens {
            if matches!(token, TransferToken::Header { .. }) {
                if self.is_active_id(token.id()) {
                    debug!(job = %token.id(), "duplicate header ignored");
                } else {
                    self.accept_header(token);
                }
                continue;
            }
            self.step_all(Some(token), &mut out);
        }
        out
    }

    /// Ticks every job without input: starts headers' first chunk, expires
    /// stalled jobs and samples throughput. Finished jobs beyond
    /// `finished_history` are dropped afterwards.
    pub fn poll(&mut self) -> Vec<TransferToken> {
        let mut out = Vec::new();
        self.step_all(None, &mut out);
        let pruned = self.prune_finished(self.config.finished_history);
        if pruned > 0 {
            debug!(pruned, remaining = self.jobs.len(), "finished jobs pruned");
        }
        out
    }

    pub fn jobs(&self) -> Vec<JobSnapshot> {
        self.jobs.iter().map(TransferJob::snapshot).collect()
    }

    /// Looks up a job by ID, preferring one that is still in progress.
    pub fn find(&self, id: &str) -> Option<JobSnapshot> {
        self.jobs
            .iter()
            .filter(|job| job.id() == id)
            .max_by_key(|job| !job.is_terminal())
            .map(TransferJob::snapshot)
    }

    /// Number of running jobs.
    pub fn active_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|job| job.status() == JobStatus::Running)
            .count()
    }

    /// Number of pending (queued for capacity) jobs.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drops the oldest finished jobs until at most `keep` remain.
    /// Returns how many were removed.
    pub fn prune_finished(&mut self, keep: usize) -> usize {
        let finished = self.jobs.iter().filter(|job| job.is_terminal()).count();
        let mut excess = finished.saturating_sub(keep);
        let before = self.jobs.len();
        self.jobs.retain(|job| {
            if excess > 0 && job.is_terminal() {
                excess -= 1;
                return false;
            }
            true
        });
        before - self.jobs.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn attach(&self, job: &mut TransferJob) {
        if let Some(ObserverSlot(observer)) = &self.observer {
            job.set_observer(observer.clone());
        }
    }

    fn is_active_id(&self, id: &str) -> bool {
        self.jobs.iter().any(|job| !job.is_terminal() && job.id() == id)
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut TransferJob> {
        self.jobs
            .iter_mut()
            .find(|job| !job.is_terminal() && job.id() == id)
    }

    fn accept_header(&mut self, header: &TransferToken) {
        let registered = self.jobs.iter_mut().find(|job| {
            job.direction() == Direction::Receive
                && job.status() == JobStatus::Disabled
                && job.id().is_empty()
        });
        if let Some(job) = registered {
            job.process(Some(header));
            return;
        }

        if !self.config.auto_receive {
            debug!(job = %header.id(), "auto-receive disabled, header ignored");
            return;
        }
        let mut job = TransferJob::receive(self.config.receive_dir.clone());
        self.attach(&mut job);
        job.process(Some(header));
        info!(job = %job.id(), status = ?job.status(), "incoming transfer");
        self.jobs.push(job);
    }

    /// Feeds `token` to every unfinished job, then promotes one pending job
    /// per job that finished during this step.
    fn step_all(&mut self, token: Option<&TransferToken>, out: &mut Vec<TransferToken>) {
        let mut finished = 0;
        for job in self.jobs.iter_mut().filter(|job| !job.is_terminal()) {
            out.extend(job.process(token));
            if job.is_terminal() {
                finished += 1;
            }
        }

        for _ in 0..finished {
            let Some(next) = self.pending.pop_front() else {
                break;
            };
            if let Some(resumed) = self.find_mut(&next).and_then(TransferJob::request_queue_end) {
                debug!(job = %next, "pending job resumed");
                out.push(resumed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use tempfile::TempDir;

    use super::*;
    use crate::types::JobEvent;

    fn write_file(dir: &Path, name: &str, len: usize) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, vec![7u8; len]).unwrap();
        path
    }

    fn receive_pool(dir: &Path) -> JobPool {
        JobPool::new(PoolConfig {
            receive_dir: dir.to_path_buf(),
            ..PoolConfig::default()
        })
    }

    /// Moves tokens between two pools until neither has anything to say.
    fn exchange(a: &mut JobPool, b: &mut JobPool, mut to_b: Vec<TransferToken>) {
        for _ in 0..10_000 {
            to_b.extend(a.poll());
            if to_b.is_empty() {
                break;
            }
            let to_a = b.dispatch(&to_b);
            to_b = a.dispatch(&to_a);
        }
    }

    #[test]
    fn auto_receive_creates_job() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let path = write_file(src.path(), "TEST.avi", crate::CHUNK_SIZE + 5);

        let mut tx_pool = JobPool::default();
        let mut rx_pool = receive_pool(dst.path());
        let (id, out) = tx_pool.submit(TransferJob::transmit(&path)).unwrap();
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], TransferToken::Header { .. }));

        exchange(&mut tx_pool, &mut rx_pool, out);

        let sent = tx_pool.find(&id).unwrap();
        let received = rx_pool.find(&id).unwrap();
        assert_eq!(sent.status, JobStatus::Success);
        assert_eq!(received.status, JobStatus::Success);
        assert_eq!(received.direction, Direction::Receive);
        assert_eq!(received.chunk_count, 2);
        assert_eq!(
            std::fs::metadata(dst.path().join("TEST.avi")).unwrap().len(),
            (crate::CHUNK_SIZE + 5) as u64
        );
    }

    #[test]
    fn header_ignored_without_auto_receive() {
        let dst = TempDir::new().unwrap();
        let mut pool = JobPool::new(PoolConfig {
            receive_dir: dst.path().to_path_buf(),
            auto_receive: false,
            ..PoolConfig::default()
        });
        let header = TransferToken::Header {
            path: "a.bin".into(),
            id: "Ab12".into(),
            length: 1,
        };
        assert!(pool.dispatch(&[header]).is_empty());
        assert!(pool.is_empty());
    }

    #[test]
    fn registered_receive_claims_header() {
        let dst = TempDir::new().unwrap();
        let target = dst.path().join("claimed.bin");
        let mut pool = JobPool::new(PoolConfig {
            receive_dir: dst.path().to_path_buf(),
            auto_receive: false,
            ..PoolConfig::default()
        });
        pool.register_receive(Some(target.clone()));

        let header = TransferToken::Header {
            path: "whatever.bin".into(),
            id: "Ab12".into(),
            length: 2,
        };
        pool.dispatch(&[header]);
        assert_eq!(pool.len(), 1);

        let replies = pool.dispatch(&[
            TransferToken::data("Ab12", b"hi"),
            TransferToken::Done {
                id: "Ab12".into(),
                chunks: 1,
            },
        ]);
        assert_eq!(replies, vec![TransferToken::Ack { id: "Ab12".into() }]);
        assert_eq!(pool.find("Ab12").unwrap().status, JobStatus::Success);
        assert_eq!(std::fs::read(&target).unwrap(), b"hi");
    }

    #[test]
    fn unmatched_header_for_existing_file_creates_failed_job() {
        let dst = TempDir::new().unwrap();
        std::fs::write(dst.path().join("a.bin"), b"x").unwrap();
        let mut pool = receive_pool(dst.path());
        pool.dispatch(&[TransferToken::Header {
            path: "a.bin".into(),
            id: "Ab12".into(),
            length: 1,
        }]);
        assert_eq!(pool.find("Ab12").unwrap().status, JobStatus::Failed);
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn submit_assigns_unique_ids() {
        let src = TempDir::new().unwrap();
        let mut pool = JobPool::default();
        let mut ids = std::collections::HashSet::new();
        for i in 0..20 {
            let path = write_file(src.path(), &format!("f{i}.bin"), 10);
            let (id, _) = pool.submit(TransferJob::transmit(path)).unwrap();
            assert!(ids.insert(id));
        }
        assert_eq!(pool.active_count(), 20);
    }

    #[test]
    fn capacity_queues_and_promotes() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let mut tx_pool = JobPool::new(PoolConfig {
            max_jobs: 1,
            enforce_capacity: true,
            ..PoolConfig::default()
        });
        let mut rx_pool = receive_pool(dst.path());

        let (first, mut out) = tx_pool
            .submit(TransferJob::transmit(write_file(src.path(), "one.bin", 10)))
            .unwrap();
        let (second, queued) = tx_pool
            .submit(TransferJob::transmit(write_file(src.path(), "two.bin", 10)))
            .unwrap();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[1], TransferToken::QueueBegin { id: second.clone() });
        assert_eq!(tx_pool.find(&second).unwrap().status, JobStatus::Queued);
        assert_eq!(tx_pool.pending_count(), 1);
        out.extend(queued);

        exchange(&mut tx_pool, &mut rx_pool, out);

        assert_eq!(tx_pool.find(&first).unwrap().status, JobStatus::Success);
        assert_eq!(tx_pool.find(&second).unwrap().status, JobStatus::Success);
        assert_eq!(rx_pool.find(&second).unwrap().status, JobStatus::Success);
        assert_eq!(tx_pool.pending_count(), 0);
        assert!(dst.path().join("two.bin").exists());
    }

    #[test]
    fn tokens_route_by_id() {
        let dst = TempDir::new().unwrap();
        let mut pool = receive_pool(dst.path());
        pool.dispatch(&[
            TransferToken::Header {
                path: "a.bin".into(),
                id: "Aaaa".into(),
                length: 1,
            },
            TransferToken::Header {
                path: "b.bin".into(),
                id: "Bbbb".into(),
                length: 1,
            },
        ]);
        let replies = pool.dispatch(&[TransferToken::data("Bbbb", b"b")]);
        assert_eq!(replies, vec![TransferToken::Ack { id: "Bbbb".into() }]);
        assert_eq!(pool.find("Aaaa").unwrap().chunk_count, 0);
        assert_eq!(pool.find("Bbbb").unwrap().chunk_count, 1);
    }

    #[test]
    fn prune_removes_finished_jobs() {
        let dst = TempDir::new().unwrap();
        let mut pool = receive_pool(dst.path());
        pool.dispatch(&[
            TransferToken::Header {
                path: "a.bin".into(),
                id: "Aaaa".into(),
                length: 0,
            },
            TransferToken::Done {
                id: "Aaaa".into(),
                chunks: 0,
            },
            TransferToken::Header {
                path: "b.bin".into(),
                id: "Bbbb".into(),
                length: 1,
            },
        ]);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.prune_finished(0), 1);
        assert_eq!(pool.jobs().len(), 1);
        assert_eq!(pool.jobs()[0].id, "Bbbb");
    }

    #[test]
    fn poll_keeps_bounded_history() {
        let dst = TempDir::new().unwrap();
        let mut pool = JobPool::new(PoolConfig {
            receive_dir: dst.path().to_path_buf(),
            finished_history: 2,
            ..PoolConfig::default()
        });

        for n in 0..5 {
            let id = format!("Id{n:02}");
            pool.dispatch(&[
                TransferToken::Header {
                    path: format!("{n}.bin"),
                    id: id.clone(),
                    length: 0,
                },
                TransferToken::Done { id, chunks: 0 },
            ]);
        }
        pool.register_receive(None);
        assert_eq!(pool.len(), 6);

        pool.poll();
        let ids: Vec<String> = pool.jobs().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["Id03".to_string(), "Id04".to_string(), String::new()]);
        assert!(pool.jobs().iter().take(2).all(|s| s.status == JobStatus::Success));
    }

    #[test]
    fn observer_sees_every_job() {
        let dst = TempDir::new().unwrap();
        let mut pool = receive_pool(dst.path());
        let completed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&completed);
        pool.set_observer(Arc::new(move |e: &JobEvent| {
            if let JobEvent::Completed(s) = e {
                sink.lock().unwrap().push(s.id.clone());
            }
        }));

        pool.dispatch(&[
            TransferToken::Header {
                path: "a.bin".into(),
                id: "Aaaa".into(),
                length: 0,
            },
            TransferToken::Done {
                id: "Aaaa".into(),
                chunks: 0,
            },
        ]);
        assert_eq!(*completed.lock().unwrap(), vec!["Aaaa".to_string()]);
    }
}
