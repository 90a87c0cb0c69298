use std::time::{Duration, Instant};

use crate::SAMPLE_INTERVAL;

/// Samples transfer speed at a fixed interval.
///
/// Takes explicit instants so the owning state machine stays
/// deterministic under test.
#[derive(Debug, Clone)]
pub struct ThroughputSampler {
    interval: Duration,
    last_at: Option<Instant>,
    last_bytes: u64,
    bytes_per_second: f64,
}

impl Default for ThroughputSampler {
    fn default() -> Self {
        Self::new(SAMPLE_INTERVAL)
    }
}

impl ThroughputSampler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_at: None,
            last_bytes: 0,
            bytes_per_second: 0.0,
        }
    }

    /// Starts the first sampling window at `now`.
    pub fn start(&mut self, now: Instant, bytes: u64) {
        self.last_at = Some(now);
        self.last_bytes = bytes;
    }

    /// Records `bytes` (a running total) if a full interval has passed.
    ///
    /// Returns the new rate when a sample was taken.
    pub fn sample(&mut self, now: Instant, bytes: u64) -> Option<f64> {
        let Some(last_at) = self.last_at else {
            self.start(now, bytes);
            return None;
        };
        let elapsed = now.saturating_duration_since(last_at);
        if elapsed < self.interval {
            return None;
        }

        let delta = bytes.saturating_sub(self.last_bytes);
        self.bytes_per_second = delta as f64 / elapsed.as_secs_f64();
        self.last_at = Some(now);
        self.last_bytes = bytes;
        Some(self.bytes_per_second)
    }

    /// Rate from the most recent sample, in bytes per second.
    pub fn bytes_per_second(&self) -> f64 {
        self.bytes_per_second
    }

    /// Estimated time to move `remaining` bytes at the last sampled rate.
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        if self.bytes_per_second <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(
            remaining as f64 / self.bytes_per_second,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_sample_before_interval() {
        let t0 = Instant::now();
        let mut s = ThroughputSampler::new(Duration::from_secs(5));
        s.start(t0, 0);
        assert!(s.sample(t0 + Duration::from_secs(4), 1000).is_none());
        assert_eq!(s.bytes_per_second(), 0.0);
        assert!(s.eta(1000).is_none());
    }

    #[test]
    fn rate_over_interval() {
        let t0 = Instant::now();
        let mut s = ThroughputSampler::new(Duration::from_secs(5));
        s.start(t0, 0);
        let rate = s.sample(t0 + Duration::from_secs(5), 50_000).unwrap();
        assert_eq!(rate, 10_000.0);
        assert_eq!(s.eta(20_000), Some(Duration::from_secs(2)));
    }

    #[test]
    fn rate_is_since_previous_sample() {
        let t0 = Instant::now();
        let mut s = ThroughputSampler::new(Duration::from_secs(5));
        s.start(t0, 0);
        s.sample(t0 + Duration::from_secs(5), 50_000);
        let rate = s.sample(t0 + Duration::from_secs(10), 60_000).unwrap();
        assert_eq!(rate, 2_000.0);
    }

    #[test]
    fn first_sample_without_start_opens_window() {
        let t0 = Instant::now();
        let mut s = ThroughputSampler::default();
        assert!(s.sample(t0, 100).is_none());
        assert!(s.sample(t0 + SAMPLE_INTERVAL, 600).is_some());
        assert_eq!(s.bytes_per_second(), 100.0);
    }
}
