//! Rolling outcome window.
//!
//! The window is split into a fixed number of buckets. Each bucket covers
//! `window / buckets` and counts the outcomes that completed while it was
//! current. Buckets older than the window are discarded on access.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Aggregated counts over the live buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollingStats {
    pub successes: u64,
    pub failures: u64,
}

impl RollingStats {
    pub fn samples(&self) -> u64 {
        self.successes + self.failures
    }

    /// Failure ratio in percent; 0 with no samples.
    pub fn error_percentage(&self) -> f64 {
        let samples = self.samples();
        if samples == 0 {
            return 0.0;
        }
        self.failures as f64 * 100.0 / samples as f64
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    started: Instant,
    successes: u64,
    failures: u64,
}

/// Bucketed success/failure counter over a sliding time window.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    bucket_span: Duration,
    max_buckets: usize,
    buckets: VecDeque<Bucket>,
}

impl RollingWindow {
    pub fn new(window: Duration, buckets: u32) -> Self {
        let max_buckets = buckets.max(1);
        let bucket_span = (window / max_buckets).max(Duration::from_millis(1));
        Self {
            bucket_span,
            max_buckets: max_buckets as usize,
            buckets: VecDeque::with_capacity(max_buckets as usize),
        }
    }

    fn window(&self) -> Duration {
        self.bucket_span * self.max_buckets as u32
    }

    fn expire(&mut self, now: Instant) {
        let window = self.window();
        while let Some(front) = self.buckets.front() {
            if now.saturating_duration_since(front.started) >= window {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    fn current(&mut self, now: Instant) -> &mut Bucket {
        self.expire(now);
        let stale = match self.buckets.back() {
            Some(back) => now.saturating_duration_since(back.started) >= self.bucket_span,
            None => true,
        };
        if stale {
            if self.buckets.len() == self.max_buckets {
                self.buckets.pop_front();
            }
            self.buckets.push_back(Bucket {
                started: now,
                successes: 0,
                failures: 0,
            });
        }
        // A bucket was pushed above if none existed.
        let last = self.buckets.len() - 1;
        &mut self.buckets[last]
    }

    pub fn record(&mut self, success: bool, now: Instant) {
        let bucket = self.current(now);
        if success {
            bucket.successes += 1;
        } else {
            bucket.failures += 1;
        }
    }

    pub fn stats(&mut self, now: Instant) -> RollingStats {
        self.expire(now);
        self.buckets
            .iter()
            .fold(RollingStats::default(), |mut acc, bucket| {
                acc.successes += bucket.successes;
                acc.failures += bucket.failures;
                acc
            })
    }

    pub fn reset(&mut self) {
        self.buckets.clear();
    }
}
