//! Per-session call metrics.
//!
//! Counters are atomics; slow calls go into a bounded ring buffer that
//! keeps the most recent entries.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A call that took longer than the slow-call threshold.
#[derive(Debug, Clone, Serialize)]
pub struct SlowCall {
    pub call_id: Uuid,
    pub tool: String,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub calls: u64,
    pub slow_calls: u64,
    pub failures: u64,
    pub retries: u64,
    pub timeouts: u64,
    pub busy_rejections: u64,
}

#[derive(Debug)]
pub struct SessionMetrics {
    calls: AtomicU64,
    slow_calls: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
    busy_rejections: AtomicU64,
    slow_threshold: Duration,
    slow_log: Mutex<VecDeque<SlowCall>>,
    slow_capacity: usize,
}

impl SessionMetrics {
    pub fn new(slow_threshold: Duration, slow_capacity: usize) -> Self {
        Self {
            calls: AtomicU64::new(0),
            slow_calls: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            busy_rejections: AtomicU64::new(0),
            slow_threshold,
            slow_log: Mutex::new(VecDeque::with_capacity(slow_capacity)),
            slow_capacity,
        }
    }

    /// Record a finished call. Slowness never changes the call's result.
    pub fn record_call(&self, call_id: Uuid, tool: &str, duration: Duration, failed: bool) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        if duration <= self.slow_threshold {
            return;
        }

        self.slow_calls.fetch_add(1, Ordering::Relaxed);
        let duration_ms = duration.as_millis() as u64;
        tracing::warn!(%call_id, tool, duration_ms, "slow tool call");

        if self.slow_capacity == 0 {
            return;
        }
        if let Ok(mut log) = self.slow_log.lock() {
            if log.len() == self.slow_capacity {
                log.pop_front();
            }
            log.push_back(SlowCall {
                call_id,
                tool: tool.to_string(),
                duration_ms,
                finished_at: Utc::now(),
            });
        }
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_busy(&self) {
        self.busy_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            slow_calls: self.slow_calls.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            busy_rejections: self.busy_rejections.load(Ordering::Relaxed),
        }
    }

    /// Most recent slow calls, oldest first.
    pub fn slow_calls(&self) -> Vec<SlowCall> {
        self.slow_log
            .lock()
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }
}
