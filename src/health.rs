use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

pub const FAIL_COUNT_METRIC: &str = "runtime.server.fails";
pub const LAST_SUCCESS_METRIC: &str = "runtime.server.lastsuccess";

/// Consecutive failed requests and the time of the last success.
///
/// Values are mirrored to the `metrics` facade; with no recorder installed that is a no-op.
#[derive(Debug, Default)]
pub struct HealthState {
    failures: AtomicU64,
    last_success: AtomicI64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&self) {
        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::gauge!(FAIL_COUNT_METRIC).set(failures as f64);
    }

    pub fn record_success(&self) {
        let now = Utc::now().timestamp();
        self.failures.store(0, Ordering::SeqCst);
        self.last_success.store(now, Ordering::SeqCst);
        metrics::gauge!(FAIL_COUNT_METRIC).set(0.0);
        metrics::gauge!(LAST_SUCCESS_METRIC).set(now as f64);
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        match self.last_success.load(Ordering::SeqCst) {
            0 => None,
            ts => DateTime::from_timestamp(ts, 0),
        }
    }
}
