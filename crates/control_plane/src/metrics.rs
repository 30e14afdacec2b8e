//! Session metrics for observability

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use observability::SendOutcome;

/// Metrics for a single peer session
#[derive(Debug, Default)]
pub struct SessionMetrics {
    /// Records waiting in the outbound queue
    queue_len: AtomicUsize,
    /// Packets transmitted
    sent_count: AtomicU64,
    /// Time-bearing records held back while unsynced
    withheld_count: AtomicU64,
    /// Transmit failures
    failure_count: AtomicU64,
    /// Sync handshakes started
    sync_attempts: AtomicU64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    pub fn inc_queue_len(&self) {
        self.queue_len.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sent_count(&self) -> u64 {
        self.sent_count.load(Ordering::Relaxed)
    }

    pub fn withheld_count(&self) -> u64 {
        self.withheld_count.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn sync_attempts(&self) -> u64 {
        self.sync_attempts.load(Ordering::Relaxed)
    }

    pub fn inc_sync_attempts(&self) {
        self.sync_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one handled record, locally and in the global recorder.
    pub fn record(&self, outcome: SendOutcome) {
        let counter = match outcome {
            SendOutcome::Sent => &self.sent_count,
            SendOutcome::Withheld => &self.withheld_count,
            SendOutcome::Failed => &self.failure_count,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        observability::record_session_send(outcome);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_len: self.queue_len(),
            sent_count: self.sent_count(),
            withheld_count: self.withheld_count(),
            failure_count: self.failure_count(),
            sync_attempts: self.sync_attempts(),
        }
    }
}

/// Snapshot of session metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub queue_len: usize,
    pub sent_count: u64,
    pub withheld_count: u64,
    pub failure_count: u64,
    pub sync_attempts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_outcomes() {
        let metrics = SessionMetrics::new();
        metrics.record(SendOutcome::Sent);
        metrics.record(SendOutcome::Sent);
        metrics.record(SendOutcome::Withheld);
        metrics.record(SendOutcome::Failed);
        metrics.inc_sync_attempts();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sent_count, 2);
        assert_eq!(snapshot.withheld_count, 1);
        assert_eq!(snapshot.failure_count, 1);
        assert_eq!(snapshot.sync_attempts, 1);
    }
}
