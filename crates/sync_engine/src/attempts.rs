//! Sync attempt sets and the convergence test.

use contracts::UtcTime;
use observability::RunningStats;

/// Upper bound on attempts waiting for their `sync2`.
///
/// A lost `sync2` leaves its attempt behind forever otherwise.
pub(crate) const MAX_UNCORRECTED: usize = 64;

/// One probe received from the reference side
#[derive(Debug, Clone, PartialEq)]
pub struct SyncAttempt {
    /// Per-session probe id
    pub id: u64,
    /// Reference time carried by the probe (latency-corrected once known)
    pub utc_time: UtcTime,
    /// Local clock when the probe arrived
    pub sys_time: f64,
    /// One-way latency, set when the round trip is known
    pub latency: Option<f64>,
}

impl SyncAttempt {
    /// Reference time projected forward to local instant `now`.
    pub fn projected(&self, now: f64) -> UtcTime {
        self.utc_time + (now - self.sys_time)
    }
}

/// Result of evaluating a full window of corrected attempts
#[derive(Debug, Clone, PartialEq)]
pub struct WindowEstimate {
    /// Mean of the projected reference times
    pub mean_time: UtcTime,
    /// Largest absolute deviation from the mean
    pub max_offset: f64,
    /// Local instant the projection was made at
    pub computed_at: f64,
    /// Mean one-way latency
    pub mean_latency: f64,
    /// Largest one-way latency
    pub max_latency: f64,
    /// Latencies of every attempt in the window
    pub latencies: Vec<f64>,
}

/// Uncorrected and corrected attempt sets of one estimator
#[derive(Debug, Default)]
pub(crate) struct AttemptSets {
    uncorrected: Vec<SyncAttempt>,
    corrected: Vec<SyncAttempt>,
}

impl AttemptSets {
    pub fn record(&mut self, attempt: SyncAttempt) {
        if self.uncorrected.len() >= MAX_UNCORRECTED {
            let stale = self.uncorrected.remove(0);
            tracing::debug!(id = stale.id, "discarding stale sync attempt");
        }
        self.uncorrected.push(attempt);
    }

    /// Move the attempt with `id` into the corrected set.
    ///
    /// Returns `false` unless exactly one uncorrected attempt has that id.
    pub fn correct(&mut self, id: u64, latency: f64) -> bool {
        let mut matches = self.uncorrected.iter().filter(|a| a.id == id);
        let (Some(_), None) = (matches.next(), matches.next()) else {
            return false;
        };

        let Some(index) = self.uncorrected.iter().position(|a| a.id == id) else {
            return false;
        };
        let mut attempt = self.uncorrected.remove(index);
        attempt.utc_time += latency;
        attempt.latency = Some(latency);
        self.corrected.push(attempt);
        true
    }

    pub fn corrected_len(&self) -> usize {
        self.corrected.len()
    }

    pub fn uncorrected_len(&self) -> usize {
        self.uncorrected.len()
    }

    /// Project every corrected attempt to `now` and summarize.
    ///
    /// The corrected set is consumed by the evaluation.
    pub fn evaluate(&mut self, now: f64) -> Option<WindowEstimate> {
        if self.corrected.is_empty() {
            return None;
        }

        let attempts = std::mem::take(&mut self.corrected);
        let projected: RunningStats = attempts.iter().map(|a| a.projected(now)).collect();
        let mean_time = projected.mean();
        let max_offset = (projected.max() - mean_time)
            .abs()
            .max((mean_time - projected.min()).abs());

        let latencies: Vec<f64> = attempts.iter().filter_map(|a| a.latency).collect();
        let latency_stats: RunningStats = latencies.iter().copied().collect();

        Some(WindowEstimate {
            mean_time,
            max_offset,
            computed_at: now,
            mean_latency: latency_stats.mean(),
            max_latency: latency_stats.max(),
            latencies,
        })
    }

    pub fn clear(&mut self) {
        self.uncorrected.clear();
        self.corrected.clear();
    }
}
