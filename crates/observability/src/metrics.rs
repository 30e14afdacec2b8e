//! Sync and control plane metrics
//!
//! Thin helpers over the `metrics` facade plus an in-memory aggregator for
//! clock sync rounds. All metric names carry the `pisc_` prefix.

use metrics::{counter, gauge, histogram};

/// Record the outcome of one convergence round.
///
/// # Example
///
/// ```ignore
/// use observability::metrics::record_sync_round;
///
/// record_sync_round(true, 0.004, Some(0.010));
/// ```
pub fn record_sync_round(converged: bool, max_offset_s: f64, mean_latency_s: Option<f64>) {
    let outcome = if converged { "converged" } else { "diverged" };
    counter!("pisc_sync_rounds_total", "outcome" => outcome).increment(1);
    histogram!("pisc_sync_max_offset_ms").record(max_offset_s * 1000.0);

    if converged {
        gauge!("pisc_sync_converged_max_offset_ms").set(max_offset_s * 1000.0);
        if let Some(latency) = mean_latency_s {
            gauge!("pisc_sync_mean_latency_ms").set(latency * 1000.0);
        }
    }
}

/// Record a round-trip time measured by a prober.
pub fn record_sync_rtt_ms(rtt_ms: f64) {
    histogram!("pisc_sync_rtt_ms").record(rtt_ms);
}

/// Record a sync2 that matched no pending attempt.
pub fn record_sync_ignored() {
    counter!("pisc_sync_ignored_total").increment(1);
}

/// Record a decoded packet
pub fn record_packet_received(tag: &str) {
    counter!(
        "pisc_packets_received_total",
        "tag" => tag.to_string()
    )
    .increment(1);
}

/// Record a packet dropped before dispatch
pub fn record_packet_dropped(reason: &'static str) {
    counter!("pisc_packets_dropped_total", "reason" => reason).increment(1);
}

/// Record one outbound record handled by a peer session
pub fn record_session_send(outcome: SendOutcome) {
    counter!("pisc_session_records_total", "outcome" => outcome.as_str()).increment(1);
}

/// Record the number of live peer sessions
pub fn record_session_count(count: usize) {
    gauge!("pisc_sessions").set(count as f64);
}

/// Record a sample forwarded by a sensor
pub fn record_sample_handled(sensor_type: &str) {
    counter!(
        "pisc_sensor_samples_total",
        "sensor_type" => sensor_type.to_string()
    )
    .increment(1);
}

/// Record a sensor that did not confirm closing within its budget
pub fn record_close_timeout(sensor_type: &str) {
    counter!(
        "pisc_sensor_close_timeouts_total",
        "sensor_type" => sensor_type.to_string()
    )
    .increment(1);
}

/// What happened to one queued outbound record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Withheld,
    Failed,
}

impl SendOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Withheld => "withheld",
            Self::Failed => "failed",
        }
    }
}

/// Sync round aggregator
///
/// Aggregates convergence rounds in memory for the end-of-run summary.
#[derive(Debug, Clone, Default)]
pub struct SyncMetricsAggregator {
    /// Rounds that met the threshold
    pub converged_rounds: u64,

    /// Rounds that were discarded
    pub diverged_rounds: u64,

    /// Max offset per round (ms)
    pub offset_stats: RunningStats,

    /// One-way latency per corrected sample (ms)
    pub latency_stats: RunningStats,
}

impl SyncMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update with one evaluated round
    pub fn update(&mut self, converged: bool, max_offset_s: f64, latencies_s: &[f64]) {
        if converged {
            self.converged_rounds += 1;
        } else {
            self.diverged_rounds += 1;
        }

        self.offset_stats.push(max_offset_s * 1000.0);
        for latency in latencies_s {
            self.latency_stats.push(latency * 1000.0);
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        let total = self.converged_rounds + self.diverged_rounds;
        MetricsSummary {
            total_rounds: total,
            converged_rounds: self.converged_rounds,
            convergence_rate: if total > 0 {
                self.converged_rounds as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            max_offset_ms: StatsSummary::from(&self.offset_stats),
            latency_ms: StatsSummary::from(&self.latency_stats),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Sync metrics summary
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_rounds: u64,
    pub converged_rounds: u64,
    pub convergence_rate: f64,
    pub max_offset_ms: StatsSummary,
    pub latency_ms: StatsSummary,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Clock Sync Summary ===")?;
        writeln!(
            f,
            "Rounds: {} ({} converged, {:.2}%)",
            self.total_rounds, self.converged_rounds, self.convergence_rate
        )?;
        writeln!(f, "Max offset (ms): {}", self.max_offset_ms)?;
        writeln!(f, "Latency (ms): {}", self.latency_ms)?;
        Ok(())
    }
}

/// Stats summary
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online statistics (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

impl FromIterator<f64> for RunningStats {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut stats = Self::default();
        for value in iter {
            stats.push(value);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stats() {
        let stats: RunningStats = [1.0, 2.0, 3.0, 4.0, 5.0].into_iter().collect();

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_aggregator_update() {
        let mut aggregator = SyncMetricsAggregator::new();
        aggregator.update(false, 0.030, &[0.010, 0.012]);
        aggregator.update(true, 0.004, &[0.010, 0.011]);

        let summary = aggregator.summary();
        assert_eq!(summary.total_rounds, 2);
        assert_eq!(summary.converged_rounds, 1);
        assert!((summary.convergence_rate - 50.0).abs() < 1e-10);
        assert_eq!(summary.latency_ms.count, 4);
        assert!((summary.max_offset_ms.max - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_summary_display() {
        let summary = MetricsSummary {
            total_rounds: 4,
            converged_rounds: 1,
            convergence_rate: 25.0,
            max_offset_ms: StatsSummary::default(),
            latency_ms: StatsSummary {
                count: 5,
                min: 9.0,
                max: 11.0,
                mean: 10.0,
                std_dev: 0.5,
            },
        };

        let output = format!("{}", summary);
        assert!(output.contains("Rounds: 4 (1 converged, 25.00%)"));
        assert!(output.contains("Max offset (ms): N/A"));
        assert!(output.contains("mean=10.000"));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_sync_round(true, 0.001, Some(0.01));
        record_packet_received("t");
        record_session_send(SendOutcome::Withheld);
        assert_eq!(SendOutcome::Failed.as_str(), "failed");
    }
}
