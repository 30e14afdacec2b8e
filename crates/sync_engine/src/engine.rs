//! Clock sync handshake
//!
//! Two halves of one protocol:
//!
//! - [`SyncProber`] lives on the reference side. It sends `sync1(id, utc)`,
//!   measures the round trip when the id is echoed, and sends `sync2(id, rtt)`.
//! - [`SyncEstimator`] lives on the side that wants the time. It records each
//!   `sync1` against its local clock, echoes the id, corrects the attempt by
//!   `rtt / 2` on `sync2`, and accepts an estimate once a full window of
//!   corrected attempts agrees within the threshold.
//!
//! Latency is assumed symmetric. Neither half does I/O.

use std::collections::HashMap;

use contracts::{ClockSyncConfig, Packet, SharedClock, UtcTime};
use tracing::instrument;

use crate::attempts::{AttemptSets, SyncAttempt, WindowEstimate};

/// What a `sync2` did to the estimator
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// No single pending attempt matched the id
    Ignored,
    /// Attempt corrected, window not yet full
    Collecting { corrected: usize },
    /// Window agreed; the estimate is ready to commit
    Converged(WindowEstimate),
    /// Window disagreed and was discarded
    Diverged { max_offset: f64 },
}

impl SyncOutcome {
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged(_))
    }

    /// Verdict sent back to the prober.
    pub fn reply(&self) -> Packet {
        Packet::SyncResult(self.is_converged())
    }
}

/// Estimating half of the handshake
pub struct SyncEstimator {
    config: ClockSyncConfig,
    clock: SharedClock,
    attempts: AttemptSets,
    syncing: bool,
}

impl std::fmt::Debug for SyncEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEstimator")
            .field("config", &self.config)
            .field("attempts", &self.attempts)
            .field("syncing", &self.syncing)
            .finish()
    }
}

impl SyncEstimator {
    pub fn new(config: ClockSyncConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            attempts: AttemptSets::default(),
            syncing: false,
        }
    }

    pub fn config(&self) -> &ClockSyncConfig {
        &self.config
    }

    /// Record a phase-1 probe and return the echo.
    pub fn on_sync1(&mut self, id: u64, utc_time: UtcTime) -> Packet {
        if !self.syncing {
            self.syncing = true;
            tracing::info!("Syncing");
        }

        self.attempts.record(SyncAttempt {
            id,
            utc_time,
            sys_time: self.clock.now(),
            latency: None,
        });
        Packet::SyncEcho { id }
    }

    /// Apply a phase-2 round trip and evaluate convergence.
    #[instrument(name = "sync_estimator_sync2", level = "debug", skip(self))]
    pub fn on_sync2(&mut self, id: u64, rtt: f64) -> SyncOutcome {
        if !self.attempts.correct(id, rtt / 2.0) {
            tracing::debug!(id, "sync2 matched no pending attempt");
            observability::record_sync_ignored();
            return SyncOutcome::Ignored;
        }

        let corrected = self.attempts.corrected_len();
        if corrected < self.config.window {
            return SyncOutcome::Collecting { corrected };
        }

        let Some(estimate) = self.attempts.evaluate(self.clock.now()) else {
            return SyncOutcome::Collecting { corrected: 0 };
        };

        let converged = estimate.max_offset < self.config.threshold_s;
        observability::record_sync_round(
            converged,
            estimate.max_offset,
            Some(estimate.mean_latency),
        );

        if converged {
            tracing::info!(
                mean_latency_ms = (estimate.mean_latency * 1000.0) as i64,
                max_latency_ms = (estimate.max_latency * 1000.0) as i64,
                max_offset_ms = (estimate.max_offset * 1000.0) as i64,
                threshold_ms = (self.config.threshold_s * 1000.0) as i64,
                "clock sync converged"
            );
            self.syncing = false;
            SyncOutcome::Converged(estimate)
        } else {
            tracing::info!(
                max_offset_ms = estimate.max_offset * 1000.0,
                "still syncing"
            );
            SyncOutcome::Diverged {
                max_offset: estimate.max_offset,
            }
        }
    }

    pub fn corrected_len(&self) -> usize {
        self.attempts.corrected_len()
    }

    pub fn uncorrected_len(&self) -> usize {
        self.attempts.uncorrected_len()
    }

    /// Forget every attempt.
    pub fn reset(&mut self) {
        self.attempts.clear();
        self.syncing = false;
    }
}

/// Probing half of the handshake
///
/// Ids increase monotonically for the lifetime of the prober and are never
/// reused, even for abandoned attempts.
pub struct SyncProber {
    clock: SharedClock,
    next_id: u64,
    last_sync_time: Option<UtcTime>,
    in_flight: HashMap<u64, f64>,
}

impl std::fmt::Debug for SyncProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncProber")
            .field("next_id", &self.next_id)
            .field("last_sync_time", &self.last_sync_time)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl SyncProber {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            next_id: 0,
            last_sync_time: None,
            in_flight: HashMap::new(),
        }
    }

    /// Probe time for a time-bearing record, `None` if its time was already used.
    ///
    /// The probe time is `utc_time + time_delay`.
    pub fn probe_time(&mut self, utc_time: UtcTime, time_delay: Option<f64>) -> Option<UtcTime> {
        if self.last_sync_time == Some(utc_time) {
            return None;
        }
        self.last_sync_time = Some(utc_time);
        Some(utc_time + time_delay.unwrap_or(0.0))
    }

    /// Start an attempt: allocate an id and remember the send instant.
    pub fn begin(&mut self, utc_time: UtcTime) -> Packet {
        let id = self.next_id;
        self.next_id += 1;
        self.in_flight.insert(id, self.clock.now());
        Packet::Sync1 { id, utc_time }
    }

    /// Handle the echo of a `sync1`; returns the `sync2` to send.
    pub fn on_echo(&mut self, id: u64) -> Option<Packet> {
        let sent = self.in_flight.remove(&id)?;
        let rtt = (self.clock.now() - sent).max(0.0);
        observability::record_sync_rtt_ms(rtt * 1000.0);
        Some(Packet::Sync2 { id, rtt })
    }

    /// Drop an attempt whose reply never came.
    pub fn abandon(&mut self, id: u64) {
        self.in_flight.remove(&id);
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Forget the dedup guard so the next record starts a new attempt.
    pub fn reset(&mut self) {
        self.last_sync_time = None;
        self.in_flight.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Clock, ManualClock, SystemClock};
    use rand::Rng;
    use std::sync::Arc;

    fn manual(start: f64) -> (Arc<ManualClock>, SharedClock) {
        let clock = Arc::new(ManualClock::new(start));
        let shared: SharedClock = clock.clone();
        (clock, shared)
    }

    /// Reference clock runs `offset` ahead of the estimator's local clock.
    struct Link {
        clock: Arc<ManualClock>,
        prober: SyncProber,
        estimator: SyncEstimator,
        offset: f64,
    }

    impl Link {
        fn new(config: ClockSyncConfig, offset: f64) -> Self {
            let (clock, shared) = manual(5_000.0);
            Self {
                clock,
                prober: SyncProber::new(shared.clone()),
                estimator: SyncEstimator::new(config, shared),
                offset,
            }
        }

        /// One full exchange with the given one-way latencies.
        fn exchange(&mut self, out: f64, back: f64) -> SyncOutcome {
            let reference_now = self.clock.now() + self.offset;
            let Packet::Sync1 { id, utc_time } = self.prober.begin(reference_now) else {
                panic!("expected sync1");
            };
            self.clock.advance(out);
            let Packet::SyncEcho { id } = self.estimator.on_sync1(id, utc_time) else {
                panic!("expected echo");
            };
            self.clock.advance(back);
            let Some(Packet::Sync2 { id, rtt }) = self.prober.on_echo(id) else {
                panic!("expected sync2");
            };
            self.clock.advance(out);
            self.estimator.on_sync2(id, rtt)
        }
    }

    #[test]
    fn test_scenario_fixed_latency() {
        let mut link = Link::new(ClockSyncConfig::default(), 0.0);

        for round in 1..5 {
            assert_eq!(
                link.exchange(0.010, 0.010),
                SyncOutcome::Collecting { corrected: round }
            );
        }

        let SyncOutcome::Converged(estimate) = link.exchange(0.010, 0.010) else {
            panic!("expected convergence");
        };
        assert!((estimate.mean_latency - 0.010).abs() < 1e-9);
        assert!(estimate.max_offset < 1e-9);

        // Estimate matches the reference clock at the instant it was computed.
        let reference_then = estimate.computed_at + link.offset;
        assert!((estimate.mean_time - reference_then).abs() < 1e-6);
    }

    #[test]
    fn test_converged_estimate_within_threshold_under_jitter() {
        let config = ClockSyncConfig::default();
        let mut rng = rand::rng();

        for _ in 0..20 {
            let offset = rng.random_range(-100.0..100.0);
            let latency = rng.random_range(0.001..0.050);
            let mut link = Link::new(config, offset);

            let estimate = loop {
                let out = latency + rng.random_range(0.0..0.002);
                let back = latency + rng.random_range(0.0..0.002);
                match link.exchange(out, back) {
                    SyncOutcome::Converged(estimate) => break estimate,
                    SyncOutcome::Ignored => panic!("attempt should match"),
                    _ => {}
                }
            };

            let error = (estimate.mean_time - (estimate.computed_at + offset)).abs();
            assert!(error < config.threshold_s, "error {error} too large");
        }
    }

    #[test]
    fn test_inconsistent_window_is_discarded() {
        let mut link = Link::new(ClockSyncConfig::default(), 0.0);
        for _ in 0..4 {
            link.exchange(0.010, 0.010);
        }
        // A wildly asymmetric path skews the last sample by ~50 ms.
        let outcome = link.exchange(0.110, 0.010);
        assert!(matches!(outcome, SyncOutcome::Diverged { .. }));
        assert_eq!(outcome.reply(), Packet::SyncResult(false));
        assert_eq!(link.estimator.corrected_len(), 0);

        for _ in 0..4 {
            link.exchange(0.010, 0.010);
        }
        assert!(link.exchange(0.010, 0.010).is_converged());
    }

    #[test]
    fn test_unknown_sync2_is_noop() {
        let mut estimator = SyncEstimator::new(ClockSyncConfig::default(), SystemClock::shared());
        estimator.on_sync1(0, 100.0);
        estimator.on_sync2(0, 0.02);
        assert_eq!(estimator.corrected_len(), 1);

        assert_eq!(estimator.on_sync2(0, 0.02), SyncOutcome::Ignored);
        assert_eq!(estimator.on_sync2(42, 0.02), SyncOutcome::Ignored);
        assert_eq!(estimator.corrected_len(), 1);
    }

    #[test]
    fn test_scenario_latency_correction() {
        let (_clock, shared) = manual(0.0);
        let mut estimator = SyncEstimator::new(ClockSyncConfig::default(), shared);
        estimator.on_sync1(0, 100.0);
        estimator.on_sync2(0, 0.020);

        let estimate = estimator.attempts.evaluate(0.0).unwrap();
        assert!((estimate.mean_time - 100.010).abs() < 1e-9);
        assert!((estimate.mean_latency - 0.010).abs() < 1e-12);
    }

    #[test]
    fn test_configurable_window() {
        let config = ClockSyncConfig {
            threshold_s: 0.015,
            window: 2,
        };
        let mut link = Link::new(config, 3.0);
        assert!(!link.exchange(0.005, 0.005).is_converged());
        assert!(link.exchange(0.005, 0.005).is_converged());
    }

    #[test]
    fn test_prober_dedup_and_ids() {
        let (_clock, shared) = manual(0.0);
        let mut prober = SyncProber::new(shared);

        assert_eq!(prober.probe_time(10.0, Some(0.5)), Some(10.5));
        assert_eq!(prober.probe_time(10.0, Some(0.7)), None);
        assert_eq!(prober.probe_time(11.0, None), Some(11.0));

        let Packet::Sync1 { id: first, .. } = prober.begin(10.5) else {
            panic!("expected sync1");
        };
        prober.abandon(first);
        let Packet::Sync1 { id: second, .. } = prober.begin(11.0) else {
            panic!("expected sync1");
        };
        assert!(second > first);
        assert!(prober.on_echo(first).is_none());
        assert!(prober.on_echo(second).is_some());
        assert!(prober.on_echo(second).is_none());
    }
}
