//! # Sync Engine
//!
//! RTT-compensated clock sync and the shared time/position/orientation sources.
//!
//! Responsibilities:
//! - Two-phase sync handshake (prober and estimator halves)
//! - Convergence test over a window of latency-corrected samples
//! - Thread-safe latest-value sources with change notification
//! - Platform time precision check
//!
//! ## Usage
//!
//! ```ignore
//! use sync_engine::{SyncEstimator, SyncOutcome, TimeSource};
//!
//! let mut estimator = SyncEstimator::new(ClockSyncConfig::default(), clock.clone());
//! let echo = estimator.on_sync1(id, utc_time);
//! // ... later
//! if let SyncOutcome::Converged(estimate) = estimator.on_sync2(id, rtt) {
//!     time_source.set_with_ref(estimate.mean_time, estimate.computed_at);
//! }
//! ```

mod attempts;
mod engine;
mod precision;
mod sources;

pub use attempts::{SyncAttempt, WindowEstimate};
pub use contracts::ClockSyncConfig;
pub use engine::{SyncEstimator, SyncOutcome, SyncProber};
pub use precision::{ensure_time_precision, REQUIRED_RESOLUTION_S};
pub use sources::{OrientationSource, PositionSource, SourceSet, TimeSource, ValueSource};
