//! Clock sync configuration contracts that can be shared across crates.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Convergence parameters of the clock sync handshake
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ClockSyncConfig {
    /// Maximum deviation (seconds) of any corrected sample from the mean
    #[validate(range(exclusive_min = 0.0))]
    pub threshold_s: f64,

    /// Number of corrected samples evaluated per convergence round
    #[validate(range(min = 2))]
    pub window: usize,
}

impl Default for ClockSyncConfig {
    fn default() -> Self {
        Self {
            threshold_s: 0.015,
            window: 5,
        }
    }
}
