//! CommandSink trait - where remote sensor commands end up

use crate::SensorSelector;

/// Receiver of `ct`/`cn`/`ci` commands
pub trait CommandSink: Send + Sync {
    /// Route `command` to every sensor matching `selector`.
    ///
    /// Returns the number of sensors the command was queued for.
    fn dispatch(&self, selector: &SensorSelector, command: &str) -> usize;
}

/// Sink for nodes without sensors
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSensors;

impl CommandSink for NoSensors {
    fn dispatch(&self, selector: &SensorSelector, command: &str) -> usize {
        tracing::debug!(%selector, command, "no sensors to receive command");
        0
    }
}
