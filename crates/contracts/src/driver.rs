//! SensorDriver trait - sensor hardware abstraction
//!
//! A driver owns the sensor-specific I/O. The lifecycle (threads, stop/resume
//! flags, close handshake) belongs to the runtime, which calls the driver only
//! from the sensor's own thread.

use crate::{ContractError, SampleValue, SensorInfo};

/// Where a driver sends what it reads.
pub trait SampleEmitter {
    /// Forward one sample to every handler.
    fn emit(&mut self, sample: &[SampleValue]);

    /// Forward header rows to every handler.
    fn emit_metadata(&mut self, metadata: &[String]);
}

/// Sensor-specific I/O adapter
pub trait SensorDriver: Send {
    /// Sensor identity
    fn info(&self) -> &SensorInfo;

    /// Open the sensor interface (serial port, socket, ...).
    fn open(&mut self) -> Result<(), ContractError>;

    /// Header rows emitted once after a successful open.
    fn metadata(&self) -> Vec<String> {
        Vec::new()
    }

    /// Run one read iteration.
    ///
    /// May block, but only up to the driver's own read timeout, so that the
    /// runtime observes stop and close requests between calls.
    fn poll(&mut self, emitter: &mut dyn SampleEmitter) -> Result<(), ContractError>;

    /// Apply a command routed to this sensor.
    fn handle_command(&mut self, command: &str) -> Result<(), ContractError> {
        tracing::debug!(sensor = %self.info(), command, "command ignored");
        Ok(())
    }

    /// Release the sensor interface.
    fn close(&mut self) -> Result<(), ContractError>;
}
