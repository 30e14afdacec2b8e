//! DataHandler trait - sensor output interface
//!
//! Handlers receive what a sensor produces, verbatim. Each handler is owned
//! by exactly one sensor thread, so the trait is synchronous.

use crate::{ContractError, SampleValue};

/// Sensor data output
pub trait DataHandler: Send {
    /// Handler name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Store header rows describing the samples that follow.
    ///
    /// # Errors
    /// Returns an error if `metadata` is empty.
    fn handle_metadata(&mut self, metadata: &[String]) -> Result<(), ContractError>;

    /// Handle one sample tuple.
    fn handle_data(&mut self, sample: &[SampleValue]) -> Result<(), ContractError>;

    /// Write anything buffered and release resources.
    fn terminate(&mut self) -> Result<(), ContractError>;
}
