//! LogHandler - logs samples via tracing

use contracts::{ContractError, DataHandler, SampleValue, SensorInfo};
use tracing::info;

/// Handler that logs every sample for debugging
pub struct LogHandler {
    name: String,
}

impl LogHandler {
    pub fn new(info: &SensorInfo) -> Self {
        Self {
            name: format!("log:{info}"),
        }
    }
}

impl DataHandler for LogHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle_metadata(&mut self, metadata: &[String]) -> Result<(), ContractError> {
        if metadata.is_empty() {
            return Err(ContractError::handler_write(
                &self.name,
                "metadata must contain at least one element",
            ));
        }
        info!(handler = %self.name, metadata = ?metadata, "sensor metadata");
        Ok(())
    }

    fn handle_data(&mut self, sample: &[SampleValue]) -> Result<(), ContractError> {
        let fields: Vec<String> = sample.iter().map(ToString::to_string).collect();
        info!(handler = %self.name, sample = %fields.join(","), "sensor sample");
        Ok(())
    }

    fn terminate(&mut self) -> Result<(), ContractError> {
        info!(handler = %self.name, "LogHandler closed");
        Ok(())
    }
}
