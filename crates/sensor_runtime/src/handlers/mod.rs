//! Data handlers and the per-sensor handler fan-out

mod csv;
mod log;

pub use csv::{file_name, format_row, CsvLogHandler};
pub use log::LogHandler;

use contracts::{DataHandler, SampleEmitter, SampleValue};
use tracing::warn;

/// Every handler attached to one sensor
///
/// A failing handler is logged and skipped; the others still receive the
/// sample.
pub struct HandlerSet {
    sensor_type: String,
    handlers: Vec<Box<dyn DataHandler>>,
}

impl HandlerSet {
    pub fn new(sensor_type: impl Into<String>, handlers: Vec<Box<dyn DataHandler>>) -> Self {
        Self {
            sensor_type: sensor_type.into(),
            handlers,
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Terminate every handler.
    pub fn terminate(&mut self) {
        for handler in &mut self.handlers {
            if let Err(e) = handler.terminate() {
                warn!(handler = handler.name(), error = %e, "handler terminate failed");
            }
        }
    }
}

impl SampleEmitter for HandlerSet {
    fn emit(&mut self, sample: &[SampleValue]) {
        for handler in &mut self.handlers {
            if let Err(e) = handler.handle_data(sample) {
                warn!(handler = handler.name(), error = %e, "handler write failed");
            }
        }
        observability::record_sample_handled(&self.sensor_type);
    }

    fn emit_metadata(&mut self, metadata: &[String]) {
        for handler in &mut self.handlers {
            if let Err(e) = handler.handle_metadata(metadata) {
                warn!(handler = handler.name(), error = %e, "handler rejected metadata");
            }
        }
    }
}
