//! Layered error definitions
//!
//! Categorized by source: config / wire / sensor / handler / platform

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Wire Errors =====
    /// Packet with a known tag but unusable fields
    #[error("malformed '{tag}' packet: {message}")]
    MalformedPacket { tag: String, message: String },

    /// Packet whose tag is not part of the protocol
    #[error("unknown packet type '{tag}'")]
    UnknownPacket { tag: String },

    // ===== Sensor Errors =====
    /// Sensor failed to open its interface
    #[error("sensor '{sensor}' failed to open: {message}")]
    SensorOpen { sensor: String, message: String },

    /// Sensor I/O failure while running
    #[error("sensor '{sensor}' io error: {message}")]
    SensorIo { sensor: String, message: String },

    // ===== Handler Errors =====
    /// Data handler write error
    #[error("handler '{handler}' write error: {message}")]
    HandlerWrite { handler: String, message: String },

    // ===== Platform Errors =====
    /// Floating point time representation cannot resolve the required precision
    #[error("insufficient time precision: {message}")]
    Precision { message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create malformed packet error
    pub fn malformed(tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedPacket {
            tag: tag.into(),
            message: message.into(),
        }
    }

    /// Create sensor open error
    pub fn sensor_open(sensor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SensorOpen {
            sensor: sensor.into(),
            message: message.into(),
        }
    }

    /// Create sensor io error
    pub fn sensor_io(sensor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SensorIo {
            sensor: sensor.into(),
            message: message.into(),
        }
    }

    /// Create handler write error
    pub fn handler_write(handler: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HandlerWrite {
            handler: handler.into(),
            message: message.into(),
        }
    }

    /// True for errors caused by a bad datagram/frame rather than local state.
    pub fn is_wire_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedPacket { .. } | Self::UnknownPacket { .. }
        )
    }
}
