//! Sensor runtime error types

use contracts::{ContractError, SensorInfo};
use thiserror::Error;

/// Sensor runtime specific error
#[derive(Debug, Error)]
pub enum SensorError {
    /// Driver could not open its interface
    #[error("sensor {sensor} failed to open: {source}")]
    OpenFailed {
        sensor: String,
        #[source]
        source: ContractError,
    },

    /// Sensor thread could not be created
    #[error("failed to spawn thread for sensor {sensor}: {source}")]
    SpawnFailed {
        sensor: String,
        #[source]
        source: std::io::Error,
    },

    /// Sensor was started twice
    #[error("sensor {sensor} was already started")]
    AlreadyStarted { sensor: String },

    /// No driver for the configured type
    #[error("unknown sensor type '{sensor_type}'")]
    UnknownType { sensor_type: String },

    /// Driver setting did not parse
    #[error("sensor {sensor}: invalid setting '{key}': {message}")]
    InvalidSetting {
        sensor: String,
        key: String,
        message: String,
    },

    /// Wrapped ContractError
    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl SensorError {
    pub fn open_failed(info: &SensorInfo, source: ContractError) -> Self {
        Self::OpenFailed {
            sensor: info.to_string(),
            source,
        }
    }

    pub fn invalid_setting(
        info: &SensorInfo,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidSetting {
            sensor: info.to_string(),
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Result alias
pub type Result<T> = std::result::Result<T, SensorError>;
