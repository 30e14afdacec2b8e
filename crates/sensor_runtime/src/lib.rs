//! # Sensor Runtime
//!
//! Sensor lifecycle for a sensor node.
//!
//! Responsibilities:
//! - One OS thread per sensor, controlled through atomic stop/resume/close flags
//! - Bounded-time shutdown of every sensor
//! - Command routing by type, name or id
//! - Built-in pass-through and mock drivers
//! - CSV and log data handlers

pub mod drivers;
pub mod error;
pub mod factory;
pub mod handlers;
pub mod manager;
pub mod sensor;

pub use drivers::{MockDriver, MockSettings, OrientationPasser, PositionPasser};
pub use error::SensorError;
pub use factory::{build_sensors, create_driver, create_handlers, BUILTIN_TYPES};
pub use handlers::{CsvLogHandler, HandlerSet, LogHandler};
pub use manager::{CloseReport, SensorManager};
pub use sensor::Sensor;
