//! # Contracts
//!
//! Frozen interface contracts shared by every crate in the workspace.
//! Business crates depend on this crate only; reverse dependencies are prohibited.
//!
//! ## Time Model
//! - All times are UTC seconds as `f64` (the GPS receiver is the reference clock)
//! - Local instants come from a [`Clock`] so that sync logic can be driven by a manual clock in tests
//! - Values carry the UTC instant they were measured at; "now" is derived by the time sources

mod blueprint;
mod clock;
mod command;
mod driver;
mod error;
mod handler;
mod sensor;
mod sync_config;
mod values;
mod wire;

pub use blueprint::*;
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use command::{CommandSink, NoSensors};
pub use driver::{SampleEmitter, SensorDriver};
pub use error::*;
pub use handler::DataHandler;
pub use sensor::*;
pub use sync_config::ClockSyncConfig;
pub use values::*;
pub use wire::{Packet, FRAME_END, FRAME_START};
