//! Built-in sensor drivers

mod mock;
mod passers;

pub use mock::{MockDriver, MockSettings};
pub use passers::{OrientationPasser, PositionPasser, PASSER_WAIT};
