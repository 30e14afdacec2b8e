//! # Control Plane
//!
//! Distributes time, position, orientation and sensor commands from a
//! reference node to sensor nodes.
//!
//! Responsibilities:
//! - Datagram subscriptions with one session (socket + worker task) per peer
//! - Sync gating: time-bearing records are withheld until the peer's clock
//!   estimate converges
//! - `<...>` framed stream listener and publisher
//! - Sensor node client that answers the handshake and applies updates

pub mod client;
pub mod error;
pub mod framing;
pub mod metrics;
pub mod server;
pub mod session;
pub mod stream;
pub mod transport;

pub use client::ControlClient;
pub use error::ControlError;
pub use framing::FrameBuffer;
pub use metrics::{MetricsSnapshot, SessionMetrics};
pub use server::{ControlServer, Publisher};
pub use session::{OutboundRecord, SessionHandle, SessionOptions};
pub use stream::{StreamPublisher, StreamTransport};
pub use transport::{DatagramTransport, LocalTransport, Transport};
