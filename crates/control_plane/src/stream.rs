//! StreamChannel: `<...>` framed packets over TCP
//!
//! [`StreamTransport`] is the receiving/sending end of one connection.
//! [`StreamPublisher`] is the feeding side used by a GPS adapter process: it
//! pushes time, position, orientation and command frames to a server's
//! stream listener and reconnects when the link drops.

use std::net::SocketAddr;
use std::time::Duration;

use contracts::{OrientationValue, Packet, PositionValue, SensorSelector, SharedClock, UtcTime};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ControlError;
use crate::framing::FrameBuffer;
use crate::session::OutboundRecord;
use crate::transport::{log_dropped, Transport};

const READ_CHUNK: usize = 1024;

/// One framed TCP connection
#[derive(Debug)]
pub struct StreamTransport {
    stream: TcpStream,
    peer: SocketAddr,
    frames: FrameBuffer,
    buf: Vec<u8>,
}

impl StreamTransport {
    pub async fn connect(addr: &str) -> Result<Self, ControlError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ControlError::connect(addr, e))?;
        Ok(Self::from_stream(stream)?)
    }

    /// Wrap an accepted connection.
    pub fn from_stream(stream: TcpStream) -> std::io::Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            peer,
            frames: FrameBuffer::new(),
            buf: vec![0; READ_CHUNK],
        })
    }

    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.stream.shutdown().await
    }
}

impl Transport for StreamTransport {
    fn peer(&self) -> SocketAddr {
        self.peer
    }

    async fn send(&mut self, packet: &Packet) -> Result<(), ControlError> {
        self.stream.write_all(packet.to_frame().as_bytes()).await?;
        Ok(())
    }

    async fn recv(&mut self, timeout: Option<Duration>) -> Result<Option<Packet>, ControlError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            while let Some(frame) = self.frames.next_frame() {
                match Packet::decode(&frame) {
                    Ok(packet) => return Ok(Some(packet)),
                    Err(e) => log_dropped(self.peer, &e),
                }
            }

            let read = self.stream.read(&mut self.buf);
            let n = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, read).await {
                    Ok(n) => n?,
                    Err(_) => return Ok(None),
                },
                None => read.await?,
            };
            if n == 0 {
                return Err(ControlError::Closed { peer: self.peer });
            }
            self.frames.extend(&self.buf[..n]);
        }
    }
}

/// Reconnecting TCP feeder for a server's stream listener
pub struct StreamPublisher {
    addr: String,
    clock: SharedClock,
    transport: Option<StreamTransport>,
}

impl std::fmt::Debug for StreamPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPublisher")
            .field("addr", &self.addr)
            .field("connected", &self.transport.is_some())
            .finish()
    }
}

impl StreamPublisher {
    /// Connect to `addr` (`host:port`).
    pub async fn connect(addr: impl Into<String>, clock: SharedClock) -> Result<Self, ControlError> {
        let addr = addr.into();
        let transport = StreamTransport::connect(&addr).await?;
        info!(%addr, "stream publisher connected");
        Ok(Self {
            addr,
            clock,
            transport: Some(transport),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn send_time(&mut self, utc_time: UtcTime, captured_at: f64) -> Result<(), ControlError> {
        self.publish(OutboundRecord::Time {
            utc_time,
            captured_at,
        })
        .await
    }

    pub async fn send_position(
        &mut self,
        position: PositionValue,
        captured_at: f64,
    ) -> Result<(), ControlError> {
        self.publish(OutboundRecord::Position {
            position,
            captured_at,
        })
        .await
    }

    pub async fn send_orientation(
        &mut self,
        orientation: OrientationValue,
        captured_at: f64,
    ) -> Result<(), ControlError> {
        self.publish(OutboundRecord::Orientation {
            orientation,
            captured_at,
        })
        .await
    }

    pub async fn send_command(
        &mut self,
        selector: SensorSelector,
        command: impl Into<String>,
    ) -> Result<(), ControlError> {
        self.publish(OutboundRecord::Command {
            selector,
            command: command.into(),
        })
        .await
    }

    async fn publish(&mut self, record: OutboundRecord) -> Result<(), ControlError> {
        let packet = record.into_packet(self.clock.now());

        if let Some(transport) = self.transport.as_mut() {
            match transport.send(&packet).await {
                Ok(()) => return Ok(()),
                Err(e) => warn!(addr = %self.addr, error = %e, "Connection lost. Reconnecting..."),
            }
        }

        // One retry over a fresh socket.
        self.transport = None;
        let mut transport = StreamTransport::connect(&self.addr).await?;
        transport.send(&packet).await?;
        self.transport = Some(transport);
        debug!(addr = %self.addr, "stream publisher reconnected");
        Ok(())
    }

    /// Close the connection.
    pub async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.shutdown().await {
                debug!(addr = %self.addr, error = %e, "stream shutdown failed");
            }
        }
    }
}
