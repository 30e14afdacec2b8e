//! Packet transports
//!
//! A transport moves whole [`Packet`]s to and from one peer. Datagram
//! transports carry one packet per datagram; stream transports carry one
//! packet per `<...>` frame (see [`crate::stream`]).

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use contracts::{ContractError, Packet};
use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::error::ControlError;

/// Receive buffer size for one datagram
pub const DATAGRAM_BUFFER: usize = 2048;

/// One peer's packet channel
#[trait_variant::make(Transport: Send)]
pub trait LocalTransport {
    /// Remote address
    fn peer(&self) -> SocketAddr;

    /// Transmit one packet.
    async fn send(&mut self, packet: &Packet) -> Result<(), ControlError>;

    /// Receive the next well-formed packet.
    ///
    /// Malformed packets are logged and skipped. Returns `Ok(None)` when
    /// `timeout` elapses first; `None` waits forever.
    async fn recv(&mut self, timeout: Option<Duration>) -> Result<Option<Packet>, ControlError>;
}

/// Decode one datagram payload.
pub fn decode_datagram(bytes: &[u8]) -> Result<Packet, ContractError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| ContractError::malformed("", "payload is not valid UTF-8"))?;
    Packet::decode(text)
}

pub(crate) fn log_dropped(peer: SocketAddr, error: &ContractError) {
    let reason = match error {
        ContractError::UnknownPacket { .. } => "unknown",
        _ => "malformed",
    };
    tracing::warn!(%peer, %error, "dropping packet");
    observability::record_packet_dropped(reason);
}

/// UDP socket dedicated to a single peer
#[derive(Debug)]
pub struct DatagramTransport {
    socket: UdpSocket,
    peer: SocketAddr,
    buf: Vec<u8>,
}

impl DatagramTransport {
    /// Bind an ephemeral port on `local_ip` and connect it to `peer`.
    pub async fn connect(local_ip: IpAddr, peer: SocketAddr) -> Result<Self, ControlError> {
        let bind_addr = SocketAddr::new(local_ip, 0);
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| ControlError::bind(bind_addr.to_string(), e))?;
        socket
            .connect(peer)
            .await
            .map_err(|e| ControlError::connect(peer.to_string(), e))?;

        Ok(Self {
            socket,
            peer,
            buf: vec![0; DATAGRAM_BUFFER],
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Transport for DatagramTransport {
    fn peer(&self) -> SocketAddr {
        self.peer
    }

    async fn send(&mut self, packet: &Packet) -> Result<(), ControlError> {
        self.socket.send(packet.encode().as_bytes()).await?;
        Ok(())
    }

    async fn recv(&mut self, timeout: Option<Duration>) -> Result<Option<Packet>, ControlError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let n = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, self.socket.recv(&mut self.buf)).await
                    {
                        Ok(read) => read?,
                        Err(_) => return Ok(None),
                    }
                }
                None => self.socket.recv(&mut self.buf).await?,
            };

            match decode_datagram(&self.buf[..n]) {
                Ok(packet) => return Ok(Some(packet)),
                Err(e) => log_dropped(self.peer, &e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_decode_datagram_rejects_binary() {
        assert!(decode_datagram(&[0xff, 0xfe]).is_err());
        assert_eq!(decode_datagram(b"ack").unwrap(), Packet::Ack);
    }

    #[tokio::test]
    async fn test_datagram_transport_exchange() {
        let peer = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let mut transport = DatagramTransport::connect(Ipv4Addr::LOCALHOST.into(), peer_addr)
            .await
            .unwrap();
        let local = transport.local_addr().unwrap();

        Transport::send(&mut transport, &Packet::Ack).await.unwrap();
        let mut buf = [0u8; 64];
        let (n, from) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ack");
        assert_eq!(from, local);

        // Garbage is skipped, the next good packet is returned.
        peer.send_to(b"bogus,1", local).await.unwrap();
        peer.send_to(b"3", local).await.unwrap();
        let packet = Transport::recv(&mut transport, Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(packet, Some(Packet::SyncEcho { id: 3 }));

        let timed_out = Transport::recv(&mut transport, Some(Duration::from_millis(30)))
            .await
            .unwrap();
        assert_eq!(timed_out, None);
    }
}
