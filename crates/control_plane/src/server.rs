//! ControlServer - subscription loop, session table and publishing fan-out

use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use contracts::{
    OrientationValue, Packet, PositionValue, SensorSelector, ServerConfig, SharedClock, UtcTime,
};
use sync_engine::SourceSet;
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::ControlError;
use crate::metrics::MetricsSnapshot;
use crate::session::{OutboundRecord, SessionHandle, SessionOptions};
use crate::stream::StreamTransport;
use crate::transport::{decode_datagram, DatagramTransport, Transport, DATAGRAM_BUFFER};

type SessionTable = HashMap<SocketAddr, SessionHandle>;

/// Cloneable publishing side of a [`ControlServer`]
///
/// Every call fans the record out to all sessions. The table lock is held
/// only while enqueueing, never across I/O.
#[derive(Clone)]
pub struct Publisher {
    sessions: Arc<Mutex<SessionTable>>,
    clock: SharedClock,
    sources: Option<SourceSet>,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("sessions", &self.session_count())
            .finish()
    }
}

impl Publisher {
    fn lock(&self) -> MutexGuard<'_, SessionTable> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn broadcast(&self, record: OutboundRecord) {
        let sessions = self.lock();
        for session in sessions.values() {
            session.enqueue(record.clone());
        }
    }

    /// Publish a UTC time read at local instant `captured_at`.
    pub fn new_time(&self, utc_time: UtcTime, captured_at: f64) {
        self.broadcast(OutboundRecord::Time {
            utc_time,
            captured_at,
        });
    }

    pub fn new_position(&self, position: PositionValue, captured_at: f64) {
        self.broadcast(OutboundRecord::Position {
            position,
            captured_at,
        });
    }

    pub fn new_orientation(&self, orientation: OrientationValue, captured_at: f64) {
        self.broadcast(OutboundRecord::Orientation {
            orientation,
            captured_at,
        });
    }

    pub fn send_command(&self, selector: SensorSelector, command: impl Into<String>) {
        self.broadcast(OutboundRecord::Command {
            selector,
            command: command.into(),
        });
    }

    pub fn session_count(&self) -> usize {
        self.lock().len()
    }

    pub fn is_registered(&self, peer: &SocketAddr) -> bool {
        self.lock().contains_key(peer)
    }

    pub fn is_synced(&self, peer: &SocketAddr) -> Option<bool> {
        self.lock().get(peer).map(SessionHandle::is_synced)
    }

    /// Per-session metric snapshots.
    pub fn session_metrics(&self) -> Vec<(SocketAddr, MetricsSnapshot)> {
        self.lock()
            .iter()
            .map(|(peer, session)| (*peer, session.metrics().snapshot()))
            .collect()
    }

    /// Republish a value received on the stream listener.
    fn republish(&self, packet: Packet) {
        let now = self.clock.now();
        match packet {
            Packet::Time {
                utc_time,
                time_delay,
            } => {
                let delay = time_delay.unwrap_or(0.0);
                if let Some(sources) = &self.sources {
                    sources.time.set(utc_time + delay);
                }
                self.new_time(utc_time, now - delay);
            }
            Packet::Position {
                time_delay,
                position,
            } => {
                if let Some(sources) = &self.sources {
                    sources.time.set(position.utc_time + time_delay);
                    sources.position.set(position.clone());
                }
                self.new_position(position, now - time_delay);
            }
            Packet::Orientation {
                time_delay,
                orientation,
            } => {
                if let Some(sources) = &self.sources {
                    sources.time.set(orientation.utc_time + time_delay);
                    sources.orientation.set(orientation.clone());
                }
                self.new_orientation(orientation, now - time_delay);
            }
            Packet::Command { selector, command } => self.send_command(selector, command),
            other => debug!(tag = other.tag(), "ignoring stream packet"),
        }
    }

    async fn shutdown_sessions(&self) {
        let sessions: Vec<SessionHandle> = self.lock().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.shutdown().await;
        }
    }
}

/// Reference node: accepts subscriptions and owns one session per peer
pub struct ControlServer {
    socket: UdpSocket,
    stream_listener: Option<TcpListener>,
    session_ip: IpAddr,
    reply_timeout: std::time::Duration,
    publisher: Publisher,
}

impl ControlServer {
    /// Bind the subscription socket and, if configured, the stream listener.
    pub async fn bind(config: &ServerConfig, clock: SharedClock) -> Result<Self, ControlError> {
        let addr = format!("{}:{}", config.host, config.port);
        let socket = UdpSocket::bind(&addr)
            .await
            .map_err(|e| ControlError::bind(&addr, e))?;
        let local = socket.local_addr()?;

        let stream_listener = match config.stream_port {
            Some(port) => {
                let stream_addr = format!("{}:{}", config.host, port);
                let listener = TcpListener::bind(&stream_addr)
                    .await
                    .map_err(|e| ControlError::bind(&stream_addr, e))?;
                Some(listener)
            }
            None => None,
        };

        info!(addr = %local, stream = ?config.stream_port, "control server bound");

        Ok(Self {
            socket,
            stream_listener,
            session_ip: local.ip(),
            reply_timeout: config.sync_reply_timeout(),
            publisher: Publisher {
                sessions: Arc::new(Mutex::new(HashMap::new())),
                clock,
                sources: None,
            },
        })
    }

    /// Republish stream listener values into `sources` as well.
    pub fn with_sources(mut self, sources: SourceSet) -> Self {
        self.publisher.sources = Some(sources);
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn stream_addr(&self) -> Option<SocketAddr> {
        self.stream_listener
            .as_ref()
            .and_then(|l| l.local_addr().ok())
    }

    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// Serve until `shutdown` resolves, then drain every session.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<(), ControlError> {
        let stream_task = self.stream_listener.map(|listener| {
            let publisher = self.publisher.clone();
            tokio::spawn(serve_stream_listener(listener, publisher))
        });

        tokio::pin!(shutdown);
        let mut buf = vec![0u8; DATAGRAM_BUFFER];
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((n, from)) => {
                        handle_datagram(
                            &self.socket,
                            &self.publisher,
                            self.session_ip,
                            self.reply_timeout,
                            &buf[..n],
                            from,
                        )
                        .await;
                    }
                    Err(e) => warn!(error = %e, "receive failed"),
                }
            }
        }

        info!("control server stopping");
        if let Some(task) = stream_task {
            task.abort();
        }
        self.publisher.shutdown_sessions().await;
        Ok(())
    }
}

#[instrument(name = "server_datagram", skip_all, fields(%from))]
async fn handle_datagram(
    socket: &UdpSocket,
    publisher: &Publisher,
    session_ip: IpAddr,
    reply_timeout: std::time::Duration,
    bytes: &[u8],
    from: SocketAddr,
) {
    let packet = match decode_datagram(bytes) {
        Ok(packet) => packet,
        Err(e) => {
            crate::transport::log_dropped(from, &e);
            return;
        }
    };
    observability::record_packet_received(packet.tag());

    let Packet::Subscribe { require_sync } = packet else {
        debug!(tag = packet.tag(), "unhandled packet on subscription socket");
        observability::record_packet_dropped("unhandled");
        return;
    };

    if publisher.is_registered(&from) {
        if require_sync {
            if let Some(session) = publisher.lock().get(&from) {
                session.resync();
            }
        }
    } else {
        match DatagramTransport::connect(session_ip, from).await {
            Ok(transport) => {
                let options = SessionOptions {
                    require_sync,
                    sync_reply_timeout: reply_timeout,
                };
                let session = SessionHandle::spawn(transport, options, publisher.clock.clone());
                let count = {
                    let mut sessions = publisher.lock();
                    sessions.insert(from, session);
                    sessions.len()
                };
                observability::record_session_count(count);
                info!(%from, require_sync, sessions = count, "new peer subscribed");
            }
            Err(e) => {
                warn!(%from, error = %e, "cannot open session socket");
                return;
            }
        }
    }

    if let Err(e) = socket.send_to(Packet::Ack.encode().as_bytes(), from).await {
        warn!(%from, error = %e, "failed to send ack");
    }
}

async fn serve_stream_listener(listener: TcpListener, publisher: Publisher) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => match StreamTransport::from_stream(stream) {
                Ok(transport) => {
                    info!(%peer, "stream peer connected");
                    tokio::spawn(serve_stream_peer(transport, publisher.clone()));
                }
                Err(e) => warn!(%peer, error = %e, "cannot set up stream peer"),
            },
            Err(e) => warn!(error = %e, "stream accept failed"),
        }
    }
}

#[instrument(name = "stream_peer", skip_all, fields(peer = %transport.peer()))]
async fn serve_stream_peer(mut transport: StreamTransport, publisher: Publisher) {
    loop {
        match transport.recv(None).await {
            Ok(Some(packet)) => {
                observability::record_packet_received(packet.tag());
                publisher.republish(packet);
            }
            Ok(None) => {}
            Err(e) if e.is_disconnect() => {
                info!(error = %e, "stream peer disconnected");
                break;
            }
            Err(e) => {
                warn!(error = %e, "stream read failed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{SystemClock, TimeMode};
    use std::time::Duration;

    fn loopback_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..ServerConfig::default()
        }
    }

    async fn subscribe(server: SocketAddr, tag: &str) -> (UdpSocket, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.send_to(tag.as_bytes(), server).await.unwrap();
        let mut buf = [0u8; 64];
        let (n, from) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"ack");
        (socket, from)
    }

    #[tokio::test]
    async fn test_subscription_creates_one_session() {
        let server = ControlServer::bind(&loopback_config(), SystemClock::shared())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let publisher = server.publisher();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(server.run(async {
            let _ = stop_rx.await;
        }));

        let (client, ack_from) = subscribe(addr, "add").await;
        assert_eq!(ack_from, addr);
        let client_addr = client.local_addr().unwrap();
        // Re-subscribing from the same address keeps the session.
        client.send_to(b"sync", addr).await.unwrap();
        let mut buf = [0u8; 64];
        let (n, _) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ack");

        assert_eq!(publisher.session_count(), 1);
        assert_eq!(publisher.is_synced(&client_addr), Some(false));

        // Commands are delivered from the session socket, not the main one.
        publisher.send_command(SensorSelector::ByName("cam".into()), "trigger");
        let (n, from) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"cn,cam,trigger");
        assert_ne!(from, addr);

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(publisher.session_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_values_republished() {
        let config = ServerConfig {
            stream_port: Some(0),
            ..loopback_config()
        };
        let clock = SystemClock::shared();
        let sources = SourceSet::new(TimeMode::Simple, clock.clone());
        let server = ControlServer::bind(&config, clock.clone())
            .await
            .unwrap()
            .with_sources(sources.clone());
        let stream_addr = server.stream_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(server.run(async {
            let _ = stop_rx.await;
        }));

        let mut publisher =
            crate::stream::StreamPublisher::connect(stream_addr.to_string(), clock.clone())
                .await
                .unwrap();
        publisher.send_time(1234.5, clock.now()).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !sources.time.is_set() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(sources.time.is_set());
        assert!(sources.time.get() >= 1234.5);

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }
}
