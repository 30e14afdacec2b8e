//! ControlClient - sensor node end of the control link
//!
//! Subscribes to a server, answers the sync handshake, applies incoming
//! time, position and orientation to the node's sources and routes remote
//! commands to the sensors.

use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use contracts::{ClientConfig, ClockSyncConfig, CommandSink, Packet, SharedClock};
use observability::{MetricsSummary, SyncMetricsAggregator};
use sync_engine::{SourceSet, SyncEstimator, SyncOutcome};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::error::ControlError;
use crate::transport::{decode_datagram, log_dropped, DATAGRAM_BUFFER};

/// Sensor node link to a [`crate::ControlServer`]
pub struct ControlClient {
    socket: UdpSocket,
    server: SocketAddr,
    config: ClientConfig,
    clock: SharedClock,
    estimator: SyncEstimator,
    sync_stats: SyncMetricsAggregator,
    sources: SourceSet,
    commands: Arc<dyn CommandSink>,
    handler_address: Option<SocketAddr>,
    receiving: bool,
    buf: Vec<u8>,
}

impl std::fmt::Debug for ControlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlClient")
            .field("server", &self.server)
            .field("handler_address", &self.handler_address)
            .finish()
    }
}

impl ControlClient {
    /// Resolve the server address and bind an ephemeral local socket.
    pub async fn bind(
        config: ClientConfig,
        sync: ClockSyncConfig,
        sources: SourceSet,
        commands: Arc<dyn CommandSink>,
        clock: SharedClock,
    ) -> Result<Self, ControlError> {
        let address = config.server_address();
        let server = tokio::net::lookup_host(&address)
            .await
            .map_err(|e| ControlError::connect(&address, e))?
            .next()
            .ok_or_else(|| ControlError::Resolve(address.clone()))?;

        let local: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| ControlError::bind(local.to_string(), e))?;

        Ok(Self {
            socket,
            server,
            config,
            estimator: SyncEstimator::new(sync, clock.clone()),
            sync_stats: SyncMetricsAggregator::new(),
            clock,
            sources,
            commands,
            handler_address: None,
            receiving: false,
            buf: vec![0; DATAGRAM_BUFFER],
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server
    }

    /// Address of the server-side session that acknowledged us.
    pub fn handler_address(&self) -> Option<SocketAddr> {
        self.handler_address
    }

    pub fn estimator(&self) -> &SyncEstimator {
        &self.estimator
    }

    /// Convergence rounds evaluated so far.
    pub fn sync_summary(&self) -> MetricsSummary {
        self.sync_stats.summary()
    }

    pub fn sources(&self) -> &SourceSet {
        &self.sources
    }

    /// Subscribe until the server acknowledges. Retries forever.
    #[instrument(name = "client_connect", skip(self), fields(server = %self.server))]
    pub async fn connect(&mut self, require_sync: bool) {
        info!("Connecting to server");
        let request = Packet::Subscribe { require_sync }.encode();
        let wait = self.config.connect_timeout();

        loop {
            if let Err(e) = self.socket.send_to(request.as_bytes(), self.server).await {
                warn!(error = %e, "subscribe failed");
                tokio::time::sleep(wait).await;
                continue;
            }

            match timeout(wait, self.socket.recv_from(&mut self.buf)).await {
                Err(_) => debug!("no ack yet, retrying"),
                Ok(Err(e)) => {
                    debug!(error = %e, "receive failed while connecting");
                    tokio::time::sleep(wait).await;
                }
                Ok(Ok((n, from))) => match decode_datagram(&self.buf[..n]) {
                    Ok(Packet::Ack) => {
                        self.handler_address = Some(from);
                        break;
                    }
                    Ok(other) => debug!(tag = other.tag(), "ignoring packet while connecting"),
                    Err(e) => log_dropped(from, &e),
                },
            }
        }
        info!("Successfully connected.");
    }

    /// Connect, then process packets until `shutdown` resolves.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        tokio::select! {
            _ = &mut shutdown => {}
            _ = self.serve() => {}
        }
        info!("control client stopped");
    }

    async fn serve(&mut self) {
        self.connect(self.config.require_sync).await;
        let silence = self.config.silence_timeout();

        loop {
            let received = match timeout(silence, self.socket.recv_from(&mut self.buf)).await {
                Ok(Ok(received)) => received,
                Ok(Err(e)) => {
                    warn!(error = %e, "Connection lost. Reconnecting...");
                    self.connect(false).await;
                    continue;
                }
                Err(_) => {
                    warn!("Connection lost. Reconnecting...");
                    // A time reference is already established.
                    self.connect(false).await;
                    continue;
                }
            };

            let (n, from) = received;
            match decode_datagram(&self.buf[..n]) {
                Ok(packet) => {
                    if let Err(e) = self.process(packet, from).await {
                        warn!(%from, error = %e, "failed to process packet");
                    }
                }
                Err(e) => log_dropped(from, &e),
            }
        }
    }

    /// Apply one packet received from `from`.
    pub async fn process(&mut self, packet: Packet, from: SocketAddr) -> Result<(), ControlError> {
        if !self.receiving {
            self.receiving = true;
            info!("Messages being received.");
        }
        observability::record_packet_received(packet.tag());

        match packet {
            Packet::Time {
                utc_time,
                time_delay,
            } => {
                self.sources.time.set(utc_time + time_delay.unwrap_or(0.0));
            }
            Packet::Position {
                time_delay,
                position,
            } => {
                self.sources.time.set(position.utc_time + time_delay);
                self.sources.position.set(position);
            }
            Packet::Orientation {
                time_delay,
                orientation,
            } => {
                self.sources.time.set(orientation.utc_time + time_delay);
                self.sources.orientation.set(orientation);
            }
            Packet::Sync1 { id, utc_time } => {
                let echo = self.estimator.on_sync1(id, utc_time);
                self.reply(&echo, from).await?;
            }
            Packet::Sync2 { id, rtt } => {
                let outcome = self.estimator.on_sync2(id, rtt);
                match &outcome {
                    SyncOutcome::Converged(estimate) => {
                        self.sources
                            .time
                            .set_with_ref(estimate.mean_time, estimate.computed_at);
                        self.sync_stats
                            .update(true, estimate.max_offset, &estimate.latencies);
                    }
                    SyncOutcome::Diverged { max_offset } => {
                        self.sync_stats.update(false, *max_offset, &[]);
                    }
                    _ => {}
                }
                if !matches!(outcome, SyncOutcome::Ignored) {
                    self.reply(&outcome.reply(), from).await?;
                }
            }
            Packet::Command { selector, command } => {
                let routed = self.commands.dispatch(&selector, &command);
                debug!(%selector, %command, routed, "command received");
            }
            other => debug!(tag = other.tag(), %from, "ignoring packet"),
        }
        Ok(())
    }

    async fn reply(&self, packet: &Packet, to: SocketAddr) -> Result<(), ControlError> {
        self.socket.send_to(packet.encode().as_bytes(), to).await?;
        Ok(())
    }

    /// Local clock used for sync bookkeeping.
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }
}
