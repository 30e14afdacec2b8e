//! PeerSession - one remote peer with its own outbound queue and worker task

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use contracts::{OrientationValue, Packet, PositionValue, SensorSelector, SharedClock, UtcTime};
use observability::SendOutcome;
use sync_engine::SyncProber;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ControlError;
use crate::metrics::SessionMetrics;
use crate::transport::Transport;

/// A record waiting in a session's outbound queue
///
/// `captured_at` is the local clock reading when the value was measured;
/// the worker turns it into the packet's `time_delay` at transmit time.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundRecord {
    Time {
        utc_time: UtcTime,
        captured_at: f64,
    },
    Position {
        position: PositionValue,
        captured_at: f64,
    },
    Orientation {
        orientation: OrientationValue,
        captured_at: f64,
    },
    Command {
        selector: SensorSelector,
        command: String,
    },
}

impl OutboundRecord {
    /// Build the packet to transmit at local instant `now`.
    pub fn into_packet(self, now: f64) -> Packet {
        let delay = |captured_at: f64| (now - captured_at).max(0.0);
        match self {
            Self::Time {
                utc_time,
                captured_at,
            } => Packet::Time {
                utc_time,
                time_delay: Some(delay(captured_at)),
            },
            Self::Position {
                position,
                captured_at,
            } => Packet::Position {
                time_delay: delay(captured_at),
                position,
            },
            Self::Orientation {
                orientation,
                captured_at,
            } => Packet::Orientation {
                time_delay: delay(captured_at),
                orientation,
            },
            Self::Command { selector, command } => Packet::Command { selector, command },
        }
    }
}

/// `(utc_time, time_delay)` of a time-bearing packet.
fn time_fields(packet: &Packet) -> Option<(UtcTime, Option<f64>)> {
    match packet {
        Packet::Time {
            utc_time,
            time_delay,
        } => Some((*utc_time, *time_delay)),
        Packet::Position {
            time_delay,
            position,
        } => Some((position.utc_time, Some(*time_delay))),
        Packet::Orientation {
            time_delay,
            orientation,
        } => Some((orientation.utc_time, Some(*time_delay))),
        _ => None,
    }
}

/// Per-session behaviour
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Run the sync handshake before time-bearing records flow
    pub require_sync: bool,
    /// Wait for each handshake reply
    pub sync_reply_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            require_sync: true,
            sync_reply_timeout: Duration::from_secs(1),
        }
    }
}

/// Handle to a running peer session
pub struct SessionHandle {
    peer: SocketAddr,
    /// Channel to the worker
    tx: mpsc::UnboundedSender<OutboundRecord>,
    synced: Arc<AtomicBool>,
    metrics: Arc<SessionMetrics>,
    worker_handle: JoinHandle<()>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("peer", &self.peer)
            .field("synced", &self.is_synced())
            .finish()
    }
}

impl SessionHandle {
    /// Create a session over `transport` and spawn its worker task.
    pub fn spawn<T: Transport + 'static>(
        transport: T,
        options: SessionOptions,
        clock: SharedClock,
    ) -> Self {
        let peer = transport.peer();
        let (tx, rx) = mpsc::unbounded_channel();
        let synced = Arc::new(AtomicBool::new(!options.require_sync));
        let metrics = Arc::new(SessionMetrics::new());

        let worker = SessionWorker {
            transport,
            prober: SyncProber::new(clock.clone()),
            clock,
            synced: Arc::clone(&synced),
            metrics: Arc::clone(&metrics),
            reply_timeout: options.sync_reply_timeout,
        };
        let worker_handle = tokio::spawn(worker.run(rx));

        Self {
            peer,
            tx,
            synced,
            metrics,
            worker_handle,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn metrics(&self) -> &Arc<SessionMetrics> {
        &self.metrics
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Force a new sync handshake before the next time-bearing record.
    pub fn resync(&self) {
        info!(peer = %self.peer, "resync requested");
        self.synced.store(false, Ordering::Release);
    }

    /// Queue a record (never blocks).
    ///
    /// Returns false if the worker is gone.
    pub fn enqueue(&self, record: OutboundRecord) -> bool {
        match self.tx.send(record) {
            Ok(()) => {
                self.metrics.inc_queue_len();
                true
            }
            Err(_) => {
                error!(peer = %self.peer, "session worker closed unexpectedly");
                false
            }
        }
    }

    pub fn send_time(&self, utc_time: UtcTime, captured_at: f64) -> bool {
        self.enqueue(OutboundRecord::Time {
            utc_time,
            captured_at,
        })
    }

    pub fn send_position(&self, position: PositionValue, captured_at: f64) -> bool {
        self.enqueue(OutboundRecord::Position {
            position,
            captured_at,
        })
    }

    pub fn send_orientation(&self, orientation: OrientationValue, captured_at: f64) -> bool {
        self.enqueue(OutboundRecord::Orientation {
            orientation,
            captured_at,
        })
    }

    pub fn send_command(&self, selector: SensorSelector, command: impl Into<String>) -> bool {
        self.enqueue(OutboundRecord::Command {
            selector,
            command: command.into(),
        })
    }

    pub fn send_command_by_type(&self, sensor_type: &str, command: &str) -> bool {
        self.send_command(SensorSelector::ByType(sensor_type.to_string()), command)
    }

    pub fn send_command_by_name(&self, name: &str, command: &str) -> bool {
        self.send_command(SensorSelector::ByName(name.to_string()), command)
    }

    pub fn send_command_by_id(&self, id: u32, command: &str) -> bool {
        self.send_command(SensorSelector::ById(id), command)
    }

    /// Stop accepting records, drain the queue and wait for the worker.
    #[instrument(name = "session_shutdown", skip(self), fields(peer = %self.peer))]
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker_handle.await {
            error!(peer = %self.peer, error = ?e, "session worker panicked");
        }
        debug!(peer = %self.peer, "session shutdown complete");
    }
}

/// State owned by the draining task
struct SessionWorker<T> {
    transport: T,
    prober: SyncProber,
    clock: SharedClock,
    synced: Arc<AtomicBool>,
    metrics: Arc<SessionMetrics>,
    reply_timeout: Duration,
}

impl<T: Transport> SessionWorker<T> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<OutboundRecord>) {
        let peer = self.transport.peer();
        debug!(%peer, "session worker started");

        while let Some(record) = rx.recv().await {
            self.metrics.set_queue_len(rx.len());
            let packet = record.into_packet(self.clock.now());
            let time_bearing = time_fields(&packet);

            if let Some((utc_time, time_delay)) = time_bearing {
                if !self.synced.load(Ordering::Acquire) && self.try_sync(utc_time, time_delay).await
                {
                    self.synced.store(true, Ordering::Release);
                    info!(%peer, "peer synced");
                }
                if !self.synced.load(Ordering::Acquire) {
                    self.metrics.record(SendOutcome::Withheld);
                    continue;
                }
            }

            match self.transport.send(&packet).await {
                Ok(()) => self.metrics.record(SendOutcome::Sent),
                Err(e) => {
                    self.metrics.record(SendOutcome::Failed);
                    warn!(%peer, tag = packet.tag(), error = %e, "send failed");
                }
            }
        }

        debug!(%peer, "session worker stopped");
    }

    /// One handshake driven by a time-bearing record. Returns the peer's verdict.
    async fn try_sync(&mut self, utc_time: UtcTime, time_delay: Option<f64>) -> bool {
        let Some(probe) = self.prober.probe_time(utc_time, time_delay) else {
            return false;
        };
        let sync1 = self.prober.begin(probe);
        let Packet::Sync1 { id, .. } = sync1 else {
            return false;
        };
        self.metrics.inc_sync_attempts();

        match self.handshake(&sync1, id).await {
            Ok(Some(verdict)) => {
                debug!(peer = %self.transport.peer(), id, verdict, "sync round answered");
                verdict
            }
            Ok(None) => {
                debug!(peer = %self.transport.peer(), id, "sync attempt timed out");
                self.prober.abandon(id);
                false
            }
            Err(e) => {
                warn!(peer = %self.transport.peer(), id, error = %e, "sync attempt failed");
                self.prober.abandon(id);
                false
            }
        }
    }

    async fn handshake(&mut self, sync1: &Packet, id: u64) -> Result<Option<bool>, ControlError> {
        self.transport.send(sync1).await?;

        let deadline = Instant::now() + self.reply_timeout;
        let sync2 = loop {
            match self.recv_until(deadline).await? {
                None => return Ok(None),
                Some(Packet::SyncEcho { id: echoed }) if echoed == id => {
                    break self.prober.on_echo(id);
                }
                Some(other) => debug!(tag = other.tag(), "ignoring packet while awaiting echo"),
            }
        };
        let Some(sync2) = sync2 else {
            return Ok(None);
        };
        self.transport.send(&sync2).await?;

        let deadline = Instant::now() + self.reply_timeout;
        loop {
            match self.recv_until(deadline).await? {
                None => return Ok(None),
                Some(Packet::SyncResult(verdict)) => return Ok(Some(verdict)),
                Some(other) => debug!(tag = other.tag(), "ignoring packet while awaiting verdict"),
            }
        }
    }

    async fn recv_until(&mut self, deadline: Instant) -> Result<Option<Packet>, ControlError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        self.transport.recv(Some(remaining)).await
    }
}
