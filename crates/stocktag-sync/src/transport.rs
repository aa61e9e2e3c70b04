//! # Link Manager
//!
//! WebSocket link to the remote inventory service with bounded queues,
//! automatic reconnection, and ordered redelivery.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    WebSocket Connection States                          │
//! │                                                                         │
//! │  ┌────────────┐    connect()    ┌────────────┐                         │
//! │  │Disconnected│ ──────────────► │ Connecting │                         │
//! │  └────────────┘                 └─────┬──────┘                         │
//! │        ▲                              │                                 │
//! │        │                    success   │   failure                       │
//! │        │                        ┌─────┴─────┐                          │
//! │        │                        ▼           ▼                           │
//! │        │              ┌────────────┐  ┌────────────┐                   │
//! │        │              │ Connected  │  │ Backoff    │                   │
//! │        │              └─────┬──────┘  └─────┬──────┘                   │
//! │        │                    │               │                           │
//! │        │              disconnect/error      │  timer expired            │
//! │        │                    │               │                           │
//! │        │                    ▼               │                           │
//! │        │              ┌────────────┐        │                           │
//! │        └───────────── │Reconnecting│ ◄──────┘                          │
//! │        (shutdown)     └────────────┘                                    │
//! │                                                                         │
//! │  BACKOFF STRATEGY (Exponential, no jitter)                             │
//! │  ─────────────────────────────────────────                             │
//! │  Failure 1: 5s   Failure 2: 10s   Failure 3: 20s   Failure 4: 40s      │
//! │  Failure 5+: 60s (cap)                                                  │
//! │  Reset to 5s after a connection that stayed up past the grace period   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## While Connected
//! Two duties share the socket: the outbound drain (queue → socket, plus
//! keepalive pings) and the inbound read (socket → queue). Whichever fails
//! first tears the connection down; the other is dropped with it.
//!
//! The envelope being written when a connection dies is kept and written
//! first on the next connection, so the remote side sees the original
//! order. A write that reached the server before the failure was detected
//! is therefore delivered twice.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::protocol::Envelope;

/// Type alias for the WebSocket connection.
pub type WsConnection = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Type alias for the WebSocket write half.
pub type WsSink = SplitSink<WsConnection, WsMessage>;

/// Type alias for the WebSocket read half.
pub type WsSource = SplitStream<WsConnection>;

// =============================================================================
// Link State
// =============================================================================

/// Connection state of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected.
    Disconnected,
    /// Attempting to connect.
    Connecting,
    /// Connected and ready.
    Connected,
    /// Waiting before reconnection attempt.
    Backoff,
    /// Reconnection in progress.
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Backoff => write!(f, "backoff"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

// =============================================================================
// Link Configuration
// =============================================================================

/// Configuration for the link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// WebSocket URL to connect to.
    pub url: String,

    /// Capacity of the outbound and inbound buffers.
    pub buffer_capacity: usize,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// First reconnect delay.
    pub initial_backoff: Duration,

    /// Longest reconnect delay.
    pub max_backoff: Duration,

    /// Uptime after which a lost connection restarts the backoff.
    pub stable_connection: Duration,

    /// Ping interval for keepalive.
    pub ping_interval: Duration,

    /// How long shutdown keeps flushing queued envelopes.
    pub drain_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            url: String::new(),
            buffer_capacity: 256,
            connect_timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
            stable_connection: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(2),
        }
    }
}

// =============================================================================
// Reconnect Policy
// =============================================================================

/// Delay before each reconnect attempt.
///
/// Wraps an [`ExponentialBackoff`] without jitter so the schedule is exact:
/// `initial, 2·initial, 4·initial, …` capped at `max`.
#[derive(Debug)]
pub struct ReconnectPolicy {
    backoff: ExponentialBackoff,
    stable_connection: Duration,
}

impl ReconnectPolicy {
    pub fn new(initial: Duration, max: Duration, stable_connection: Duration) -> Self {
        let backoff = ExponentialBackoff {
            current_interval: initial,
            initial_interval: initial,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: max,
            max_elapsed_time: None, // Retry forever
            ..Default::default()
        };

        ReconnectPolicy {
            backoff,
            stable_connection,
        }
    }

    /// Creates the policy described by `config`.
    pub fn from_config(config: &LinkConfig) -> Self {
        Self::new(
            config.initial_backoff,
            config.max_backoff,
            config.stable_connection,
        )
    }

    /// Returns the delay before the next attempt and grows the following one.
    pub fn next_delay(&mut self) -> Duration {
        self.backoff
            .next_backoff()
            .unwrap_or(self.backoff.max_interval)
    }

    /// Records how long the last connection stayed up. Past the grace
    /// period the schedule starts over.
    pub fn connection_ended(&mut self, uptime: Duration) {
        if uptime >= self.stable_connection {
            debug!(?uptime, "Connection was stable, resetting backoff");
            self.backoff.reset();
        }
    }
}

// =============================================================================
// Link Handle
// =============================================================================

/// Handle for publishing envelopes and observing the link.
#[derive(Clone)]
pub struct LinkHandle {
    /// Sender for outgoing envelopes.
    outbound_tx: mpsc::Sender<Envelope>,

    /// Current connection state.
    state: Arc<RwLock<ConnectionState>>,
}

impl LinkHandle {
    /// Queues an envelope for delivery.
    ///
    /// Waits while the outbound buffer is full; never drops. Fails only once
    /// the link has shut down.
    pub async fn publish(&self, envelope: Envelope) -> SyncResult<()> {
        debug!(message = %envelope.label(), id = %envelope.message_id, "Queueing envelope");
        self.outbound_tx
            .send(envelope)
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }

    /// Returns the current connection state.
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Returns true if currently connected.
    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Connected
    }

    /// Handle whose envelopes land in the returned receiver instead of a
    /// socket.
    #[cfg(test)]
    pub(crate) fn detached(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let handle = LinkHandle {
            outbound_tx,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
        };
        (handle, outbound_rx)
    }
}

// =============================================================================
// Link Manager
// =============================================================================

/// How a connection ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionEnd {
    /// The server sent a close frame.
    ClosedByServer,
    /// Shutdown was requested (or every publisher is gone).
    Shutdown,
}

/// WebSocket link with automatic reconnection.
///
/// ## Usage
/// ```rust,ignore
/// let shutdown = CancellationToken::new();
/// let (link, handle, inbound_rx) = LinkManager::new(config, shutdown.clone());
/// let task = tokio::spawn(link.run());
///
/// handle.publish(Envelope::lookup_request("P-100")).await?;
/// ```
pub struct LinkManager {
    config: LinkConfig,
    state: Arc<RwLock<ConnectionState>>,
    outbound_rx: mpsc::Receiver<Envelope>,
    inbound_tx: mpsc::Sender<Envelope>,
    shutdown: CancellationToken,

    /// Encoded frame whose write has not completed yet.
    pending_frame: Option<String>,
}

impl LinkManager {
    /// Creates the link and returns the publishing handle plus the inbound
    /// feed. Nothing connects until [`LinkManager::run`] is spawned.
    pub fn new(
        config: LinkConfig,
        shutdown: CancellationToken,
    ) -> (Self, LinkHandle, mpsc::Receiver<Envelope>) {
        let capacity = config.buffer_capacity.max(1);
        let (outbound_tx, outbound_rx) = mpsc::channel::<Envelope>(capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel::<Envelope>(capacity);
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));

        let link = LinkManager {
            config,
            state: state.clone(),
            outbound_rx,
            inbound_tx,
            shutdown,
            pending_frame: None,
        };

        let handle = LinkHandle { outbound_tx, state };

        (link, handle, inbound_rx)
    }

    /// Main link loop. Runs until the shutdown token is cancelled.
    pub async fn run(mut self) {
        info!(url = %self.config.url, "Link starting");

        let mut policy = ReconnectPolicy::from_config(&self.config);

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            self.set_state(ConnectionState::Connecting).await;

            let connected = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = self.connect_with_timeout() => result,
            };

            match connected {
                Ok(ws_stream) => {
                    info!(url = %self.config.url, "Link connected");
                    self.set_state(ConnectionState::Connected).await;

                    let started = Instant::now();
                    let outcome = self.connection_loop(ws_stream).await;
                    policy.connection_ended(started.elapsed());

                    match outcome {
                        Ok(ConnectionEnd::Shutdown) => break,
                        Ok(ConnectionEnd::ClosedByServer) => {
                            info!("Server closed the link");
                        }
                        Err(e) if e.is_retryable() => {
                            warn!(error = %e, "Link connection lost");
                        }
                        Err(e) => {
                            error!(error = %e, "Link connection failed unexpectedly");
                        }
                    }
                }
                Err(e) if e.is_retryable() => {
                    warn!(error = %e, "Failed to connect");
                }
                Err(e) => {
                    error!(error = %e, "Failed to connect");
                }
            }

            self.set_state(ConnectionState::Backoff).await;

            let delay = policy.next_delay();
            debug!(?delay, "Waiting before reconnect");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    self.set_state(ConnectionState::Reconnecting).await;
                }
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown during backoff");
                    break;
                }
            }
        }

        self.discard_remaining();
        self.set_state(ConnectionState::Disconnected).await;
        info!("Link stopped");
    }

    async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }

    /// Connects with timeout.
    async fn connect_with_timeout(&self) -> SyncResult<WsConnection> {
        match timeout(self.config.connect_timeout, connect_async(&self.config.url)).await {
            Ok(Ok((ws_stream, response))) => {
                debug!(status = ?response.status(), "WebSocket handshake complete");
                Ok(ws_stream)
            }
            Ok(Err(e)) => Err(SyncError::from(e)),
            Err(_) => Err(SyncError::Timeout(self.config.connect_timeout.as_secs())),
        }
    }

    /// Runs both connection duties until one of them ends, then drains the
    /// outbound buffer if the link is shutting down.
    async fn connection_loop(&mut self, ws_stream: WsConnection) -> SyncResult<ConnectionEnd> {
        let (mut sink, mut source) = ws_stream.split();

        let outcome = tokio::select! {
            result = Self::outbound_duty(
                &mut sink,
                &mut self.outbound_rx,
                &mut self.pending_frame,
                self.config.ping_interval,
                &self.shutdown,
            ) => result,
            result = Self::inbound_duty(&mut source, &self.inbound_tx) => result,
        };

        if let Ok(ConnectionEnd::Shutdown) = outcome {
            self.drain(&mut sink).await;
        }

        outcome
    }

    /// Outbound drain: queue → socket, plus keepalive pings.
    async fn outbound_duty(
        sink: &mut WsSink,
        outbound_rx: &mut mpsc::Receiver<Envelope>,
        pending_frame: &mut Option<String>,
        ping_every: Duration,
        shutdown: &CancellationToken,
    ) -> SyncResult<ConnectionEnd> {
        // Redeliver the frame interrupted by the previous connection first.
        if let Some(frame) = pending_frame.as_ref() {
            debug!("Resending interrupted envelope");
            sink.send(WsMessage::Text(frame.clone().into())).await?;
            *pending_frame = None;
        }

        let mut ping = tokio::time::interval_at(Instant::now() + ping_every, ping_every);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => return Ok(ConnectionEnd::Shutdown),

                next = outbound_rx.recv() => {
                    let Some(envelope) = next else {
                        info!("All publishers dropped, closing link");
                        return Ok(ConnectionEnd::Shutdown);
                    };

                    let frame = match envelope.to_json() {
                        Ok(frame) => frame,
                        Err(e) => {
                            error!(error = %e, message = %envelope.label(), "Dropping unencodable envelope");
                            continue;
                        }
                    };

                    debug!(message = %envelope.label(), id = %envelope.message_id, "Sending envelope");
                    *pending_frame = Some(frame.clone());
                    sink.send(WsMessage::Text(frame.into())).await?;
                    *pending_frame = None;
                }

                _ = ping.tick() => {
                    sink.send(WsMessage::Ping(Vec::new().into())).await?;
                    debug!("Sent ping");
                }
            }
        }
    }

    /// Inbound read: socket → queue. Malformed envelopes are dropped; socket
    /// errors end the connection.
    async fn inbound_duty(
        source: &mut WsSource,
        inbound_tx: &mpsc::Sender<Envelope>,
    ) -> SyncResult<ConnectionEnd> {
        while let Some(frame) = source.next().await {
            match frame? {
                WsMessage::Text(text) => match Envelope::from_json(&text) {
                    Ok(envelope) => {
                        debug!(message = %envelope.label(), id = %envelope.message_id, "Received envelope");
                        if inbound_tx.send(envelope).await.is_err() {
                            return Err(SyncError::ChannelError("Inbound receiver dropped".into()));
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Dropping malformed inbound message");
                    }
                },
                WsMessage::Binary(_) => {
                    warn!("Dropping unexpected binary frame");
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) => {
                    // Pongs to server pings are queued by tungstenite itself.
                    debug!("Keepalive frame");
                }
                WsMessage::Close(frame) => {
                    info!(?frame, "Received close frame");
                    return Ok(ConnectionEnd::ClosedByServer);
                }
                WsMessage::Frame(_) => {}
            }
        }

        Err(SyncError::Disconnected)
    }

    /// Flushes queued envelopes for at most the drain timeout, then closes
    /// the socket.
    async fn drain(&mut self, sink: &mut WsSink) {
        let drain_timeout = self.config.drain_timeout;
        let pending_frame = &mut self.pending_frame;
        let outbound_rx = &mut self.outbound_rx;

        let flush = async {
            let mut flushed = 0usize;
            if let Some(frame) = pending_frame.as_ref() {
                sink.send(WsMessage::Text(frame.clone().into())).await?;
                *pending_frame = None;
                flushed += 1;
            }
            while let Ok(envelope) = outbound_rx.try_recv() {
                let frame = envelope.to_json()?;
                *pending_frame = Some(frame.clone());
                sink.send(WsMessage::Text(frame.into())).await?;
                *pending_frame = None;
                flushed += 1;
            }
            Ok::<usize, SyncError>(flushed)
        };

        match timeout(drain_timeout, flush).await {
            Ok(Ok(flushed)) => info!(flushed, "Outbound buffer flushed"),
            Ok(Err(e)) => warn!(error = %e, "Flush interrupted"),
            Err(_) => warn!(?drain_timeout, "Flush timed out"),
        }

        let _ = sink.send(WsMessage::Close(None)).await;
    }

    /// Closes the outbound buffer and logs what will never be sent.
    fn discard_remaining(&mut self) {
        self.outbound_rx.close();

        let mut discarded = usize::from(self.pending_frame.take().is_some());
        while self.outbound_rx.try_recv().is_ok() {
            discarded += 1;
        }

        if discarded > 0 {
            warn!(discarded, "Discarding undelivered envelopes");
        }
    }
}
