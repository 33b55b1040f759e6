//! Connection Manager
//!
//! Owns the feed socket and keeps it alive: token acquisition, socket
//! establishment, channel rejoin, heartbeats, token renewal and self-healing
//! reconnects with backoff.
//!
//! # Connection Flow
//!
//! ```text
//! Authenticating ──► SocketConnecting ──► Connected ──► rejoin registry
//!       │                   │                 │
//!       └──── failure ──────┴─────────────────┴──► SelfHealing ──► backoff ──┐
//!                                                        ▲                   │
//!                                                        └───────────────────┘
//! ```
//!
//! # Concurrency
//!
//! One async mutex guards the connection record. It is never held across the
//! token request or the socket handshake, so `join`/`leave` stay responsive
//! while a reconnect is in flight. Reconnects are serialized by a separate
//! connect gate. The receive loop owns the read half and never takes the
//! lock; it reports socket loss to a supervisor task over a control channel.
//! Retry timers and the heartbeat/renewal timer also only send control
//! messages.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard, mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::codec::{FrameAssembler, MessageFramer};
use super::error::ClientError;
use super::heartbeat::{HeartbeatConfig, HeartbeatManager, TimerEvent};
use super::messages::{HEARTBEAT_TOPIC, InboundMessage, OutboundEnvelope, RefCounter};
use super::reconnect::BackoffSequence;
use crate::application::ports::{
    CLOSE_NORMAL, FeedTransport, FrameSink, FrameSource, SocketEvent, TokenProvider,
    TransportError,
};
use crate::domain::channel::{Channel, ChannelRegistry};
use crate::infrastructure::broadcast::{QuoteRouter, QuoteSubscription};
use crate::infrastructure::config::{ClientConfig, ConfigError};
use crate::infrastructure::metrics;

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of the feed connection.
///
/// After [`ConnectionManager::shutdown`] the state stays `Disconnected` for
/// good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No socket and no connect in progress.
    #[default]
    Disconnected,
    /// Fetching a token.
    Authenticating,
    /// Opening the socket.
    SocketConnecting,
    /// Socket open; joins and heartbeats are sent.
    Connected,
    /// A fault occurred; a reconnect is pending.
    SelfHealing,
}

impl ConnectionState {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Authenticating => "authenticating",
            Self::SocketConnecting => "socket_connecting",
            Self::Connected => "connected",
            Self::SelfHealing => "self_healing",
        }
    }

    /// Check if the socket is open.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a (re)connect was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectReason {
    /// First connect from `start`.
    Initial,
    /// A self-heal retry timer fired or the delay was zero.
    SelfHeal,
    /// The periodic token renewal.
    TokenRenewal,
    /// An outbound send failed outside the supervisor.
    SendFailure,
}

impl ReconnectReason {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::SelfHeal => "self_heal",
            Self::TokenRenewal => "token_renewal",
            Self::SendFailure => "send_failure",
        }
    }
}

// =============================================================================
// Control Messages
// =============================================================================

/// Work items executed by the supervisor task.
#[derive(Debug)]
enum Control {
    Reconnect(ReconnectReason),
    /// Retry timer fired. Ignored if the timer was cancelled in the meantime.
    Retry(CancellationToken),
    SocketLost {
        generation: u64,
        error: TransportError,
    },
    Heartbeat,
}

impl From<TimerEvent> for Control {
    fn from(event: TimerEvent) -> Self {
        match event {
            TimerEvent::Heartbeat => Self::Heartbeat,
            TimerEvent::TokenRenewal => Self::Reconnect(ReconnectReason::TokenRenewal),
        }
    }
}

// =============================================================================
// Connection Record
// =============================================================================

/// Everything guarded by the connection lock.
struct Connection<S> {
    state: ConnectionState,
    shut_down: bool,
    sink: Option<S>,
    socket_cancel: Option<CancellationToken>,
    generation: u64,
    registry: ChannelRegistry,
    backoff: BackoffSequence,
    retry_timer: Option<CancellationToken>,
}

impl<S> Connection<S> {
    fn has_socket(&self) -> bool {
        self.sink.is_some()
    }
}

struct Inner<T: FeedTransport, A: TokenProvider> {
    config: ClientConfig,
    transport: T,
    auth: A,
    framer: MessageFramer,
    refs: RefCounter,
    router: Arc<QuoteRouter>,
    connection: Mutex<Connection<T::Sink>>,
    connect_gate: Mutex<()>,
    state_tx: watch::Sender<ConnectionState>,
    control_tx: mpsc::UnboundedSender<Control>,
    cancel: CancellationToken,
}

// =============================================================================
// Connection Manager
// =============================================================================

/// Self-healing client for the feed socket.
///
/// Dropping the manager cancels every background task without sending a
/// close frame; call [`shutdown`](Self::shutdown) for a clean close.
pub struct ConnectionManager<T: FeedTransport, A: TokenProvider> {
    inner: Arc<Inner<T, A>>,
}

impl<T: FeedTransport, A: TokenProvider> ConnectionManager<T, A> {
    /// Start the client and make the first connection attempt.
    ///
    /// Returns once the first attempt finishes. If it failed, self-healing
    /// continues in the background.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `config` fails validation.
    pub async fn start(config: ClientConfig, auth: A, transport: T) -> Result<Self, ConfigError> {
        config.validate()?;
        let backoff = config.backoff()?;

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();

        let inner = Arc::new(Inner {
            framer: MessageFramer::new(config.max_chunk_size),
            refs: RefCounter::new(),
            router: Arc::new(QuoteRouter::new(
                config.quote_capacity,
                config.error_capacity,
            )),
            connection: Mutex::new(Connection {
                state: ConnectionState::Disconnected,
                shut_down: false,
                sink: None,
                socket_cancel: None,
                generation: 0,
                registry: ChannelRegistry::new(),
                backoff,
                retry_timer: None,
            }),
            connect_gate: Mutex::new(()),
            state_tx,
            control_tx: control_tx.clone(),
            cancel: cancel.clone(),
            config,
            transport,
            auth,
        });

        tokio::spawn(supervise(Arc::clone(&inner), control_rx));
        tokio::spawn(
            HeartbeatManager::new(
                HeartbeatConfig::from_client_config(&inner.config),
                control_tx,
                cancel.child_token(),
            )
            .run(),
        );

        tracing::info!(
            host = %inner.config.endpoint.host,
            heartbeat_secs = inner.config.heartbeat_interval.as_secs(),
            "Starting feed client"
        );
        inner.reconnect(ReconnectReason::Initial).await;

        Ok(Self { inner })
    }

    /// Join channels.
    ///
    /// Every name is validated first; if any is invalid nothing is stored.
    /// Valid channels are added to the registry, and when connected a
    /// `phx_join` is sent for each.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidChannel`] for an invalid name and
    /// [`ClientError::ShutDown`] after shutdown. Send failures are not
    /// returned; they trigger self-healing.
    pub async fn join<I, S>(&self, channels: I) -> Result<(), ClientError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let channels = Channel::parse_all(channels)?;
        let mut conn = self.inner.connection.lock().await;
        if conn.shut_down {
            return Err(ClientError::ShutDown);
        }

        for channel in &channels {
            if conn.registry.add(channel.clone()) {
                tracing::info!(channel = %channel, "Channel added");
            }
        }
        metrics::set_joined_channels(conn.registry.len());

        if conn.state.is_connected() {
            for channel in &channels {
                let envelope = OutboundEnvelope::join(channel.topic(), self.inner.refs.next_ref());
                if let Err(err) = self.inner.send_locked(&mut conn, &envelope).await {
                    self.inner.fail_from_caller(&mut conn, err).await;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Leave channels.
    ///
    /// A `phx_leave` is sent only for channels that were registered.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidChannel`] for an invalid name and
    /// [`ClientError::ShutDown`] after shutdown.
    pub async fn leave<I, S>(&self, channels: I) -> Result<(), ClientError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let channels = Channel::parse_all(channels)?;
        let mut conn = self.inner.connection.lock().await;
        if conn.shut_down {
            return Err(ClientError::ShutDown);
        }

        self.inner.leave_locked(&mut conn, channels).await;
        Ok(())
    }

    /// Leave every registered channel.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ShutDown`] after shutdown.
    pub async fn leave_all(&self) -> Result<(), ClientError> {
        let mut conn = self.inner.connection.lock().await;
        if conn.shut_down {
            return Err(ClientError::ShutDown);
        }

        let channels = conn.registry.all();
        self.inner.leave_locked(&mut conn, channels).await;
        Ok(())
    }

    /// Snapshot of the registered channels.
    pub async fn list_channels(&self) -> Vec<Channel> {
        self.inner.connection.lock().await.registry.all()
    }

    /// Stop the client: cancel timers and tasks, close the socket with code
    /// 1000 and stay `Disconnected` for good. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let mut conn = self.inner.connection.lock().await;
        if conn.shut_down {
            return;
        }
        conn.shut_down = true;

        if let Some(timer) = conn.retry_timer.take() {
            timer.cancel();
        }
        if let Some(socket_cancel) = conn.socket_cancel.take() {
            socket_cancel.cancel();
        }
        if let Some(mut sink) = conn.sink.take()
            && let Err(e) = sink.close(CLOSE_NORMAL, "User terminated").await
        {
            tracing::debug!(error = %e, "Close on shutdown failed");
        }
        self.inner.set_state(&mut conn, ConnectionState::Disconnected);
        tracing::info!("Feed client shut down");
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Watch connection state changes.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Subscribe to every quote.
    #[must_use]
    pub fn subscribe_all(&self) -> QuoteSubscription {
        self.inner.router.subscribe_all()
    }

    /// Subscribe to quotes for one channel.
    #[must_use]
    pub fn subscribe_channel(&self, channel: &Channel) -> QuoteSubscription {
        self.inner.router.subscribe_channel(channel)
    }

    /// Subscribe to quotes for several channels.
    #[must_use]
    pub fn subscribe_channels(&self, channels: &[Channel]) -> QuoteSubscription {
        self.inner.router.subscribe_channels(channels)
    }

    /// Subscribe to background errors.
    #[must_use]
    pub fn errors(&self) -> tokio::sync::broadcast::Receiver<Arc<ClientError>> {
        self.inner.router.errors()
    }
}

impl<T: FeedTransport, A: TokenProvider> Drop for ConnectionManager<T, A> {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

// =============================================================================
// Supervisor
// =============================================================================

async fn supervise<T: FeedTransport, A: TokenProvider>(
    inner: Arc<Inner<T, A>>,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
) {
    loop {
        let control = tokio::select! {
            () = inner.cancel.cancelled() => break,
            control = control_rx.recv() => match control {
                Some(control) => control,
                None => break,
            },
        };

        match control {
            Control::Reconnect(reason) => inner.reconnect(reason).await,
            Control::Retry(timer) => {
                if !timer.is_cancelled() {
                    inner.reconnect(ReconnectReason::SelfHeal).await;
                }
            }
            Control::SocketLost { generation, error } => {
                inner.handle_socket_lost(generation, error).await;
            }
            Control::Heartbeat => inner.send_heartbeat().await,
        }
    }

    tracing::debug!("Supervisor stopped");
}

impl<T: FeedTransport, A: TokenProvider> Inner<T, A> {
    /// Connect until success, a scheduled retry, or shutdown.
    async fn reconnect(&self, mut reason: ReconnectReason) {
        let _gate = self.connect_gate.lock().await;

        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            tracing::info!(reason = reason.as_str(), "Connecting to feed");
            metrics::record_reconnect(reason.as_str());

            let err = match self.establish().await {
                Ok(()) | Err(ClientError::ShutDown) => return,
                Err(err) => err,
            };

            tracing::warn!(error = %err, "Connection attempt failed");
            let mut conn = self.connection.lock().await;
            if conn.shut_down || !self.fail_socket(&mut conn, err).await {
                return;
            }
            reason = ReconnectReason::SelfHeal;
        }
    }

    /// Authenticate, open a fresh socket and rejoin the registry.
    ///
    /// The lock is released while the token request and the handshake are in
    /// flight; each reacquisition rechecks for shutdown.
    async fn establish(&self) -> Result<(), ClientError> {
        {
            let mut conn = self.lock_live().await?;
            self.set_state(&mut conn, ConnectionState::Authenticating);
        }

        let token = self
            .cancel
            .run_until_cancelled(self.auth.fetch_token())
            .await
            .ok_or(ClientError::ShutDown)??;

        {
            let mut conn = self.lock_live().await?;
            self.set_state(&mut conn, ConnectionState::SocketConnecting);
            self.retire_socket(&mut conn).await;
        }

        let url = self
            .config
            .endpoint
            .socket_url(token.as_str())
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (sink, source) = self.open_socket(url.as_str()).await?;

        let mut conn = self.lock_live().await?;
        conn.generation += 1;
        let socket_cancel = self.cancel.child_token();
        conn.sink = Some(sink);
        conn.socket_cancel = Some(socket_cancel.clone());
        self.set_state(&mut conn, ConnectionState::Connected);

        tokio::spawn(receive_loop(
            source,
            ReceiveContext {
                framer: self.framer,
                router: Arc::clone(&self.router),
                control_tx: self.control_tx.clone(),
                generation: conn.generation,
                cancel: socket_cancel,
            },
        ));

        for channel in conn.registry.all() {
            let envelope = OutboundEnvelope::join(channel.topic(), self.refs.next_ref());
            self.send_locked(&mut conn, &envelope).await?;
        }

        self.stop_self_heal(&mut conn);
        tracing::info!(channels = conn.registry.len(), "Connected to feed");
        Ok(())
    }

    /// Take the connection lock unless the client has been shut down.
    async fn lock_live(&self) -> Result<MutexGuard<'_, Connection<T::Sink>>, ClientError> {
        let conn = self.connection.lock().await;
        if conn.shut_down {
            return Err(ClientError::ShutDown);
        }
        Ok(conn)
    }

    /// Open a socket, bounded by the handshake timeout.
    async fn open_socket(&self, url: &str) -> Result<(T::Sink, T::Source), ClientError> {
        let limit = self.config.connect_timeout;
        let opened = self
            .cancel
            .run_until_cancelled(tokio::time::timeout(limit, self.transport.open(url)))
            .await
            .ok_or(ClientError::ShutDown)?;

        let socket = opened.map_err(|_| {
            TransportError::Connect(format!("handshake timed out after {}s", limit.as_secs()))
        })??;
        Ok(socket)
    }

    /// Close and forget the current socket, swallowing close errors.
    async fn retire_socket(&self, conn: &mut Connection<T::Sink>) {
        if let Some(socket_cancel) = conn.socket_cancel.take() {
            socket_cancel.cancel();
        }
        if let Some(mut sink) = conn.sink.take()
            && let Err(e) = sink.close(CLOSE_NORMAL, "Reconnecting").await
        {
            tracing::debug!(error = %e, "Closing previous socket failed");
        }
    }

    /// Take the next backoff delay. Returns `true` if the caller should
    /// reconnect immediately; otherwise a retry timer is scheduled.
    fn try_self_heal(&self, conn: &mut Connection<T::Sink>) -> bool {
        let delay = conn.backoff.next_delay();
        if delay.is_zero() {
            tracing::info!("Self-healing: reconnecting immediately");
            return true;
        }

        tracing::info!(delay_ms = delay.as_millis(), "Self-healing: retry scheduled");
        self.schedule_retry(conn, delay);
        false
    }

    fn schedule_retry(&self, conn: &mut Connection<T::Sink>, delay: Duration) {
        if let Some(previous) = conn.retry_timer.take() {
            previous.cancel();
        }

        let timer = self.cancel.child_token();
        conn.retry_timer = Some(timer.clone());
        let control_tx = self.control_tx.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = timer.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = control_tx.send(Control::Retry(timer));
                }
            }
        });
    }

    fn stop_self_heal(&self, conn: &mut Connection<T::Sink>) {
        if let Some(timer) = conn.retry_timer.take() {
            timer.cancel();
        }
        conn.backoff.reset();
    }

    async fn handle_socket_lost(&self, generation: u64, error: TransportError) {
        let reconnect_now = {
            let mut conn = self.connection.lock().await;
            if generation != conn.generation || !conn.has_socket() {
                tracing::debug!(generation, "Ignoring loss of a retired socket");
                return;
            }

            tracing::warn!(error = %error, "Socket lost");
            self.fail_socket(&mut conn, error).await
        };

        if reconnect_now {
            self.reconnect(ReconnectReason::SelfHeal).await;
        }
    }

    async fn send_heartbeat(&self) {
        let reconnect_now = {
            let mut conn = self.connection.lock().await;
            if !conn.state.is_connected() {
                return;
            }

            let envelope = OutboundEnvelope::heartbeat(self.refs.next_ref());
            match self.send_locked(&mut conn, &envelope).await {
                Ok(()) => {
                    tracing::debug!(topic = HEARTBEAT_TOPIC, "Heartbeat sent");
                    false
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Heartbeat failed");
                    self.fail_socket(&mut conn, err).await
                }
            }
        };

        if reconnect_now {
            self.reconnect(ReconnectReason::SelfHeal).await;
        }
    }

    /// Retire the socket after a transport fault and enter self-heal.
    /// Returns `true` if the reconnect should happen immediately.
    async fn fail_socket(
        &self,
        conn: &mut Connection<T::Sink>,
        error: impl Into<ClientError>,
    ) -> bool {
        self.retire_socket(conn).await;
        self.set_state(conn, ConnectionState::SelfHealing);
        self.router.publish_error(error.into());
        self.try_self_heal(conn)
    }

    /// Send failure on a caller's task: an immediate reconnect is handed to
    /// the supervisor rather than run on the caller.
    async fn fail_from_caller(&self, conn: &mut Connection<T::Sink>, error: ClientError) {
        tracing::warn!(error = %error, "Send failed");
        if self.fail_socket(conn, error).await {
            let _ = self
                .control_tx
                .send(Control::Reconnect(ReconnectReason::SendFailure));
        }
    }

    async fn leave_locked(&self, conn: &mut Connection<T::Sink>, channels: Vec<Channel>) {
        let removed: Vec<Channel> = channels
            .into_iter()
            .filter(|channel| conn.registry.remove(channel))
            .collect();

        for channel in &removed {
            tracing::info!(channel = %channel, "Channel removed");
        }
        metrics::set_joined_channels(conn.registry.len());

        if !conn.state.is_connected() {
            return;
        }
        for channel in &removed {
            let envelope = OutboundEnvelope::leave(channel.topic(), self.refs.next_ref());
            if let Err(err) = self.send_locked(conn, &envelope).await {
                self.fail_from_caller(conn, err).await;
                return;
            }
        }
    }

    async fn send_locked(
        &self,
        conn: &mut Connection<T::Sink>,
        envelope: &OutboundEnvelope,
    ) -> Result<(), ClientError> {
        let chunks = self.framer.encode(envelope)?;
        let count = chunks.len();
        let sink = conn.sink.as_mut().ok_or(TransportError::Closed)?;

        for chunk in chunks {
            sink.send_chunk(chunk).await?;
        }

        metrics::record_frames_sent(count);
        tracing::debug!(
            topic = %envelope.topic,
            event = %envelope.event,
            frames = count,
            "Message sent"
        );
        Ok(())
    }

    fn set_state(&self, conn: &mut Connection<T::Sink>, state: ConnectionState) {
        if conn.state == state {
            return;
        }
        tracing::debug!(from = %conn.state, to = %state, "Connection state changed");
        conn.state = state;
        self.state_tx.send_replace(state);
        metrics::record_state_transition(state.as_str());
    }
}

// =============================================================================
// Receive Loop
// =============================================================================

struct ReceiveContext {
    framer: MessageFramer,
    router: Arc<QuoteRouter>,
    control_tx: mpsc::UnboundedSender<Control>,
    generation: u64,
    cancel: CancellationToken,
}

impl ReceiveContext {
    fn dispatch(&self, bytes: &[u8]) {
        match self.framer.decode(bytes) {
            Ok(InboundMessage::Quote { topic, quote }) => {
                metrics::record_message_received("quote");
                tracing::trace!(topic = %topic, ticker = %quote.ticker, "Quote received");
                self.router.route(quote);
            }
            Ok(InboundMessage::Reply {
                topic,
                reference,
                payload,
            }) => {
                metrics::record_message_received("phx_reply");
                if payload.is_error() && topic != HEARTBEAT_TOPIC {
                    let reason = payload.reason();
                    tracing::warn!(topic = %topic, %reference, reason = %reason, "Join rejected");
                    self.router
                        .publish_error(ClientError::JoinRejected { topic, reason });
                } else {
                    tracing::debug!(topic = %topic, status = %payload.status, "Reply received");
                }
            }
            Ok(InboundMessage::Other { topic, event }) => {
                metrics::record_message_received(event.as_str());
                tracing::debug!(topic = %topic, event = %event, "Ignoring event");
            }
            Err(err) => {
                metrics::record_decode_failure();
                tracing::warn!(error = %err, bytes = bytes.len(), "Failed to decode message");
                self.router.publish_error(ClientError::Codec(err));
            }
        }
    }
}

async fn receive_loop<S: FrameSource>(mut source: S, ctx: ReceiveContext) {
    let mut assembler = FrameAssembler::new();

    let error = loop {
        let event = tokio::select! {
            () = ctx.cancel.cancelled() => {
                tracing::debug!(generation = ctx.generation, "Receive loop cancelled");
                return;
            }
            event = source.next_event() => event,
        };

        match event {
            Ok(SocketEvent::Fragment {
                data,
                end_of_message,
            }) => {
                if let Some(message) = assembler.push(&data, end_of_message) {
                    ctx.dispatch(&message);
                }
            }
            Ok(SocketEvent::Closed { code }) => {
                tracing::info!(?code, "Socket closed by peer");
                break TransportError::Closed;
            }
            Err(e) => break e,
        }
    };

    let _ = ctx.control_tx.send(Control::SocketLost {
        generation: ctx.generation,
        error,
    });
}

// =============================================================================
// Tests
// =============================================================================
