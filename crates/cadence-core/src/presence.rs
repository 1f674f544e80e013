//! Presence channel manager.
//!
//! Owns one realtime connection per instance, recovers from drops with a
//! fixed-delay bounded retry, and fans inbound messages and connectivity
//! transitions out to registered listeners.
//!
//! ## State machine
//!
//! ```text
//!                connect()              open
//! Disconnected ───────────▶ Connecting ──────▶ Connected
//!      ▲                        │                  │
//!      │        failure         │   close / error  │
//!      └────────────────────────┴──────────────────┘
//!             (reconnect timer armed while attempts < max)
//! ```
//!
//! Listeners are called synchronously on the task handling the event and
//! should return quickly: a slow listener delays every listener after it.
//! Connection listeners see transitions in the order they happened: a
//! connection that closes right after opening reports `true`, then `false`.

use cadence_protocol::{codec, ActivityStatus, Frame, InboundMessage, ProtocolError};
use cadence_transport::{
    channel_url, Connection, ConnectionId, ConnectionSink, ConnectionStream, Connector, Incoming,
    TransportError,
};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::listeners::{ListenerRegistry, Subscription};
use crate::reconnect::{ReconnectPolicy, ReconnectTimer};

/// Upper bound on a single status write to the socket.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Presence channel errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The connection could not be opened.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Connection state of a presence channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no attempt in flight.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// The connection is open.
    Connected,
}

/// Presence channel configuration.
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// Origin of the application, e.g. `https://learn.example.com`.
    pub origin: String,
    /// Path of the channel endpoint off the origin.
    pub path: String,
    /// Reconnection policy.
    pub reconnect: ReconnectPolicy,
}

impl PresenceConfig {
    /// Configuration for `origin` with the default path and policy.
    #[must_use]
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            path: cadence_transport::endpoint::DEFAULT_CHANNEL_PATH.to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Override the channel path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Override the reconnection policy.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}

/// Mutable channel state. Never held across an await.
struct ChannelState {
    connection: ConnectionState,
    reconnect_attempts: u32,
    /// Set from the start of `connect()` until the attempt settles.
    in_flight: bool,
    /// Bumped by every connect and disconnect; events from older
    /// connections compare against it and are ignored.
    generation: u64,
    reconnect_timer: ReconnectTimer,
    reader: Option<JoinHandle<()>>,
    exhausted: bool,
}

struct Inner {
    config: PresenceConfig,
    connector: Arc<dyn Connector>,
    state: Mutex<ChannelState>,
    /// Write half of the open connection, tagged with its generation.
    sink: tokio::sync::Mutex<Option<(u64, Box<dyn ConnectionSink>)>>,
    /// Serializes connection listener dispatch so transitions arrive in order.
    notify: Mutex<()>,
    message_listeners: ListenerRegistry<InboundMessage>,
    connection_listeners: ListenerRegistry<bool>,
}

/// Handle to a presence channel.
///
/// Clones share the same connection and listeners. Background tasks keep
/// the channel alive while a connection is open or a reconnect is pending;
/// call [`disconnect`](Self::disconnect) to release them.
#[derive(Clone)]
pub struct PresenceChannel {
    inner: Arc<Inner>,
}

impl PresenceChannel {
    /// Create a disconnected channel.
    #[must_use]
    pub fn new(config: PresenceConfig, connector: Arc<dyn Connector>) -> Self {
        info!(
            origin = %config.origin,
            path = %config.path,
            connector = connector.name(),
            "Creating presence channel"
        );
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                state: Mutex::new(ChannelState {
                    connection: ConnectionState::Disconnected,
                    reconnect_attempts: 0,
                    in_flight: false,
                    generation: 0,
                    reconnect_timer: ReconnectTimer::new(),
                    reader: None,
                    exhausted: false,
                }),
                sink: tokio::sync::Mutex::new(None),
                notify: Mutex::new(()),
                message_listeners: ListenerRegistry::new("message"),
                connection_listeners: ListenerRegistry::new("connection"),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ChannelState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_notify(&self) -> MutexGuard<'_, ()> {
        self.inner
            .notify
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_connection(&self, connected: bool) {
        let _order = self.lock_notify();
        self.inner.connection_listeners.dispatch(&connected);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.lock_state().connection
    }

    /// Check if the connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Reconnect attempts made since the last successful open.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.lock_state().reconnect_attempts
    }

    /// Check if a reconnect timer is armed.
    #[must_use]
    pub fn reconnect_pending(&self) -> bool {
        self.lock_state().reconnect_timer.is_armed()
    }

    /// Check if automatic reconnection gave up.
    ///
    /// Listeners see the same `false` for a drop that will be retried and
    /// for the one after which retries ran out; this tells them apart.
    #[must_use]
    pub fn reconnect_exhausted(&self) -> bool {
        self.lock_state().exhausted
    }

    /// Restore the full reconnect budget.
    ///
    /// Does not connect by itself; meant to be followed by
    /// [`connect`](Self::connect) when the network is known to be back.
    pub fn reset_reconnect(&self) {
        let mut state = self.lock_state();
        state.reconnect_attempts = 0;
        state.exhausted = false;
    }

    /// Register a listener for inbound messages.
    pub fn on_message<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.inner.message_listeners.register(listener)
    }

    /// Register a listener for connection transitions.
    ///
    /// The listener receives `true` when the connection opens and `false`
    /// when it closes or an attempt fails.
    pub fn on_connection_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        self.inner.connection_listeners.register(listener)
    }

    /// Number of registered message listeners.
    #[must_use]
    pub fn message_listener_count(&self) -> usize {
        self.inner.message_listeners.len()
    }

    /// Number of registered connection listeners.
    #[must_use]
    pub fn connection_listener_count(&self) -> usize {
        self.inner.connection_listeners.len()
    }

    /// Open the connection.
    ///
    /// Does nothing if the channel is connected or an attempt is already in
    /// flight. On success the reconnect counter resets, connection
    /// listeners receive `true` and the client announces itself `online`.
    /// A failed attempt arms the reconnect timer like a dropped connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel address is invalid or the attempt
    /// failed. The channel keeps retrying on its own in the latter case.
    pub async fn connect(&self) -> Result<(), ChannelError> {
        let generation = {
            let mut state = self.lock_state();
            if state.connection == ConnectionState::Connected || state.in_flight {
                trace!(state = ?state.connection, "Connect ignored, already connected or connecting");
                return Ok(());
            }
            state.in_flight = true;
            state.connection = ConnectionState::Connecting;
            state.generation += 1;
            state.generation
        };

        let url = match channel_url(&self.inner.config.origin, &self.inner.config.path) {
            Ok(url) => url,
            Err(e) => {
                let mut state = self.lock_state();
                if state.generation == generation {
                    state.in_flight = false;
                    state.connection = ConnectionState::Disconnected;
                }
                warn!(origin = %self.inner.config.origin, error = %e, "Invalid presence channel address");
                return Err(e.into());
            }
        };

        debug!(url = %url, generation, "Connecting presence channel");

        match self.inner.connector.connect(&url).await {
            Ok(connection) => {
                self.on_open(generation, connection).await;
                Ok(())
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Presence channel connect failed");
                self.on_closed(generation).await;
                Err(e.into())
            }
        }
    }

    async fn on_open(&self, generation: u64, connection: Connection) {
        let Connection { id, sink, stream } = connection;
        let (ready_tx, ready_rx) = oneshot::channel();

        let mut slot = self.inner.sink.lock().await;
        let stale_sink = {
            let mut state = self.lock_state();
            if state.generation != generation {
                Some(sink)
            } else {
                state.in_flight = false;
                state.connection = ConnectionState::Connected;
                state.reconnect_attempts = 0;
                state.exhausted = false;
                state.reconnect_timer.cancel();
                *slot = Some((generation, sink));

                let channel = self.clone();
                let reader_id = id.clone();
                let reader = tokio::spawn(async move {
                    channel.read_loop(generation, reader_id, ready_rx, stream).await;
                });
                if let Some(previous) = state.reader.replace(reader) {
                    previous.abort();
                }
                None
            }
        };
        drop(slot);

        if let Some(mut sink) = stale_sink {
            // Superseded by a disconnect while the attempt was in flight.
            debug!(connection = %id, "Closing superseded connection");
            if let Err(e) = sink.close().await {
                trace!(connection = %id, error = %e, "Close of superseded connection failed");
            }
            return;
        }

        info!(connection = %id, "Presence channel connected");
        {
            let _order = self.lock_notify();
            let current = {
                let state = self.lock_state();
                state.generation == generation && state.connection == ConnectionState::Connected
            };
            // A disconnect may have slipped in since the state was published.
            if current {
                self.inner.connection_listeners.dispatch(&true);
            }
        }
        self.send(ActivityStatus::Online).await;

        // The reader holds off until the open has been announced, so a close
        // it observes is always reported after `true`.
        let _ = ready_tx.send(());
    }

    async fn read_loop(
        self,
        generation: u64,
        id: ConnectionId,
        ready: oneshot::Receiver<()>,
        mut stream: Box<dyn ConnectionStream>,
    ) {
        // A dropped sender means `on_open` was cancelled; read anyway.
        let _ = ready.await;

        loop {
            match stream.recv().await {
                Ok(Some(Incoming::Text(text))) => self.handle_frame(&id, codec::decode(&text)),
                Ok(Some(Incoming::Binary(data))) => {
                    self.handle_frame(&id, codec::decode_bytes(&data))
                }
                Ok(None) => {
                    debug!(connection = %id, "Presence channel closed by remote");
                    break;
                }
                Err(e) => {
                    warn!(connection = %id, error = %e, "Presence channel read failed");
                    break;
                }
            }
        }

        self.on_closed(generation).await;
    }

    fn handle_frame(&self, id: &ConnectionId, frame: Result<InboundMessage, ProtocolError>) {
        match frame {
            Ok(message) => {
                trace!(connection = %id, kind = %message.kind, "Inbound message");
                self.inner.message_listeners.dispatch(&message);
            }
            Err(e) => {
                warn!(connection = %id, error = %e, "Discarding malformed frame");
            }
        }
    }

    /// Handle the end of connection `generation`, or the failure of the
    /// attempt that would have opened it.
    async fn on_closed(&self, generation: u64) {
        {
            let mut state = self.lock_state();
            if state.generation != generation {
                trace!(generation, "Ignoring close of superseded connection");
                return;
            }
            state.connection = ConnectionState::Disconnected;
            state.in_flight = false;
            // The reader is either finished or is the caller itself.
            state.reader = None;
        }

        {
            let mut slot = self.inner.sink.lock().await;
            if matches!(slot.as_ref(), Some((g, _)) if *g == generation) {
                *slot = None;
            }
        }

        self.notify_connection(false);
        self.schedule_reconnect(generation);
    }

    fn schedule_reconnect(&self, generation: u64) {
        let policy = self.inner.config.reconnect;
        let mut state = self.lock_state();

        if state.generation != generation
            || state.connection != ConnectionState::Disconnected
            || state.in_flight
        {
            return;
        }

        if !policy.should_retry(state.reconnect_attempts) {
            state.reconnect_timer.cancel();
            if !state.exhausted {
                state.exhausted = true;
                warn!(
                    attempts = state.reconnect_attempts,
                    "Presence channel reconnect attempts exhausted, giving up"
                );
            }
            return;
        }

        info!(
            attempt = state.reconnect_attempts + 1,
            max_attempts = policy.max_attempts,
            delay_ms = policy.delay.as_millis() as u64,
            "Scheduling presence channel reconnect"
        );

        let ticket = state.reconnect_timer.next_ticket();
        let channel = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(policy.delay).await;
            channel.fire_reconnect(ticket).await;
        });
        state.reconnect_timer.arm(ticket, handle);
    }

    async fn fire_reconnect(&self, ticket: u64) {
        {
            let mut state = self.lock_state();
            if !state.reconnect_timer.fire(ticket) {
                return;
            }
            if state.connection != ConnectionState::Disconnected || state.in_flight {
                return;
            }
            state.reconnect_attempts += 1;
            debug!(attempt = state.reconnect_attempts, "Reconnect timer fired");
        }

        if let Err(e) = self.connect().await {
            debug!(error = %e, "Reconnect attempt failed");
        }
    }

    /// Announce this client's activity status.
    ///
    /// Fire-and-forget: dropped silently when the channel is not open, and
    /// send failures are only logged. Status updates are never queued.
    pub async fn send(&self, status: ActivityStatus) {
        if !self.is_connected() {
            trace!(status = %status, "Channel not open, dropping status update");
            return;
        }

        let mut slot = self.inner.sink.lock().await;
        match slot.as_mut() {
            Some((_, sink)) => {
                match tokio::time::timeout(SEND_TIMEOUT, sink.send(&Frame::user_status(status)))
                    .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(status = %status, error = %e, "Failed to send status update")
                    }
                    Err(_) => warn!(
                        status = %status,
                        timeout_ms = SEND_TIMEOUT.as_millis() as u64,
                        "Status update write stalled, giving up"
                    ),
                }
            }
            None => trace!(status = %status, "No open connection, dropping status update"),
        }
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Cancels a pending reconnect, announces `offline` on a best-effort
    /// basis and closes the socket. Connection listeners receive `false` if
    /// the channel was connected. A later [`connect`](Self::connect) starts
    /// with a fresh reconnect budget.
    pub async fn disconnect(&self) {
        let (reader, was_connected) = {
            let mut state = self.lock_state();
            state.generation += 1;
            state.in_flight = false;
            state.reconnect_timer.cancel();
            state.reconnect_attempts = 0;
            state.exhausted = false;
            let was_connected = state.connection == ConnectionState::Connected;
            state.connection = ConnectionState::Disconnected;
            (state.reader.take(), was_connected)
        };

        if let Some(reader) = reader {
            reader.abort();
        }

        let sink = self.inner.sink.lock().await.take();
        if let Some((_, mut sink)) = sink {
            let offline = Frame::user_status(ActivityStatus::Offline);
            match tokio::time::timeout(SEND_TIMEOUT, sink.send(&offline)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "Failed to announce offline status"),
                Err(_) => debug!("Offline announcement stalled, closing anyway"),
            }
            match tokio::time::timeout(SEND_TIMEOUT, sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "Failed to close presence channel"),
                Err(_) => debug!("Presence channel close stalled"),
            }
        }

        info!("Presence channel disconnected");

        if was_connected {
            self.notify_connection(false);
        }
    }
}

impl fmt::Debug for PresenceChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("PresenceChannel")
            .field("origin", &self.inner.config.origin)
            .field("state", &state.connection)
            .field("reconnect_attempts", &state.reconnect_attempts)
            .field("message_listeners", &self.inner.message_listeners.len())
            .field("connection_listeners", &self.inner.connection_listeners.len())
            .finish()
    }
}
