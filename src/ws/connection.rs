#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use async_stream::stream;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};

use super::config::{ConnectionConfig, DEFAULT_ENDPOINT_BASE, DEFAULT_MAX_RECONNECT_ATTEMPTS};
use super::error::WsError;
use super::subscribers::{SubscriberId, Subscribers};
use super::traits::{ReadyState, Scheduler, TimerHandle, Transport, TransportEvent, TransportHandle};
use crate::Result;
use crate::notification::{self, NotificationConfig, Notifier};
use crate::types::{InboundMessage, parse_frame};

/// Broadcast channel capacity for [`ConnectionManager::stream`].
const BROADCAST_CAPACITY: usize = 1024;

/// Connection lifecycle.
///
/// `Idle` and `Exhausted` are terminal until the next [`ConnectionManager::connect`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ConnectionState {
    /// No config, no transport
    Idle,
    /// Transport created, waiting for the handshake
    Connecting {
        /// Reconnection attempts consumed so far (0 for the first connection)
        attempt: u32,
    },
    /// Handshake complete, receiving
    Open {
        /// When the connection was established
        since: DateTime<Utc>,
    },
    /// Closed unexpectedly, reconnect timer pending
    Reconnecting {
        /// Which attempt the pending timer will start
        attempt: u32,
    },
    /// Retry budget consumed; config is kept so the final status stays observable
    Exhausted {
        /// Attempts made before giving up
        attempts: u32,
    },
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// Point-in-time view of the manager, for status displays.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    /// Whether the state machine is in [`ConnectionState::Open`]
    pub connected: bool,
    /// Readiness reported by the transport, `None` when no transport exists
    pub ready_state: Option<ReadyState>,
    /// Attempts consumed since the last successful open or `connect` call
    pub reconnect_attempts: u32,
    /// Retry budget of the stored config, or the default when none is stored
    pub max_reconnect_attempts: u32,
    pub state: ConnectionState,
}

/// Handle a transport uses to report events for the connection it was opened for.
///
/// Events for a connection the manager no longer owns (superseded by a newer
/// `connect`, or closed by `disconnect`) are ignored.
#[derive(Clone)]
pub struct EventSink {
    shared: Weak<Shared>,
    generation: u64,
}

impl EventSink {
    pub fn emit(&self, event: TransportEvent) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_event(self.generation, event);
        }
    }

    /// Identifies the connection attempt this sink belongs to.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

struct ActiveTransport {
    generation: u64,
    handle: Box<dyn TransportHandle>,
}

struct PendingTimer {
    token: u64,
    handle: Box<dyn TimerHandle>,
}

/// Mutable connection state. Only touched with the session lock held.
struct Session {
    config: Option<ConnectionConfig>,
    transport: Option<ActiveTransport>,
    timer: Option<PendingTimer>,
    reconnect_attempts: u32,
    state: ConnectionState,
    sequence: u64,
}

impl Session {
    fn next_sequence(&mut self) -> u64 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    fn owns(&self, generation: u64) -> bool {
        self.transport
            .as_ref()
            .is_some_and(|active| active.generation == generation)
    }

    /// Take the pending timer and the transport out of the session.
    ///
    /// The returned value must be released after the session lock is dropped: a
    /// transport may report its `Close` synchronously from inside `close`.
    fn detach(&mut self) -> Detached {
        Detached {
            timer: self.timer.take(),
            transport: self.transport.take(),
        }
    }
}

/// Timer and transport no longer owned by the session.
#[must_use = "detached resources must be released"]
struct Detached {
    timer: Option<PendingTimer>,
    transport: Option<ActiveTransport>,
}

impl Detached {
    fn is_empty(&self) -> bool {
        self.timer.is_none() && self.transport.is_none()
    }

    /// Cancel the timer and close the transport. Call without the session lock held.
    fn release(self) {
        if let Some(timer) = self.timer {
            timer.handle.cancel();
        }
        if let Some(active) = self.transport {
            active.handle.close();
        }
    }
}

type NotifierSlot = (Arc<dyn Notifier>, NotificationConfig);

struct Shared {
    transport: Arc<dyn Transport>,
    scheduler: Arc<dyn Scheduler>,
    session: Mutex<Session>,
    subscribers: Subscribers,
    notifier: RwLock<Option<NotifierSlot>>,
    state_tx: watch::Sender<ConnectionState>,
    broadcast_tx: broadcast::Sender<InboundMessage>,
}

impl Shared {
    // Poisoning is recovered: no Session update can panic halfway.
    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, session: &mut Session, state: ConnectionState) {
        session.state = state;
        self.state_tx.send_replace(state);
    }

    fn handle_event(self: &Arc<Self>, generation: u64, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.on_open(generation),
            TransportEvent::Message(text) => self.on_message(generation, &text),
            TransportEvent::Close => self.on_close(generation),
            TransportEvent::Error(e) => {
                // The close that follows drives any retry
                #[cfg(feature = "tracing")]
                tracing::warn!(generation, error = %e, "WebSocket error");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }

    fn on_open(&self, generation: u64) {
        let stale_timer = {
            let mut session = self.lock_session();
            if !session.owns(generation) {
                return;
            }

            session.reconnect_attempts = 0;
            let since = self.scheduler.now();
            self.set_state(&mut session, ConnectionState::Open { since });
            session.timer.take()
        };
        if let Some(timer) = stale_timer {
            timer.handle.cancel();
        }

        #[cfg(feature = "tracing")]
        tracing::info!(generation, "Connected to WebSocket (receive-only)");
    }

    /// Parse and fan out one frame.
    ///
    /// Ownership is checked once, before parsing. A `disconnect` on another thread that
    /// lands during fan-out does not stop the frame already being delivered; one made from
    /// a subscriber on this thread stops every later frame.
    fn on_message(&self, generation: u64, text: &str) {
        if !self.lock_session().owns(generation) {
            #[cfg(feature = "tracing")]
            tracing::trace!(generation, "Dropping frame from superseded connection");
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(%text, "Received WebSocket text message");

        let frame = match parse_frame(text.as_bytes()) {
            Ok(frame) => frame,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%text, error = %e, "Failed to parse WebSocket message");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                return;
            }
        };
        let message = InboundMessage::from_frame(frame, self.scheduler.now());

        let delivered = self.subscribers.deliver(&message);
        #[cfg(feature = "tracing")]
        tracing::debug!(kind = ?message.kind, delivered, "Delivered message to subscribers");
        #[cfg(not(feature = "tracing"))]
        let _ = delivered;

        _ = self.broadcast_tx.send(message.clone());
        self.dispatch_notification(message);
    }

    fn on_close(self: &Arc<Self>, generation: u64) {
        let finished = {
            let mut session = self.lock_session();
            if !session.owns(generation) {
                #[cfg(feature = "tracing")]
                tracing::debug!(generation, "Ignoring close of superseded connection");
                return;
            }
            let finished = session.transport.take();

            #[cfg(feature = "tracing")]
            tracing::info!(generation, "Disconnected from WebSocket");

            if session.config.is_none() {
                self.set_state(&mut session, ConnectionState::Idle);
            } else {
                self.schedule_reconnect(&mut session);
            }
            finished
        };
        // Handles may close on drop, so drop this one without the lock
        drop(finished);
    }

    /// Consume one retry and arm the reconnect timer, or give up when the budget is spent.
    fn schedule_reconnect(self: &Arc<Self>, session: &mut Session) {
        let Some(config) = session.config.as_ref() else {
            return;
        };
        let max_attempts = config.max_reconnect_attempts;
        let interval = config.reconnect_interval;

        if session.timer.is_some() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Reconnect already scheduled");
            return;
        }

        if session.reconnect_attempts >= max_attempts {
            let attempts = session.reconnect_attempts;
            #[cfg(feature = "tracing")]
            tracing::warn!(attempts, "Giving up on WebSocket reconnection");
            self.set_state(session, ConnectionState::Exhausted { attempts });
            return;
        }

        session.reconnect_attempts = session.reconnect_attempts.saturating_add(1);
        let attempt = session.reconnect_attempts;

        #[cfg(feature = "tracing")]
        tracing::info!(attempt, max_attempts, ?interval, "Scheduling reconnect attempt");

        let token = session.next_sequence();
        let weak = Arc::downgrade(self);
        let handle = self.scheduler.schedule(
            interval,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.on_reconnect_timer(token);
                }
            }),
        );
        session.timer = Some(PendingTimer { token, handle });
        self.set_state(session, ConnectionState::Reconnecting { attempt });
    }

    fn on_reconnect_timer(self: &Arc<Self>, token: u64) {
        let mut session = self.lock_session();
        if !session.timer.as_ref().is_some_and(|timer| timer.token == token) {
            return;
        }
        session.timer = None;
        self.open_transport(&mut session);
    }

    /// Start a connection attempt with the stored config.
    ///
    /// A failure to even construct the transport is treated like an unexpected close.
    fn open_transport(self: &Arc<Self>, session: &mut Session) {
        let Some(config) = session.config.as_ref() else {
            return;
        };

        let endpoint = match config.endpoint() {
            Ok(endpoint) => endpoint,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %e, "Failed to create WebSocket connection");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                self.schedule_reconnect(session);
                return;
            }
        };

        let generation = session.next_sequence();
        let attempt = session.reconnect_attempts;
        self.set_state(session, ConnectionState::Connecting { attempt });

        #[cfg(feature = "tracing")]
        tracing::info!(%endpoint, generation, attempt, "Connecting to WebSocket");

        let sink = EventSink {
            shared: Arc::downgrade(self),
            generation,
        };
        match self.transport.open(&endpoint, sink) {
            Ok(handle) => session.transport = Some(ActiveTransport { generation, handle }),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(%endpoint, error = %e, "Failed to create WebSocket connection");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                self.schedule_reconnect(session);
            }
        }
    }

    fn dispatch_notification(&self, message: InboundMessage) {
        let slot = self
            .notifier
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some((notifier, config)) = slot else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(notification::dispatch(notifier, config, message));
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "No async runtime, skipping desktop notification");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }
}

/// Owns the single real-time connection of a process and everything around it.
///
/// - at most one transport connection at a time
/// - automatic reconnection at a fixed interval with a bounded retry budget
/// - synchronous fan-out of parsed messages to subscribers, isolated per subscriber
/// - an optional best-effort desktop notification per message
///
/// All work happens in transport and timer callbacks; nothing here blocks. Construct one
/// instance at the composition root and share it with `Arc`. Dropping it disconnects.
///
/// # Example
///
/// ```no_run
/// use evolve_notify::ws::ConnectionManager;
/// use evolve_notify::ws::config::ConnectionConfig;
///
/// # async fn example() -> evolve_notify::Result<()> {
/// let manager = ConnectionManager::new()?;
///
/// manager.subscribe(|message| match message.kind.as_deref() {
///     Some("reminder") => println!("Reminder: {}", message.text),
///     _ => println!("Message: {}", message.text),
/// });
/// manager.connect(ConnectionConfig::new("ws://localhost:8000/api/v1/ws", "123456789"))?;
///
/// println!("{:?}", manager.status());
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManager {
    inner: Arc<Shared>,
}

impl ConnectionManager {
    /// Manager using the tokio-tungstenite transport and tokio timers of the current runtime.
    #[cfg(feature = "ws")]
    pub fn new() -> Result<Self> {
        Ok(Self::with_ports(
            Arc::new(super::TungsteniteTransport::new()?),
            Arc::new(super::TokioScheduler::new()?),
        ))
    }

    /// Manager driving the given transport and scheduler.
    #[must_use]
    pub fn with_ports(transport: Arc<dyn Transport>, scheduler: Arc<dyn Scheduler>) -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (state_tx, _) = watch::channel(ConnectionState::Idle);

        Self {
            inner: Arc::new(Shared {
                transport,
                scheduler,
                session: Mutex::new(Session {
                    config: None,
                    transport: None,
                    timer: None,
                    reconnect_attempts: 0,
                    state: ConnectionState::Idle,
                    sequence: 0,
                }),
                subscribers: Subscribers::new(),
                notifier: RwLock::new(None),
                state_tx,
                broadcast_tx,
            }),
        }
    }

    /// Start a new attempt sequence with `config`.
    ///
    /// Fails only when `config` lacks an endpoint base or subscriber id. An existing
    /// connection or pending reconnect is torn down first, unless the manager is already
    /// open on the same endpoint and subscriber, in which case nothing happens.
    pub fn connect(&self, config: ConnectionConfig) -> Result<()> {
        config.validate()?;

        let previous = {
            let mut session = self.inner.lock_session();
            if session.state.is_connected()
                && session
                    .config
                    .as_ref()
                    .is_some_and(|current| current.same_target(&config))
            {
                #[cfg(feature = "tracing")]
                tracing::debug!("WebSocket already connected with same config, skipping");
                return Ok(());
            }

            session.reconnect_attempts = 0;
            session.config = Some(config);
            session.detach()
        };

        // Close the old connection before opening the new one
        if !previous.is_empty() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Replacing existing WebSocket connection");
            previous.release();
        }

        let raced = {
            let mut session = self.inner.lock_session();
            // A concurrent connect may have opened in between; the latest config wins
            let raced = session.detach();
            self.inner.open_transport(&mut session);
            raced
        };
        raced.release();

        Ok(())
    }

    /// Connect `subscriber_id` with default retry settings.
    ///
    /// `endpoint_base` defaults to [`DEFAULT_ENDPOINT_BASE`].
    pub fn initialize(&self, subscriber_id: &str, endpoint_base: Option<&str>) -> Result<()> {
        self.connect(ConnectionConfig::new(
            endpoint_base.unwrap_or(DEFAULT_ENDPOINT_BASE),
            subscriber_id,
        ))
    }

    /// Stop the connection and any pending reconnect, then forget the config.
    ///
    /// Idempotent. Subscribers stay registered.
    ///
    /// A frame already being fanned out on another thread may still reach subscribers
    /// after this returns; no frame that arrives later does.
    pub fn disconnect(&self) {
        let (had_config, detached) = {
            let mut session = self.inner.lock_session();

            // Forget the config first so nothing can schedule a retry
            let had_config = session.config.take().is_some();
            let detached = session.detach();
            session.reconnect_attempts = 0;
            self.inner.set_state(&mut session, ConnectionState::Idle);
            (had_config, detached)
        };
        detached.release();

        if had_config {
            #[cfg(feature = "tracing")]
            tracing::info!("WebSocket manually disconnected");
        }
    }

    /// Disconnect, drop every subscriber and detach the notifier.
    pub fn shutdown(&self) {
        self.disconnect();
        self.inner.subscribers.clear();
        self.detach_notifier();
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        let session = self.inner.lock_session();

        ConnectionStatus {
            connected: session.state.is_connected(),
            ready_state: session
                .transport
                .as_ref()
                .map(|active| active.handle.ready_state()),
            reconnect_attempts: session.reconnect_attempts,
            max_reconnect_attempts: session
                .config
                .as_ref()
                .map_or(DEFAULT_MAX_RECONNECT_ATTEMPTS, |config| {
                    config.max_reconnect_attempts
                }),
            state: session.state,
        }
    }

    /// Open according to the state machine *and* according to the transport.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        let status = self.status();
        status.connected && status.ready_state == Some(ReadyState::Open)
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.lock_session().state
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Register a callback for every delivered message.
    ///
    /// Callbacks run synchronously on the thread that received the frame, in
    /// subscription order. They may call back into the manager.
    pub fn subscribe<F>(&self, listener: F) -> SubscriberId
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.inner.subscribers.insert(Arc::new(listener))
    }

    /// Returns `false` if `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.subscribers.remove(id)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Delivered messages as a stream.
    ///
    /// Each call returns an independent stream fed from a bounded buffer. A consumer that
    /// falls behind gets one [`WsError::Lagged`] item and then continues with newer messages.
    pub fn stream(&self) -> impl Stream<Item = Result<InboundMessage>> + use<> {
        let mut rx = self.inner.broadcast_tx.subscribe();

        stream! {
            loop {
                match rx.recv().await {
                    Ok(message) => yield Ok(message),
                    Err(RecvError::Lagged(count)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Message stream lagged, missed {count} messages");
                        yield Err(WsError::Lagged { count }.into());
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Show a desktop notification for every subsequent message.
    pub fn attach_notifier(&self, notifier: Arc<dyn Notifier>, config: NotificationConfig) {
        *self
            .inner
            .notifier
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some((notifier, config));
    }

    pub fn detach_notifier(&self) {
        *self
            .inner
            .notifier
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("status", &self.status())
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}
