use crate::error::AppError;
use crate::sensor::observable::{Observable, ObserverId, Observers};
use crate::sensor::transport::{PushEvent, PushStream, PushTransport};
use crate::sensor::types::ConnectionState;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type HandlerFn = dyn Fn(&PushEvent) + Send + Sync;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// A reference-counted event callback. Clones share identity, so the same
/// `EventHandler` can be registered repeatedly and removed exactly once.
/// Ids are never reused within a process.
#[derive(Clone)]
pub struct EventHandler {
    id: HandlerId,
    callback: Arc<HandlerFn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl EventHandler {
    pub fn new(handler: impl Fn(&PushEvent) + Send + Sync + 'static) -> Self {
        Self {
            id: HandlerId(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed)),
            callback: Arc::new(handler),
        }
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventHandler").field(&self.id).finish()
    }
}

/// Caller-owned token for one registered handler on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    channel: String,
    handler: HandlerId,
}

impl SubscriptionHandle {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn handler_id(&self) -> HandlerId {
        self.handler
    }
}

enum ConnectionSlot {
    Idle,
    Connecting {
        session: u64,
    },
    Connected {
        session: u64,
        cancellation_token: CancellationToken,
    },
}

impl ConnectionSlot {
    fn session(&self) -> Option<u64> {
        match self {
            Self::Idle => None,
            Self::Connecting { session } | Self::Connected { session, .. } => Some(*session),
        }
    }
}

/// Owns at most one push connection and routes its events to named-channel
/// handlers. Meant to be driven from one logical thread; handlers run on the
/// connection's reader task in delivery order.
pub struct SubscriptionManager {
    transport: Arc<dyn PushTransport>,
    handlers: Mutex<HashMap<String, Vec<EventHandler>>>,
    connection: Mutex<ConnectionSlot>,
    next_session: AtomicU64,
    state: Observable<ConnectionState>,
    failures: Observers<AppError>,
}

impl SubscriptionManager {
    pub fn new(transport: Arc<dyn PushTransport>) -> Self {
        Self {
            transport,
            handlers: Mutex::new(HashMap::new()),
            connection: Mutex::new(ConnectionSlot::Idle),
            next_session: AtomicU64::new(0),
            state: Observable::new(ConnectionState::Disconnected),
            failures: Observers::default(),
        }
    }

    /// Opens the transport unless a connection is already open or opening.
    ///
    /// On failure the manager stays disconnected and the error is both
    /// returned and reported to failure watchers; calling again retries.
    /// A `disconnect` issued while opening also yields `TransportUnavailable`,
    /// without a failure report.
    pub async fn connect(self: &Arc<Self>, endpoint: &str) -> Result<(), AppError> {
        let session = {
            let mut connection = self.connection.lock();
            if !matches!(*connection, ConnectionSlot::Idle) {
                debug!(endpoint, "push transport already connected or connecting");
                return Ok(());
            }
            let session = self.next_session.fetch_add(1, Ordering::Relaxed) + 1;
            *connection = ConnectionSlot::Connecting { session };
            session
        };
        self.state.set(ConnectionState::Connecting);
        info!(endpoint, session, "opening push transport");

        let stream = match self.transport.open(endpoint).await {
            Ok(stream) => stream,
            Err(error) => {
                let still_current = {
                    let mut connection = self.connection.lock();
                    let still_current = connection.session() == Some(session);
                    if still_current {
                        *connection = ConnectionSlot::Idle;
                    }
                    still_current
                };
                if still_current {
                    self.state.set(ConnectionState::Disconnected);
                }
                let error = match error {
                    AppError::TransportUnavailable(_) => error,
                    other => AppError::TransportUnavailable(other.to_string()),
                };
                warn!(endpoint, %error, "push transport connect failed");
                self.failures.notify(&error);
                return Err(error);
            }
        };

        let cancellation_token = CancellationToken::new();
        {
            let mut connection = self.connection.lock();
            if connection.session() != Some(session) {
                debug!(session, "disconnect requested while connecting; dropping stream");
                return Err(AppError::TransportUnavailable(
                    "disconnected while connecting".to_string(),
                ));
            }
            *connection = ConnectionSlot::Connected {
                session,
                cancellation_token: cancellation_token.clone(),
            };
        }
        self.state.set(ConnectionState::Connected);
        info!(endpoint, session, "push transport connected");

        tokio::spawn(Arc::clone(self).read_events(session, stream, cancellation_token));
        Ok(())
    }

    async fn read_events(
        self: Arc<Self>,
        session: u64,
        mut stream: PushStream,
        cancellation_token: CancellationToken,
    ) {
        loop {
            let next_event = tokio::select! {
                _ = cancellation_token.cancelled() => return,
                next_event = stream.next() => next_event,
            };

            match next_event {
                Some(Ok(event)) => {
                    self.deliver(&event);
                }
                Some(Err(error)) => {
                    warn!(session, %error, "push frame rejected");
                    self.failures.notify(&error);
                }
                None => break,
            }
        }

        let dropped = {
            let mut connection = self.connection.lock();
            let dropped = matches!(
                *connection,
                ConnectionSlot::Connected { session: current, .. } if current == session
            );
            if dropped {
                *connection = ConnectionSlot::Idle;
            }
            dropped
        };
        if dropped {
            self.state.set(ConnectionState::Disconnected);
            let error = AppError::TransportUnavailable("push connection closed".to_string());
            warn!(session, %error, "push transport dropped");
            self.failures.notify(&error);
        }
    }

    /// Tears down the transport and forgets every handler. Idempotent.
    pub fn disconnect(&self) {
        let previous = std::mem::replace(&mut *self.connection.lock(), ConnectionSlot::Idle);
        let was_open = !matches!(previous, ConnectionSlot::Idle);
        if let ConnectionSlot::Connected {
            cancellation_token,
            ..
        } = previous
        {
            cancellation_token.cancel();
        }

        self.handlers.lock().clear();

        if was_open {
            self.state.set(ConnectionState::Disconnected);
            info!("push transport disconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.get() == ConnectionState::Connected
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn watch_connection(
        &self,
        callback: impl Fn(&ConnectionState) + Send + Sync + 'static,
    ) -> ObserverId {
        self.state.subscribe(callback)
    }

    pub fn unwatch_connection(&self, id: ObserverId) -> bool {
        self.state.unsubscribe(id)
    }

    /// Transport-level failures: connect errors, dropped connections and
    /// undecodable frames.
    pub fn watch_failures(
        &self,
        callback: impl Fn(&AppError) + Send + Sync + 'static,
    ) -> ObserverId {
        self.failures.subscribe(callback)
    }

    /// Attaches `handler` to `channel`. Registering the same handler twice is
    /// a no-op; the returned handle is identical both times.
    pub fn register_handler(&self, channel: &str, handler: &EventHandler) -> SubscriptionHandle {
        let handler_id = handler.id();
        let mut handlers = self.handlers.lock();
        let registered = handlers.entry(channel.to_string()).or_default();
        if registered.iter().any(|existing| existing.id() == handler_id) {
            debug!(channel, ?handler_id, "handler already registered");
        } else {
            registered.push(handler.clone());
        }

        SubscriptionHandle {
            channel: channel.to_string(),
            handler: handler_id,
        }
    }

    /// Removes `handler` from `channel`, or every handler on `channel` when
    /// `handler` is `None`. Returns how many registrations were removed.
    pub fn unregister_handler(&self, channel: &str, handler: Option<&EventHandler>) -> usize {
        match handler {
            Some(handler) => self.remove_handler(channel, handler.id()),
            None => self
                .handlers
                .lock()
                .remove(channel)
                .map_or(0, |removed| removed.len()),
        }
    }

    pub fn release(&self, handle: &SubscriptionHandle) -> bool {
        self.remove_handler(&handle.channel, handle.handler) > 0
    }

    fn remove_handler(&self, channel: &str, handler_id: HandlerId) -> usize {
        let mut handlers = self.handlers.lock();
        let Some(registered) = handlers.get_mut(channel) else {
            return 0;
        };
        let before = registered.len();
        registered.retain(|existing| existing.id() != handler_id);
        let removed = before - registered.len();
        if registered.is_empty() {
            handlers.remove(channel);
        }
        removed
    }

    pub fn handler_count(&self, channel: &str) -> usize {
        self.handlers.lock().get(channel).map_or(0, Vec::len)
    }

    /// Runs every handler registered for the event's channel and returns how
    /// many ran. Handlers are snapshotted first, so they may (un)register.
    pub fn deliver(&self, event: &PushEvent) -> usize {
        let handlers: Vec<EventHandler> = self
            .handlers
            .lock()
            .get(&event.channel)
            .cloned()
            .unwrap_or_default();
        for handler in &handlers {
            (handler.callback)(event);
        }
        handlers.len()
    }
}
