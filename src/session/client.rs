use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::subscription::Driver;
use crate::Result;
use crate::config::Config;
use crate::error::{Error, Kind};
use crate::handlers::{
    ConnectionBroadcast, ConnectionHandler, HandlerRegistry, HandlerResult, Registration,
};
use crate::management::{self, types::BatchEntry};
use crate::types::Message;
use crate::ws::{Connector, WsConnector};

/// Connection state of a [`Session`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum_macros::Display)]
pub enum ConnectionState {
    /// No transport, or the last one was lost
    #[default]
    Disconnected,
    /// Transport requested, STOMP handshake not finished yet
    Connecting,
    /// Handshake finished and the subscription is live
    Connected,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Long-lived connection to the broker.
///
/// A `Session` owns at most one transport and one pending reconnection at a
/// time. Every outcome is reported through the registered handlers: none of the
/// operations return broker or network failures to the caller.
///
/// Cloning is cheap and every clone drives the same connection. The connection
/// is shut down once the last clone is dropped.
///
/// # Example
///
/// ```no_run
/// use broker_session::{Config, Session};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let session = Session::new(Config::default())?;
///
/// session.on_message(|message| {
///     println!("{}: {}", message.sender, message.content);
///     Ok(())
/// });
/// session.on_error(|error| {
///     eprintln!("broker error: {error}");
///     Ok(())
/// });
///
/// session.connect();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("broker_url", &self.shared.config.broker_url())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session that talks STOMP over WebSocket.
    ///
    /// Nothing is opened until [`Session::connect`] is called.
    ///
    /// # Errors
    ///
    /// Returns a [`Kind::Validation`] error if the management URL is invalid,
    /// or a [`Kind::Fetch`] error if the HTTP client fails to build.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_connector(config, WsConnector)
    }

    /// Create a session with a custom [`Connector`].
    ///
    /// # Errors
    ///
    /// See [`Session::new`].
    pub fn with_connector<C: Connector>(config: Config, connector: C) -> Result<Self> {
        let management = management::Client::new(&config)?;

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                connector: Arc::new(connector),
                registry: HandlerRegistry::new(),
                management,
                inner: Mutex::new(Inner::default()),
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Start connecting to the broker.
    ///
    /// Any existing transport is torn down first and a pending reconnection is
    /// cancelled. The outcome is reported to the connection and error handlers.
    pub fn connect(&self) {
        self.shared.connect();
    }

    /// Tear down the transport and cancel any pending reconnection.
    ///
    /// No automatic reconnection happens until [`Session::connect`] is called
    /// again.
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    /// `true` only while the handshake is complete and the transport is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// Health check for callers that poll periodically.
    ///
    /// Returns `true` without side effects while connected. Otherwise starts a
    /// connection attempt and returns `false`.
    pub fn check_connection(&self) -> bool {
        if self.is_connected() {
            return true;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("connection check failed, reconnecting");

        self.connect();
        false
    }

    /// Peek at up to `limit` queued messages through the management API.
    ///
    /// Messages stay in the queue. Entries whose payload does not decode are
    /// returned as [`BatchEntry::Malformed`] in their original position.
    ///
    /// An empty result means either an empty queue or a failed fetch; failures
    /// are reported to the error handlers as [`Kind::Fetch`].
    pub async fn fetch_messages(&self, limit: usize) -> Vec<BatchEntry> {
        let shared = &self.shared;

        match shared.management.peek(&shared.config.queue, limit).await {
            Ok(entries) => entries,
            Err(e) => {
                let error = if e.kind() == Kind::Fetch {
                    e
                } else {
                    Error::with_source(Kind::Fetch, e)
                };
                shared.registry.notify_error(&error);
                Vec::new()
            }
        }
    }

    /// Register a handler for every message received on the subscription.
    pub fn on_message<F>(&self, callback: F) -> Registration
    where
        F: Fn(&Message) -> HandlerResult + Send + Sync + 'static,
    {
        self.shared.registry.add_message(Arc::new(callback))
    }

    /// Register a handler for connectivity changes.
    ///
    /// If the session is already connected, the handler is also called with
    /// `true` from a spawned task shortly after registration. A handler
    /// registered while the connection is being announced gets that
    /// announcement instead, never both.
    pub fn on_connection_change<F>(&self, callback: F) -> Registration
    where
        F: Fn(bool) -> HandlerResult + Send + Sync + 'static,
    {
        let callback: Arc<ConnectionHandler> = Arc::new(callback);
        let (registration, announced) = {
            let inner = self.shared.lock();
            let registration = self.shared.registry.add_connection(Arc::clone(&callback));
            (registration, inner.connected_generation())
        };

        if let Some(generation) = announced
            && let Ok(runtime) = Handle::try_current()
        {
            let shared = Arc::downgrade(&self.shared);
            let pending = registration.clone();
            runtime.spawn(async move {
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                // Skipped if the connection it was registered against is gone.
                let current = shared.lock().connected_generation();
                if pending.is_active() && current == Some(generation) {
                    shared.registry.deliver_connection(callback.as_ref(), true);
                }
            });
        }

        registration
    }

    /// Register a handler for errors from every part of the session.
    pub fn on_error<F>(&self, callback: F) -> Registration
    where
        F: Fn(&Error) -> HandlerResult + Send + Sync + 'static,
    {
        self.shared.registry.add_error(Arc::new(callback))
    }

    /// Number of registered `(message, connection, error)` handlers.
    #[must_use]
    pub fn handler_counts(&self) -> (usize, usize, usize) {
        self.shared.registry.counts()
    }

    /// `true` while a reconnection attempt is scheduled.
    #[must_use]
    pub fn reconnect_pending(&self) -> bool {
        self.shared.lock().reconnect.is_some()
    }
}

pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) registry: Arc<HandlerRegistry>,
    management: management::Client,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    state: ConnectionState,
    /// Bumped for every transport started and on every teardown
    generation: u64,
    transport: Option<ActiveTransport>,
    reconnect: Option<ReconnectSlot>,
    next_slot: u64,
}

impl Inner {
    fn cancel_reconnect(&mut self) {
        if let Some(slot) = self.reconnect.take() {
            slot.task.abort();
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.transport
            .as_ref()
            .is_some_and(|transport| transport.generation == generation)
    }

    /// Generation of the transport while it is connected and open.
    fn connected_generation(&self) -> Option<u64> {
        self.transport
            .as_ref()
            .filter(|transport| {
                self.state.is_connected() && transport.open.load(Ordering::Acquire)
            })
            .map(|transport| transport.generation)
    }
}

struct ActiveTransport {
    generation: u64,
    /// Dropping the sender also stops the driver.
    shutdown: oneshot::Sender<()>,
    open: Arc<AtomicBool>,
}

impl ActiveTransport {
    fn shutdown(self) {
        // The driver may already have exited on its own.
        _ = self.shutdown.send(());
    }
}

struct ReconnectSlot {
    id: u64,
    task: JoinHandle<()>,
}

impl Shared {
    // State updates never panic half-way, so a poisoned lock is still consistent.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_connected(&self) -> bool {
        self.lock().connected_generation().is_some()
    }

    pub(crate) fn connect(self: &Arc<Self>) {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %e, "connect called outside of a tokio runtime");

                self.registry
                    .notify_error(&Error::with_source(Kind::Internal, e));
                return;
            }
        };

        let (previous, was_connected, generation) = {
            let mut inner = self.lock();
            inner.cancel_reconnect();
            let previous = inner.transport.take();
            let was_connected = inner.state.is_connected();
            inner.generation += 1;
            inner.state = ConnectionState::Connecting;
            (previous, was_connected, inner.generation)
        };

        #[cfg(feature = "tracing")]
        tracing::info!(url = %self.config.broker_url(), generation, "connecting to broker");

        if let Some(previous) = previous {
            previous.shutdown();
        }
        if was_connected {
            self.registry.notify_connection(false);
        }

        let mut inner = self.lock();
        // A connection handler may have called connect or disconnect meanwhile.
        if inner.generation != generation {
            return;
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let open = Arc::new(AtomicBool::new(false));
        let driver = Driver::new(
            Arc::downgrade(self),
            Arc::clone(&self.connector),
            self.config.clone(),
            generation,
            Arc::clone(&open),
        );
        runtime.spawn(driver.run(shutdown_rx));

        inner.transport = Some(ActiveTransport {
            generation,
            shutdown: shutdown_tx,
            open,
        });
    }

    fn disconnect(&self) {
        let previous = {
            let mut inner = self.lock();
            inner.cancel_reconnect();
            inner.generation += 1;
            inner.state = ConnectionState::Disconnected;
            inner.transport.take()
        };

        let Some(previous) = previous else {
            return;
        };

        #[cfg(feature = "tracing")]
        tracing::info!("disconnecting from broker");

        previous.shutdown();
        self.registry.notify_connection(false);
    }

    /// The handshake finished and the subscription is in place.
    ///
    /// Marks the transport open and captures the connection handlers that the
    /// driver then announces `true` to. Handlers registered after this point
    /// see the session as connected and get their own late delivery. Returns
    /// `None` if the transport is stale.
    pub(crate) fn mark_connected(&self, generation: u64) -> Option<ConnectionBroadcast> {
        let mut inner = self.lock();
        let transport = inner
            .transport
            .as_ref()
            .filter(|transport| transport.generation == generation)?;
        transport.open.store(true, Ordering::Release);
        inner.state = ConnectionState::Connected;

        #[cfg(feature = "tracing")]
        tracing::info!(generation, "connected to broker");

        Some(self.registry.capture_connection())
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.lock().is_current(generation)
    }

    /// Surface an error from the transport of `generation`, unless it is stale.
    pub(crate) fn report(&self, generation: u64, error: &Error) {
        if self.is_current(generation) {
            self.registry.notify_error(error);
        }
    }

    /// The broker sent an `ERROR` frame.
    pub(crate) fn protocol_error(&self, generation: u64, error: &Error) {
        {
            let mut inner = self.lock();
            if !inner.is_current(generation) {
                return;
            }
            inner.state = ConnectionState::Disconnected;
        }

        self.registry.notify_error(error);
        self.registry.notify_connection(false);
    }

    /// The transport of `generation` is gone for a reason other than
    /// [`Session::disconnect`].
    pub(crate) fn transport_closed(self: &Arc<Self>, generation: u64) {
        let was_connected = {
            let mut inner = self.lock();
            if !inner.is_current(generation) {
                return;
            }
            inner.transport = None;
            let was_connected = inner.state.is_connected();
            inner.state = ConnectionState::Disconnected;
            self.schedule_reconnect(&mut inner);
            was_connected
        };

        #[cfg(feature = "tracing")]
        tracing::warn!(
            generation,
            delay = ?self.config.reconnect_delay(),
            "broker connection lost, reconnect scheduled"
        );

        if was_connected {
            self.registry.notify_connection(false);
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, inner: &mut Inner) {
        if inner.reconnect.is_some() {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            return;
        };

        inner.next_slot += 1;
        let id = inner.next_slot;
        let delay = self.config.reconnect_delay();
        let shared = Arc::downgrade(self);

        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = Weak::upgrade(&shared) {
                shared.reconnect_fired(id);
            }
        });

        inner.reconnect = Some(ReconnectSlot { id, task });
    }

    fn reconnect_fired(self: &Arc<Self>, id: u64) {
        {
            let mut inner = self.lock();
            // Cancelled or superseded after the timer already woke up.
            if inner.reconnect.as_ref().map(|slot| slot.id) != Some(id) {
                return;
            }
            inner.reconnect = None;
            if inner.state.is_connected() {
                return;
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("reconnect timer fired");

        self.connect();
    }
}
