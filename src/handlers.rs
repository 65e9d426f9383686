//! Observer registry for the three session channels.
//!
//! Each channel is an ordered list of `(id, callback)` entries. Insertion order
//! is dispatch order, and every callback runs isolated: a returned error or a
//! panic is converted into a [`Kind::Handler`](crate::error::Kind::Handler)
//! error and the remaining callbacks still run.

use std::any::Any;
use std::error::Error as StdError;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use crate::error::{Channel, Error};
use crate::types::Message;

/// Return type of every observer callback.
pub type HandlerResult = std::result::Result<(), Box<dyn StdError + Send + Sync>>;

pub(crate) type MessageHandler = dyn Fn(&Message) -> HandlerResult + Send + Sync;
pub(crate) type ConnectionHandler = dyn Fn(bool) -> HandlerResult + Send + Sync;
pub(crate) type ErrorHandler = dyn Fn(&Error) -> HandlerResult + Send + Sync;

/// Stable identity of one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

struct Entry<H: ?Sized> {
    id: HandlerId,
    active: Arc<AtomicBool>,
    callback: Arc<H>,
}

/// A callback captured for dispatch, together with its liveness flag.
struct Live<H: ?Sized> {
    active: Arc<AtomicBool>,
    callback: Arc<H>,
}

impl<H: ?Sized> Live<H> {
    fn callback(&self) -> Option<&H> {
        self.active
            .load(Ordering::Acquire)
            .then_some(self.callback.as_ref())
    }
}

struct HandlerList<H: ?Sized> {
    entries: RwLock<Vec<Entry<H>>>,
}

impl<H: ?Sized> HandlerList<H> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    // The lists only ever hold complete entries, so a poisoned lock is still consistent.
    fn push(&self, id: HandlerId, callback: Arc<H>) -> Arc<AtomicBool> {
        let active = Arc::new(AtomicBool::new(true));
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Entry {
                id,
                active: Arc::clone(&active),
                callback,
            });
        active
    }

    fn remove(&self, id: HandlerId) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|entry| entry.id != id);
    }

    /// Copy of the current entries; callbacks are invoked without holding the lock.
    fn snapshot(&self) -> Vec<Live<H>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|entry| Live {
                active: Arc::clone(&entry.active),
                callback: Arc::clone(&entry.callback),
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Connection handlers captured at one instant, delivered later with no lock held.
pub(crate) struct ConnectionBroadcast {
    handlers: Vec<Live<ConnectionHandler>>,
}

pub(crate) struct HandlerRegistry {
    next_id: AtomicU64,
    messages: HandlerList<MessageHandler>,
    connection: HandlerList<ConnectionHandler>,
    errors: HandlerList<ErrorHandler>,
}

impl HandlerRegistry {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            messages: HandlerList::new(),
            connection: HandlerList::new(),
            errors: HandlerList::new(),
        })
    }

    fn next_id(&self) -> HandlerId {
        HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn add_message(self: &Arc<Self>, callback: Arc<MessageHandler>) -> Registration {
        let id = self.next_id();
        let active = self.messages.push(id, callback);
        Registration::new(id, Channel::Message, self, active)
    }

    pub(crate) fn add_connection(
        self: &Arc<Self>,
        callback: Arc<ConnectionHandler>,
    ) -> Registration {
        let id = self.next_id();
        let active = self.connection.push(id, callback);
        Registration::new(id, Channel::Connection, self, active)
    }

    pub(crate) fn add_error(self: &Arc<Self>, callback: Arc<ErrorHandler>) -> Registration {
        let id = self.next_id();
        let active = self.errors.push(id, callback);
        Registration::new(id, Channel::Error, self, active)
    }

    fn remove(&self, channel: Channel, id: HandlerId) {
        match channel {
            Channel::Message => self.messages.remove(id),
            Channel::Connection => self.connection.remove(id),
            Channel::Error => self.errors.remove(id),
        }
    }

    pub(crate) fn counts(&self) -> (usize, usize, usize) {
        (
            self.messages.len(),
            self.connection.len(),
            self.errors.len(),
        )
    }

    /// Deliver `message` to every message handler in registration order.
    pub(crate) fn notify_message(&self, message: &Message) {
        for live in self.messages.snapshot() {
            let Some(callback) = live.callback() else {
                continue;
            };
            if let Err(reason) = invoke(|| callback(message)) {
                self.report_handler_failure(Channel::Message, reason);
            }
        }
    }

    pub(crate) fn notify_connection(&self, connected: bool) {
        self.broadcast_connection(self.capture_connection(), connected);
    }

    /// Fix the set of connection handlers that a later
    /// [`HandlerRegistry::broadcast_connection`] will reach.
    pub(crate) fn capture_connection(&self) -> ConnectionBroadcast {
        ConnectionBroadcast {
            handlers: self.connection.snapshot(),
        }
    }

    pub(crate) fn broadcast_connection(&self, captured: ConnectionBroadcast, connected: bool) {
        #[cfg(feature = "tracing")]
        tracing::debug!(connected, "connection status changed");

        for live in captured.handlers {
            if let Some(callback) = live.callback() {
                self.deliver_connection(callback, connected);
            }
        }
    }

    /// Deliver one connection status to a single handler.
    pub(crate) fn deliver_connection(&self, callback: &ConnectionHandler, connected: bool) {
        if let Err(reason) = invoke(|| callback(connected)) {
            self.report_handler_failure(Channel::Connection, reason);
        }
    }

    /// Deliver `error` to every error handler. Failures of error handlers are
    /// only logged, never re-dispatched.
    pub(crate) fn notify_error(&self, error: &Error) {
        #[cfg(feature = "tracing")]
        tracing::warn!(kind = ?error.kind(), %error, "broker session error");

        for live in self.errors.snapshot() {
            let Some(callback) = live.callback() else {
                continue;
            };
            if let Err(reason) = invoke(|| callback(error)) {
                #[cfg(feature = "tracing")]
                tracing::error!(%reason, "error handler failed");
                #[cfg(not(feature = "tracing"))]
                let _ = &reason;
            }
        }
    }

    fn report_handler_failure(&self, channel: Channel, reason: String) {
        self.notify_error(&Error::handler(channel, reason));
    }
}

/// Run a callback, turning both returned errors and panics into a reason string.
fn invoke<F: FnOnce() -> HandlerResult>(f: F) -> Result<(), String> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_owned()
    }
}

/// Handle returned by every `on_*` registration.
///
/// Calling [`Registration::unregister`] removes exactly this entry; calling it
/// again is a no-op. Dropping the handle leaves the callback registered.
#[derive(Debug, Clone)]
pub struct Registration {
    id: HandlerId,
    channel: Channel,
    registry: Weak<HandlerRegistry>,
    active: Arc<AtomicBool>,
}

impl Registration {
    fn new(
        id: HandlerId,
        channel: Channel,
        registry: &Arc<HandlerRegistry>,
        active: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            channel,
            registry: Arc::downgrade(registry),
            active,
        }
    }

    #[must_use]
    pub fn id(&self) -> HandlerId {
        self.id
    }

    #[must_use]
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Whether the callback is still registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Remove the callback. It receives no further notifications, including
    /// from a dispatch that is already in progress.
    pub fn unregister(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.channel, self.id);
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (messages, connection, errors) = self.counts();
        f.debug_struct("HandlerRegistry")
            .field("messages", &messages)
            .field("connection", &connection)
            .field("errors", &errors)
            .finish_non_exhaustive()
    }
}
