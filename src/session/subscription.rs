//! Per-transport driver: STOMP handshake, the single subscription, heartbeats
//! and message dispatch.
//!
//! One driver task runs per transport. It owns the transport exclusively and
//! reports back to the session through a weak reference tagged with the
//! transport's generation, so events from a torn-down transport are dropped.

use std::future::pending;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep_until};

use super::client::Shared;
use crate::Result;
use crate::config::Config;
use crate::error::{Error, Kind};
use crate::serde_helpers::decode_payload;
use crate::stomp::{Command, Frame, Received, parse_heart_beat};
use crate::types::Message;
use crate::ws::{Connector, Transport, WsError};

/// Heartbeat intervals agreed with the broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Heartbeat {
    /// How often we must send something
    pub(crate) outgoing: Option<Duration>,
    /// How often the broker promised to send something
    pub(crate) incoming: Option<Duration>,
}

impl Heartbeat {
    /// Combine our offer with the broker's `heart-beat` header: each side uses
    /// the larger of the two values, and zero on either side disables it.
    pub(crate) fn negotiate(config: &Config, server: Option<&str>) -> Self {
        let (server_sends, server_wants) = parse_heart_beat(server);

        let pick = |ours: Duration, theirs: u64| {
            let ours = u64::try_from(ours.as_millis()).unwrap_or(u64::MAX);
            (ours != 0 && theirs != 0).then(|| Duration::from_millis(ours.max(theirs)))
        };

        Self {
            outgoing: pick(config.heartbeat_outgoing, server_wants),
            incoming: pick(config.heartbeat_incoming, server_sends),
        }
    }

    /// Silence longer than this means the transport is gone.
    fn silence_limit(self) -> Option<Duration> {
        self.incoming.map(|interval| interval * 2)
    }
}

enum Event {
    Shutdown,
    SendHeartbeat,
    Received(Option<Result<Received>>),
    Silence,
}

/// How the driver loop ended.
enum Exit {
    /// `disconnect()`, `connect()` or the session was dropped.
    Shutdown,
    /// The transport is gone and the session should schedule a reconnect.
    Lost,
}

pub(crate) struct Driver {
    shared: Weak<Shared>,
    connector: Arc<dyn Connector>,
    config: Config,
    generation: u64,
    open: Arc<AtomicBool>,
}

impl Driver {
    pub(crate) fn new(
        shared: Weak<Shared>,
        connector: Arc<dyn Connector>,
        config: Config,
        generation: u64,
        open: Arc<AtomicBool>,
    ) -> Self {
        Self {
            shared,
            connector,
            config,
            generation,
            open,
        }
    }

    pub(crate) async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let connected = tokio::select! {
            _ = &mut shutdown => return,
            result = self.connector.connect(&self.config) => result,
        };

        let exit = match connected {
            Ok(mut transport) => {
                let exit = self.drive(transport.as_mut(), &mut shutdown).await;
                if matches!(exit, Exit::Shutdown) {
                    // Best effort, the peer may already be gone.
                    _ = transport.send(&Frame::disconnect()).await;
                }
                transport.close().await;
                exit
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, url = %self.config.broker_url(), "unable to connect");

                self.report(&e);
                Exit::Lost
            }
        };

        self.open.store(false, Ordering::Release);

        if matches!(exit, Exit::Lost)
            && let Some(shared) = self.shared.upgrade()
        {
            shared.transport_closed(self.generation);
        }
    }

    async fn drive(
        &self,
        transport: &mut dyn Transport,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> Exit {
        if let Err(e) = transport.send(&Frame::connect(&self.config)).await {
            self.report(&e);
            return Exit::Lost;
        }

        let heartbeat = match self.handshake(transport, shutdown).await {
            Ok(heartbeat) => heartbeat,
            Err(exit) => return exit,
        };

        // The session only counts as connected once the subscription is sent.
        if let Err(e) = transport
            .send(&Frame::subscribe(self.config.destination()))
            .await
        {
            self.report(&e);
            return Exit::Lost;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(destination = %self.config.destination(), "subscribed");

        let Some(shared) = self.shared.upgrade() else {
            return Exit::Shutdown;
        };
        let Some(announcement) = shared.mark_connected(self.generation) else {
            return Exit::Shutdown;
        };
        shared.registry.broadcast_connection(announcement, true);
        drop(shared);

        self.dispatch_loop(transport, shutdown, heartbeat).await
    }

    /// Wait for `CONNECTED`. An `ERROR` frame or a closed transport ends the
    /// attempt.
    async fn handshake(
        &self,
        transport: &mut dyn Transport,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> std::result::Result<Heartbeat, Exit> {
        loop {
            let received = tokio::select! {
                _ = &mut *shutdown => return Err(Exit::Shutdown),
                received = transport.recv() => received,
            };

            match received {
                Some(Ok(Received::Frame(frame))) => match frame.command {
                    Command::Connected => {
                        return Ok(Heartbeat::negotiate(&self.config, frame.get("heart-beat")));
                    }
                    Command::Error => {
                        self.protocol_error(&frame);
                        return Err(Exit::Lost);
                    }
                    _ => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(%frame, "ignoring frame before CONNECTED");
                    }
                },
                Some(Ok(Received::Heartbeat)) => {}
                Some(Err(e)) if e.kind() == Kind::Decode => self.report(&e),
                Some(Err(e)) => {
                    self.report(&e);
                    return Err(Exit::Lost);
                }
                None => return Err(Exit::Lost),
            }
        }
    }

    async fn dispatch_loop(
        &self,
        transport: &mut dyn Transport,
        shutdown: &mut oneshot::Receiver<()>,
        heartbeat: Heartbeat,
    ) -> Exit {
        let mut ticker = heartbeat.outgoing.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let mut last_seen = Instant::now();

        loop {
            let deadline = heartbeat.silence_limit().map(|limit| last_seen + limit);

            let event = tokio::select! {
                _ = &mut *shutdown => Event::Shutdown,
                () = tick(ticker.as_mut()) => Event::SendHeartbeat,
                received = transport.recv() => Event::Received(received),
                () = wait_until(deadline) => Event::Silence,
            };

            match event {
                Event::Shutdown => return Exit::Shutdown,
                Event::SendHeartbeat => {
                    if let Err(e) = transport.send_heartbeat().await {
                        self.report(&e);
                        return Exit::Lost;
                    }
                }
                Event::Silence => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(?heartbeat, "broker heartbeat missed");

                    self.report(&Error::from(WsError::HeartbeatTimeout));
                    return Exit::Lost;
                }
                Event::Received(None) => return Exit::Lost,
                // Only the unparseable frame is dropped.
                Event::Received(Some(Err(e))) if e.kind() == Kind::Decode => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %e, "dropping unparseable frame");

                    last_seen = Instant::now();
                    self.report(&e);
                }
                Event::Received(Some(Err(e))) => {
                    self.report(&e);
                    return Exit::Lost;
                }
                Event::Received(Some(Ok(Received::Heartbeat))) => last_seen = Instant::now(),
                Event::Received(Some(Ok(Received::Frame(frame)))) => {
                    last_seen = Instant::now();
                    match frame.command {
                        Command::Message => {
                            if let Err(e) = self.on_message(transport, &frame).await {
                                self.report(&e);
                                return Exit::Lost;
                            }
                        }
                        Command::Error => {
                            self.protocol_error(&frame);
                            return Exit::Lost;
                        }
                        _ => {
                            #[cfg(feature = "tracing")]
                            tracing::trace!(%frame, "ignoring frame");
                        }
                    }
                }
            }
        }
    }

    /// Acknowledge if asked to, then decode and dispatch one `MESSAGE` frame.
    ///
    /// Only a failed `ACK` is returned; decode failures drop the frame.
    async fn on_message(&self, transport: &mut dyn Transport, frame: &Frame) -> Result<()> {
        if let Some(ack) = frame.get("ack") {
            transport.send(&Frame::ack(ack)).await?;
        }

        let Some(shared) = self.shared.upgrade() else {
            return Ok(());
        };
        if !shared.is_current(self.generation) {
            return Ok(());
        }

        match decode_payload::<Message>(&frame.body) {
            Ok(message) => {
                #[cfg(feature = "tracing")]
                tracing::trace!(id = %message.id, message_type = %message.message_type, "dispatching message");

                shared.registry.notify_message(&message);
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(body = %frame.body, error = %e, "dropping undecodable message");

                shared.registry.notify_error(&e);
            }
        }

        Ok(())
    }

    fn protocol_error(&self, frame: &Frame) {
        let message = frame.get("message").unwrap_or("Unknown error");
        let details = (!frame.body.is_empty()).then(|| frame.body.clone());

        #[cfg(feature = "tracing")]
        tracing::error!(reason = message, details = ?details, "broker rejected the session");

        if let Some(shared) = self.shared.upgrade() {
            shared.protocol_error(self.generation, &Error::protocol(message, details));
        }
    }

    fn report(&self, error: &Error) {
        if let Some(shared) = self.shared.upgrade() {
            shared.report(self.generation, error);
        }
    }
}

async fn tick(ticker: Option<&mut Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
