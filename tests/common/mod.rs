#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper"
)]

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use broker_session::error::{Error, Kind};
use broker_session::stomp::{Command, Frame, Received};
use broker_session::ws::{Connector, Transport, WsError};
use broker_session::{Config, Session};
use serde_json::json;
use tokio::sync::{Notify, mpsc};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

/// What the session wrote to the mock broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(Frame),
    Heartbeat,
    Closed,
}

/// In-memory [`Connector`]: every successful `connect` hands the broker side
/// of a new channel pair to the paired [`MockBroker`].
#[derive(Clone)]
pub struct MockConnector {
    connections: mpsc::UnboundedSender<BrokerConnection>,
    attempts: Arc<AtomicUsize>,
    refuse: Arc<AtomicBool>,
    subscribe_gate: Arc<Mutex<Option<Arc<Notify>>>>,
}

pub struct MockBroker {
    connections: mpsc::UnboundedReceiver<BrokerConnection>,
    attempts: Arc<AtomicUsize>,
    refuse: Arc<AtomicBool>,
    subscribe_gate: Arc<Mutex<Option<Arc<Notify>>>>,
}

#[must_use]
pub fn mock_broker() -> (MockConnector, MockBroker) {
    let (tx, rx) = mpsc::unbounded_channel();
    let attempts = Arc::new(AtomicUsize::new(0));
    let refuse = Arc::new(AtomicBool::new(false));
    let subscribe_gate = Arc::new(Mutex::new(None));

    (
        MockConnector {
            connections: tx,
            attempts: Arc::clone(&attempts),
            refuse: Arc::clone(&refuse),
            subscribe_gate: Arc::clone(&subscribe_gate),
        },
        MockBroker {
            connections: rx,
            attempts,
            refuse,
            subscribe_gate,
        },
    )
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _config: &Config) -> broker_session::Result<Box<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(WsError::ConnectionClosed.into());
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        self.connections
            .send(BrokerConnection {
                to_client,
                from_client,
            })
            .map_err(|_e| Error::from(WsError::ConnectionClosed))?;

        Ok(Box::new(MockTransport {
            inbound,
            outbound,
            subscribe_gate: self.subscribe_gate.lock().unwrap().clone(),
        }))
    }
}

struct MockTransport {
    inbound: mpsc::UnboundedReceiver<broker_session::Result<Received>>,
    outbound: mpsc::UnboundedSender<Outbound>,
    subscribe_gate: Option<Arc<Notify>>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, frame: &Frame) -> broker_session::Result<()> {
        if frame.command == Command::Subscribe
            && let Some(gate) = &self.subscribe_gate
        {
            gate.notified().await;
        }
        self.outbound
            .send(Outbound::Frame(frame.clone()))
            .map_err(|_e| Error::from(WsError::ConnectionClosed))
    }

    async fn send_heartbeat(&mut self) -> broker_session::Result<()> {
        self.outbound
            .send(Outbound::Heartbeat)
            .map_err(|_e| Error::from(WsError::ConnectionClosed))
    }

    async fn recv(&mut self) -> Option<broker_session::Result<Received>> {
        self.inbound.recv().await
    }

    async fn close(&mut self) {
        drop(self.outbound.send(Outbound::Closed));
    }
}

impl MockBroker {
    /// Number of `connect` calls so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Make `SUBSCRIBE` sends on later connections wait until the returned
    /// gate is notified once per subscription.
    pub fn hold_subscriptions(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.subscribe_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub async fn next_connection(&mut self) -> BrokerConnection {
        timeout(WAIT, self.connections.recv())
            .await
            .expect("no connection attempt")
            .unwrap()
    }

    /// Accept the next connection: expect `CONNECT`, answer `CONNECTED` and
    /// wait for the subscription.
    pub async fn accept(&mut self) -> BrokerConnection {
        let mut connection = self.next_connection().await;
        connection.handshake(None).await;
        connection
    }
}

/// Broker side of one mock transport.
pub struct BrokerConnection {
    to_client: mpsc::UnboundedSender<broker_session::Result<Received>>,
    from_client: mpsc::UnboundedReceiver<Outbound>,
}

impl BrokerConnection {
    pub async fn next_outbound(&mut self) -> Outbound {
        timeout(WAIT, self.from_client.recv())
            .await
            .expect("session sent nothing")
            .unwrap_or(Outbound::Closed)
    }

    /// Next frame, skipping heartbeats.
    pub async fn next_frame(&mut self) -> Frame {
        loop {
            match self.next_outbound().await {
                Outbound::Frame(frame) => return frame,
                Outbound::Heartbeat => {}
                Outbound::Closed => panic!("transport closed while waiting for a frame"),
            }
        }
    }

    pub fn try_next_outbound(&mut self) -> Option<Outbound> {
        self.from_client.try_recv().ok()
    }

    /// Expect `CONNECT`, reply `CONNECTED` and return the `SUBSCRIBE` frame.
    pub async fn handshake(&mut self, heart_beat: Option<&str>) -> Frame {
        let connect = self.next_frame().await;
        assert_eq!(connect.command, Command::Connect);

        let mut connected = Frame::new(Command::Connected).header("version", "1.2");
        if let Some(heart_beat) = heart_beat {
            connected = connected.header("heart-beat", heart_beat);
        }
        self.send(connected);

        let subscribe = self.next_frame().await;
        assert_eq!(subscribe.command, Command::Subscribe);
        subscribe
    }

    pub fn send(&self, frame: Frame) {
        drop(self.to_client.send(Ok(Received::Frame(frame))));
    }

    pub fn heartbeat(&self) {
        drop(self.to_client.send(Ok(Received::Heartbeat)));
    }

    pub fn fail(&self, error: Error) {
        drop(self.to_client.send(Err(error)));
    }

    /// Publish a `MESSAGE` frame with `body` on the session's subscription.
    pub fn message(&self, body: &str) {
        self.send(
            Frame::new(Command::Message)
                .header("subscription", "sub-0")
                .header("destination", "/exchange/eco.exchange/eco.message.route")
                .header("message-id", "T_sub-0@@session-1@@1")
                .body(body),
        );
    }

    /// Raw text that does not parse as a STOMP frame.
    pub fn garbage(&self, raw: &str) {
        drop(self.to_client.send(Err(
            WsError::InvalidFrame(format!("unparseable frame `{raw}`")).into(),
        )));
    }

    /// Close the broker side, as a dropped socket would.
    pub fn close(self) {
        drop(self);
    }
}

/// JSON body of a message with the given id and content.
#[must_use]
pub fn payload(id: &str, content: &str) -> String {
    json!({
        "id": id,
        "content": content,
        "timestamp": "2024-05-01T12:00:00.000Z",
        "sender": "publisher",
        "messageType": "Info"
    })
    .to_string()
}

/// Everything the handlers of a session observed, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    Connection(bool),
    Message(String),
    Error(Kind),
}

pub struct Observer {
    rx: mpsc::UnboundedReceiver<Observed>,
}

/// Register one handler per channel that records into an [`Observer`].
#[must_use]
pub fn observe(session: &Session) -> Observer {
    let (tx, rx) = mpsc::unbounded_channel();

    let messages = tx.clone();
    session.on_message(move |message| {
        drop(messages.send(Observed::Message(message.content.clone())));
        Ok(())
    });
    let connection = tx.clone();
    session.on_connection_change(move |connected| {
        drop(connection.send(Observed::Connection(connected)));
        Ok(())
    });
    session.on_error(move |error| {
        drop(tx.send(Observed::Error(error.kind())));
        Ok(())
    });

    Observer { rx }
}

impl Observer {
    pub async fn next(&mut self) -> Observed {
        timeout(WAIT, self.rx.recv())
            .await
            .expect("nothing observed")
            .unwrap()
    }

    /// Everything observed so far without waiting.
    pub fn drain(&mut self) -> Vec<Observed> {
        let mut observed = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            observed.push(event);
        }
        observed
    }
}

/// Config for the in-memory broker: heartbeats off, default reconnect delay.
#[must_use]
pub fn test_config() -> Config {
    Config::builder()
        .heartbeat_outgoing(Duration::ZERO)
        .heartbeat_incoming(Duration::ZERO)
        .reconnect_delay(Duration::from_secs(8))
        .build()
}

/// Let spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
