//! Core traits for the broker transport.
//!
//! The session never touches a socket directly. It asks a [`Connector`] for a
//! [`Transport`] and then only exchanges STOMP frames with it, which keeps the
//! state machine testable without a network.

use async_trait::async_trait;

use crate::Result;
use crate::config::Config;
use crate::stomp::{Frame, Received};

/// Opens transports to the broker.
///
/// # Example
///
/// ```ignore
/// struct Loopback;
///
/// #[async_trait]
/// impl Connector for Loopback {
///     async fn connect(&self, config: &Config) -> Result<Box<dyn Transport>> {
///         Ok(Box::new(MyTransport::open(config.broker_url()).await?))
///     }
/// }
/// ```
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish the underlying connection. The STOMP handshake is driven by
    /// the session afterwards.
    async fn connect(&self, config: &Config) -> Result<Box<dyn Transport>>;
}

/// A connected, frame-oriented duplex channel.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one frame.
    async fn send(&mut self, frame: &Frame) -> Result<()>;

    /// Send a heartbeat (a bare EOL).
    async fn send_heartbeat(&mut self) -> Result<()>;

    /// Wait for the next inbound frame or heartbeat.
    ///
    /// `None` means the peer closed the connection.
    async fn recv(&mut self) -> Option<Result<Received>>;

    /// Close the connection. Errors are not interesting at this point.
    async fn close(&mut self);
}
