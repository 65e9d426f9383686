//! Broker transport.
//!
//! This module separates the socket from the session logic using traits:
//!
//! - [`Connector`]: opens a [`Transport`] to the broker
//! - [`Transport`]: frame-level send/receive over an open connection
//! - [`WsConnector`]: the production connector, STOMP over `tokio-tungstenite`
//!
//! # Example
//!
//! ```ignore
//! let session = Session::with_connector(config, WsConnector)?;
//! ```

pub mod connection;
pub mod error;
pub mod traits;

pub use connection::{WsConnector, WsTransport};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use traits::*;
