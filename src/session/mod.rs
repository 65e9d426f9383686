//! The broker session: connection state machine, reconnection and the live
//! subscription.
//!
//! [`Session`] is the only entry point. It owns one [`crate::ws::Transport`]
//! at a time, driven by a background task that performs the STOMP handshake,
//! subscribes, and dispatches every decoded [`crate::Message`] to the
//! registered handlers. When the transport is lost a single reconnection is
//! scheduled after [`crate::Config::reconnect_delay`].

mod client;
mod subscription;

pub use client::{ConnectionState, Session};
