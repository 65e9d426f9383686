//! Bulk fetch over the broker's HTTP management API.
//!
//! Independent of the live subscription: nothing here touches the session's
//! connection state.

pub mod client;
pub mod types;

pub use client::Client;
