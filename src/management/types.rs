use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;
use crate::serde_helpers::decode_payload;
use crate::types::Message;

/// How the management API should encode payloads in its response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[non_exhaustive]
pub enum Encoding {
    /// UTF-8 payloads as strings, anything else base64
    #[default]
    Auto,
    Base64,
}

/// What the broker does with the messages it hands out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[non_exhaustive]
pub enum AckMode {
    /// Non-destructive peek: messages are requeued after being read
    #[default]
    AckRequeueTrue,
    AckRequeueFalse,
    RejectRequeueTrue,
    RejectRequeueFalse,
}

/// Body of `POST /api/queues/{vhost}/{queue}/get`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Builder)]
pub struct GetMessagesRequest {
    /// Maximum number of messages to return
    pub count: usize,
    #[builder(default)]
    pub encoding: Encoding,
    #[builder(default)]
    pub ackmode: AckMode,
}

impl GetMessagesRequest {
    /// A non-destructive read of up to `count` messages.
    #[must_use]
    pub fn peek(count: usize) -> Self {
        Self::builder().count(count).build()
    }
}

/// Encoding of [`QueuedMessage::payload`] as reported by the broker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum PayloadEncoding {
    #[default]
    String,
    Base64,
    /// Unknown encoding from the API (captures the raw value for debugging).
    #[serde(untagged)]
    Unknown(String),
}

impl fmt::Display for PayloadEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("string"),
            Self::Base64 => f.write_str("base64"),
            Self::Unknown(raw) => f.write_str(raw),
        }
    }
}

/// One raw entry returned by the management API.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize, Builder)]
pub struct QueuedMessage {
    #[builder(into)]
    pub payload: String,
    #[serde(default)]
    #[builder(default)]
    pub payload_encoding: PayloadEncoding,
    #[serde(default)]
    #[builder(default)]
    pub payload_bytes: u64,
    #[serde(default)]
    #[builder(default)]
    pub redelivered: bool,
    #[serde(default)]
    #[builder(into, default)]
    pub exchange: String,
    #[serde(default)]
    #[builder(into, default)]
    pub routing_key: String,
    /// Messages left in the queue after this one was read
    #[serde(default)]
    #[builder(default)]
    pub message_count: u64,
    #[serde(default)]
    #[builder(default)]
    pub properties: Value,
}

impl QueuedMessage {
    /// Decode the payload into a [`Message`], undoing base64 first when needed.
    pub fn decode(&self) -> Result<Message> {
        match self.payload_encoding {
            PayloadEncoding::Base64 => {
                let bytes = STANDARD.decode(self.payload.trim())?;
                decode_payload(&String::from_utf8_lossy(&bytes))
            }
            _ => decode_payload(&self.payload),
        }
    }

    /// Decode the payload, degrading to a [`MalformedEntry`] on failure.
    #[must_use]
    pub fn into_entry(self) -> BatchEntry {
        match self.decode() {
            Ok(message) => BatchEntry::Decoded(message),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(payload = %self.payload, error = %e, "undecodable queued message");

                BatchEntry::Malformed(MalformedEntry {
                    content: self.payload,
                    error: e.to_string(),
                })
            }
        }
    }
}

/// Diagnostic placeholder for a fetched entry whose payload did not decode.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedEntry {
    /// The raw payload as returned by the broker
    pub content: String,
    /// Why decoding failed
    pub error: String,
}

/// One record of a bulk fetch, in the order the broker returned it.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEntry {
    Decoded(Message),
    Malformed(MalformedEntry),
}

impl BatchEntry {
    #[must_use]
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Self::Decoded(message) => Some(message),
            Self::Malformed(_) => None,
        }
    }

    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}
