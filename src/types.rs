//! Message types shared by the live subscription and the bulk fetch path.

use std::fmt;

use bon::Builder;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

/// Secret string type used for the broker password.
pub use secrecy::SecretString;

use crate::serde_helpers::StringFromAny;

/// Sender recorded by [`Message::new`].
pub const DEFAULT_SENDER: &str = "broker-session";

/// Severity bucket of a [`Message`].
///
/// The publisher may emit values outside the four known buckets (it emits
/// `"Update"`, for instance). Those are kept verbatim in [`MessageType::Unknown`]
/// and treated as [`MessageType::Info`] by [`MessageType::category`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum MessageType {
    #[default]
    Info,
    Warning,
    Success,
    Alert,
    /// Unrecognized value from the wire (captures the raw value for display).
    #[serde(untagged)]
    Unknown(String),
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => f.write_str("Info"),
            Self::Warning => f.write_str("Warning"),
            Self::Success => f.write_str("Success"),
            Self::Alert => f.write_str("Alert"),
            Self::Unknown(raw) => f.write_str(raw),
        }
    }
}

impl MessageType {
    /// The bucket this type is counted and styled under.
    #[must_use]
    pub fn category(&self) -> MessageType {
        match self {
            Self::Unknown(_) => Self::Info,
            known => known.clone(),
        }
    }
}

/// A decoded broker message.
///
/// Field names follow the camelCase wire shape; the PascalCase names written by
/// the .NET publisher are accepted as aliases. Missing fields decode to their
/// defaults, so only payloads that are not JSON objects fail to decode.
#[serde_as]
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "camelCase", default)]
pub struct Message {
    #[serde(alias = "Id")]
    #[serde_as(as = "StringFromAny")]
    #[builder(into, default)]
    pub id: String,
    #[serde(alias = "Content")]
    #[builder(into, default)]
    pub content: String,
    #[serde(alias = "Timestamp")]
    #[serde_as(as = "StringFromAny")]
    #[builder(into, default)]
    pub timestamp: String,
    #[serde(alias = "Sender")]
    #[builder(into, default)]
    pub sender: String,
    #[serde(alias = "MessageType")]
    #[builder(default)]
    pub message_type: MessageType,
}

impl Message {
    /// A fresh `Info` message with a random id and the current UTC timestamp.
    #[must_use]
    pub fn new<S: Into<String>>(content: S) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            sender: DEFAULT_SENDER.to_owned(),
            message_type: MessageType::Info,
        }
    }
}

/// Per-category message counts.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageStats {
    pub info: usize,
    pub warning: usize,
    pub success: usize,
    pub alert: usize,
    pub total: usize,
}

impl MessageStats {
    pub fn record(&mut self, message: &Message) {
        match message.message_type.category() {
            MessageType::Warning => self.warning += 1,
            MessageType::Success => self.success += 1,
            MessageType::Alert => self.alert += 1,
            _ => self.info += 1,
        }
        self.total += 1;
    }
}

impl<'msg> FromIterator<&'msg Message> for MessageStats {
    fn from_iter<I: IntoIterator<Item = &'msg Message>>(iter: I) -> Self {
        let mut stats = Self::default();
        for message in iter {
            stats.record(message);
        }
        stats
    }
}
