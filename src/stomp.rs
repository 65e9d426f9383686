//! Minimal STOMP 1.2 framing for the Web-STOMP endpoint.
//!
//! Only the commands a single-subscription consumer needs are modelled. Frames
//! are carried one per WebSocket text message; a message made only of EOLs is a
//! heartbeat.

use std::fmt;
use std::str::FromStr;

use secrecy::ExposeSecret as _;

use crate::config::Config;
use crate::ws::WsError;

/// Subscription id used for the session's single subscription.
pub const SUBSCRIPTION_ID: &str = "sub-0";

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Command {
    Connect,
    Connected,
    Subscribe,
    Message,
    Ack,
    Error,
    Disconnect,
}

impl FromStr for Command {
    type Err = WsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "CONNECT" => Self::Connect,
            "CONNECTED" => Self::Connected,
            "SUBSCRIBE" => Self::Subscribe,
            "MESSAGE" => Self::Message,
            "ACK" => Self::Ack,
            "ERROR" => Self::Error,
            "DISCONNECT" => Self::Disconnect,
            other => return Err(WsError::InvalidFrame(format!("unknown command `{other}`"))),
        })
    }
}

impl Command {
    /// `CONNECT` and `CONNECTED` headers are never escaped.
    const fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

/// A single STOMP frame.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// What one inbound WebSocket message turned out to be.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Frame(Frame),
    Heartbeat,
}

impl Frame {
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    #[must_use]
    pub fn header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn body<B: Into<String>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    /// First value for `key`; STOMP gives repeated headers first-wins semantics.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// `CONNECT` frame carrying the login handshake for `config`.
    #[must_use]
    pub fn connect(config: &Config) -> Self {
        Self::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", config.vhost.clone())
            .header("login", config.username.clone())
            .header("passcode", config.password.expose_secret())
            .header("heart-beat", config.heart_beat_header())
    }

    #[must_use]
    pub fn subscribe(destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .header("id", SUBSCRIPTION_ID)
            .header("destination", destination)
            .header("ack", "auto")
    }

    #[must_use]
    pub fn ack(id: &str) -> Self {
        Self::new(Command::Ack).header("id", id)
    }

    #[must_use]
    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }

    /// Serialize into the wire representation, terminated by a NUL octet.
    #[must_use]
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(self.body.len() + 64);
        out.push_str(&self.command.to_string());
        out.push('\n');
        for (key, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(key));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(key);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() {
            out.push_str("content-length:");
            out.push_str(&self.body.len().to_string());
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parse one inbound WebSocket text message.
    pub fn decode(raw: &str) -> Result<Received, WsError> {
        let trimmed = raw.trim_start_matches(['\r', '\n']);
        if trimmed.is_empty() {
            return Ok(Received::Heartbeat);
        }

        let (head, rest) = trimmed
            .split_once("\n\n")
            .or_else(|| trimmed.split_once("\r\n\r\n"))
            .ok_or_else(|| WsError::InvalidFrame("missing header terminator".to_owned()))?;

        let mut lines = head.lines();
        let command_line = lines.next().unwrap_or_default().trim_end_matches('\r');
        let command = Command::from_str(command_line)?;

        let unescape = command.escapes_headers();
        let mut headers = Vec::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| WsError::InvalidFrame(format!("malformed header `{line}`")))?;
            if unescape {
                headers.push((unescape_header(key)?, unescape_header(value)?));
            } else {
                headers.push((key.to_owned(), value.to_owned()));
            }
        }

        let frame = Frame {
            command,
            headers,
            body: String::new(),
        };
        let body = match frame.get("content-length").map(str::parse::<usize>) {
            Some(Ok(length)) => rest
                .get(..length)
                .ok_or_else(|| WsError::InvalidFrame("body shorter than content-length".to_owned()))?,
            Some(Err(e)) => return Err(WsError::InvalidFrame(format!("bad content-length: {e}"))),
            None => rest.split('\0').next().unwrap_or_default(),
        };

        Ok(Received::Frame(Frame {
            body: body.to_owned(),
            ..frame
        }))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} headers, {} bytes)", self.command, self.headers.len(), self.body.len())
    }
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(value: &str) -> Result<String, WsError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(WsError::InvalidFrame(format!(
                    "undefined escape sequence `\\{}`",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}

/// Parse a `heart-beat` header value into `(cx, cy)` milliseconds.
#[must_use]
pub fn parse_heart_beat(value: Option<&str>) -> (u64, u64) {
    value
        .and_then(|v| v.split_once(','))
        .map_or((0, 0), |(x, y)| {
            (x.trim().parse().unwrap_or(0), y.trim().parse().unwrap_or(0))
        })
}
