use std::time::Duration;

use bon::Builder;
use secrecy::SecretString;

const DEFAULT_BROKER_URL: &str = "ws://127.0.0.1:15674/ws";
const DEFAULT_MANAGEMENT_URL: &str = "http://127.0.0.1:15672";
const DEFAULT_USERNAME: &str = "guest";
const DEFAULT_PASSWORD: &str = "guest";
const DEFAULT_VHOST: &str = "/";
const DEFAULT_DESTINATION: &str = "/exchange/eco.exchange/eco.message.route";
const DEFAULT_QUEUE: &str = "eco.messages";
const DEFAULT_RECONNECT_DELAY_DURATION: Duration = Duration::from_secs(8);
const DEFAULT_FETCH_TIMEOUT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_HEARTBEAT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024;

/// Configuration for a [`crate::Session`].
///
/// Every field has a default matching a local RabbitMQ with the Web-STOMP and
/// management plugins enabled, so tests and demos usually only override the
/// endpoints and credentials.
///
/// ```
/// use std::time::Duration;
///
/// use broker_session::Config;
///
/// let config = Config::builder()
///     .broker_url("ws://broker.internal:15674/ws")
///     .username("admin")
///     .password("admin123")
///     .reconnect_delay(Duration::from_secs(2))
///     .build();
///
/// assert_eq!(config.queue(), "eco.messages");
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// WebSocket endpoint of the Web-STOMP plugin.
    #[builder(into, default = DEFAULT_BROKER_URL.to_owned())]
    pub(crate) broker_url: String,
    /// Base URL of the HTTP management API used for bulk fetches.
    #[builder(into, default = DEFAULT_MANAGEMENT_URL.to_owned())]
    pub(crate) management_url: String,
    #[builder(into, default = DEFAULT_USERNAME.to_owned())]
    pub(crate) username: String,
    #[builder(into, default = SecretString::from(DEFAULT_PASSWORD))]
    pub(crate) password: SecretString,
    /// Virtual host sent as the STOMP `host` header and used in management paths.
    #[builder(into, default = DEFAULT_VHOST.to_owned())]
    pub(crate) vhost: String,
    /// STOMP destination of the single live subscription.
    #[builder(into, default = DEFAULT_DESTINATION.to_owned())]
    pub(crate) destination: String,
    /// Queue read by the bulk fetch path.
    #[builder(into, default = DEFAULT_QUEUE.to_owned())]
    pub(crate) queue: String,
    /// Fixed delay before the single automatic reconnection attempt.
    #[builder(default = DEFAULT_RECONNECT_DELAY_DURATION)]
    pub(crate) reconnect_delay: Duration,
    /// Upper bound for one bulk fetch request/response exchange.
    #[builder(default = DEFAULT_FETCH_TIMEOUT_DURATION)]
    pub(crate) fetch_timeout: Duration,
    /// Interval at which we offer to send heartbeats. Zero disables them.
    #[builder(default = DEFAULT_HEARTBEAT_DURATION)]
    pub(crate) heartbeat_outgoing: Duration,
    /// Interval at which we ask the broker to send heartbeats. Zero disables them.
    #[builder(default = DEFAULT_HEARTBEAT_DURATION)]
    pub(crate) heartbeat_incoming: Duration,
    /// Largest WebSocket message written to the broker. Longer STOMP frames
    /// are split across several messages. Inbound sizes are not limited by it.
    #[builder(default = DEFAULT_MAX_FRAME_SIZE)]
    pub(crate) max_frame_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Config {
    #[must_use]
    pub fn broker_url(&self) -> &str {
        &self.broker_url
    }

    #[must_use]
    pub fn management_url(&self) -> &str {
        &self.management_url
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn vhost(&self) -> &str {
        &self.vhost
    }

    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Value of the STOMP `heart-beat` header we send in `CONNECT`.
    pub(crate) fn heart_beat_header(&self) -> String {
        format!(
            "{},{}",
            self.heartbeat_outgoing.as_millis(),
            self.heartbeat_incoming.as_millis()
        )
    }
}
