use std::time::Duration;

use reqwest::{
    Client as ReqwestClient, Method,
    header::{HeaderMap, HeaderValue},
};
use secrecy::{ExposeSecret as _, SecretString};
use url::Url;

use super::types::{BatchEntry, GetMessagesRequest, QueuedMessage};
use crate::Result;
use crate::config::Config;
use crate::error::Error;

/// Client for the broker's HTTP management API.
///
/// Only the queue read endpoint is used: it lets callers peek at messages that
/// are already queued without touching the live subscription.
///
/// # Example
///
/// ```no_run
/// use broker_session::Config;
/// use broker_session::management::{Client, types::GetMessagesRequest};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = Client::new(&Config::default())?;
///
/// let raw = client
///     .get_messages("eco.messages", &GetMessagesRequest::peek(10))
///     .await?;
/// println!("{} messages still queued", raw.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    host: Url,
    client: ReqwestClient,
    username: String,
    password: SecretString,
    vhost: String,
    timeout: Duration,
}

impl Client {
    /// Creates a management API client from the session configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the management URL is invalid or the HTTP client
    /// fails to build.
    pub fn new(config: &Config) -> Result<Client> {
        let mut headers = HeaderMap::new();

        headers.insert("User-Agent", HeaderValue::from_static("broker_session"));
        headers.insert("Accept", HeaderValue::from_static("application/json"));
        headers.insert("Connection", HeaderValue::from_static("keep-alive"));
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client = ReqwestClient::builder().default_headers(headers).build()?;

        Ok(Self {
            host: Url::parse(&config.management_url)?,
            client,
            username: config.username.clone(),
            password: config.password.clone(),
            vhost: config.vhost.clone(),
            timeout: config.fetch_timeout,
        })
    }

    /// Returns the host URL for the client.
    #[must_use]
    pub fn host(&self) -> &Url {
        &self.host
    }

    #[must_use]
    fn client(&self) -> &ReqwestClient {
        &self.client
    }

    /// `{host}/api/queues/{vhost}/{queue}/get`, with the vhost and queue
    /// percent-encoded as single path segments (the default vhost `/` becomes
    /// `%2F`).
    pub(crate) fn queue_get_url(&self, queue: &str) -> Result<Url> {
        let mut url = self.host.clone();
        url.path_segments_mut()
            .map_err(|()| Error::validation(format!("{} cannot be a base URL", self.host)))?
            .pop_if_empty()
            .extend(["api", "queues", self.vhost.as_str(), queue, "get"]);

        Ok(url)
    }

    /// Read up to `request.count` messages from `queue`.
    ///
    /// With the default [`GetMessagesRequest`] the read is non-destructive:
    /// the broker requeues every message it returns.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::error::Kind::Fetch`] error on timeout, transport
    /// failure or a non-success status, and [`crate::error::Kind::Decode`] if
    /// the response is not a list of queued messages.
    pub async fn get_messages(
        &self,
        queue: &str,
        request: &GetMessagesRequest,
    ) -> Result<Vec<QueuedMessage>> {
        let request = self
            .client()
            .request(Method::POST, self.queue_get_url(queue)?)
            .basic_auth(&self.username, Some(self.password.expose_secret()))
            .timeout(self.timeout)
            .json(request)
            .build()?;

        crate::request(&self.client, request).await
    }

    /// Peek at up to `limit` messages and decode each payload independently.
    ///
    /// Entries keep the order the broker returned them in; undecodable ones
    /// become [`BatchEntry::Malformed`] placeholders.
    ///
    /// # Errors
    ///
    /// See [`Client::get_messages`].
    pub async fn peek(&self, queue: &str, limit: usize) -> Result<Vec<BatchEntry>> {
        let raw = self
            .get_messages(queue, &GetMessagesRequest::peek(limit))
            .await?;

        Ok(raw.into_iter().map(QueuedMessage::into_entry).collect())
    }
}
