#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod config;
pub mod error;
pub mod handlers;
pub mod management;
pub(crate) mod serde_helpers;
pub mod session;
pub mod stomp;
pub mod types;
pub mod ws;

use reqwest::Request;
use serde::de::DeserializeOwned;

pub use crate::config::Config;
use crate::error::Error;
pub use crate::handlers::{HandlerId, HandlerResult, Registration};
pub use crate::management::types::{BatchEntry, MalformedEntry};
pub use crate::session::{ConnectionState, Session};
pub use crate::types::{Message, MessageStats, MessageType};

pub type Result<T> = std::result::Result<T, Error>;

#[cfg_attr(
    feature = "tracing",
    tracing::instrument(
        level = "debug",
        skip(client, request),
        fields(
            method = %request.method(),
            path = request.url().path(),
            status_code
        )
    )
)]
async fn request<Response: DeserializeOwned>(
    client: &reqwest::Client,
    request: Request,
) -> Result<Response> {
    let method = request.method().clone();
    let path = request.url().path().to_owned();

    let response = client.execute(request).await?;
    let status_code = response.status();

    #[cfg(feature = "tracing")]
    tracing::Span::current().record("status_code", status_code.as_u16());

    if !status_code.is_success() {
        let message = response.text().await.unwrap_or_default();

        #[cfg(feature = "tracing")]
        tracing::warn!(
            status = %status_code,
            method = %method,
            path = %path,
            message = %message,
            "management API request failed"
        );

        return Err(Error::status(status_code, method, path, message));
    }

    let json_value = response.json::<serde_json::Value>().await?;
    serde_helpers::deserialize_with_warnings(json_value)
}
