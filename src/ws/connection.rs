use async_trait::async_trait;
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use super::error::WsError;
use super::traits::{Connector, Transport};
use crate::Result;
use crate::config::Config;
use crate::stomp::{Frame, Received};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket connections to the broker's Web-STOMP endpoint.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, config: &Config) -> Result<Box<dyn Transport>> {
        #[cfg(feature = "tracing")]
        tracing::debug!(url = %config.broker_url, "opening WebSocket to broker");

        let (stream, _) = connect_async(config.broker_url.as_str()).await?;

        Ok(Box::new(WsTransport {
            stream,
            max_frame_size: config.max_frame_size,
        }))
    }
}

/// STOMP frames carried as WebSocket text messages. Outgoing frames longer
/// than `max_frame_size` are split over consecutive messages; the broker
/// reassembles them from the stream.
pub struct WsTransport {
    stream: WsStream,
    max_frame_size: usize,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: &Frame) -> Result<()> {
        #[cfg(feature = "tracing")]
        tracing::trace!(%frame, "sending STOMP frame");

        let encoded = frame.encode();
        for chunk in split_frame(&encoded, self.max_frame_size) {
            self.stream.feed(Message::Text(chunk.into())).await?;
        }
        self.stream.flush().await?;
        Ok(())
    }

    async fn send_heartbeat(&mut self) -> Result<()> {
        self.stream.send(Message::Text("\n".into())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Received>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(e.into())),
            };

            let text = match message {
                Message::Text(text) => text.to_string(),
                Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => text,
                    Err(e) => {
                        return Some(Err(WsError::InvalidFrame(e.to_string()).into()));
                    }
                },
                Message::Close(_) => return None,
                // Ping/pong are answered by tungstenite itself.
                _ => continue,
            };

            return Some(Frame::decode(&text).map_err(Into::into));
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            #[cfg(feature = "tracing")]
            tracing::debug!(error = %e, "error closing WebSocket");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    }
}

/// Cut `text` into pieces of at most `limit` bytes on character boundaries.
fn split_frame(text: &str, limit: usize) -> Vec<&str> {
    // Any character fits in four bytes, so every cut makes progress.
    let limit = limit.max(4);
    let mut chunks = Vec::with_capacity(text.len() / limit + 1);
    let mut rest = text;
    while rest.len() > limit {
        let mut cut = limit;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let (head, tail) = rest.split_at(cut);
        chunks.push(head);
        rest = tail;
    }
    chunks.push(rest);
    chunks
}
