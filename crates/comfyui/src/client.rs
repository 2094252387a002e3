//! WebSocket client for connecting to a ComfyUI instance.
//!
//! [`ComfyUIEndpoint`] holds the addresses and extra headers of one
//! ComfyUI server. [`ComfyUIClient`] opens WebSocket subscriptions scoped
//! to a client id and exposes them as a [`MessageStream`] of text frames
//! through the [`StreamConnector`] trait, which the progress monitor is
//! written against.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{future, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;

/// Addresses and headers for one ComfyUI server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComfyUIEndpoint {
    /// HTTP base URL, e.g. `http://host:8188`.
    pub api_url: String,
    /// WebSocket base URL, e.g. `ws://host:8188`.
    pub ws_url: String,
    /// Extra headers sent on every request and handshake.
    pub headers: Vec<(String, String)>,
}

impl ComfyUIEndpoint {
    /// Derive both URLs from an HTTP base URL (`http` → `ws`,
    /// `https` → `wss`).
    pub fn from_base_url(base_url: &str) -> Self {
        let api_url = base_url.trim_end_matches('/').to_string();
        let ws_url = if let Some(rest) = api_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = api_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{api_url}")
        };
        Self {
            api_url,
            ws_url,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Host part of the API URL, for display.
    pub fn server_address(&self) -> &str {
        self.api_url
            .split_once("://")
            .map_or(self.api_url.as_str(), |(_, rest)| rest)
    }
}

/// Text frames from one WebSocket subscription.
///
/// Binary frames (preview images) and control frames are filtered out.
/// The stream ends when the server closes the connection.
pub type MessageStream = BoxStream<'static, Result<String, ComfyUIClientError>>;

/// Opens event-stream subscriptions for a client id.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self, client_id: &str) -> Result<MessageStream, ComfyUIClientError>;
}

/// Production [`StreamConnector`] backed by `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct ComfyUIClient {
    endpoint: ComfyUIEndpoint,
    open_timeout: Duration,
}

impl ComfyUIClient {
    /// Create a new client targeting a ComfyUI instance.
    ///
    /// `open_timeout` bounds the WebSocket handshake.
    pub fn new(endpoint: ComfyUIEndpoint, open_timeout: Duration) -> Self {
        Self {
            endpoint,
            open_timeout,
        }
    }

    pub fn endpoint(&self) -> &ComfyUIEndpoint {
        &self.endpoint
    }

    /// Subscription URL for `client_id`.
    pub fn subscription_url(&self, client_id: &str) -> String {
        format!("{}/ws?clientId={}", self.endpoint.ws_url, client_id)
    }
}

#[async_trait]
impl StreamConnector for ComfyUIClient {
    /// Connect to the ComfyUI WebSocket endpoint.
    ///
    /// The `client_id` query parameter makes ComfyUI address job-scoped
    /// messages to this subscription.
    async fn connect(&self, client_id: &str) -> Result<MessageStream, ComfyUIClientError> {
        let url = self.subscription_url(client_id);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ComfyUIClientError::Connection(format!("Invalid URL {url}: {e}")))?;

        for (name, value) in &self.endpoint.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ComfyUIClientError::Connection(format!("Invalid header {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ComfyUIClientError::Connection(format!("Invalid header {name}: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let (ws_stream, _response) = tokio::time::timeout(self.open_timeout, connect_async(request))
            .await
            .map_err(|_| ComfyUIClientError::HandshakeTimeout(self.open_timeout))?
            .map_err(|e| {
                ComfyUIClientError::Connection(format!(
                    "Failed to connect to ComfyUI at {}: {e}",
                    self.endpoint.ws_url
                ))
            })?;

        tracing::info!(
            client_id = %client_id,
            "Connected to ComfyUI at {}",
            self.endpoint.ws_url,
        );

        let frames = ws_stream.filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(_)) => {
                    // ComfyUI sends binary messages for preview images.
                    tracing::trace!("Ignoring binary message (preview image)");
                    None
                }
                Ok(Message::Close(frame)) => {
                    tracing::info!(?frame, "ComfyUI WebSocket closed");
                    None
                }
                // Ping/pong are handled by tungstenite.
                Ok(_) => None,
                Err(e) => Some(Err(ComfyUIClientError::Protocol(e.to_string()))),
            })
        });

        Ok(frames.boxed())
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the initial WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The handshake did not complete in time.
    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// A protocol-level error on an already-established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn endpoint_derives_ws_url_from_http() {
        let endpoint = ComfyUIEndpoint::from_base_url("http://127.0.0.1:8188/");
        assert_eq!(endpoint.api_url, "http://127.0.0.1:8188");
        assert_eq!(endpoint.ws_url, "ws://127.0.0.1:8188");
        assert_eq!(endpoint.server_address(), "127.0.0.1:8188");
    }

    #[test]
    fn endpoint_derives_wss_url_from_https() {
        let endpoint = ComfyUIEndpoint::from_base_url("https://comfy.example.com");
        assert_eq!(endpoint.ws_url, "wss://comfy.example.com");
    }

    #[test]
    fn subscription_url_carries_client_id() {
        let client = ComfyUIClient::new(
            ComfyUIEndpoint::from_base_url("http://localhost:8188"),
            Duration::from_secs(5),
        );
        assert_eq!(
            client.subscription_url("abc"),
            "ws://localhost:8188/ws?clientId=abc"
        );
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let client = ComfyUIClient::new(
            ComfyUIEndpoint::from_base_url("http://127.0.0.1:1"),
            Duration::from_secs(5),
        );
        let result = client.connect("abc").await;
        assert_matches!(result.err(), Some(ComfyUIClientError::Connection(_)));
    }
}
