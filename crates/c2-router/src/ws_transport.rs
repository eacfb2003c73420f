//! WebSocket hub transport
//!
//! Connects with `Authorization: Bearer <token>` and exchanges JSON hub
//! frames as text messages. One task writes outbound frames, another parses
//! inbound frames; the inbound queue closes when the socket does. `wss://`
//! endpoints are secured with rustls against the webpki root store.

use crate::error::HubError;
use crate::hub::{HubConnector, HubFrame, HubLink};
use async_trait::async_trait;
use commandlink_core::config::HubConfig;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// URL schemes the connector can dial
const SUPPORTED_SCHEMES: [&str; 2] = ["ws://", "wss://"];

/// Hub connector over `ws://` or `wss://`.
#[derive(Debug, Clone)]
pub struct WsHubConnector {
    url: String,
}

impl WsHubConnector {
    /// Connector for the hub endpoint at `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Connector for the `[hub]` configuration section
    pub fn from_config(config: &HubConfig) -> Self {
        Self::new(config.url.clone())
    }

    /// Hub endpoint
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HubConnector for WsHubConnector {
    async fn connect(&self, access_token: &str) -> Result<HubLink, HubError> {
        if !SUPPORTED_SCHEMES
            .iter()
            .any(|scheme| self.url.starts_with(scheme))
        {
            return Err(HubError::Connect(format!(
                "unsupported hub url {}, expected ws:// or wss://",
                self.url
            )));
        }

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| HubError::Connect(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {access_token}"))
            .map_err(|e| HubError::Connect(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (socket, response) = connect_async(request)
            .await
            .map_err(|e| HubError::Connect(e.to_string()))?;
        info!(url = %self.url, status = %response.status(), "Connected to hub");

        let (mut sink, mut source) = socket.split();
        let (link, mut out_rx, in_tx) = HubLink::pair();

        link.tasks.spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        error!(method = frame.method(), error = %e, "Unable to encode hub frame");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!(error = %e, "Hub socket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        link.tasks.spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = in_tx.closed() => break,
                    message = source.next() => message,
                };
                match message {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<HubFrame>(&text) {
                        Ok(frame) => {
                            if in_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "Ignoring unrecognized hub frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Hub socket read failed");
                        break;
                    }
                }
            }
            debug!("Hub socket closed");
        });
        link.tasks.close();

        Ok(link)
    }
}
