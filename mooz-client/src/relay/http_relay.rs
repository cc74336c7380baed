use async_trait::async_trait;
use futures::StreamExt;
use mooz_core::{Id, MessageRelay, RelayError, Subscription};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Deserialize)]
struct PendingResponse {
    messages: Vec<Value>,
}

/// Per-request limit when none is given.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

fn transport_error(e: impl std::error::Error + Send + Sync + 'static) -> RelayError {
    RelayError::Transport(Box::new(e))
}

fn request_error(e: reqwest::Error) -> RelayError {
    if e.is_timeout() {
        RelayError::Timeout
    } else {
        transport_error(e)
    }
}

/// Client for a relay reached over HTTP, with push over WebSocket.
#[derive(Debug, Clone)]
pub struct HttpRelay {
    client: reqwest::Client,
    base: Url,
    timeout: Duration,
}

impl HttpRelay {
    /// `base` is the relay root, e.g. `http://localhost:3000`.
    pub fn new(base: &str) -> Result<Self, RelayError> {
        Self::with_timeout(base, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Like [`HttpRelay::new`], but every request gives up after `timeout`.
    pub fn with_timeout(base: &str, timeout: Duration) -> Result<Self, RelayError> {
        let mut base = Url::parse(base).map_err(transport_error)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(transport_error)?;

        Ok(Self {
            client,
            base,
            timeout,
        })
    }

    fn endpoint(&self, route: &str, to: &Id) -> Result<Url, RelayError> {
        self.base
            .join(&format!("{}/{}", route, to))
            .map_err(transport_error)
    }

    fn subscribe_url(&self, to: &Id) -> Result<Url, RelayError> {
        let mut url = self.endpoint("subscribe", to)?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        if url.set_scheme(scheme).is_err() {
            return Err(RelayError::Closed);
        }
        Ok(url)
    }
}

#[async_trait]
impl MessageRelay for HttpRelay {
    async fn send(&self, message: Value, to: &Id) -> Result<(), RelayError> {
        let response = self
            .client
            .post(self.endpoint("messages", to)?)
            .json(&message)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Status(status.as_u16()));
        }
        Ok(())
    }

    async fn pending(&self, to: &Id) -> Result<Vec<Value>, RelayError> {
        let response = self
            .client
            .get(self.endpoint("messages", to)?)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Status(status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(request_error)?;
        let body: PendingResponse = serde_json::from_slice(&bytes)?;
        Ok(body.messages)
    }

    async fn subscribe(&self, to: &Id) -> Option<Subscription> {
        let url = match self.subscribe_url(to) {
            Ok(url) => url,
            Err(e) => {
                warn!("Cannot build push address for {}: {}", to, e);
                return None;
            }
        };

        let connect = tokio_tungstenite::connect_async(url.as_str());
        let (mut socket, _) = match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => {
                warn!("Push subscription for {} failed: {}", to, e);
                return None;
            }
            Err(_) => {
                warn!("Push subscription for {} timed out", to);
                return None;
            }
        };
        info!("Push subscription open for {}", to);

        let (tx, rx) = mpsc::unbounded_channel();
        let to = to.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = socket.next() => match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            match serde_json::from_str::<Value>(text.as_str()) {
                                Ok(message) => {
                                    if tx.send(message).is_err() {
                                        break;
                                    }
                                }
                                Err(e) => warn!("Dropping undecodable push frame for {}: {}", to, e),
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => {}
                    },

                    // The subscriber went away: hang up so the relay keeps
                    // queueing instead of pushing into a dead socket.
                    _ = tx.closed() => {
                        if let Err(e) = socket.close(None).await {
                            debug!("Closing push socket for {} failed: {}", to, e);
                        }
                        break;
                    }
                }
            }
            debug!("Push subscription closed for {}", to);
        });

        Some(Subscription::new(rx))
    }
}
