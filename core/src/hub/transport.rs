/// Hub transports
///
/// A transport hands the connection a pair of channels carrying raw text
/// frames. The connection never touches sockets directly, which lets tests
/// substitute an in-process hub.
use super::error::HubError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Buffered frames per direction
const FRAME_CAPACITY: usize = 256;

/// Redirects followed during negotiation before giving up
const MAX_NEGOTIATE_REDIRECTS: usize = 100;

/// Channel pair for one established link
pub struct TransportLink {
    /// Frames to the server; dropping it closes the link
    pub tx: mpsc::Sender<String>,
    /// Frames from the server; `None` once the link is gone
    pub rx: mpsc::Receiver<Result<String, HubError>>,
}

impl TransportLink {
    /// Create a link and the opposite ends a transport pumps into
    pub fn pair() -> (
        TransportLink,
        mpsc::Receiver<String>,
        mpsc::Sender<Result<String, HubError>>,
    ) {
        let (out_tx, out_rx) = mpsc::channel(FRAME_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(FRAME_CAPACITY);
        (
            TransportLink {
                tx: out_tx,
                rx: in_rx,
            },
            out_rx,
            in_tx,
        )
    }
}

/// Opens links to the hub
#[async_trait]
pub trait HubConnector: Send + Sync {
    async fn connect(&self) -> Result<TransportLink, HubError>;
}

/// Negotiate response (version 1)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiateResponse {
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub connection_token: Option<String>,
    #[serde(default)]
    pub negotiate_version: u32,
    #[serde(default)]
    pub available_transports: Vec<AvailableTransport>,
    /// Redirect target
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableTransport {
    pub transport: String,
    #[serde(default)]
    pub transfer_formats: Vec<String>,
}

impl NegotiateResponse {
    fn supports_websockets(&self) -> bool {
        self.available_transports.iter().any(|t| {
            t.transport == "WebSockets" && t.transfer_formats.iter().any(|f| f == "Text")
        })
    }

    /// Identifier to pass as `id` on the socket URL
    fn socket_id(&self) -> Option<&str> {
        if self.negotiate_version >= 1 {
            self.connection_token.as_deref()
        } else {
            self.connection_id.as_deref()
        }
    }
}

/// WebSocket transport with optional negotiation
pub struct WebSocketConnector {
    hub_url: Url,
    access_token: Option<String>,
    skip_negotiation: bool,
    http_client: reqwest::Client,
}

impl WebSocketConnector {
    /// Create a connector for an `http(s)` hub URL
    pub fn new(hub_url: Url) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("linewatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            hub_url,
            access_token: None,
            skip_negotiation: false,
            http_client,
        }
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token.filter(|t| !t.is_empty());
        self
    }

    /// Connect straight to the socket without the negotiate round trip
    pub fn with_skip_negotiation(mut self, skip: bool) -> Self {
        self.skip_negotiation = skip;
        self
    }

    /// Resolve the socket URL, negotiating unless skipped
    async fn resolve_socket_url(&self) -> Result<Url, HubError> {
        if self.skip_negotiation {
            return socket_url(&self.hub_url, None, self.access_token.as_deref());
        }

        let mut hub_url = self.hub_url.clone();
        let mut access_token = self.access_token.clone();

        for _ in 0..MAX_NEGOTIATE_REDIRECTS {
            let response = self.negotiate(&hub_url, access_token.as_deref()).await?;

            if let Some(error) = response.error {
                return Err(HubError::Transport(format!("Negotiate failed: {}", error)));
            }

            if let Some(redirect) = response.url {
                debug!(target: "hub_transport", url = %redirect, "Negotiate redirected");
                hub_url = Url::parse(&redirect)
                    .map_err(|e| HubError::Transport(format!("Invalid redirect URL: {}", e)))?;
                if response.access_token.is_some() {
                    access_token = response.access_token;
                }
                continue;
            }

            if !response.supports_websockets() {
                return Err(HubError::Transport(
                    "Server does not offer the WebSockets transport".to_string(),
                ));
            }

            return socket_url(&hub_url, response.socket_id(), access_token.as_deref());
        }

        Err(HubError::Transport(
            "Negotiate redirection limit exceeded".to_string(),
        ))
    }

    async fn negotiate(
        &self,
        hub_url: &Url,
        access_token: Option<&str>,
    ) -> Result<NegotiateResponse, HubError> {
        let url = negotiate_url(hub_url)?;
        debug!(target: "hub_transport", url = %url, "Negotiating");

        let mut request = self.http_client.post(url);
        if let Some(token) = access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            warn!(target: "hub_transport", error = %e, "Negotiate request failed");
            HubError::Transport(format!("Negotiate request failed: {}", e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(target: "hub_transport", status = %status, "Negotiate returned error");
            return Err(HubError::Transport(format!(
                "Negotiate returned status: {}",
                status
            )));
        }

        response
            .json()
            .await
            .map_err(|e| HubError::Protocol(format!("Invalid negotiate response: {}", e)))
    }
}

#[async_trait]
impl HubConnector for WebSocketConnector {
    async fn connect(&self) -> Result<TransportLink, HubError> {
        let url = self.resolve_socket_url().await?;

        info!(target: "hub_transport", host = ?url.host_str(), path = %url.path(), "Opening WebSocket");

        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| HubError::Transport(format!("WebSocket connect failed: {}", e)))?;

        let (mut sink, mut stream) = socket.split();
        let (link, mut outbound, inbound) = TransportLink::pair();

        tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    warn!(target: "hub_transport", error = %e, "WebSocket send failed");
                    break;
                }
            }
            let _ = sink.close().await;
            debug!(target: "hub_transport", "WebSocket writer exited");
        });

        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let frame = match message {
                    Ok(Message::Text(text)) => Ok(text),
                    Ok(Message::Binary(bytes)) => String::from_utf8(bytes)
                        .map_err(|_| HubError::Protocol("Binary frame is not UTF-8".to_string())),
                    Ok(Message::Close(close)) => {
                        debug!(target: "hub_transport", frame = ?close, "WebSocket closed by server");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => Err(HubError::Transport(format!("WebSocket receive failed: {}", e))),
                };

                let failed = frame.is_err();
                if inbound.send(frame).await.is_err() || failed {
                    break;
                }
            }
            debug!(target: "hub_transport", "WebSocket reader exited");
        });

        Ok(link)
    }
}

fn negotiate_url(hub_url: &Url) -> Result<Url, HubError> {
    let mut url = hub_url.clone();
    let path = format!("{}/negotiate", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.query_pairs_mut().append_pair("negotiateVersion", "1");
    Ok(url)
}

/// Turn an `http(s)` hub URL into the `ws(s)` socket URL
pub fn socket_url(
    hub_url: &Url,
    connection_id: Option<&str>,
    access_token: Option<&str>,
) -> Result<Url, HubError> {
    let mut url = hub_url.clone();
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(HubError::Transport(format!(
                "Unsupported URL scheme: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| HubError::Transport(format!("Cannot use scheme {}", scheme)))?;

    if connection_id.is_some() || access_token.is_some() {
        let mut query = url.query_pairs_mut();
        if let Some(id) = connection_id {
            query.append_pair("id", id);
        }
        if let Some(token) = access_token {
            query.append_pair("access_token", token);
        }
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_url() {
        let hub = Url::parse("https://plant.example.com/hubs/machine").unwrap();
        let url = negotiate_url(&hub).unwrap();
        assert_eq!(
            url.as_str(),
            "https://plant.example.com/hubs/machine/negotiate?negotiateVersion=1"
        );
    }

    #[test]
    fn test_socket_url_switches_scheme_and_adds_token() {
        let hub = Url::parse("http://localhost:5000/hubs/machine").unwrap();
        let url = socket_url(&hub, Some("abc"), Some("secret")).unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:5000/hubs/machine?id=abc&access_token=secret"
        );

        let secure = Url::parse("https://plant.example.com/hubs/machine").unwrap();
        let url = socket_url(&secure, None, None).unwrap();
        assert_eq!(url.as_str(), "wss://plant.example.com/hubs/machine");
    }

    #[test]
    fn test_socket_url_rejects_other_schemes() {
        let hub = Url::parse("ftp://plant.example.com/hubs/machine").unwrap();
        assert!(socket_url(&hub, None, None).is_err());
    }

    #[test]
    fn test_negotiate_response_prefers_connection_token() {
        let response: NegotiateResponse = serde_json::from_str(
            r#"{
                "connectionId": "id-1",
                "connectionToken": "token-1",
                "negotiateVersion": 1,
                "availableTransports": [
                    {"transport": "WebSockets", "transferFormats": ["Text", "Binary"]},
                    {"transport": "LongPolling", "transferFormats": ["Text"]}
                ]
            }"#,
        )
        .unwrap();

        assert!(response.supports_websockets());
        assert_eq!(response.socket_id(), Some("token-1"));
    }

    #[test]
    fn test_negotiate_response_without_websockets() {
        let response: NegotiateResponse = serde_json::from_str(
            r#"{"connectionId": "id-1", "availableTransports": [{"transport": "ServerSentEvents", "transferFormats": ["Text"]}]}"#,
        )
        .unwrap();

        assert!(!response.supports_websockets());
        assert_eq!(response.socket_id(), Some("id-1"));
    }
}
