//! Transport seam and the WebSocket implementation behind it.
//!
//! A [`Connector`] opens one link per connection attempt. The link is a pair
//! of channels: text frames out, [`TransportEvent`]s in. Dropping the
//! outbound sender closes the socket. The manager never sees the socket
//! itself, which keeps the state machine testable without a network.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

use crate::config::ClientConfig;
use crate::error::ConnectError;

/// Outbound queue depth per link.
const OUTBOUND_CAPACITY: usize = 256;
/// Inbound queue depth per link.
const INBOUND_CAPACITY: usize = 4096;
/// A write that takes longer than this marks the socket as dead.
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// What the transport reports after it has opened.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// One text frame from the server.
    Frame(String),
    /// The peer closed the connection.
    Closed { code: Option<u16>, reason: String },
    /// The connection failed.
    Error(String),
}

/// An open connection as seen by the manager.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Opens transport links.
///
/// `open` resolves once the transport is open, and fails if it reports an
/// error before that.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, url: &Url) -> Result<TransportLink, ConnectError>;
}

/// Build the socket endpoint: `ws`/`wss` mirroring `http`/`https`, the fixed
/// path, and the token as a query attribute when configured.
pub fn endpoint_url(config: &ClientConfig, token: Option<&str>) -> Result<Url, ConnectError> {
    let mut url = Url::parse(&config.server_url)
        .map_err(|e| ConnectError::InvalidEndpoint(format!("{}: {e}", config.server_url)))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ConnectError::InvalidEndpoint(format!(
                "unsupported scheme `{other}`"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| ConnectError::InvalidEndpoint(format!("cannot use scheme {scheme}")))?;
    url.set_path(&config.ws_path);
    url.set_query(None);
    url.set_fragment(None);

    if config.append_token {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            url.query_pairs_mut().append_pair(&config.token_param, token);
        }
    }
    Ok(url)
}

/// [`Connector`] over `tokio-tungstenite`, with rustls for `wss`.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &Url) -> Result<TransportLink, ConnectError> {
        tracing::debug!(host = url.host_str().unwrap_or(""), "opening websocket");
        if url.scheme() == "wss" {
            install_crypto_provider();
        }
        let (ws, _response) = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok(pair) => pair,
            Err(tungstenite::Error::Http(resp))
                if resp.status() == 401 || resp.status() == 403 =>
            {
                return Err(ConnectError::Unauthorized);
            }
            Err(e) => return Err(ConnectError::Transport(e.to_string())),
        };

        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(INBOUND_CAPACITY);
        tokio::spawn(pump(ws, out_rx, in_tx));

        Ok(TransportLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

fn install_crypto_provider() {
    // First install wins; later calls are no-ops.
    #[cfg(feature = "ring")]
    {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
    #[cfg(all(feature = "aws-lc-rs", not(feature = "ring")))]
    {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }
}

/// Shuttle frames between the socket and the link channels until either
/// side goes away.
async fn pump<S>(
    mut ws: tokio_tungstenite::WebSocketStream<S>,
    mut out_rx: mpsc::Receiver<String>,
    in_tx: mpsc::Sender<TransportEvent>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            frame = ws.next() => {
                let event = match frame {
                    Some(Ok(Message::Text(text))) => {
                        TransportEvent::Frame(text.as_str().to_owned())
                    }
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => TransportEvent::Frame(text),
                        Err(_) => {
                            tracing::warn!(len = data.len(), "dropping non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(f) => (Some(u16::from(f.code)), f.reason.as_str().to_owned()),
                            None => (None, String::new()),
                        };
                        let _ = in_tx.send(TransportEvent::Closed { code, reason }).await;
                        break;
                    }
                    // Ping/pong are answered by tungstenite
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = in_tx.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                    None => {
                        let _ = in_tx
                            .send(TransportEvent::Closed {
                                code: None,
                                reason: "stream ended".into(),
                            })
                            .await;
                        break;
                    }
                };
                if in_tx.send(event).await.is_err() {
                    break;
                }
            }
            msg = out_rx.recv() => {
                match msg {
                    Some(text) => {
                        let write = ws.send(Message::Text(text.into()));
                        match tokio::time::timeout(WRITE_TIMEOUT, write).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                let _ = in_tx.send(TransportEvent::Error(e.to_string())).await;
                                break;
                            }
                            Err(_) => {
                                let _ = in_tx
                                    .send(TransportEvent::Error("write timed out".into()))
                                    .await;
                                break;
                            }
                        }
                    }
                    None => {
                        // Link dropped by the manager: close politely.
                        let _ = ws.close(None).await;
                        break;
                    }
                }
            }
        }
    }
    tracing::debug!("websocket pump finished");
}
