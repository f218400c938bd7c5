//! Scripted in-memory transport for exercising the connection manager
//! without a network.
//!
//! Each `open` consumes the next [`Step`]. Accepted links hand their server
//! half to the test through [`ScriptedConnector::next_server`].

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;

use crate::error::ConnectError;
use crate::transport::{Connector, TransportEvent, TransportLink};

/// Outcome of one scripted open.
#[derive(Debug, Clone)]
pub enum Step {
    Accept,
    Refuse(String),
    Unauthorized,
    /// Never resolves; only a cancelled attempt gets past it.
    Hang,
}

struct Script {
    steps: VecDeque<Step>,
    fallback: Step,
    urls: Vec<Url>,
}

#[derive(Clone)]
pub struct ScriptedConnector {
    script: Arc<Mutex<Script>>,
    accepted_tx: mpsc::UnboundedSender<ServerEnd>,
    accepted_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<ServerEnd>>>,
}

impl ScriptedConnector {
    /// Refuses every open once the script runs out.
    pub fn new() -> Self {
        Self::with_fallback(Step::Refuse("connection refused".into()))
    }

    /// Accepts every open once the script runs out.
    pub fn accepting() -> Self {
        Self::with_fallback(Step::Accept)
    }

    fn with_fallback(fallback: Step) -> Self {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Self {
            script: Arc::new(Mutex::new(Script {
                steps: VecDeque::new(),
                fallback,
                urls: Vec::new(),
            })),
            accepted_tx,
            accepted_rx: Arc::new(tokio::sync::Mutex::new(accepted_rx)),
        }
    }

    pub fn then(&self, step: Step) -> &Self {
        self.script.lock().steps.push_back(step);
        self
    }

    /// Number of `open` calls so far.
    pub fn attempts(&self) -> usize {
        self.script.lock().urls.len()
    }

    /// Server half of the next accepted link.
    pub async fn next_server(&self) -> ServerEnd {
        self.accepted_rx
            .lock()
            .await
            .recv()
            .await
            .expect("connector dropped")
    }
}

impl Default for ScriptedConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(&self, url: &Url) -> Result<TransportLink, ConnectError> {
        let step = {
            let mut script = self.script.lock();
            script.urls.push(url.clone());
            let fallback = script.fallback.clone();
            script.steps.pop_front().unwrap_or(fallback)
        };
        match step {
            Step::Accept => {
                let (out_tx, out_rx) = mpsc::channel(64);
                let (in_tx, in_rx) = mpsc::channel(64);
                let _ = self.accepted_tx.send(ServerEnd {
                    url: url.clone(),
                    events: in_tx,
                    frames: out_rx,
                });
                Ok(TransportLink {
                    outbound: out_tx,
                    inbound: in_rx,
                })
            }
            Step::Refuse(reason) => Err(ConnectError::Transport(reason)),
            Step::Unauthorized => Err(ConnectError::Unauthorized),
            Step::Hang => std::future::pending().await,
        }
    }
}

/// The server side of one accepted link.
pub struct ServerEnd {
    pub url: Url,
    events: mpsc::Sender<TransportEvent>,
    frames: mpsc::Receiver<String>,
}

impl ServerEnd {
    /// Push one text frame to the client.
    pub async fn push(&self, json: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Frame(json.into())).await;
    }

    /// Close the link from the server side.
    pub async fn close(self, code: Option<u16>) {
        let _ = self
            .events
            .send(TransportEvent::Closed {
                code,
                reason: String::new(),
            })
            .await;
    }

    /// Fail the link with a transport error.
    pub async fn fail(self, reason: &str) {
        let _ = self.events.send(TransportEvent::Error(reason.to_string())).await;
    }

    /// Next frame written by the client, or `None` once it dropped the link.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.frames.recv().await
    }

    /// Next frame decoded as JSON.
    pub async fn next_json(&mut self) -> Option<serde_json::Value> {
        let text = self.next_frame().await?;
        serde_json::from_str(&text).ok()
    }
}
