//! The connection manager: one transport, a state machine, and a bounded
//! reconnection policy.
//!
//! ## Lifecycle
//!
//! `connect()` moves `disconnected → connecting → connected`, resolving when
//! the transport opens. An unexpected close drops to `disconnected`, then
//! `reconnecting` while a timer runs, then `connecting` again. Each unexpected
//! close counts one attempt; once the policy's maximum is exceeded the manager
//! stays `disconnected` until the next explicit `connect()`, which resets the
//! counter. A successful reconnect does not: a server that accepts and then
//! drops the link still uses up the budget.
//!
//! `disconnect()` closes the transport, cancels a pending reconnection timer
//! or an in-flight open, and suppresses automatic reconnection.
//!
//! ## Inbound frames
//!
//! A reader task per link hands each text frame to the [`EventRouter`]
//! synchronously, in arrival order. All subscriber work for one frame
//! finishes before the next frame is looked at.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;

use crate::auth::AuthSource;
use crate::config::ClientConfig;
use crate::error::{ConnectError, SendError};
use crate::frame::EventKind;
use crate::router::{EventRouter, Subscription};
use crate::state::{ConnectionState, ConnectionStatus};
use crate::transport::{self, Connector, TransportEvent, WsConnector};

/// Close code the server uses when the bearer token is no longer valid.
pub const CLOSE_AUTH_EXPIRED: u16 = 4001;

type StateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

struct Core {
    state: ConnectionState,
    /// Writer half of the open link.
    link: Option<mpsc::Sender<String>>,
    /// Bumped by `disconnect()` and by every new link. Tasks started under an
    /// older epoch must not touch state.
    epoch: u64,
    attempts: u32,
    /// Set by `disconnect()` and auth expiry; cleared by `connect()`.
    manual_close: bool,
    reconnect_timer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Observers {
    next_id: u64,
    list: Vec<(u64, StateCallback)>,
}

struct Inner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    auth: Arc<dyn AuthSource>,
    router: EventRouter,
    core: Mutex<Core>,
    observers: Arc<Mutex<Observers>>,
    state_tx: watch::Sender<ConnectionState>,
    /// Wakes an in-flight open when `disconnect()` runs.
    cancel: Notify,
    auth_sub: Mutex<Option<Subscription>>,
}

/// Owner of the single transport connection.
///
/// Cheap to clone; clones share one connection. The transport is closed once
/// the last clone is dropped.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        auth: Arc<dyn AuthSource>,
        router: EventRouter,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let inner = Arc::new(Inner {
            config,
            connector,
            auth,
            router,
            core: Mutex::new(Core {
                state: ConnectionState::Disconnected,
                link: None,
                epoch: 0,
                attempts: 0,
                manual_close: false,
                reconnect_timer: None,
                reader: None,
            }),
            observers: Arc::new(Mutex::new(Observers::default())),
            state_tx,
            cancel: Notify::new(),
            auth_sub: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let sub = inner.router.on(EventKind::AuthExpired, move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.auth_expired();
            }
        });
        *inner.auth_sub.lock() = Some(sub);

        Self { inner }
    }

    /// A manager over the real WebSocket transport with a fresh router.
    pub fn with_websocket(config: ClientConfig, auth: Arc<dyn AuthSource>) -> Self {
        Self::new(config, Arc::new(WsConnector::new()), auth, EventRouter::new())
    }

    /// Open the transport. Resolves once it is open.
    ///
    /// Resets the reconnection counter and re-enables automatic
    /// reconnection. Returns `Ok` immediately if already connected.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        let epoch = {
            let mut core = self.inner.core.lock();
            match core.state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => return Err(ConnectError::InProgress),
                _ => {}
            }
            core.manual_close = false;
            core.attempts = 0;
            if let Some(timer) = core.reconnect_timer.take() {
                timer.abort();
            }
            core.epoch
        };
        tracing::info!(server = %self.inner.config.server_url, "connecting");
        self.inner.establish(epoch).await
    }

    /// Close the transport and stop reconnecting.
    pub fn disconnect(&self) {
        let mut emits = Vec::new();
        let link = {
            let mut core = self.inner.core.lock();
            core.manual_close = true;
            core.epoch += 1;
            core.attempts = 0;
            if let Some(timer) = core.reconnect_timer.take() {
                timer.abort();
            }
            if let Some(reader) = core.reader.take() {
                reader.abort();
            }
            transition(&mut core, ConnectionState::Disconnected, &mut emits);
            core.link.take()
        };
        self.inner.cancel.notify_waiters();
        // Dropping the writer closes the socket.
        drop(link);
        if !emits.is_empty() {
            tracing::info!("disconnected");
        }
        self.inner.emit(emits);
    }

    /// Encode `frame` as JSON and hand it to the transport writer.
    ///
    /// Fails with [`SendError::NotConnected`] unless the transport is open.
    /// Resolves once the writer has accepted the frame; server
    /// acknowledgement is tracked separately (see `DeliveryTracker`).
    pub async fn send<T: Serialize + ?Sized>(&self, frame: &T) -> Result<(), SendError> {
        let link = self.open_link()?;
        let text = serde_json::to_string(frame)?;
        link.send(text).await.map_err(|_| SendError::Closed)
    }

    /// Send without waiting or reporting failure. Used for frames whose
    /// outcome nobody awaits.
    pub fn send_detached<T: Serialize + ?Sized>(&self, frame: &T) {
        let link = match self.open_link() {
            Ok(link) => link,
            Err(_) => {
                tracing::debug!("not connected, dropping detached frame");
                return;
            }
        };
        match serde_json::to_string(frame) {
            Ok(text) => {
                if let Err(e) = link.try_send(text) {
                    tracing::debug!(error = %e, "detached frame not queued");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode detached frame"),
        }
    }

    fn open_link(&self) -> Result<mpsc::Sender<String>, SendError> {
        let core = self.inner.core.lock();
        if core.state != ConnectionState::Connected {
            return Err(SendError::NotConnected);
        }
        core.link.clone().ok_or(SendError::NotConnected)
    }

    /// Observe state transitions. The callback runs synchronously on every
    /// change, on whichever task caused it.
    pub fn on_state_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let id = {
            let mut obs = self.inner.observers.lock();
            obs.next_id += 1;
            let id = obs.next_id;
            obs.list.push((id, Arc::new(callback)));
            id
        };
        let observers = Arc::downgrade(&self.inner.observers);
        Subscription::new(move || {
            if let Some(observers) = observers.upgrade() {
                observers.lock().list.retain(|(i, _)| *i != id);
            }
        })
    }

    /// The current state as a watch channel, for async consumers.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.core.lock().state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state().status()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Reconnection attempts used since the last explicit `connect()` or
    /// `disconnect()`.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.core.lock().attempts
    }

    pub fn router(&self) -> &EventRouter {
        &self.inner.router
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("ConnectionManager")
            .field("state", &core.state)
            .field("attempts", &core.attempts)
            .field("server_url", &self.inner.config.server_url)
            .finish()
    }
}

fn transition(core: &mut Core, next: ConnectionState, emits: &mut Vec<ConnectionState>) {
    if core.state == next {
        return;
    }
    debug_assert!(
        core.state.allows(next),
        "illegal transition {} -> {}",
        core.state,
        next
    );
    tracing::debug!(from = %core.state, to = %next, "connection state");
    core.state = next;
    emits.push(next);
}

/// Why a link ended.
enum Ended {
    Closed { code: Option<u16>, reason: String },
    Failed(String),
}

impl Inner {
    fn emit(&self, states: Vec<ConnectionState>) {
        if states.is_empty() {
            return;
        }
        let observers: Vec<StateCallback> = self
            .observers
            .lock()
            .list
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for state in states {
            self.state_tx.send_replace(state);
            for cb in &observers {
                cb(state);
            }
        }
    }

    /// One open attempt under `epoch`. Leaves the manager connected, or in
    /// `disconnected`/`reconnecting` with the policy applied.
    async fn establish(self: &Arc<Self>, epoch: u64) -> Result<(), ConnectError> {
        let cancelled = self.cancel.notified();
        tokio::pin!(cancelled);
        cancelled.as_mut().enable();

        let mut emits = Vec::new();
        {
            let mut core = self.core.lock();
            if core.epoch != epoch || core.manual_close {
                return Err(ConnectError::Cancelled);
            }
            transition(&mut core, ConnectionState::Connecting, &mut emits);
        }
        self.emit(emits);

        let opened = match transport::endpoint_url(&self.config, self.auth.token().as_deref()) {
            Ok(url) => {
                tokio::select! {
                    res = self.connector.open(&url) => res,
                    _ = &mut cancelled => Err(ConnectError::Cancelled),
                }
            }
            Err(e) => Err(e),
        };

        let mut emits = Vec::new();
        let result = {
            let mut core = self.core.lock();
            if core.epoch != epoch || core.manual_close {
                // disconnect() already moved us to `disconnected`; the link,
                // if any, is dropped here.
                Err(ConnectError::Cancelled)
            } else {
                match opened {
                    Ok(link) => {
                        core.epoch += 1;
                        core.link = Some(link.outbound);
                        let reader = tokio::spawn(read_loop(
                            Arc::downgrade(self),
                            link.inbound,
                            core.epoch,
                        ));
                        if let Some(old) = core.reader.replace(reader) {
                            old.abort();
                        }
                        transition(&mut core, ConnectionState::Connected, &mut emits);
                        Ok(())
                    }
                    Err(e) => {
                        transition(&mut core, ConnectionState::Error, &mut emits);
                        transition(&mut core, ConnectionState::Disconnected, &mut emits);
                        match &e {
                            ConnectError::Unauthorized => core.manual_close = true,
                            // Retrying a malformed endpoint cannot succeed.
                            ConnectError::InvalidEndpoint(_) => {}
                            _ => self.schedule_reconnect(&mut core, &mut emits),
                        }
                        Err(e)
                    }
                }
            }
        };

        match &result {
            Ok(()) => tracing::info!("connected"),
            Err(ConnectError::Cancelled) => tracing::debug!("connection attempt cancelled"),
            Err(ConnectError::Unauthorized) => {
                tracing::warn!("server rejected credentials");
            }
            Err(e) => tracing::warn!(error = %e, "connection attempt failed"),
        }
        self.emit(emits);
        if matches!(result, Err(ConnectError::Unauthorized)) {
            self.auth.on_auth_expired();
        }
        result
    }

    /// Count one unexpected close and, within the budget, arm the timer.
    fn schedule_reconnect(self: &Arc<Self>, core: &mut Core, emits: &mut Vec<ConnectionState>) {
        let policy = &self.config.reconnect;
        if core.attempts >= policy.max_attempts {
            tracing::info!(
                attempts = core.attempts,
                "reconnection attempts exhausted, staying disconnected"
            );
            return;
        }
        core.attempts += 1;
        let delay = policy.delay_for(core.attempts);
        tracing::info!(
            attempt = core.attempts,
            max = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        transition(core, ConnectionState::Reconnecting, emits);

        let epoch = core.epoch;
        let weak = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            {
                let core = inner.core.lock();
                if core.epoch != epoch || core.state != ConnectionState::Reconnecting {
                    return;
                }
            }
            // Failures re-arm the policy inside establish().
            let _ = inner.establish(epoch).await;
        });
        if let Some(old) = core.reconnect_timer.replace(timer) {
            old.abort();
        }
    }

    fn link_ended(self: &Arc<Self>, epoch: u64, ended: Ended) {
        let mut emits = Vec::new();
        let auth_expired = {
            let mut core = self.core.lock();
            if core.epoch != epoch || core.manual_close {
                return;
            }
            core.link = None;
            core.reader = None;
            let auth_expired =
                matches!(ended, Ended::Closed { code: Some(CLOSE_AUTH_EXPIRED), .. });
            match &ended {
                Ended::Closed { code, reason } => {
                    tracing::info!(code = ?code, reason = %reason, "connection closed");
                }
                Ended::Failed(e) => tracing::warn!(error = %e, "connection failed"),
            }
            transition(&mut core, ConnectionState::Disconnected, &mut emits);
            if auth_expired {
                core.manual_close = true;
            } else {
                self.schedule_reconnect(&mut core, &mut emits);
            }
            auth_expired
        };
        self.emit(emits);
        if auth_expired {
            self.auth.on_auth_expired();
        }
    }

    /// The server told us the token expired: stop and tell the session layer.
    fn auth_expired(&self) {
        let mut emits = Vec::new();
        let link = {
            let mut core = self.core.lock();
            core.manual_close = true;
            core.epoch += 1;
            if let Some(timer) = core.reconnect_timer.take() {
                timer.abort();
            }
            // The reader is the caller; it sees the stale epoch and exits.
            core.reader = None;
            transition(&mut core, ConnectionState::Disconnected, &mut emits);
            core.link.take()
        };
        drop(link);
        tracing::warn!("auth expired, connection closed");
        self.emit(emits);
        self.auth.on_auth_expired();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        if let Some(timer) = core.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(reader) = core.reader.take() {
            reader.abort();
        }
    }
}

async fn read_loop(inner: Weak<Inner>, mut inbound: mpsc::Receiver<TransportEvent>, epoch: u64) {
    let ended = loop {
        let event = inbound.recv().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match event {
            Some(TransportEvent::Frame(text)) => {
                if inner.core.lock().epoch != epoch {
                    return;
                }
                inner.router.dispatch_raw(&text);
            }
            Some(TransportEvent::Closed { code, reason }) => break Ended::Closed { code, reason },
            Some(TransportEvent::Error(e)) => break Ended::Failed(e),
            None => {
                break Ended::Closed {
                    code: None,
                    reason: "transport dropped".into(),
                };
            }
        }
    };
    if let Some(inner) = inner.upgrade() {
        inner.link_ended(epoch, ended);
    }
}
