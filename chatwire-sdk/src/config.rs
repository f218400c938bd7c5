//! Client configuration with serde defaults.
//!
//! Every field has a default so a partial TOML/JSON document is enough.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Default HTTP origin of the chat server.
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";
/// Default WebSocket path on that origin.
pub const DEFAULT_WS_PATH: &str = "/ws";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Page origin (`http://` or `https://`); the socket scheme mirrors it.
    pub server_url: String,
    /// Fixed socket path.
    pub ws_path: String,
    /// Query parameter that carries the token.
    pub token_param: String,
    /// Whether to append the token to the endpoint URL at all.
    pub append_token: bool,
    pub reconnect: ReconnectPolicy,
    /// Silence after which a scope's typing set is cleared.
    pub typing_timeout_ms: u64,
    pub notifications: NotificationConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            ws_path: DEFAULT_WS_PATH.to_string(),
            token_param: "token".to_string(),
            append_token: true,
            reconnect: ReconnectPolicy::default(),
            typing_timeout_ms: 5_000,
            notifications: NotificationConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout_ms)
    }
}

/// Bounded automatic reconnection after an unexpected close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Attempts allowed before settling in `disconnected`.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::Fixed { delay_ms: 3_000 },
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnection attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.delay_for(attempt)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    Fixed {
        delay_ms: u64,
    },
    /// `base_ms * 2^(attempt-1)`, capped at `max_ms`. With `jitter`, a
    /// uniform pick from the upper half of that window.
    Exponential {
        base_ms: u64,
        max_ms: u64,
        #[serde(default)]
        jitter: bool,
    },
}

impl Backoff {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential {
                base_ms,
                max_ms,
                jitter,
            } => {
                let exp = attempt.saturating_sub(1).min(32);
                let ms = base_ms.saturating_mul(1u64 << exp).min(max_ms);
                let ms = if jitter && ms > 1 {
                    rand::thread_rng().gen_range(ms / 2..=ms)
                } else {
                    ms
                };
                Duration::from_millis(ms)
            }
        }
    }
}

/// Which events become notifications and how they behave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Master switch: when off nothing is created from events and no
    /// native alerts are raised.
    pub enabled: bool,
    /// Raise native OS-level alerts when permission is granted.
    pub native_alerts: bool,
    pub on_new_message: bool,
    pub on_presence: bool,
    pub on_delivery_failure: bool,
    /// Lifetime of low-priority, non-persistent notifications.
    pub low_priority_expiry_ms: u64,
    /// Auto-close delay for native alerts below `urgent`.
    pub alert_close_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            native_alerts: true,
            on_new_message: true,
            on_presence: true,
            on_delivery_failure: true,
            low_priority_expiry_ms: 5_000,
            alert_close_ms: 10_000,
        }
    }
}
