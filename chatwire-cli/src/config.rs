//! Persistent configuration for the chatwire CLI.
//!
//! Config file lives at `~/.config/chatwire/client.toml`. Every
//! [`ClientConfig`] field can be set there, plus the session fields below.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use chatwire_sdk::ClientConfig;

use crate::Cli;

/// Contents of client.toml.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Bearer token sent on the socket URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Current user; own messages are not notified and notifications are
    /// stored per user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Conversation to join and watch on connect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation: Option<String>,
    /// Group to join and watch on connect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(flatten)]
    pub client: ClientConfig,
}

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chatwire")
}

pub fn default_path() -> PathBuf {
    config_dir().join("client.toml")
}

impl FileConfig {
    /// Load `path`, falling back to defaults when it is missing or invalid.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(s) => match toml::from_str(&s) {
                Ok(c) => return c,
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "bad config file, using defaults"
                ),
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "can't read config file")
            }
        }
        Self::default()
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let text = toml::to_string_pretty(self).context("encoding config")?;
        std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

/// Effective settings after merging CLI args > config file > defaults.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub client: ClientConfig,
    pub token: Option<String>,
    pub user_id: Option<String>,
    pub conversation: Option<String>,
    pub group: Option<String>,
    pub user_status: bool,
    pub admin_monitor: bool,
}

impl Resolved {
    pub fn merge(cli: &Cli, file: &FileConfig) -> Self {
        let mut client = file.client.clone();
        if let Some(server) = &cli.server {
            client.server_url = server.clone();
        }
        if let Some(max) = cli.max_attempts {
            client.reconnect.max_attempts = max;
        }
        if cli.no_notifications {
            client.notifications.enabled = false;
        }

        Self {
            client,
            token: cli.token.clone().or_else(|| file.token.clone()),
            user_id: cli.user_id.clone().or_else(|| file.user_id.clone()),
            conversation: cli.conversation.clone().or_else(|| file.conversation.clone()),
            group: cli.group.clone().or_else(|| file.group.clone()),
            user_status: cli.user_status,
            admin_monitor: cli.admin_monitor,
        }
    }
}
