//! chatwire: terminal client for the chatwire real-time event channel.
//!
//! Connects, joins the configured rooms on every (re)connect, and prints the
//! connection status, incoming messages, typing indicators, delivery reports
//! and notifications until Ctrl-C.

mod config;
mod render;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;

use chatwire_sdk::notify::Seams;
use chatwire_sdk::{
    ConnectError, ConnectionManager, ConnectionState, DeliveryStatus, DeliveryTracker, EventKind,
    EventRouter, FileStore, InboundEvent, NoAlerts, Notification, NotificationDispatcher,
    PresenceTracker, StaticToken, SystemLauncher, TypingAggregator, TypingScope, Typist,
    WsConnector,
};

use config::{FileConfig, Resolved};

#[derive(Parser, Debug)]
#[command(name = "chatwire", about = "Watch a chatwire real-time event channel")]
pub struct Cli {
    /// Server base URL (http:// or https://)
    #[arg(long, env = "CHATWIRE_SERVER")]
    pub server: Option<String>,

    /// Bearer token appended to the socket URL
    #[arg(long, env = "CHATWIRE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Your user id (skips notifications for your own messages)
    #[arg(long)]
    pub user_id: Option<String>,

    /// Conversation to join and watch
    #[arg(long)]
    pub conversation: Option<String>,

    /// Group to join (typing is watched here only without --conversation)
    #[arg(long)]
    pub group: Option<String>,

    /// Subscribe to presence broadcasts
    #[arg(long)]
    pub user_status: bool,

    /// Subscribe to the admin monitoring feed
    #[arg(long)]
    pub admin_monitor: bool,

    /// Reconnection attempts before giving up
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Don't turn events into notifications
    #[arg(long)]
    pub no_notifications: bool,

    /// Config file (default: ~/.config/chatwire/client.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Plain status markers
    #[arg(long)]
    pub no_color: bool,

    /// Write a default config file and exit
    #[arg(long)]
    pub init_config: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "chatwire=info".into());
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let path = cli.config.clone().unwrap_or_else(config::default_path);
    if cli.init_config {
        if path.exists() {
            anyhow::bail!("{} already exists", path.display());
        }
        FileConfig::default().save(&path)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }
    let file = FileConfig::load(&path);
    let resolved = Resolved::merge(&cli, &file);

    tracing::info!(
        server = %resolved.client.server_url,
        user_id = resolved.user_id.as_deref().unwrap_or("-"),
        "Starting chatwire"
    );
    run(resolved, !cli.no_color).await
}

fn watched_scope(cfg: &Resolved) -> Option<TypingScope> {
    cfg.conversation
        .clone()
        .map(TypingScope::Conversation)
        .or_else(|| cfg.group.clone().map(TypingScope::Group))
}

async fn run(cfg: Resolved, color: bool) -> Result<()> {
    // ── Composition ──
    let router = EventRouter::new();
    let manager = ConnectionManager::new(
        cfg.client.clone(),
        Arc::new(WsConnector::new()),
        Arc::new(StaticToken(cfg.token.clone())),
        router.clone(),
    );
    let delivery = DeliveryTracker::new(&router);
    let presence = PresenceTracker::new(&router);
    let typing = watched_scope(&cfg)
        .map(|scope| TypingAggregator::new(&router, scope, cfg.client.typing_timeout()));
    let store = FileStore::default_location();
    tracing::debug!(dir = %store.dir().display(), "notification store");
    let notifications = NotificationDispatcher::new(
        cfg.client.notifications.clone(),
        cfg.user_id.clone(),
        Seams {
            store: Arc::new(store),
            alerts: Arc::new(NoAlerts),
            launcher: Arc::new(SystemLauncher),
        },
    );
    notifications.attach(&router);

    let _messages = router.on(EventKind::NewMessage, |event| {
        if let InboundEvent::NewMessage(msg) = event {
            println!("{}", render::message_line(msg));
        }
    });

    // ── Connect ──
    let max_attempts = cfg.client.reconnect.max_attempts;
    let mut state_rx = manager.state_watch();
    match manager.connect().await {
        Ok(()) => {}
        Err(e @ (ConnectError::Unauthorized | ConnectError::InvalidEndpoint(_))) => {
            return Err(e).with_context(|| format!("cannot connect to {}", cfg.client.server_url));
        }
        Err(e) => tracing::warn!(error = %e, "initial connect failed, retrying in the background"),
    }
    let state = *state_rx.borrow_and_update();
    print_status(&manager, state, max_attempts, color);
    if state == ConnectionState::Connected {
        join_rooms(&manager, &cfg).await;
    }

    // ── Event loop ──
    let mut list_rx = notifications.subscribe();
    let mut delivery_rx = delivery.subscribe();
    let mut presence_rx = presence.subscribe();
    let mut typing_rx = typing.as_ref().map(|t| t.subscribe());
    let mut shown: HashSet<String> = notifications
        .notifications()
        .into_iter()
        .map(|n| n.id)
        .collect();
    let mut reported: HashMap<String, DeliveryStatus> = HashMap::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *state_rx.borrow_and_update();
                print_status(&manager, state, max_attempts, color);
                if state == ConnectionState::Connected {
                    join_rooms(&manager, &cfg).await;
                }
            }
            Ok(()) = list_rx.changed() => {
                let list = list_rx.borrow_and_update().clone();
                for n in unseen(&mut shown, &list) {
                    println!("{}", render::notification_line(n));
                }
            }
            Ok(()) = delivery_rx.changed() => {
                let table = delivery_rx.borrow_and_update().clone();
                for (id, entry) in table {
                    if reported.get(&id) == Some(&entry.status) {
                        continue;
                    }
                    match entry.status {
                        DeliveryStatus::Delivered => println!("✓ {id} delivered"),
                        DeliveryStatus::Failed => println!(
                            "✗ {id} failed: {}",
                            entry.error.as_deref().unwrap_or("unknown error")
                        ),
                        DeliveryStatus::Pending => {}
                    }
                    reported.insert(id, entry.status);
                }
            }
            Ok(()) = presence_rx.changed(), if cfg.user_status => {
                presence_rx.borrow_and_update();
                println!("online: {}", presence.online_users().join(", "));
            }
            Some(typists) = typing_changed(&mut typing_rx) => {
                let names: Vec<String> = typists.into_iter().map(|t| t.name).collect();
                if let Some(line) = render::typing_line(&names) {
                    println!("{line}");
                }
            }
        }
    }

    // ── Shutdown ──
    leave_rooms(&manager, &cfg);
    notifications.detach();
    manager.disconnect();
    tracing::info!("bye");
    Ok(())
}

fn print_status(manager: &ConnectionManager, state: ConnectionState, max: u32, color: bool) {
    let attempts = manager.reconnect_attempts();
    println!("{}", render::status_line(&state.status(), attempts, max, color));
}

/// Entries of `list` not printed yet, oldest first. `shown` is pruned to the
/// ids still in the list.
fn unseen<'a>(shown: &mut HashSet<String>, list: &'a [Notification]) -> Vec<&'a Notification> {
    shown.retain(|id| list.iter().any(|n| &n.id == id));
    list.iter().rev().filter(|n| shown.insert(n.id.clone())).collect()
}

async fn typing_changed(rx: &mut Option<watch::Receiver<Vec<Typist>>>) -> Option<Vec<Typist>> {
    match rx {
        Some(rx) => {
            rx.changed().await.ok()?;
            Some(rx.borrow_and_update().clone())
        }
        None => std::future::pending().await,
    }
}

async fn join_rooms(manager: &ConnectionManager, cfg: &Resolved) {
    let mut results = Vec::new();
    if let Some(c) = &cfg.conversation {
        results.push(manager.join_conversation(c).await);
    }
    if let Some(g) = &cfg.group {
        results.push(manager.join_group_chat(g).await);
    }
    if cfg.user_status {
        results.push(manager.join_user_status().await);
    }
    if cfg.admin_monitor {
        results.push(manager.join_admin_monitor().await);
    }
    for r in results {
        if let Err(e) = r {
            tracing::warn!(error = %e, "room join failed");
        }
    }
}

fn leave_rooms(manager: &ConnectionManager, cfg: &Resolved) {
    if let Some(c) = &cfg.conversation {
        manager.leave_conversation(c);
    }
    if let Some(g) = &cfg.group {
        manager.leave_group_chat(g);
    }
    if cfg.user_status {
        manager.leave_user_status();
    }
    if cfg.admin_monitor {
        manager.leave_admin_monitor();
    }
}
