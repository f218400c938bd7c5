//! Online/offline and last-seen per user, fed by `user_online` / `user_offline`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::frame::{EventKind, InboundEvent, UserStatusChange};
use crate::router::{EventRouter, Subscription};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub username: String,
    /// `None` while the user is online.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl PresenceEntry {
    pub fn is_online(&self) -> bool {
        self.last_seen.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Online,
    Offline,
}

impl UserStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UserStatus::Online => "online",
            UserStatus::Offline => "offline",
        }
    }
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

type Table = HashMap<String, PresenceEntry>;

/// Presence table keyed by user id.
///
/// A user never seen online has no entry and reads as offline. An offline
/// event for such a user is ignored rather than inventing an entry.
pub struct PresenceTracker {
    table: Arc<watch::Sender<Table>>,
    _sub: Subscription,
}

impl PresenceTracker {
    pub fn new(router: &EventRouter) -> Self {
        let (tx, _) = watch::channel(Table::new());
        let table = Arc::new(tx);

        let handler = Arc::clone(&table);
        let sub = router.on_many(EventKind::USER_STATUS, move |event| match event {
            InboundEvent::UserOnline(change) => went_online(&handler, change),
            InboundEvent::UserOffline(change) => went_offline(&handler, change),
            _ => {}
        });

        Self { table, _sub: sub }
    }

    pub fn get_user_status(&self, user_id: &str) -> UserStatus {
        match self.table.borrow().get(user_id) {
            Some(entry) if entry.is_online() => UserStatus::Online,
            _ => UserStatus::Offline,
        }
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.get_user_status(user_id) == UserStatus::Online
    }

    pub fn last_seen(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.table.borrow().get(user_id).and_then(|e| e.last_seen)
    }

    pub fn username(&self, user_id: &str) -> Option<String> {
        self.table.borrow().get(user_id).map(|e| e.username.clone())
    }

    pub fn get(&self, user_id: &str) -> Option<PresenceEntry> {
        self.table.borrow().get(user_id).cloned()
    }

    /// Ids of everyone currently online, sorted.
    pub fn online_users(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .table
            .borrow()
            .iter()
            .filter(|(_, e)| e.is_online())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn snapshot(&self) -> Table {
        self.table.borrow().clone()
    }

    pub fn clear(&self) {
        self.table.send_if_modified(|table| {
            let changed = !table.is_empty();
            table.clear();
            changed
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<Table> {
        self.table.subscribe()
    }
}

fn went_online(table: &watch::Sender<Table>, change: &UserStatusChange) {
    let entry = PresenceEntry {
        username: change.username.clone().unwrap_or_else(|| change.user_id.clone()),
        last_seen: None,
    };
    tracing::debug!(user_id = %change.user_id, "user online");
    table.send_if_modified(|table| {
        if table.get(&change.user_id) == Some(&entry) {
            return false;
        }
        table.insert(change.user_id.clone(), entry);
        true
    });
}

fn went_offline(table: &watch::Sender<Table>, change: &UserStatusChange) {
    let now = Utc::now();
    table.send_if_modified(|table| match table.get_mut(&change.user_id) {
        Some(entry) => {
            tracing::debug!(user_id = %change.user_id, "user offline");
            entry.last_seen = Some(now);
            true
        }
        None => {
            tracing::trace!(user_id = %change.user_id, "offline for unknown user ignored");
            false
        }
    });
}

impl std::fmt::Debug for PresenceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceTracker")
            .field("users", &self.table.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_then_offline() {
        let router = EventRouter::new();
        let presence = PresenceTracker::new(&router);

        router.dispatch_raw(r#"{"type":"user_online","user_id":"u5","username":"eve"}"#);
        assert_eq!(presence.get_user_status("u5"), UserStatus::Online);
        assert_eq!(presence.last_seen("u5"), None);

        let before = Utc::now();
        router.dispatch_raw(r#"{"type":"user_offline","user_id":"u5"}"#);

        assert_eq!(presence.get_user_status("u5"), UserStatus::Offline);
        assert!(presence.last_seen("u5").unwrap() >= before);
        assert_eq!(presence.username("u5").as_deref(), Some("eve"));
    }

    #[test]
    fn unknown_user_reads_offline() {
        let router = EventRouter::new();
        let presence = PresenceTracker::new(&router);

        assert_eq!(presence.get_user_status("nobody"), UserStatus::Offline);
        assert_eq!(presence.last_seen("nobody"), None);
    }

    #[test]
    fn offline_for_unknown_user_is_ignored() {
        let router = EventRouter::new();
        let presence = PresenceTracker::new(&router);
        let rx = presence.subscribe();

        router.dispatch_raw(r#"{"type":"user_offline","user_id":"u9","username":"ghost"}"#);

        assert!(presence.get("u9").is_none());
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn offline_keeps_the_known_username() {
        let router = EventRouter::new();
        let presence = PresenceTracker::new(&router);

        router.dispatch_raw(r#"{"type":"user_online","user_id":"u1","username":"al"}"#);
        router.dispatch_raw(r#"{"type":"user_offline","user_id":"u1","username":"renamed"}"#);

        assert_eq!(presence.username("u1").as_deref(), Some("al"));
    }

    #[test]
    fn coming_back_online_clears_last_seen() {
        let router = EventRouter::new();
        let presence = PresenceTracker::new(&router);

        router.dispatch_raw(r#"{"type":"user_online","user_id":"u1","username":"al"}"#);
        router.dispatch_raw(r#"{"type":"user_offline","user_id":"u1"}"#);
        router.dispatch_raw(r#"{"type":"user_online","user_id":"u1","username":"al"}"#);

        assert!(presence.is_online("u1"));
        assert_eq!(presence.last_seen("u1"), None);
    }

    #[test]
    fn online_users_is_sorted() {
        let router = EventRouter::new();
        let presence = PresenceTracker::new(&router);

        for id in ["u3", "u1", "u2"] {
            router.dispatch_raw(&format!(r#"{{"type":"user_online","user_id":"{id}"}}"#));
        }
        router.dispatch_raw(r#"{"type":"user_offline","user_id":"u2"}"#);

        assert_eq!(presence.online_users(), vec!["u1", "u3"]);
        assert_eq!(presence.username("u3").as_deref(), Some("u3"));
    }

    #[test]
    fn numeric_user_ids() {
        let router = EventRouter::new();
        let presence = PresenceTracker::new(&router);

        router.dispatch_raw(r#"{"type":"user_online","user_id":17,"username":"n"}"#);
        assert!(presence.is_online("17"));
    }
}
