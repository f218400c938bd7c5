//! User-facing notifications: an ordered, persisted list plus optional
//! native OS-level alerts.
//!
//! The dispatcher owns the list for one user at a time. Every mutation is
//! written back to the [`NotificationStore`] under `notifications_<user_id>`,
//! and the list is rehydrated (dropping malformed records) when the user is
//! set. [`attach`](NotificationDispatcher::attach) turns selected router
//! events into notifications according to [`NotificationConfig`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::NotificationConfig;
use crate::error::AlertError;
use crate::frame::{DeliveryReport, EventKind, InboundEvent, NewMessage, UserStatusChange};
use crate::id;
use crate::router::{EventRouter, Subscription};
use crate::store::{MemoryStore, NotificationStore, notifications_key};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub read: bool,
    pub priority: Priority,
    #[serde(default)]
    pub persistent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedupe_key: Option<String>,
}

impl Notification {
    /// Deep link carried in `data.url`, if any.
    pub fn url(&self) -> Option<&str> {
        self.data.as_ref()?.get("url")?.as_str()
    }
}

/// Caller-supplied part of a notification. The dispatcher stamps the rest.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationDraft {
    pub kind: String,
    pub title: String,
    pub message: String,
    pub priority: Priority,
    pub persistent: bool,
    pub data: Option<Value>,
    /// A draft whose kind and key match an existing entry is dropped.
    pub dedupe_key: Option<String>,
}

impl NotificationDraft {
    pub fn new(
        kind: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            title: title.into(),
            message: message.into(),
            priority: Priority::Medium,
            persistent: false,
            data: None,
            dedupe_key: None,
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }
}

/// Whether the user has allowed native alerts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPermission {
    /// Not asked yet.
    #[default]
    Default,
    Granted,
    Denied,
}

/// One native alert to raise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertRequest {
    pub notification_id: String,
    pub title: String,
    pub body: String,
    /// Stays up until the user dismisses it.
    pub require_interaction: bool,
}

/// Platform channel for native alerts.
#[async_trait]
pub trait AlertSurface: Send + Sync {
    fn permission(&self) -> AlertPermission;
    /// Prompt the user. Only called while the permission is `Default`.
    async fn request_permission(&self) -> Result<AlertPermission, AlertError>;
    fn show(&self, alert: &AlertRequest) -> Result<(), AlertError>;
    /// Dismiss a shown alert. Unknown ids are ignored.
    fn close(&self, notification_id: &str);
}

/// For platforms without native alerts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAlerts;

#[async_trait]
impl AlertSurface for NoAlerts {
    fn permission(&self) -> AlertPermission {
        AlertPermission::Denied
    }

    async fn request_permission(&self) -> Result<AlertPermission, AlertError> {
        Err(AlertError::Unsupported)
    }

    fn show(&self, _alert: &AlertRequest) -> Result<(), AlertError> {
        Err(AlertError::Unsupported)
    }

    fn close(&self, _notification_id: &str) {}
}

/// What clicking an alert does outside the SDK.
pub trait Launcher: Send + Sync {
    fn open_url(&self, url: &str) -> Result<(), AlertError>;
    fn focus_window(&self);
}

/// Opens links with the desktop's default handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn open_url(&self, url: &str) -> Result<(), AlertError> {
        open::that(url).map_err(|e| AlertError::Platform(e.to_string()))
    }

    fn focus_window(&self) {
        tracing::debug!("focus requested, no window to raise");
    }
}

/// External collaborators of the dispatcher.
#[derive(Clone)]
pub struct Seams {
    pub store: Arc<dyn NotificationStore>,
    pub alerts: Arc<dyn AlertSurface>,
    pub launcher: Arc<dyn Launcher>,
}

impl Default for Seams {
    fn default() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            alerts: Arc::new(NoAlerts),
            launcher: Arc::new(SystemLauncher),
        }
    }
}

/// Structural check applied to every stored record before it is trusted.
pub fn has_notification_shape(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    ["id", "type", "title", "message", "priority"]
        .iter()
        .all(|k| obj.get(*k).is_some_and(Value::is_string))
        && obj.get("read").is_some_and(Value::is_boolean)
}

struct Inner {
    config: NotificationConfig,
    enabled: AtomicBool,
    user_id: RwLock<Option<String>>,
    seams: Seams,
    list: watch::Sender<Vec<Notification>>,
    expiry: Mutex<HashMap<String, JoinHandle<()>>>,
    /// Native alerts currently shown, with their auto-close timer if any.
    open_alerts: Mutex<HashMap<String, Option<JoinHandle<()>>>>,
}

pub struct NotificationDispatcher {
    inner: Arc<Inner>,
    subs: Mutex<Vec<Subscription>>,
}

impl NotificationDispatcher {
    /// Build a dispatcher and rehydrate `user_id`'s stored list.
    pub fn new(config: NotificationConfig, user_id: Option<String>, seams: Seams) -> Self {
        let (list, _) = watch::channel(Vec::new());
        let inner = Arc::new(Inner {
            enabled: AtomicBool::new(config.enabled),
            config,
            user_id: RwLock::new(None),
            seams,
            list,
            expiry: Mutex::new(HashMap::new()),
            open_alerts: Mutex::new(HashMap::new()),
        });
        inner.switch_user(user_id);
        Self {
            inner,
            subs: Mutex::new(Vec::new()),
        }
    }

    /// Start turning router events into notifications. Replaces any
    /// previous attachment.
    pub fn attach(&self, router: &EventRouter) {
        let inner = Arc::clone(&self.inner);
        let sub = router.on_many(
            [
                EventKind::NewMessage,
                EventKind::UserOnline,
                EventKind::UserOffline,
                EventKind::MessageFailed,
            ],
            move |event| inner.on_event(event),
        );
        let old = std::mem::replace(&mut *self.subs.lock(), vec![sub]);
        drop(old);
    }

    pub fn detach(&self) {
        let old = std::mem::take(&mut *self.subs.lock());
        drop(old);
    }

    /// Switch to another user's list. Pending timers and open alerts of the
    /// previous list are cancelled.
    pub fn set_user(&self, user_id: Option<String>) {
        self.inner.switch_user(user_id);
    }

    pub fn user_id(&self) -> Option<String> {
        self.inner.user_id.read().clone()
    }

    /// Stamp, prepend and persist a notification. Returns `None` when the
    /// draft is a duplicate of an existing entry.
    pub fn add_notification(&self, draft: NotificationDraft) -> Option<Notification> {
        self.inner.add(draft)
    }

    pub fn mark_as_read(&self, id: &str) -> bool {
        self.inner.mark_read(Some(id))
    }

    pub fn mark_all_as_read(&self) {
        self.inner.mark_read(None);
    }

    pub fn remove_notification(&self, id: &str) -> bool {
        self.inner.remove(id)
    }

    pub fn clear_all(&self) {
        self.inner.clear();
    }

    pub fn get(&self, id: &str) -> Option<Notification> {
        self.inner.list.borrow().iter().find(|n| n.id == id).cloned()
    }

    /// Newest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.inner.list.borrow().clone()
    }

    pub fn unread_count(&self) -> usize {
        self.inner.list.borrow().iter().filter(|n| !n.read).count()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Notification>> {
        self.inner.list.subscribe()
    }

    /// Master switch for event mapping and native alerts.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_enabled()
    }

    pub fn permission(&self) -> AlertPermission {
        self.inner.seams.alerts.permission()
    }

    /// Ask the user for native alert permission. Once decided, the stored
    /// answer is returned without prompting again.
    pub async fn request_permission(&self) -> Result<AlertPermission, AlertError> {
        let alerts = Arc::clone(&self.inner.seams.alerts);
        match alerts.permission() {
            AlertPermission::Default => {
                let decided = alerts.request_permission().await?;
                tracing::info!(permission = ?decided, "native alert permission decided");
                Ok(decided)
            }
            decided => Ok(decided),
        }
    }

    /// The user clicked the native alert for `id`: mark it read, dismiss the
    /// alert and open its deep link or bring the app forward.
    pub fn handle_alert_click(&self, id: &str) -> Result<(), AlertError> {
        let url = self.get(id).and_then(|n| n.url().map(str::to_owned));
        self.inner.mark_read(Some(id));
        self.inner.close_alert(id);
        match url {
            Some(url) => self.inner.seams.launcher.open_url(&url),
            None => {
                self.inner.seams.launcher.focus_window();
                Ok(())
            }
        }
    }

    /// The user dismissed the native alert for `id` outside the app. The
    /// alert is forgotten; the notification itself stays unread.
    pub fn handle_alert_dismissed(&self, id: &str) {
        let Some(timer) = self.inner.open_alerts.lock().remove(id) else {
            return;
        };
        if let Some(timer) = timer {
            timer.abort();
        }
        tracing::debug!(id, "native alert dismissed");
    }
}

impl Drop for NotificationDispatcher {
    fn drop(&mut self) {
        self.inner.cancel_timers();
    }
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("user_id", &*self.inner.user_id.read())
            .field("notifications", &self.inner.list.borrow().len())
            .field("enabled", &self.inner.is_enabled())
            .finish()
    }
}

impl Inner {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn switch_user(self: &Arc<Self>, user_id: Option<String>) {
        self.cancel_timers();
        let list = match &user_id {
            Some(user) => load(self.seams.store.as_ref(), user),
            None => Vec::new(),
        };
        *self.user_id.write() = user_id;
        let expiring: Vec<String> = list
            .iter()
            .filter(|n| expires(n))
            .map(|n| n.id.clone())
            .collect();
        self.list.send_replace(list);
        for id in expiring {
            self.arm_expiry(&id);
        }
    }

    fn add(self: &Arc<Self>, draft: NotificationDraft) -> Option<Notification> {
        let notification = Notification {
            id: id::generate(),
            kind: draft.kind,
            title: draft.title,
            message: draft.message,
            timestamp: Utc::now(),
            read: false,
            priority: draft.priority,
            persistent: draft.persistent,
            data: draft.data,
            dedupe_key: draft.dedupe_key,
        };

        let mut duplicate = false;
        self.list.send_if_modified(|list| {
            if let Some(key) = &notification.dedupe_key {
                duplicate = list
                    .iter()
                    .any(|n| n.kind == notification.kind && n.dedupe_key.as_ref() == Some(key));
            }
            if duplicate {
                return false;
            }
            list.insert(0, notification.clone());
            true
        });
        if duplicate {
            tracing::debug!(kind = %notification.kind, "duplicate notification dropped");
            return None;
        }

        tracing::debug!(
            id = %notification.id,
            kind = %notification.kind,
            priority = ?notification.priority,
            "notification added"
        );
        self.persist();
        if expires(&notification) {
            self.arm_expiry(&notification.id);
        }
        self.raise_alert(&notification);
        Some(notification)
    }

    /// Mark one entry (or all) read. Alerts still open for them are closed.
    fn mark_read(&self, id: Option<&str>) -> bool {
        let mut newly_read = Vec::new();
        self.list.send_if_modified(|list| {
            for n in list.iter_mut().filter(|n| id.is_none_or(|id| n.id == id)) {
                if !n.read {
                    n.read = true;
                    newly_read.push(n.id.clone());
                }
            }
            !newly_read.is_empty()
        });
        if newly_read.is_empty() {
            return false;
        }
        self.persist();
        for id in &newly_read {
            self.close_alert(id);
        }
        true
    }

    fn remove(&self, id: &str) -> bool {
        let removed = self.list.send_if_modified(|list| {
            let before = list.len();
            list.retain(|n| n.id != id);
            list.len() != before
        });
        if let Some(timer) = self.expiry.lock().remove(id) {
            timer.abort();
        }
        self.close_alert(id);
        if removed {
            self.persist();
        }
        removed
    }

    /// Empty the list and drop the user's stored blob.
    fn clear(&self) {
        self.cancel_timers();
        self.list.send_if_modified(|list| {
            let changed = !list.is_empty();
            list.clear();
            changed
        });
        let Some(user) = self.user_id.read().clone() else {
            return;
        };
        if let Err(e) = self.seams.store.delete(&notifications_key(&user)) {
            tracing::warn!(user_id = %user, error = %e, "failed to delete stored notifications");
        }
    }

    fn persist(&self) {
        let Some(user) = self.user_id.read().clone() else {
            return;
        };
        let blob = match serde_json::to_string(&*self.list.borrow()) {
            Ok(blob) => blob,
            Err(e) => {
                tracing::warn!(user_id = %user, error = %e, "failed to encode notifications");
                return;
            }
        };
        if let Err(e) = self.seams.store.write(&notifications_key(&user), &blob) {
            tracing::warn!(user_id = %user, error = %e, "failed to persist notifications");
        }
    }

    fn raise_alert(self: &Arc<Self>, notification: &Notification) {
        if !self.config.native_alerts || !self.is_enabled() {
            return;
        }
        if self.seams.alerts.permission() != AlertPermission::Granted {
            return;
        }
        let request = AlertRequest {
            notification_id: notification.id.clone(),
            title: notification.title.clone(),
            body: notification.message.clone(),
            require_interaction: notification.priority == Priority::Urgent,
        };
        if let Err(e) = self.seams.alerts.show(&request) {
            tracing::warn!(id = %notification.id, error = %e, "native alert failed");
            return;
        }

        let timer = if request.require_interaction {
            None
        } else {
            let key = notification.id.clone();
            self.spawn_after(Duration::from_millis(self.config.alert_close_ms), move |inner| {
                if inner.open_alerts.lock().remove(&key).is_some() {
                    inner.seams.alerts.close(&key);
                }
            })
        };
        self.open_alerts.lock().insert(notification.id.clone(), timer);
    }

    fn close_alert(&self, id: &str) {
        let Some(timer) = self.open_alerts.lock().remove(id) else {
            return;
        };
        if let Some(timer) = timer {
            timer.abort();
        }
        self.seams.alerts.close(id);
    }

    fn arm_expiry(self: &Arc<Self>, id: &str) {
        let key = id.to_string();
        let delay = Duration::from_millis(self.config.low_priority_expiry_ms);
        let timer = self.spawn_after(delay, move |inner| {
            inner.expiry.lock().remove(&key);
            inner.remove(&key);
        });
        let Some(timer) = timer else {
            return;
        };
        if let Some(old) = self.expiry.lock().insert(id.to_string(), timer) {
            old.abort();
        }
    }

    fn spawn_after<F>(self: &Arc<Self>, delay: Duration, f: F) -> Option<JoinHandle<()>>
    where
        F: FnOnce(&Arc<Inner>) + Send + 'static,
    {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no runtime, notification timer skipped");
            return None;
        };
        let weak: Weak<Inner> = Arc::downgrade(self);
        Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                f(&inner);
            }
        }))
    }

    fn cancel_timers(&self) {
        for (_, timer) in self.expiry.lock().drain() {
            timer.abort();
        }
        let open: Vec<(String, Option<JoinHandle<()>>)> = self.open_alerts.lock().drain().collect();
        for (id, timer) in open {
            if let Some(timer) = timer {
                timer.abort();
            }
            self.seams.alerts.close(&id);
        }
    }

    // ── Event mapping ──

    fn on_event(self: &Arc<Self>, event: &InboundEvent) {
        if !self.is_enabled() {
            return;
        }
        let draft = match event {
            InboundEvent::NewMessage(msg) if self.config.on_new_message => self.message_draft(msg),
            InboundEvent::UserOnline(change) if self.config.on_presence => {
                self.presence_draft(change, EventKind::UserOnline, "is online")
            }
            InboundEvent::UserOffline(change) if self.config.on_presence => {
                self.presence_draft(change, EventKind::UserOffline, "went offline")
            }
            InboundEvent::MessageFailed(report) if self.config.on_delivery_failure => {
                Some(failure_draft(report))
            }
            _ => None,
        };
        if let Some(draft) = draft {
            self.add(draft);
        }
    }

    fn is_self(&self, user_id: &str) -> bool {
        self.user_id.read().as_deref() == Some(user_id)
    }

    fn message_draft(&self, msg: &NewMessage) -> Option<NotificationDraft> {
        if self.is_self(&msg.sender_id) {
            return None;
        }
        let sender = msg.sender_name.as_deref().unwrap_or(&msg.sender_id);
        let mut draft = NotificationDraft::new(
            EventKind::NewMessage.as_str(),
            format!("New message from {sender}"),
            msg.content.clone(),
        )
        .data(json!({
            "message_id": msg.message_id,
            "conversation_id": msg.conversation_id,
            "group_id": msg.group_id,
            "sender_id": msg.sender_id,
        }));
        if let Some(message_id) = &msg.message_id {
            draft = draft.dedupe_key(message_id.clone());
        }
        Some(draft)
    }

    fn presence_draft(
        &self,
        change: &UserStatusChange,
        kind: EventKind,
        verb: &str,
    ) -> Option<NotificationDraft> {
        if self.is_self(&change.user_id) {
            return None;
        }
        let name = change.username.as_deref().unwrap_or(&change.user_id);
        Some(
            NotificationDraft::new(kind.as_str(), format!("{name} {verb}"), String::new())
                .priority(Priority::Low)
                .data(json!({ "user_id": change.user_id })),
        )
    }
}

fn failure_draft(report: &DeliveryReport) -> NotificationDraft {
    let message = report
        .error
        .clone()
        .unwrap_or_else(|| "Your message could not be delivered".to_string());
    NotificationDraft::new(EventKind::MessageFailed.as_str(), "Message not delivered", message)
        .priority(Priority::Urgent)
        .persistent()
        .data(json!({ "message_id": report.message_id }))
        .dedupe_key(report.message_id.clone())
}

fn expires(notification: &Notification) -> bool {
    notification.priority == Priority::Low && !notification.persistent
}

fn load(store: &dyn NotificationStore, user_id: &str) -> Vec<Notification> {
    let blob = match store.read(&notifications_key(user_id)) {
        Ok(Some(blob)) => blob,
        Ok(None) => return Vec::new(),
        Err(e) => {
            tracing::warn!(user_id, error = %e, "failed to read stored notifications");
            return Vec::new();
        }
    };
    let records = match serde_json::from_str::<Value>(&blob) {
        Ok(Value::Array(records)) => records,
        Ok(_) => {
            tracing::warn!(user_id, "stored notifications are not a list, ignoring");
            return Vec::new();
        }
        Err(e) => {
            tracing::warn!(user_id, error = %e, "stored notifications are not JSON, ignoring");
            return Vec::new();
        }
    };

    let total = records.len();
    let kept: Vec<Notification> = records
        .into_iter()
        .filter(has_notification_shape)
        .filter_map(|record| serde_json::from_value(record).ok())
        .collect();
    if kept.len() < total {
        tracing::warn!(
            user_id,
            dropped = total - kept.len(),
            "discarded malformed stored notifications"
        );
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeAlerts {
        permission: Mutex<AlertPermission>,
        answer: Option<AlertPermission>,
        shown: Mutex<Vec<AlertRequest>>,
        closed: Mutex<Vec<String>>,
    }

    impl FakeAlerts {
        fn granted() -> Self {
            Self {
                permission: Mutex::new(AlertPermission::Granted),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl AlertSurface for FakeAlerts {
        fn permission(&self) -> AlertPermission {
            *self.permission.lock()
        }

        async fn request_permission(&self) -> Result<AlertPermission, AlertError> {
            let answer = self.answer.ok_or(AlertError::Unsupported)?;
            *self.permission.lock() = answer;
            Ok(answer)
        }

        fn show(&self, alert: &AlertRequest) -> Result<(), AlertError> {
            self.shown.lock().push(alert.clone());
            Ok(())
        }

        fn close(&self, notification_id: &str) {
            self.closed.lock().push(notification_id.to_string());
        }
    }

    #[derive(Default)]
    struct FakeLauncher {
        opened: Mutex<Vec<String>>,
        focused: Mutex<usize>,
    }

    impl Launcher for FakeLauncher {
        fn open_url(&self, url: &str) -> Result<(), AlertError> {
            self.opened.lock().push(url.to_string());
            Ok(())
        }

        fn focus_window(&self) {
            *self.focused.lock() += 1;
        }
    }

    struct Rig {
        store: Arc<MemoryStore>,
        alerts: Arc<FakeAlerts>,
        launcher: Arc<FakeLauncher>,
        dispatcher: NotificationDispatcher,
    }

    fn rig_with(config: NotificationConfig, alerts: FakeAlerts) -> Rig {
        let store = Arc::new(MemoryStore::new());
        let alerts = Arc::new(alerts);
        let launcher = Arc::new(FakeLauncher::default());
        let seams = Seams {
            store: store.clone(),
            alerts: alerts.clone(),
            launcher: launcher.clone(),
        };
        let dispatcher = NotificationDispatcher::new(config, Some("me".into()), seams);
        Rig {
            store,
            alerts,
            launcher,
            dispatcher,
        }
    }

    fn rig() -> Rig {
        rig_with(NotificationConfig::default(), FakeAlerts::default())
    }

    fn stored(rig: &Rig) -> Vec<Value> {
        let blob = rig.store.get("notifications_me").unwrap();
        serde_json::from_str(&blob).unwrap()
    }

    #[tokio::test]
    async fn add_stamps_prepends_and_persists() {
        let rig = rig();
        let first = rig
            .dispatcher
            .add_notification(NotificationDraft::new("system", "One", "first"))
            .unwrap();
        let second = rig
            .dispatcher
            .add_notification(NotificationDraft::new("system", "Two", "second"))
            .unwrap();

        assert_eq!(first.id.len(), 26);
        assert!(!first.read);
        let ids: Vec<_> = rig.dispatcher.notifications().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![second.id.clone(), first.id.clone()]);
        assert_eq!(rig.dispatcher.unread_count(), 2);

        let stored = stored(&rig);
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0]["id"], second.id.as_str());
        assert_eq!(stored[0]["type"], "system");
        assert_eq!(stored[0]["priority"], "medium");
    }

    #[tokio::test(start_paused = true)]
    async fn low_priority_expires_after_five_seconds() {
        let rig = rig();
        let low = rig
            .dispatcher
            .add_notification(NotificationDraft::new("x", "low", "").priority(Priority::Low))
            .unwrap();
        rig.dispatcher
            .add_notification(
                NotificationDraft::new("x", "low but kept", "")
                    .priority(Priority::Low)
                    .persistent(),
            )
            .unwrap();
        rig.dispatcher
            .add_notification(NotificationDraft::new("x", "medium", ""))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(4_999)).await;
        assert_eq!(rig.dispatcher.notifications().len(), 3);

        tokio::time::sleep(Duration::from_millis(2)).await;
        let left = rig.dispatcher.notifications();
        assert_eq!(left.len(), 2);
        assert!(left.iter().all(|n| n.id != low.id));
        assert_eq!(stored(&rig).len(), 2);
    }

    #[tokio::test]
    async fn dedupe_key_drops_repeats_of_the_same_kind() {
        let rig = rig();
        let draft = NotificationDraft::new("message_failed", "t", "m").dedupe_key("m1");

        assert!(rig.dispatcher.add_notification(draft.clone()).is_some());
        assert!(rig.dispatcher.add_notification(draft).is_none());
        assert!(
            rig.dispatcher
                .add_notification(NotificationDraft::new("new_message", "t", "m").dedupe_key("m1"))
                .is_some()
        );
        assert_eq!(rig.dispatcher.notifications().len(), 2);
    }

    #[tokio::test]
    async fn read_remove_and_clear_persist() {
        let rig = rig();
        let a = rig.dispatcher.add_notification(NotificationDraft::new("x", "a", "")).unwrap();
        let b = rig.dispatcher.add_notification(NotificationDraft::new("x", "b", "")).unwrap();

        assert!(rig.dispatcher.mark_as_read(&a.id));
        assert!(!rig.dispatcher.mark_as_read(&a.id));
        assert_eq!(rig.dispatcher.unread_count(), 1);
        assert_eq!(stored(&rig)[1]["read"], true);

        rig.dispatcher.mark_all_as_read();
        assert_eq!(rig.dispatcher.unread_count(), 0);

        assert!(rig.dispatcher.remove_notification(&b.id));
        assert!(!rig.dispatcher.remove_notification(&b.id));
        assert_eq!(stored(&rig).len(), 1);

        rig.dispatcher.clear_all();
        assert!(rig.dispatcher.notifications().is_empty());
        assert!(rig.store.get("notifications_me").is_none(), "blob deleted");

        rig.dispatcher.set_user(Some("me".into()));
        assert!(rig.dispatcher.notifications().is_empty());
    }

    #[tokio::test]
    async fn rehydration_discards_malformed_records() {
        let store = Arc::new(MemoryStore::new());
        store.insert(
            "notifications_me",
            r#"[
                {"id":"a","type":"x","title":"ok","message":"","read":false,"priority":"high","timestamp":"2025-01-01T00:00:00Z"},
                {"id":"b","type":"x","title":"no read flag","message":"","priority":"low"},
                {"id":3,"type":"x","title":"numeric id","message":"","read":true,"priority":"low"},
                {"id":"c","type":"x","title":"bad priority","message":"","read":true,"priority":"extreme"},
                "not an object",
                {"id":"d","type":"x","title":"no timestamp","message":"","read":true,"priority":"medium"}
            ]"#,
        );
        let seams = Seams {
            store: store.clone(),
            ..Seams::default()
        };
        let dispatcher =
            NotificationDispatcher::new(NotificationConfig::default(), Some("me".into()), seams);

        let ids: Vec<_> = dispatcher.notifications().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["a", "d"]);
        assert_eq!(dispatcher.get("a").unwrap().priority, Priority::High);
    }

    #[tokio::test]
    async fn garbage_blob_yields_empty_list() {
        let store = Arc::new(MemoryStore::new());
        store.insert("notifications_me", "{not json");
        let seams = Seams {
            store,
            ..Seams::default()
        };
        let dispatcher =
            NotificationDispatcher::new(NotificationConfig::default(), Some("me".into()), seams);
        assert!(dispatcher.notifications().is_empty());
    }

    #[tokio::test]
    async fn set_user_switches_lists() {
        let rig = rig();
        rig.dispatcher.add_notification(NotificationDraft::new("x", "mine", "")).unwrap();

        rig.dispatcher.set_user(Some("other".into()));
        assert!(rig.dispatcher.notifications().is_empty());
        rig.dispatcher.add_notification(NotificationDraft::new("x", "theirs", "")).unwrap();

        rig.dispatcher.set_user(Some("me".into()));
        let titles: Vec<_> = rig.dispatcher.notifications().into_iter().map(|n| n.title).collect();
        assert_eq!(titles, vec!["mine"]);
        assert!(rig.store.get("notifications_other").is_some());
    }

    #[tokio::test]
    async fn no_user_means_no_persistence() {
        let store = Arc::new(MemoryStore::new());
        let seams = Seams {
            store: store.clone(),
            ..Seams::default()
        };
        let dispatcher = NotificationDispatcher::new(NotificationConfig::default(), None, seams);
        dispatcher.add_notification(NotificationDraft::new("x", "t", "")).unwrap();
        assert_eq!(dispatcher.notifications().len(), 1);
        assert!(store.get("notifications_").is_none());
    }

    // ── Native alerts ──

    #[tokio::test(start_paused = true)]
    async fn granted_alerts_auto_close_unless_urgent() {
        let rig = rig_with(NotificationConfig::default(), FakeAlerts::granted());
        let normal = rig
            .dispatcher
            .add_notification(NotificationDraft::new("x", "hi", "body"))
            .unwrap();
        let urgent = rig
            .dispatcher
            .add_notification(NotificationDraft::new("x", "help", "").priority(Priority::Urgent))
            .unwrap();

        {
            let shown = rig.alerts.shown.lock();
            assert_eq!(shown.len(), 2);
            assert_eq!(shown[0].notification_id, normal.id);
            assert_eq!(shown[0].body, "body");
            assert!(!shown[0].require_interaction);
            assert!(shown[1].require_interaction);
        }

        tokio::time::sleep(Duration::from_millis(10_001)).await;
        assert_eq!(*rig.alerts.closed.lock(), vec![normal.id.clone()]);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!rig.alerts.closed.lock().contains(&urgent.id));
    }

    #[tokio::test]
    async fn urgent_alerts_are_released_on_read_or_dismissal() {
        let rig = rig_with(NotificationConfig::default(), FakeAlerts::granted());
        let urgent = |title: &str| {
            rig.dispatcher
                .add_notification(NotificationDraft::new("x", title, "").priority(Priority::Urgent))
                .unwrap()
        };
        let read = urgent("read it");
        let dismissed = urgent("swiped away");
        assert_eq!(rig.dispatcher.inner.open_alerts.lock().len(), 2);

        rig.dispatcher.mark_as_read(&read.id);
        assert_eq!(*rig.alerts.closed.lock(), vec![read.id.clone()]);

        rig.dispatcher.handle_alert_dismissed(&dismissed.id);
        assert!(rig.dispatcher.inner.open_alerts.lock().is_empty());
        assert!(!rig.dispatcher.get(&dismissed.id).unwrap().read);
        assert_eq!(rig.alerts.closed.lock().len(), 1, "already gone at the OS level");

        rig.dispatcher.mark_all_as_read();
        assert_eq!(rig.alerts.closed.lock().len(), 1);
    }

    #[tokio::test]
    async fn no_alert_without_permission_or_when_disabled() {
        let rig = rig();
        rig.dispatcher.add_notification(NotificationDraft::new("x", "t", "")).unwrap();
        assert!(rig.alerts.shown.lock().is_empty());

        let rig = rig_with(NotificationConfig::default(), FakeAlerts::granted());
        rig.dispatcher.set_enabled(false);
        rig.dispatcher.add_notification(NotificationDraft::new("x", "t", "")).unwrap();
        assert!(rig.alerts.shown.lock().is_empty());
        assert_eq!(rig.dispatcher.notifications().len(), 1);

        let config = NotificationConfig {
            native_alerts: false,
            ..NotificationConfig::default()
        };
        let rig = rig_with(config, FakeAlerts::granted());
        rig.dispatcher.add_notification(NotificationDraft::new("x", "t", "")).unwrap();
        assert!(rig.alerts.shown.lock().is_empty());
    }

    #[tokio::test]
    async fn request_permission_prompts_only_once() {
        let alerts = FakeAlerts {
            answer: Some(AlertPermission::Granted),
            ..FakeAlerts::default()
        };
        let rig = rig_with(NotificationConfig::default(), alerts);
        assert_eq!(rig.dispatcher.permission(), AlertPermission::Default);

        let decided = rig.dispatcher.request_permission().await.unwrap();
        assert_eq!(decided, AlertPermission::Granted);
        assert_eq!(rig.dispatcher.permission(), AlertPermission::Granted);

        *rig.alerts.permission.lock() = AlertPermission::Denied;
        assert_eq!(rig.dispatcher.request_permission().await.unwrap(), AlertPermission::Denied);
    }

    #[tokio::test]
    async fn unsupported_platform_reads_denied() {
        let dispatcher = NotificationDispatcher::new(
            NotificationConfig::default(),
            None,
            Seams {
                alerts: Arc::new(NoAlerts),
                ..Seams::default()
            },
        );
        assert_eq!(dispatcher.permission(), AlertPermission::Denied);
        assert_eq!(dispatcher.request_permission().await.unwrap(), AlertPermission::Denied);
    }

    #[tokio::test]
    async fn click_marks_read_and_opens_link_or_focuses() {
        let rig = rig_with(NotificationConfig::default(), FakeAlerts::granted());
        let linked = rig
            .dispatcher
            .add_notification(
                NotificationDraft::new("x", "linked", "")
                    .data(json!({"url": "https://chat.example/c/1"})),
            )
            .unwrap();
        let plain = rig
            .dispatcher
            .add_notification(NotificationDraft::new("x", "plain", ""))
            .unwrap();

        rig.dispatcher.handle_alert_click(&linked.id).unwrap();
        assert!(rig.dispatcher.get(&linked.id).unwrap().read);
        assert_eq!(*rig.launcher.opened.lock(), vec!["https://chat.example/c/1"]);
        assert!(rig.alerts.closed.lock().contains(&linked.id));

        rig.dispatcher.handle_alert_click(&plain.id).unwrap();
        assert_eq!(*rig.launcher.focused.lock(), 1);
        assert_eq!(rig.dispatcher.unread_count(), 0);
    }

    // ── Event mapping ──

    fn attached(config: NotificationConfig) -> (Rig, EventRouter) {
        let rig = rig_with(config, FakeAlerts::default());
        let router = EventRouter::new();
        rig.dispatcher.attach(&router);
        (rig, router)
    }

    #[tokio::test]
    async fn new_message_from_someone_else() {
        let (rig, router) = attached(NotificationConfig::default());

        router.dispatch_raw(
            r#"{"type":"new_message","message_id":"m1","conversation_id":"c1","sender_id":"u2","sender_name":"Bea","content":"hey"}"#,
        );
        router.dispatch_raw(
            r#"{"type":"new_message","message_id":"m1","conversation_id":"c1","sender_id":"u2","sender_name":"Bea","content":"hey"}"#,
        );
        router.dispatch_raw(
            r#"{"type":"new_message","message_id":"m2","sender_id":"me","content":"mine"}"#,
        );

        let list = rig.dispatcher.notifications();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].kind, "new_message");
        assert_eq!(list[0].title, "New message from Bea");
        assert_eq!(list[0].message, "hey");
        assert_eq!(list[0].priority, Priority::Medium);
        assert_eq!(list[0].data.as_ref().unwrap()["conversation_id"], "c1");
    }

    #[tokio::test(start_paused = true)]
    async fn presence_is_low_priority() {
        let (rig, router) = attached(NotificationConfig::default());

        router.dispatch_raw(r#"{"type":"user_online","user_id":"u5","username":"eve"}"#);
        router.dispatch_raw(r#"{"type":"user_online","user_id":"me"}"#);

        let list = rig.dispatcher.notifications();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].title, "eve is online");
        assert_eq!(list[0].priority, Priority::Low);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(rig.dispatcher.notifications().is_empty());
    }

    #[tokio::test]
    async fn delivery_failure_is_urgent_and_persistent() {
        let (rig, router) = attached(NotificationConfig::default());

        router.dispatch_raw(r#"{"type":"message_failed","message_id":"m9","error":"blocked"}"#);

        let list = rig.dispatcher.notifications();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].priority, Priority::Urgent);
        assert!(list[0].persistent);
        assert_eq!(list[0].message, "blocked");
    }

    #[tokio::test]
    async fn config_flags_filter_events() {
        let config = NotificationConfig {
            on_presence: false,
            on_new_message: false,
            ..NotificationConfig::default()
        };
        let (rig, router) = attached(config);

        router.dispatch_raw(r#"{"type":"user_online","user_id":"u5"}"#);
        router.dispatch_raw(r#"{"type":"new_message","sender_id":"u2","content":"hi"}"#);
        assert!(rig.dispatcher.notifications().is_empty());

        rig.dispatcher.set_enabled(false);
        router.dispatch_raw(r#"{"type":"message_failed","message_id":"m1"}"#);
        assert!(rig.dispatcher.notifications().is_empty());

        rig.dispatcher.set_enabled(true);
        router.dispatch_raw(r#"{"type":"message_failed","message_id":"m1"}"#);
        assert_eq!(rig.dispatcher.notifications().len(), 1);
    }

    #[tokio::test]
    async fn detach_stops_mapping() {
        let (rig, router) = attached(NotificationConfig::default());
        rig.dispatcher.detach();
        assert_eq!(router.subscriber_count(&EventKind::NewMessage), 0);

        router.dispatch_raw(r#"{"type":"message_failed","message_id":"m1"}"#);
        assert!(rig.dispatcher.notifications().is_empty());
    }

    #[test]
    fn shape_check() {
        assert!(has_notification_shape(&json!({
            "id": "a", "type": "t", "title": "", "message": "", "read": false, "priority": "low"
        })));
        assert!(!has_notification_shape(&json!({
            "id": "a", "type": "t", "title": "", "message": "", "read": "no", "priority": "low"
        })));
        assert!(!has_notification_shape(&json!([1, 2])));
    }
}
