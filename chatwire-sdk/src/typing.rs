//! "X is typing…" state for one conversation or one group.
//!
//! All users in a scope share a single expiry timer. Any `typing` event
//! restarts it, and when it fires the whole scope is cleared, including users
//! whose own last signal was more recent than the one that armed it.
//! `stop_typing` removes only its sender and leaves the timer alone.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::frame::{EventKind, InboundEvent, TypingSignal};
use crate::router::{EventRouter, Subscription};

/// What a [`TypingAggregator`] listens to. One kind per instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypingScope {
    Conversation(String),
    Group(String),
}

impl TypingScope {
    /// `(conversation_id, group_id)` as carried on the wire.
    pub fn ids(&self) -> (Option<String>, Option<String>) {
        match self {
            TypingScope::Conversation(id) => (Some(id.clone()), None),
            TypingScope::Group(id) => (None, Some(id.clone())),
        }
    }

    fn matches(&self, signal: &TypingSignal) -> bool {
        match self {
            TypingScope::Conversation(id) => signal.conversation_id.as_deref() == Some(id.as_str()),
            TypingScope::Group(id) => signal.group_id.as_deref() == Some(id.as_str()),
        }
    }
}

/// One user currently typing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Typist {
    pub user_id: String,
    pub name: String,
}

struct Shared {
    scope: TypingScope,
    timeout: Duration,
    typists: watch::Sender<Vec<Typist>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn on_typing(self: &Arc<Self>, signal: &TypingSignal) {
        let name = signal.display_name().to_string();
        self.typists.send_if_modified(|list| {
            match list.iter_mut().find(|t| t.user_id == signal.user_id) {
                Some(existing) if existing.name == name => false,
                Some(existing) => {
                    existing.name = name;
                    true
                }
                None => {
                    list.push(Typist {
                        user_id: signal.user_id.clone(),
                        name,
                    });
                    true
                }
            }
        });
        self.restart_timer();
    }

    fn on_stop(&self, signal: &TypingSignal) {
        self.typists.send_if_modified(|list| {
            let before = list.len();
            list.retain(|t| t.user_id != signal.user_id);
            list.len() != before
        });
    }

    fn restart_timer(self: &Arc<Self>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(scope = ?self.scope, "no runtime, typing entries will not expire");
            return;
        };
        let weak: Weak<Self> = Arc::downgrade(self);
        let timeout = self.timeout;
        let timer = runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = weak.upgrade() {
                shared.clear();
            }
        });
        if let Some(old) = self.timer.lock().replace(timer) {
            old.abort();
        }
    }

    fn clear(&self) {
        self.typists.send_if_modified(|list| {
            let changed = !list.is_empty();
            list.clear();
            changed
        });
    }

    fn cancel_timer(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }
}

/// Tracks who is typing in one scope.
///
/// Dropping the aggregator unsubscribes it and cancels its timer.
pub struct TypingAggregator {
    shared: Arc<Shared>,
    sub: Subscription,
}

impl TypingAggregator {
    pub fn new(router: &EventRouter, scope: TypingScope, timeout: Duration) -> Self {
        let (typists, _) = watch::channel(Vec::new());
        let shared = Arc::new(Shared {
            scope,
            timeout,
            typists,
            timer: Mutex::new(None),
        });

        let handler = Arc::clone(&shared);
        let sub = router.on_many(EventKind::TYPING, move |event| match event {
            InboundEvent::Typing(signal) if handler.scope.matches(signal) => {
                handler.on_typing(signal);
            }
            InboundEvent::StopTyping(signal) if handler.scope.matches(signal) => {
                handler.on_stop(signal);
            }
            _ => {}
        });

        Self { shared, sub }
    }

    pub fn scope(&self) -> &TypingScope {
        &self.shared.scope
    }

    /// Display names, in the order users started typing.
    pub fn names(&self) -> Vec<String> {
        self.shared
            .typists
            .borrow()
            .iter()
            .map(|t| t.name.clone())
            .collect()
    }

    pub fn typists(&self) -> Vec<Typist> {
        self.shared.typists.borrow().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.typists.borrow().is_empty()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Typist>> {
        self.shared.typists.subscribe()
    }

    /// Stop listening, cancel the timer and clear the set.
    pub fn close(&self) {
        self.sub.cancel();
        self.shared.cancel_timer();
        self.shared.clear();
    }
}

impl Drop for TypingAggregator {
    fn drop(&mut self) {
        self.sub.cancel();
        self.shared.cancel_timer();
    }
}

impl std::fmt::Debug for TypingAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypingAggregator")
            .field("scope", &self.shared.scope)
            .field("typists", &*self.shared.typists.borrow())
            .finish()
    }
}
