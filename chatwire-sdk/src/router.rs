//! Typed publish/subscribe over inbound frames.
//!
//! The router knows nothing about the transport: the connection manager hands
//! it raw text, it decodes the frame and calls every subscriber registered for
//! that [`EventKind`], in registration order, on the caller's task.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::frame::{EventKind, InboundEvent};

type Callback = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

struct Entry {
    id: u64,
    callback: Callback,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    by_kind: HashMap<EventKind, Vec<Entry>>,
}

/// Per-kind subscriber lists for inbound events.
///
/// Cheap to clone; clones share the same subscriber table.
#[derive(Clone, Default)]
pub struct EventRouter {
    registry: Arc<Mutex<Registry>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for one event kind.
    ///
    /// Registering the same closure twice yields two independent entries.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.on_many([kind], callback)
    }

    /// Register one callback for several kinds (e.g. [`EventKind::DELIVERY`]).
    /// The returned handle removes all of them.
    pub fn on_many<F, I>(&self, kinds: I, callback: F) -> Subscription
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
        I: IntoIterator<Item = EventKind>,
    {
        let callback: Callback = Arc::new(callback);
        let mut keys = Vec::new();
        {
            let mut reg = self.registry.lock();
            for kind in kinds {
                reg.next_id += 1;
                let id = reg.next_id;
                reg.by_kind.entry(kind.clone()).or_default().push(Entry {
                    id,
                    callback: Arc::clone(&callback),
                });
                keys.push((kind, id));
            }
        }

        let registry = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            let mut reg = registry.lock();
            for (kind, id) in keys {
                if let Some(list) = reg.by_kind.get_mut(&kind) {
                    list.retain(|e| e.id != id);
                    if list.is_empty() {
                        reg.by_kind.remove(&kind);
                    }
                }
            }
        })
    }

    /// Decode a raw text frame and dispatch it. Malformed frames are logged
    /// and dropped; they never reach subscribers.
    pub fn dispatch_raw(&self, text: &str) {
        match InboundEvent::parse(text) {
            Ok(event) => self.dispatch(&event),
            Err(e) => {
                tracing::warn!(error = %e, len = text.len(), "dropping malformed frame");
            }
        }
    }

    /// Deliver an already-decoded event to its subscribers.
    pub fn dispatch(&self, event: &InboundEvent) {
        let kind = event.kind();
        let callbacks: Vec<Callback> = {
            let reg = self.registry.lock();
            match reg.by_kind.get(&kind) {
                Some(list) => list.iter().map(|e| Arc::clone(&e.callback)).collect(),
                None => Vec::new(),
            }
        };
        if callbacks.is_empty() {
            tracing::trace!(%kind, "no subscribers, discarding event");
            return;
        }
        for cb in callbacks {
            cb(event);
        }
    }

    pub fn subscriber_count(&self, kind: &EventKind) -> usize {
        self.registry.lock().by_kind.get(kind).map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reg = self.registry.lock();
        f.debug_struct("EventRouter")
            .field("kinds", &reg.by_kind.len())
            .finish()
    }
}

/// Handle for a registered callback.
///
/// [`cancel`](Subscription::cancel) is idempotent, and dropping the handle
/// cancels it. Keep the handle alive for as long as the callback should run.
#[must_use = "dropping a Subscription unregisters its callback"]
pub struct Subscription {
    unregister: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub(crate) fn new<F>(unregister: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            unregister: Mutex::new(Some(Box::new(unregister))),
        }
    }

    pub fn cancel(&self) {
        let unregister = self.unregister.lock().take();
        if let Some(f) = unregister {
            f();
        }
    }

    pub fn is_active(&self) -> bool {
        self.unregister.lock().is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
