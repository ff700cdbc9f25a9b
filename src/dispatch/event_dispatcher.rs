//! In-process pub/sub registry for dispatched events.
//!
//! [`EventDispatcher`] maps event-type strings to ordered callback lists.
//! The connection manager emits into it without knowing who listens;
//! business modules register at startup through [`EventDispatcher::on`].

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;

/// Subscriber callback invoked with the event payload.
pub type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

struct Handler {
    id: u64,
    callback: Callback,
}

struct Registry {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<String, Vec<Handler>>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Handler>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, event_type: &str, id: u64) -> bool {
        let mut handlers = self.lock();
        let Some(list) = handlers.get_mut(event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| h.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(event_type);
        }
        removed
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.lock();
        f.debug_struct("Registry")
            .field("event_types", &handlers.len())
            .field(
                "subscribers",
                &handlers.values().map(Vec::len).sum::<usize>(),
            )
            .finish()
    }
}

/// String-keyed event registry with ordered, panic-isolated delivery.
///
/// Cloning is cheap; all clones share the same registry.
///
/// # Reentrancy
///
/// [`emit`](Self::emit) snapshots the callback list before invoking it,
/// so callbacks may register or unregister subscribers (including
/// themselves) while being invoked. Changes take effect on the next emit.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    registry: Arc<Registry>,
}

impl EventDispatcher {
    /// Creates an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(1),
                handlers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Registers `callback` for `event_type`.
    ///
    /// Callbacks for the same type run in registration order. The returned
    /// [`Subscription`] removes exactly this registration.
    pub fn on<F>(&self, event_type: impl AsRef<str>, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let event_type = event_type.as_ref().to_string();
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .lock()
            .entry(event_type.clone())
            .or_default()
            .push(Handler {
                id,
                callback: Arc::new(callback),
            });

        Subscription {
            registry: Arc::downgrade(&self.registry),
            event_type,
            id,
        }
    }

    /// Registers `callback` for events of `event_type` arriving on one
    /// endpoint only (composite key `"{endpoint}:{event_type}"`).
    pub fn on_endpoint<F>(
        &self,
        endpoint: &str,
        event_type: impl AsRef<str>,
        callback: F,
    ) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.on(scoped_key(endpoint, event_type.as_ref()), callback)
    }

    /// Invokes every callback registered for `event_type`.
    ///
    /// Runs synchronously on the calling task. A panicking callback is
    /// logged and skipped; the rest still run. Returns the number of
    /// callbacks invoked.
    pub fn emit(&self, event_type: impl AsRef<str>, data: &Value) -> usize {
        let event_type = event_type.as_ref();
        let snapshot: Vec<Callback> = self
            .registry
            .lock()
            .get(event_type)
            .map(|list| list.iter().map(|h| Arc::clone(&h.callback)).collect())
            .unwrap_or_default();

        for callback in &snapshot {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(data))) {
                tracing::error!(
                    event_type,
                    reason = panic_message(payload.as_ref()),
                    "event subscriber panicked"
                );
            }
        }

        snapshot.len()
    }

    /// Returns the number of callbacks registered for `event_type`.
    #[must_use]
    pub fn subscriber_count(&self, event_type: impl AsRef<str>) -> usize {
        self.registry
            .lock()
            .get(event_type.as_ref())
            .map_or(0, Vec::len)
    }

    /// Removes every registration.
    pub fn clear(&self) {
        self.registry.lock().clear();
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle that removes one registration from an [`EventDispatcher`].
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<Registry>,
    event_type: String,
    id: u64,
}

impl Subscription {
    /// Removes the registration. Calling it again is harmless.
    ///
    /// Returns `true` if this call removed the callback.
    pub fn unsubscribe(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.remove(&self.event_type, self.id))
    }

    /// Returns the key this subscription is registered under.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }
}

/// Builds the endpoint-scoped routing key.
#[must_use]
pub fn scoped_key(endpoint: &str, event_type: &str) -> String {
    format!("{endpoint}:{event_type}")
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
