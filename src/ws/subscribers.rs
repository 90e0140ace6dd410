use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::types::InboundMessage;

/// Callback invoked for every delivered message.
pub type Listener = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

/// Identity returned by [`crate::ws::ConnectionManager::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscriber-{}", self.0)
    }
}

/// Registered message callbacks.
///
/// Delivery iterates a snapshot, so callbacks may subscribe or unsubscribe (themselves
/// included) while a message is being fanned out; changes take effect from the next message.
#[derive(Default)]
pub struct Subscribers {
    next_id: AtomicU64,
    listeners: DashMap<SubscriberId, Listener>,
}

impl Subscribers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, listener: Listener) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.insert(id, listener);
        id
    }

    pub fn remove(&self, id: SubscriberId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    pub fn clear(&self) {
        self.listeners.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Current listeners in subscription order. No map lock is held once this returns.
    fn snapshot(&self) -> Vec<(SubscriberId, Listener)> {
        let mut snapshot: Vec<_> = self
            .listeners
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        snapshot.sort_unstable_by_key(|(id, _)| *id);
        snapshot
    }

    /// Deliver `message` to every listener registered when delivery starts.
    ///
    /// A panicking listener is logged and skipped. Returns how many listeners
    /// completed normally.
    pub fn deliver(&self, message: &InboundMessage) -> usize {
        let mut delivered = 0;

        for (id, listener) in self.snapshot() {
            match catch_unwind(AssertUnwindSafe(|| listener(message))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let reason = panic_reason(panic.as_ref());
                    #[cfg(feature = "tracing")]
                    tracing::error!(subscriber = %id, %reason, "Message subscriber panicked");
                    #[cfg(not(feature = "tracing"))]
                    let _ = (&id, &reason);
                }
            }
        }

        delivered
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(reason) = panic.downcast_ref::<&str>() {
        (*reason).to_owned()
    } else if let Some(reason) = panic.downcast_ref::<String>() {
        reason.clone()
    } else {
        "<non-string panic payload>".to_owned()
    }
}
