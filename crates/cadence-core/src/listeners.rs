//! Listener registries with synchronous fan-out.
//!
//! A registry holds any number of callbacks for one event type. Dispatch
//! takes a snapshot of the registered listeners and calls each of them in
//! registration order without holding the registry lock, so a callback may
//! register or unsubscribe listeners (itself included) while it runs.

use dashmap::DashMap;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{error, trace};

/// Identifier of a registered listener, unique within its registry.
pub type ListenerId = u64;

/// A registered callback.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

type ListenerMap<E> = DashMap<ListenerId, Listener<E>>;

/// Outcome of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Listeners that returned normally.
    pub delivered: usize,
    /// Listeners that panicked.
    pub failed: usize,
}

/// A set of listeners for events of type `E`.
pub struct ListenerRegistry<E> {
    name: &'static str,
    listeners: Arc<ListenerMap<E>>,
    next_id: AtomicU64,
}

impl<E: 'static> ListenerRegistry<E> {
    /// Create an empty registry. `name` only appears in log fields.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            listeners: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener.
    ///
    /// The listener stays registered until the returned [`Subscription`]
    /// is used to remove it; dropping the subscription does not.
    pub fn register<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.insert(id, Arc::new(listener));
        trace!(registry = self.name, listener = id, "Listener registered");

        let listeners: Weak<ListenerMap<E>> = Arc::downgrade(&self.listeners);
        Subscription {
            id,
            registry: listeners,
        }
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Check if no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Remove every listener.
    pub fn clear(&self) {
        self.listeners.clear();
    }

    /// Deliver `event` to every listener registered at the time of the call.
    ///
    /// Each listener runs at most once. A listener unsubscribed by an
    /// earlier one during this dispatch is skipped; listeners registered
    /// during this dispatch first see the next event. A panicking listener
    /// is logged and does not stop delivery to the others.
    pub fn dispatch(&self, event: &E) -> DispatchReport {
        let mut snapshot: Vec<(ListenerId, Listener<E>)> = self
            .listeners
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        snapshot.sort_unstable_by_key(|(id, _)| *id);

        let mut report = DispatchReport::default();
        for (id, listener) in snapshot {
            if !self.listeners.contains_key(&id) {
                continue;
            }

            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => report.delivered += 1,
                Err(panic) => {
                    report.failed += 1;
                    error!(
                        registry = self.name,
                        listener = id,
                        panic = %panic_message(&*panic),
                        "Listener panicked"
                    );
                }
            }
        }

        trace!(
            registry = self.name,
            delivered = report.delivered,
            failed = report.failed,
            "Dispatched event"
        );
        report
    }
}

impl<E> fmt::Debug for ListenerRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("name", &self.name)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

trait Unregister: Send + Sync {
    fn unregister(&self, id: ListenerId) -> bool;
}

impl<E: 'static> Unregister for ListenerMap<E> {
    fn unregister(&self, id: ListenerId) -> bool {
        self.remove(&id).is_some()
    }
}

/// Handle to a registered listener.
///
/// Cloning the handle gives another way to remove the same listener.
#[derive(Clone)]
pub struct Subscription {
    id: ListenerId,
    registry: Weak<dyn Unregister>,
}

impl Subscription {
    /// The listener this handle refers to.
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove the listener.
    ///
    /// Returns `true` only for the call that actually removed it; later
    /// calls, or calls after the registry is gone, return `false`.
    pub fn unsubscribe(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => {
                let removed = registry.unregister(self.id);
                if removed {
                    trace!(listener = self.id, "Listener unsubscribed");
                }
                removed
            }
            None => false,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
