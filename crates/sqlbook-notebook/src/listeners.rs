//! Observer registry for store mutations.
//!
//! Listeners receive one of two event shapes: a full refresh ("re-derive the
//! id list") or a targeted refresh carrying the id of the one cell whose
//! content changed. Fan-out is synchronous, in registration order, at the
//! point the mutation's storage effect is durable.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sqlbook_core::CellId;

/// A store mutation event delivered to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellChange {
    /// The cell list changed; re-derive the full id list.
    Refresh,
    /// One cell's content changed; re-fetch it.
    Cell(CellId),
}

/// Capability returned by [`ListenerSet::subscribe`], used to unsubscribe
/// deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type Callback = Arc<dyn Fn(&CellChange) + Send + Sync>;

/// Registered listeners, keyed by subscription order.
#[derive(Default)]
pub struct ListenerSet {
    /// Next subscription key; keys only ever grow, so iteration order is
    /// registration order.
    next: AtomicU64,
    listeners: Mutex<BTreeMap<u64, Callback>>,
}

impl ListenerSet {
    /// Register a callback. Returns the capability that removes it again.
    pub fn subscribe(
        &self,
        callback: impl Fn(&CellChange) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, Arc::new(callback));
        ListenerId(id)
    }

    /// Remove a callback. Removing an absent subscription is a no-op.
    pub fn unsubscribe(&self, id: ListenerId) {
        self.lock().remove(&id.0);
    }

    /// Deliver a change to every listener, in registration order.
    pub fn notify(&self, change: &CellChange) {
        // Snapshot before invoking so a callback may subscribe or
        // unsubscribe without deadlocking the registry.
        let callbacks: Vec<Callback> = self.lock().values().cloned().collect();
        for callback in callbacks {
            callback(change);
        }
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no listeners are registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, Callback>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_runs_in_registration_order() {
        let set = ListenerSet::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            set.subscribe(move |_| seen.lock().unwrap().push(tag));
        }

        set.notify(&CellChange::Refresh);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery_and_tolerates_absent_ids() {
        let set = ListenerSet::default();
        let count = Arc::new(Mutex::new(0));

        let counter = Arc::clone(&count);
        let id = set.subscribe(move |_| *counter.lock().unwrap() += 1);

        set.notify(&CellChange::Refresh);
        set.unsubscribe(id);
        set.notify(&CellChange::Refresh);
        // Unsubscribing twice is a no-op.
        set.unsubscribe(id);

        assert_eq!(*count.lock().unwrap(), 1);
        assert!(set.is_empty());
    }

    #[test]
    fn test_targeted_events_carry_the_cell_id() {
        let set = ListenerSet::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        set.subscribe(move |change| sink.lock().unwrap().push(change.clone()));

        let id = CellId::from("cell-1");
        set.notify(&CellChange::Cell(id.clone()));
        assert_eq!(*seen.lock().unwrap(), vec![CellChange::Cell(id)]);
    }

    #[test]
    fn test_callback_may_touch_the_registry() {
        let set = Arc::new(ListenerSet::default());

        let registry = Arc::clone(&set);
        set.subscribe(move |_| {
            // Subscribing from inside a notification must not deadlock.
            registry.subscribe(|_| {});
        });

        set.notify(&CellChange::Refresh);
        assert_eq!(set.len(), 2);
    }
}
