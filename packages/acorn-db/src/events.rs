//! Event bus: reactive subscriptions on collection mutations.
//!
//! Subscribers are plain callbacks invoked synchronously after every put
//! that actually changed state and every delete of an existing record, in
//! registration order, with the affected document. The collection snapshots
//! the subscriber list under its cache lock and dispatches outside it, so a
//! slow or panicking subscriber can neither deadlock the collection nor
//! starve later subscribers: panics are caught, logged, and counted.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A change subscriber.
pub type Subscriber<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Registration-ordered list of change subscribers.
pub struct EventBus<T> {
    subscribers: Vec<Subscriber<T>>,
    panics_caught: Arc<AtomicU64>,
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self {
            subscribers: Vec::new(),
            panics_caught: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<T> EventBus<T> {
    /// Empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber. Delivery order is registration order.
    pub fn subscribe(&mut self, subscriber: impl Fn(&T) + Send + Sync + 'static) {
        self.subscribers.push(Arc::new(subscriber));
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// True when nobody is listening.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Subscriber panics swallowed so far.
    #[must_use]
    pub fn panics_caught(&self) -> u64 {
        self.panics_caught.load(Ordering::Relaxed)
    }

    /// Copies the subscriber list for out-of-lock dispatch.
    #[must_use]
    pub fn snapshot(&self) -> EventDispatch<T> {
        EventDispatch {
            subscribers: self.subscribers.clone(),
            panics_caught: Arc::clone(&self.panics_caught),
        }
    }
}

/// A point-in-time copy of the subscriber list, safe to invoke without
/// holding the collection lock.
pub struct EventDispatch<T> {
    subscribers: Vec<Subscriber<T>>,
    panics_caught: Arc<AtomicU64>,
}

impl<T> EventDispatch<T> {
    /// Invokes every subscriber with `doc`, isolating panics.
    pub fn notify(&self, doc: &T) {
        for subscriber in &self.subscribers {
            let outcome = catch_unwind(AssertUnwindSafe(|| subscriber(doc)));
            if outcome.is_err() {
                self.panics_caught.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("change subscriber panicked; continuing with the rest");
            }
        }
    }

    /// True when there is nothing to notify.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn delivery_follows_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::<String>::new();
        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            bus.subscribe(move |doc: &String| {
                seen.lock().push(format!("{tag}:{doc}"));
            });
        }

        bus.snapshot().notify(&"acorn".to_string());
        assert_eq!(
            *seen.lock(),
            vec!["first:acorn", "second:acorn", "third:acorn"]
        );
    }

    #[test]
    fn panicking_subscriber_does_not_break_the_rest() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::<u32>::new();

        {
            let seen = Arc::clone(&seen);
            bus.subscribe(move |n: &u32| seen.lock().push(*n));
        }
        bus.subscribe(|_: &u32| panic!("misbehaving subscriber"));
        {
            let seen = Arc::clone(&seen);
            bus.subscribe(move |n: &u32| seen.lock().push(n + 100));
        }

        let dispatch = bus.snapshot();
        dispatch.notify(&1);
        dispatch.notify(&2);

        assert_eq!(*seen.lock(), vec![1, 101, 2, 102]);
        assert_eq!(bus.panics_caught(), 2);
    }

    #[test]
    fn snapshot_is_isolated_from_later_subscriptions() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::<u32>::new();
        {
            let seen = Arc::clone(&seen);
            bus.subscribe(move |n: &u32| seen.lock().push(*n));
        }

        let dispatch = bus.snapshot();
        {
            let seen = Arc::clone(&seen);
            bus.subscribe(move |n: &u32| seen.lock().push(n * 10));
        }

        // The earlier snapshot only knows the first subscriber.
        dispatch.notify(&7);
        assert_eq!(*seen.lock(), vec![7]);
    }

    #[test]
    fn empty_bus_dispatch_is_a_no_op() {
        let bus = EventBus::<u32>::new();
        assert!(bus.is_empty());
        let dispatch = bus.snapshot();
        assert!(dispatch.is_empty());
        dispatch.notify(&0);
        assert_eq!(bus.panics_caught(), 0);
    }
}
