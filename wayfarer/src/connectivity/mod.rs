//! Network reachability monitoring.
//!
//! [`ConnectivityMonitor`] holds the last known online/offline state and
//! notifies subscribers on every transition. Subscribing fires the callback
//! once immediately with the current state, so consumers never have to poll
//! for an initial value.
//!
//! The monitor has no platform probe of its own: the host feeds it via
//! [`ConnectivityMonitor::set_online`], either from a reachability signal or
//! from the observed outcome of a network call. When no signal has ever been
//! observed the monitor reports optimistic "online" and corrects on the next
//! observation - best effort, not a guarantee.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

/// Callback invoked with the new state on every transition.
type Callback = Box<dyn Fn(bool) + Send + Sync>;

struct Inner {
    online: AtomicBool,
    subscribers: Mutex<HashMap<u64, Callback>>,
    next_id: AtomicU64,
}

/// Observes online/offline transitions and publishes them to subscribers.
///
/// Cloning the monitor is cheap; all clones share the same state and
/// subscriber registry.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

impl ConnectivityMonitor {
    /// Creates a monitor in the optimistic "online" state.
    pub fn new() -> Self {
        Self::with_state(true)
    }

    /// Creates a monitor with an explicit initial state.
    pub fn with_state(online: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                online: AtomicBool::new(online),
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the last known state without blocking.
    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Records an observed reachability state.
    ///
    /// Subscribers are notified only when the state actually changes.
    pub fn set_online(&self, online: bool) {
        let previous = self.inner.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return;
        }

        debug!(online, "connectivity transition");

        let subscribers = self.inner.subscribers.lock();
        for callback in subscribers.values() {
            callback(online);
        }
    }

    /// Registers a callback for state transitions.
    ///
    /// The callback fires once immediately with the current state, then on
    /// every subsequent transition. Dropping the returned [`Subscription`]
    /// unregisters the callback.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        callback(self.is_online());

        self.inner
            .subscribers
            .lock()
            .insert(id, Box::new(callback));

        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`ConnectivityMonitor::subscribe`].
///
/// Unregisters the callback when dropped.
pub struct Subscription {
    id: u64,
    inner: Weak<Inner>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.subscribers.lock().remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_starts_optimistically_online() {
        let monitor = ConnectivityMonitor::new();
        assert!(monitor.is_online());
    }

    #[test]
    fn test_subscribe_fires_immediately_with_current_state() {
        let monitor = ConnectivityMonitor::with_state(false);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_cb = Arc::clone(&seen);
        let _sub = monitor.subscribe(move |online| seen_cb.lock().push(online));

        assert_eq!(*seen.lock(), vec![false]);
    }

    #[test]
    fn test_notifies_on_every_transition() {
        let monitor = ConnectivityMonitor::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_cb = Arc::clone(&seen);
        let _sub = monitor.subscribe(move |online| seen_cb.lock().push(online));

        monitor.set_online(false);
        monitor.set_online(true);
        monitor.set_online(false);

        // Initial fire plus three transitions
        assert_eq!(*seen.lock(), vec![true, false, true, false]);
    }

    #[test]
    fn test_no_notification_when_state_unchanged() {
        let monitor = ConnectivityMonitor::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count_cb = Arc::clone(&count);
        let _sub = monitor.subscribe(move |_| {
            count_cb.fetch_add(1, Ordering::SeqCst);
        });

        monitor.set_online(true);
        monitor.set_online(true);

        // Only the immediate fire on subscribe
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropping_subscription_unregisters() {
        let monitor = ConnectivityMonitor::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count_cb = Arc::clone(&count);
        let sub = monitor.subscribe(move |_| {
            count_cb.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(monitor.subscriber_count(), 1);

        drop(sub);
        assert_eq!(monitor.subscriber_count(), 0);

        monitor.set_online(false);
        assert_eq!(count.load(Ordering::SeqCst), 1, "no fire after unsubscribe");
    }

    #[test]
    fn test_multiple_subscribers_all_notified() {
        let monitor = ConnectivityMonitor::new();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));

        let a_cb = Arc::clone(&a);
        let b_cb = Arc::clone(&b);
        let _sub_a = monitor.subscribe(move |_| {
            a_cb.fetch_add(1, Ordering::SeqCst);
        });
        let _sub_b = monitor.subscribe(move |_| {
            b_cb.fetch_add(1, Ordering::SeqCst);
        });

        monitor.set_online(false);

        assert_eq!(a.load(Ordering::SeqCst), 2);
        assert_eq!(b.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_clones_share_state() {
        let monitor = ConnectivityMonitor::new();
        let clone = monitor.clone();

        clone.set_online(false);
        assert!(!monitor.is_online());
    }
}
