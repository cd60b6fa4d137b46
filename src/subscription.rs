//! Per-key observers.
//!
//! The [`SubscriptionManager`] keeps, for every [`QueryKey`], the callbacks that
//! want to hear about writes to that key. The store calls [`notify`] after each
//! write; nothing else does.
//!
//! [`notify`]: SubscriptionManager::notify

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use crate::cache::{CacheEntry, Slot};
use crate::key::QueryKey;

type Callback = Arc<dyn Fn(&Change<'_>) + Send + Sync>;

/// A write delivered to subscribers of a key.
pub struct Change<'a> {
    key: &'a QueryKey,
    slot: &'a Slot,
}

impl<'a> Change<'a> {
    pub(crate) const fn new(key: &'a QueryKey, slot: &'a Slot) -> Self {
        Self { key, slot }
    }

    /// The key that was written.
    pub const fn key(&self) -> &QueryKey {
        self.key
    }

    /// The entry as it was right after the write.
    ///
    /// Returns `None` if the entry holds a value of another type.
    pub fn entry<T: Send + Sync + 'static>(&self) -> Option<CacheEntry<T>> {
        self.slot.typed()
    }
}

struct Subscriber {
    id: u64,
    active: Arc<AtomicBool>,
    callback: Callback,
}

/// Tracks which callbacks observe which keys.
#[derive(Default)]
pub struct SubscriptionManager {
    subscribers: DashMap<QueryKey, Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl SubscriptionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for writes to exactly `key`.
    ///
    /// The subscription stays active until [`Subscription::unsubscribe`] is
    /// called or the handle is dropped.
    pub fn subscribe<F>(self: &Arc<Self>, key: &QueryKey, callback: F) -> Subscription
    where
        F: Fn(&Change<'_>) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));

        self.subscribers
            .entry(key.clone())
            .or_default()
            .push(Subscriber {
                id,
                active: Arc::clone(&active),
                callback: Arc::new(callback),
            });
        tracing::trace!(key = %key, id, "subscribed");

        Subscription {
            key: key.clone(),
            id,
            active,
            manager: Arc::downgrade(self),
        }
    }

    /// Invokes every callback registered for the changed key, in registration order.
    ///
    /// Callbacks added while this runs are not called for this change.
    pub fn notify(&self, change: &Change<'_>) {
        let callbacks: Vec<(Arc<AtomicBool>, Callback)> = self
            .subscribers
            .get(change.key())
            .map(|subs| {
                subs.iter()
                    .map(|s| (Arc::clone(&s.active), Arc::clone(&s.callback)))
                    .collect()
            })
            .unwrap_or_default();

        for (active, callback) in callbacks {
            if active.load(Ordering::Acquire) {
                callback(change);
            }
        }
    }

    /// Returns the number of active subscribers for `key`.
    pub fn subscriber_count(&self, key: &QueryKey) -> usize {
        self.subscribers.get(key).map_or(0, |subs| subs.len())
    }

    /// Returns `true` if at least one subscriber observes `key`.
    pub fn has_subscribers(&self, key: &QueryKey) -> bool {
        self.subscriber_count(key) > 0
    }

    fn remove(&self, key: &QueryKey, id: u64) {
        if let Some(mut subs) = self.subscribers.get_mut(key) {
            subs.retain(|s| s.id != id);
        }
        self.subscribers.remove_if(key, |_, subs| subs.is_empty());
        tracing::trace!(key = %key, id, "unsubscribed");
    }
}

/// Handle for one registered callback.
///
/// Dropping the handle unsubscribes.
pub struct Subscription {
    key: QueryKey,
    id: u64,
    active: Arc<AtomicBool>,
    manager: Weak<SubscriptionManager>,
}

impl Subscription {
    /// The key this subscription observes.
    pub const fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Returns `true` until the subscription is cancelled.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stops delivery to this callback. Calling it again has no effect.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::AcqRel)
            && let Some(manager) = self.manager.upgrade()
        {
            manager.remove(&self.key, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
