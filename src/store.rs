//! The cache store: one entry per [`QueryKey`].
//!
//! The store is the single source of truth for reads. Values are held behind
//! `Arc` and replaced wholesale on every write, never mutated in place, so
//! restoring an earlier snapshot reinstalls the exact same allocation.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::cache::{CacheEntry, Erased, QueryStatus, Slot};
use crate::error::QueryError;
use crate::key::QueryKey;
use crate::subscription::{Change, SubscriptionManager};

/// What a fetch found when it started.
pub(crate) struct FetchTicket {
    generation: u64,
    status: QueryStatus,
    error: Option<QueryError>,
}

/// Mapping from key to cache entry.
pub struct Store {
    entries: DashMap<QueryKey, Slot>,
    subscriptions: Arc<SubscriptionManager>,
}

impl Store {
    /// Creates an empty store that notifies through `subscriptions`.
    #[must_use]
    pub fn new(subscriptions: Arc<SubscriptionManager>) -> Self {
        Self {
            entries: DashMap::new(),
            subscriptions,
        }
    }

    /// Returns the subscription manager this store notifies.
    pub const fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    /// Reads the entry for `key`. Never notifies.
    ///
    /// Returns `None` if the key is unknown or holds a value of another type.
    pub fn get<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<CacheEntry<T>> {
        self.entries.get(key).and_then(|slot| slot.typed())
    }

    /// Installs `data` for `key`, creating the entry if needed, then notifies
    /// the key's subscribers once before returning.
    ///
    /// The status is left as it is, except that an idle entry receiving data
    /// becomes [`QueryStatus::Success`].
    pub fn set<T: Send + Sync + 'static>(&self, key: &QueryKey, data: Option<Arc<T>>) {
        self.write(key, data.map(|d| d as Erased), None);
    }

    /// Marks `key` as loading for a fetch that is about to start.
    ///
    /// The returned ticket remembers the status the fetch found and the
    /// invalidation generation it started from.
    pub(crate) fn begin_fetch(&self, key: &QueryKey) -> FetchTicket {
        let mut slot = self.entries.entry(key.clone()).or_insert_with(Slot::new);
        let ticket = FetchTicket {
            generation: slot.generation,
            status: slot.status,
            error: slot.error.clone(),
        };
        slot.status = QueryStatus::Loading;
        ticket
    }

    /// Writes a fetch result: data, `Success` status and a cleared error.
    ///
    /// Returns `true` if `key` was invalidated after the fetch started. The
    /// entry then stays stale, since the data predates the invalidation.
    pub(crate) fn resolve(&self, key: &QueryKey, data: Erased, ticket: &FetchTicket) -> bool {
        self.write(key, Some(data), Some(ticket.generation))
    }

    /// Puts back the status a fetch found, for a fetch that produced no result.
    pub(crate) fn abandon_fetch(&self, key: &QueryKey, ticket: &FetchTicket) {
        if let Some(mut slot) = self.entries.get_mut(key)
            && slot.status == QueryStatus::Loading
        {
            slot.status = ticket.status;
            slot.error = ticket.error.clone();
        }
    }

    fn write(&self, key: &QueryKey, data: Option<Erased>, fetched_from: Option<u64>) -> bool {
        let snapshot = {
            let mut slot = self.entries.entry(key.clone()).or_insert_with(Slot::new);
            slot.update(data);
            if let Some(generation) = fetched_from {
                slot.status = QueryStatus::Success;
                slot.error = None;
                slot.is_stale = slot.generation != generation;
            } else if slot.status == QueryStatus::Idle && slot.data.is_some() {
                slot.status = QueryStatus::Success;
            }
            slot.clone()
        };

        self.subscriptions.notify(&Change::new(key, &snapshot));
        snapshot.is_stale
    }

    /// Updates the status and error of `key` without touching its data.
    ///
    /// Does not notify. Moving to `Loading` keeps the previous error.
    pub fn set_status(&self, key: &QueryKey, status: QueryStatus, error: Option<QueryError>) {
        let mut slot = self.entries.entry(key.clone()).or_insert_with(Slot::new);
        slot.status = status;
        if status != QueryStatus::Loading {
            slot.error = error;
        }
    }

    /// Returns the status of `key` regardless of its value type.
    pub fn status(&self, key: &QueryKey) -> Option<QueryStatus> {
        self.entries.get(key).map(|slot| slot.status)
    }

    /// Returns `true` if an entry exists for `key`.
    pub fn contains(&self, key: &QueryKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Marks `key` stale. Returns `false` if the key is unknown.
    pub fn mark_stale(&self, key: &QueryKey) -> bool {
        match self.entries.get_mut(key) {
            Some(mut slot) => {
                slot.mark_stale();
                true
            }
            None => false,
        }
    }

    /// Returns `true` if `key` is missing, invalidated, or older than `stale_time`.
    pub(crate) fn needs_refetch(&self, key: &QueryKey, stale_time: Duration) -> bool {
        self.entries.get(key).is_none_or(|slot| {
            slot.data.is_none() || slot.is_stale || slot.updated_at.elapsed() > stale_time
        })
    }

    /// Returns every known key.
    pub fn keys(&self) -> Vec<QueryKey> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Returns every known key that starts with `prefix`.
    pub fn keys_with_prefix(&self, prefix: &QueryKey) -> Vec<QueryKey> {
        self.entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect()
    }

    /// Evicts the entry for `key`. Subscribers are not notified.
    pub fn remove(&self, key: &QueryKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evicts entries older than `cache_time` that have no subscribers.
    pub(crate) fn collect_garbage(&self, cache_time: Duration) -> Vec<QueryKey> {
        let expired: Vec<QueryKey> = self
            .entries
            .iter()
            .filter(|e| e.value().should_gc(cache_time))
            .filter(|e| !self.subscriptions.has_subscribers(e.key()))
            .map(|e| e.key().clone())
            .collect();

        expired
            .into_iter()
            .filter(|key| {
                self.entries
                    .remove_if(key, |_, slot| slot.should_gc(cache_time))
                    .is_some()
            })
            .collect()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}
