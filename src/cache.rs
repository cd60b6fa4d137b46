use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::QueryError;

/// Type-erased cached value.
pub(crate) type Erased = Arc<dyn Any + Send + Sync>;

/// The fetch status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryStatus {
    /// Nothing has been fetched yet.
    #[default]
    Idle,
    /// A fetch is in flight.
    Loading,
    /// The last fetch succeeded, or data was written directly.
    Success,
    /// The last fetch failed. Previously cached data is kept.
    Error,
}

/// A typed snapshot of one cache entry.
#[derive(Debug)]
pub struct CacheEntry<T> {
    pub data: Option<Arc<T>>,
    pub status: QueryStatus,
    pub updated_at: Instant,
    pub error: Option<QueryError>,
    pub is_stale: bool,
}

impl<T> Clone for CacheEntry<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            status: self.status,
            updated_at: self.updated_at,
            error: self.error.clone(),
            is_stale: self.is_stale,
        }
    }
}

impl<T> CacheEntry<T> {
    /// Returns the cached data, if any.
    pub fn data(&self) -> Option<&T> {
        self.data.as_deref()
    }

    /// Returns `true` if a fetch is in flight.
    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Loading
    }

    /// Returns `true` if the last fetch succeeded.
    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    /// Returns `true` if the last fetch failed.
    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    /// Returns `true` if the entry was invalidated.
    pub const fn is_stale(&self) -> bool {
        self.is_stale
    }

    /// Checks if this entry should be refetched, either because it was
    /// invalidated or because it is older than `stale_time`.
    pub fn is_expired(&self, stale_time: Duration) -> bool {
        self.is_stale || self.updated_at.elapsed() > stale_time
    }
}

/// The untyped entry held by the store.
#[derive(Clone)]
pub(crate) struct Slot {
    pub data: Option<Erased>,
    pub status: QueryStatus,
    pub updated_at: Instant,
    pub error: Option<QueryError>,
    pub is_stale: bool,
    /// Bumped by every invalidation.
    pub generation: u64,
}

impl Slot {
    pub fn new() -> Self {
        Self {
            data: None,
            status: QueryStatus::Idle,
            updated_at: Instant::now(),
            error: None,
            is_stale: false,
            generation: 0,
        }
    }

    /// Replaces the data, resetting timestamp and staleness.
    pub fn update(&mut self, data: Option<Erased>) {
        self.data = data;
        self.updated_at = Instant::now();
        self.is_stale = false;
    }

    /// Marks this entry as stale.
    pub const fn mark_stale(&mut self) {
        self.is_stale = true;
        self.generation += 1;
    }

    /// Checks if this entry should be garbage collected based on cache time.
    pub fn should_gc(&self, cache_time: Duration) -> bool {
        self.status != QueryStatus::Loading && self.updated_at.elapsed() > cache_time
    }

    /// Downcasts into a typed entry. Returns `None` if the data holds another type.
    pub fn typed<T: Send + Sync + 'static>(&self) -> Option<CacheEntry<T>> {
        let data = match &self.data {
            Some(erased) => Some(Arc::clone(erased).downcast::<T>().ok()?),
            None => None,
        };
        Some(CacheEntry {
            data,
            status: self.status,
            updated_at: self.updated_at,
            error: self.error.clone(),
            is_stale: self.is_stale,
        })
    }
}
