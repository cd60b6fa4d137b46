//! Freshness and retention settings for a [`QueryClient`](crate::QueryClient).

use std::time::Duration;

const DEFAULT_CACHE_TIME: Duration = Duration::from_secs(5 * 60);

/// Cache timing shared by every key of one client.
///
/// `stale_time` decides when `subscribe` and `query` go back to the loader.
/// `cache_time` decides when `collect_garbage` may drop an unwatched entry.
/// Invalidation overrides `stale_time`: an invalidated entry is refetched
/// however young it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryConfig {
    /// Age after which written data no longer counts as fresh.
    ///
    /// Zero means every subscribe or read-through query refetches.
    pub stale_time: Duration,

    /// Age after which an entry with no subscribers may be evicted.
    pub cache_time: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self::new(Duration::ZERO, DEFAULT_CACHE_TIME)
    }
}

impl QueryConfig {
    #[must_use]
    pub const fn new(stale_time: Duration, cache_time: Duration) -> Self {
        Self {
            stale_time,
            cache_time,
        }
    }

    /// Keeps data fresh for `stale_time` after each write.
    #[must_use]
    pub const fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    /// Retains unwatched entries for `cache_time`.
    #[must_use]
    pub const fn with_cache_time(mut self, cache_time: Duration) -> Self {
        self.cache_time = cache_time;
        self
    }
}
