use std::sync::Arc;

use crate::key::QueryKey;
use crate::query::QueryRunner;
use crate::store::Store;

/// Marks entries stale by key prefix and refetches the ones being watched.
///
/// Invalidating `["posts", 42]` also invalidates `["posts", 42, "likes"]` and
/// `["posts", 42, "comments"]`, but not `["posts", 7]`. Keys without
/// subscribers are only marked; they refetch on the next subscribe or read.
#[derive(Debug, Clone)]
pub struct Invalidator {
    store: Arc<Store>,
    runner: QueryRunner,
}

impl Invalidator {
    #[must_use]
    pub const fn new(store: Arc<Store>, runner: QueryRunner) -> Self {
        Self { store, runner }
    }

    /// Invalidates every known key starting with `prefix`.
    ///
    /// Returns the number of keys marked stale.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        let marked = self.invalidate_keys(self.store.keys_with_prefix(prefix));
        tracing::debug!(prefix = %prefix, marked, "invalidated");
        marked
    }

    /// Invalidates every known key.
    pub fn invalidate_all(&self) -> usize {
        let marked = self.invalidate_keys(self.store.keys());
        tracing::debug!(marked, "invalidated all");
        marked
    }

    fn invalidate_keys(&self, keys: Vec<QueryKey>) -> usize {
        let mut marked = 0;
        for key in keys {
            if !self.store.mark_stale(&key) {
                continue;
            }
            marked += 1;

            if self.store.subscriptions().has_subscribers(&key) {
                self.runner.refetch(&key);
            }
        }
        marked
    }
}
