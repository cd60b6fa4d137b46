//! Deduplicated fetches.
//!
//! The [`QueryRunner`] runs loaders and writes their results into the
//! [`Store`]. At most one fetch per key is outstanding at any instant: a second
//! `fetch` for a key that is already loading joins the running fetch instead of
//! calling its loader again.
//!
//! Fetches run on spawned tokio tasks, so they complete and write into the
//! store even if every caller drops its future.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures::FutureExt;
//! use tears_query::{QueryError, QueryRunner, Store, SubscriptionManager, query_key};
//!
//! # async fn run() -> Result<(), QueryError> {
//! let store = Arc::new(Store::new(Arc::new(SubscriptionManager::new())));
//! let runner = QueryRunner::new(store);
//!
//! let likes = runner
//!     .fetch(&query_key!["posts", 42, "likes"], || async { Ok(3_u32) }.boxed())
//!     .await?;
//! assert_eq!(*likes, 3);
//! # Ok(())
//! # }
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::task::JoinHandle;

use crate::cache::{Erased, QueryStatus};
use crate::error::QueryError;
use crate::key::QueryKey;
use crate::store::Store;

/// Future returned by [`QueryRunner::fetch`].
pub type QueryFuture<T> = BoxFuture<'static, Result<Arc<T>, QueryError>>;

type ErasedLoader = Arc<dyn Fn() -> BoxFuture<'static, Result<Erased, QueryError>> + Send + Sync>;
type SharedFetch = Shared<BoxFuture<'static, Result<Erased, QueryError>>>;

/// Runs loaders with per-key deduplication.
#[derive(Clone)]
pub struct QueryRunner {
    store: Arc<Store>,
    in_flight: Arc<DashMap<QueryKey, SharedFetch>>,
    loaders: Arc<DashMap<QueryKey, ErasedLoader>>,
}

impl QueryRunner {
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            in_flight: Arc::new(DashMap::new()),
            loaders: Arc::new(DashMap::new()),
        }
    }

    /// Fetches `key` with `loader`, or joins the fetch already in flight for it.
    ///
    /// The loader is remembered as the key's last-known loader and is reused
    /// by [`refetch`](Self::refetch). On success the entry receives the new data
    /// and status `Success`; on failure it gets status `Error` and keeps its
    /// previous data.
    ///
    /// # Panics
    ///
    /// The returned future panics if the loader panics, or if the fetch it joined
    /// produced a value of a different type than `T`.
    pub fn fetch<T, F>(&self, key: &QueryKey, loader: F) -> QueryFuture<T>
    where
        T: Send + Sync + 'static,
        F: Fn() -> BoxFuture<'static, Result<T, QueryError>> + Send + Sync + 'static,
    {
        let loader = erase(loader);
        self.loaders.insert(key.clone(), Arc::clone(&loader));
        let fetch = self.start(key, &loader);
        let key = key.clone();

        async move {
            let data = fetch.await?;
            Ok(data.downcast::<T>().unwrap_or_else(|_| {
                panic!(
                    "value fetched for {key} is not a {}",
                    std::any::type_name::<T>()
                )
            }))
        }
        .boxed()
    }

    /// Records `loader` as the last-known loader for `key` without fetching.
    pub fn register<T, F>(&self, key: &QueryKey, loader: F)
    where
        T: Send + Sync + 'static,
        F: Fn() -> BoxFuture<'static, Result<T, QueryError>> + Send + Sync + 'static,
    {
        self.loaders.insert(key.clone(), erase(loader));
    }

    /// Starts a fetch for `key` using its last-known loader.
    ///
    /// Returns `false` if no loader was ever registered for the key.
    pub fn refetch(&self, key: &QueryKey) -> bool {
        let Some(loader) = self.loaders.get(key).map(|l| Arc::clone(l.value())) else {
            tracing::debug!(key = %key, "no loader known, skipping refetch");
            return false;
        };
        drop(self.start(key, &loader));
        true
    }

    /// Returns `true` while a fetch for `key` is outstanding.
    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        self.in_flight.contains_key(key)
    }

    /// Returns `true` if a loader is known for `key`.
    pub fn has_loader(&self, key: &QueryKey) -> bool {
        self.loaders.contains_key(key)
    }

    /// Drops the last-known loader for `key`.
    pub fn forget(&self, key: &QueryKey) {
        self.loaders.remove(key);
    }

    fn start(&self, key: &QueryKey, loader: &ErasedLoader) -> SharedFetch {
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(running) => {
                tracing::debug!(key = %key, "joining in-flight fetch");
                running.get().clone()
            }
            Entry::Vacant(slot) => {
                tracing::debug!(key = %key, "fetch started");
                let ticket = self.store.begin_fetch(key);
                let loader = Arc::clone(loader);
                let runner = self.clone();
                let task_key = key.clone();

                // the loader runs on the task, so it never sees the in-flight map locked
                let handle = tokio::spawn(async move {
                    let load = AssertUnwindSafe(async move { loader().await });
                    let result = match load.catch_unwind().await {
                        Ok(result) => result,
                        Err(panic) => {
                            runner.store.abandon_fetch(&task_key, &ticket);
                            runner.in_flight.remove(&task_key);
                            std::panic::resume_unwind(panic);
                        }
                    };
                    let invalidated = match &result {
                        Ok(data) => runner.store.resolve(&task_key, Arc::clone(data), &ticket),
                        Err(err) => {
                            tracing::warn!(key = %task_key, error = %err, "fetch failed");
                            runner
                                .store
                                .set_status(&task_key, QueryStatus::Error, Some(err.clone()));
                            false
                        }
                    };
                    runner.in_flight.remove(&task_key);

                    if invalidated && runner.store.subscriptions().has_subscribers(&task_key) {
                        tracing::debug!(key = %task_key, "invalidated mid-fetch, fetching again");
                        runner.refetch(&task_key);
                    }
                    result
                });

                let fetch = join(handle, "fetch").boxed().shared();
                slot.insert(fetch.clone());
                fetch
            }
        }
    }
}

impl std::fmt::Debug for QueryRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRunner")
            .field("in_flight", &self.in_flight.len())
            .field("loaders", &self.loaders.len())
            .finish_non_exhaustive()
    }
}

fn erase<T, F>(loader: F) -> ErasedLoader
where
    T: Send + Sync + 'static,
    F: Fn() -> BoxFuture<'static, Result<T, QueryError>> + Send + Sync + 'static,
{
    Arc::new(move || {
        let fetch = loader();
        async move { fetch.await.map(|data| Arc::new(data) as Erased) }.boxed()
    })
}

/// Awaits a spawned task, re-raising its panic on the awaiting side.
pub(crate) async fn join<T>(
    handle: JoinHandle<Result<T, QueryError>>,
    what: &str,
) -> Result<T, QueryError> {
    match handle.await {
        Ok(result) => result,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(_) => Err(QueryError::NetworkError(format!("{what} task was cancelled"))),
    }
}
