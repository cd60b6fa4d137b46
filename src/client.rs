//! The [`QueryClient`] facade.
//!
//! A `QueryClient` owns one [`Store`] and wires the subscription manager,
//! query runner, invalidator and mutation orchestrator around it. Create one
//! at application start and hand clones to whatever needs the cache; clones
//! share the same store.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, BoxFuture};
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheEntry;
use crate::config::QueryConfig;
use crate::error::QueryError;
use crate::invalidate::Invalidator;
use crate::key::QueryKey;
use crate::mutation::{MutationFuture, MutationOptions, MutationOrchestrator};
use crate::query::{QueryFuture, QueryRunner};
use crate::store::Store;
use crate::subscription::{Subscription, SubscriptionManager};

/// Entry point to the cache.
///
/// # Example
///
/// ```rust
/// use tears_query::{QueryClient, QueryConfig, query_key};
/// use std::time::Duration;
///
/// let config = QueryConfig::new(
///     Duration::from_secs(30),  // stale_time
///     Duration::from_secs(300), // cache_time
/// );
/// let client = QueryClient::with_config(config);
///
/// client.set_query_data(&query_key!["auth"], String::from("user-1"));
/// let auth = client.get_query_data::<String>(&query_key!["auth"]);
/// assert_eq!(auth.as_deref().map(String::as_str), Some("user-1"));
/// ```
#[derive(Clone)]
pub struct QueryClient {
    store: Arc<Store>,
    runner: QueryRunner,
    invalidator: Invalidator,
    mutations: MutationOrchestrator,
    config: QueryConfig,
}

impl QueryClient {
    /// Creates a new client with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(QueryConfig::default())
    }

    /// Creates a new client with the given configuration.
    #[must_use]
    pub fn with_config(config: QueryConfig) -> Self {
        let store = Arc::new(Store::new(Arc::new(SubscriptionManager::new())));
        let runner = QueryRunner::new(Arc::clone(&store));
        let invalidator = Invalidator::new(Arc::clone(&store), runner.clone());
        let mutations = MutationOrchestrator::new(Arc::clone(&store), invalidator.clone());
        Self {
            store,
            runner,
            invalidator,
            mutations,
            config,
        }
    }

    pub const fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub const fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub const fn invalidator(&self) -> &Invalidator {
        &self.invalidator
    }

    /// Returns the cached data for `key`, if any.
    pub fn get_query_data<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<Arc<T>> {
        self.store.get::<T>(key).and_then(|entry| entry.data)
    }

    /// Returns the full entry for `key`, if any.
    pub fn get_entry<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<CacheEntry<T>> {
        self.store.get(key)
    }

    /// Replaces the data for `key` and notifies its subscribers.
    pub fn set_query_data<T: Send + Sync + 'static>(&self, key: &QueryKey, data: T) {
        self.store.set(key, Some(Arc::new(data)));
    }

    /// Fetches `key`, joining a fetch already in flight. See [`QueryRunner::fetch`].
    pub fn fetch<T, F>(&self, key: &QueryKey, loader: F) -> QueryFuture<T>
    where
        T: Send + Sync + 'static,
        F: Fn() -> BoxFuture<'static, Result<T, QueryError>> + Send + Sync + 'static,
    {
        self.runner.fetch(key, loader)
    }

    /// Reads `key` through the cache.
    ///
    /// Fresh cached data is returned without calling `loader`; missing, stale
    /// or expired data is fetched. Either way `loader` becomes the key's
    /// last-known loader.
    pub fn query<T, F>(&self, key: &QueryKey, loader: F) -> QueryFuture<T>
    where
        T: Send + Sync + 'static,
        F: Fn() -> BoxFuture<'static, Result<T, QueryError>> + Send + Sync + 'static,
    {
        if !self.store.needs_refetch(key, self.config.stale_time)
            && let Some(data) = self.get_query_data::<T>(key)
        {
            self.runner.register(key, loader);
            return future::ready(Ok(data)).boxed();
        }
        self.runner.fetch(key, loader)
    }

    /// Calls `callback` with the new entry after every write to `key`.
    ///
    /// If the entry is stale, expired or missing and a loader is known for
    /// the key, a refetch starts right away.
    pub fn subscribe<T, F>(&self, key: &QueryKey, callback: F) -> Subscription
    where
        T: Send + Sync + 'static,
        F: Fn(CacheEntry<T>) + Send + Sync + 'static,
    {
        let subscription = self.store.subscriptions().subscribe(key, move |change| {
            if let Some(entry) = change.entry::<T>() {
                callback(entry);
            }
        });

        if self.store.needs_refetch(key, self.config.stale_time) && !self.runner.is_fetching(key) {
            self.runner.refetch(key);
        }
        subscription
    }

    /// Returns a stream of entries written to `key`.
    ///
    /// The stream holds a subscription; dropping the stream unsubscribes.
    pub fn watch<T: Send + Sync + 'static>(&self, key: &QueryKey) -> BoxStream<'static, CacheEntry<T>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(key, move |entry: CacheEntry<T>| {
            let _ = tx.send(entry);
        });

        stream::unfold((rx, subscription), |(mut rx, subscription)| async move {
            let entry = rx.recv().await?;
            Some((entry, (rx, subscription)))
        })
        .boxed()
    }

    /// Runs a mutation of `key`. See [`MutationOrchestrator::mutate`].
    pub fn mutate<T, R, F>(
        &self,
        key: &QueryKey,
        remote_call: F,
        options: MutationOptions<T, R>,
    ) -> MutationFuture<R>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
        F: FnOnce() -> BoxFuture<'static, Result<R, QueryError>> + Send + 'static,
    {
        self.mutations.mutate(key, remote_call, options)
    }

    /// Marks every key starting with `prefix` stale and refetches the watched ones.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        self.invalidator.invalidate(prefix)
    }

    /// Marks every key stale and refetches the watched ones.
    pub fn invalidate_all(&self) -> usize {
        self.invalidator.invalidate_all()
    }

    /// Returns `true` while a fetch for `key` is outstanding.
    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        self.runner.is_fetching(key)
    }

    /// Evicts `key` and forgets its loader.
    pub fn remove(&self, key: &QueryKey) -> bool {
        self.runner.forget(key);
        self.store.remove(key)
    }

    /// Evicts unwatched entries older than the configured cache time.
    ///
    /// Returns the number of entries removed.
    pub fn collect_garbage(&self) -> usize {
        let evicted = self.store.collect_garbage(self.config.cache_time);
        for key in &evicted {
            self.runner.forget(key);
            tracing::trace!(key = %key, "evicted");
        }
        if !evicted.is_empty() {
            tracing::debug!(evicted = evicted.len(), "garbage collected");
        }
        evicted.len()
    }

    /// Runs [`collect_garbage`](Self::collect_garbage) every `period` until
    /// `token` is cancelled.
    pub fn spawn_garbage_collector(
        &self,
        period: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = interval.tick() => {
                        client.collect_garbage();
                    }
                }
            }
        })
    }
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryClient")
            .field("store", &self.store)
            .field("runner", &self.runner)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
