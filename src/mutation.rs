//! Optimistic mutations with rollback.
//!
//! A mutation goes through three stages, always in this order:
//!
//! 1. **Optimistic**: before [`MutationOrchestrator::mutate`] returns, the
//!    current value for the key is captured in a [`MutationContext`] and the
//!    `on_mutate` patch is installed in the store. Subscribers see the
//!    speculative value immediately.
//! 2. **Resolution**: the remote call runs. Success keeps the optimistic value.
//!    Failure reinstalls the captured value, then calls `on_error`.
//! 3. **Settle**: `on_settled` runs exactly once, whatever the outcome. This is
//!    where related keys are invalidated so the optimistic value is reconciled
//!    with the server on the next fetch.
//!
//! The stages are private typestates (`Optimistic`, `Resolved`), so settling
//! before resolving, or resolving twice, does not type-check.
//!
//! When two mutations target the same key concurrently, the second one
//! captures whatever is current, possibly the first one's optimistic value.
//! Each rollback only undoes its own mutation's change.
//!
//! # Example
//!
//! ```rust,no_run
//! use futures::FutureExt;
//! use tears_query::{MutationOptions, QueryClient, QueryError, query_key};
//!
//! #[derive(Clone)]
//! struct Post {
//!     likes: u32,
//!     is_liked: bool,
//! }
//!
//! # async fn like(client: QueryClient) -> Result<(), QueryError> {
//! let key = query_key!["posts", 42];
//! let options = MutationOptions::new()
//!     .on_mutate(|post: Option<&Post>| {
//!         post.map(|post| Post {
//!             likes: post.likes + 1,
//!             is_liked: true,
//!         })
//!     })
//!     .on_settled(|_result: Result<&(), &QueryError>, _ctx, invalidator| {
//!         invalidator.invalidate(&query_key!["posts", 42]);
//!     });
//!
//! client
//!     .mutate(&key, || async { Ok(()) }.boxed(), options)
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::QueryError;
use crate::invalidate::Invalidator;
use crate::key::QueryKey;
use crate::query::join;
use crate::store::Store;

/// Future returned by [`MutationOrchestrator::mutate`].
pub type MutationFuture<R> = BoxFuture<'static, Result<R, QueryError>>;

type OnMutate<T> = Box<dyn FnOnce(Option<&T>) -> Option<T> + Send>;
type OnError<T> = Box<dyn FnOnce(&QueryError, &MutationContext<T>) + Send>;
type OnSettled<T, R> =
    Box<dyn FnOnce(Result<&R, &QueryError>, &MutationContext<T>, &Invalidator) + Send>;

/// The value of a key captured right before its optimistic patch.
///
/// Used only for rollback; dropped once the mutation settles.
#[derive(Debug)]
pub struct MutationContext<T> {
    key: QueryKey,
    previous: Option<Arc<T>>,
}

impl<T> MutationContext<T> {
    pub const fn key(&self) -> &QueryKey {
        &self.key
    }

    /// The value before the patch, if the key held one.
    pub const fn previous(&self) -> Option<&Arc<T>> {
        self.previous.as_ref()
    }
}

/// Lifecycle hooks of a mutation.
///
/// `T` is the cached value type at the mutated key, `R` the remote call's result.
pub struct MutationOptions<T, R> {
    on_mutate: Option<OnMutate<T>>,
    on_error: Option<OnError<T>>,
    on_settled: Option<OnSettled<T, R>>,
}

impl<T, R> Default for MutationOptions<T, R> {
    fn default() -> Self {
        Self {
            on_mutate: None,
            on_error: None,
            on_settled: None,
        }
    }
}

impl<T, R> MutationOptions<T, R> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the optimistic patch.
    ///
    /// It receives the current value and returns the speculative one. The
    /// current value is never modified; returning `None` leaves the store untouched.
    #[must_use]
    pub fn on_mutate<F>(mut self, patch: F) -> Self
    where
        F: FnOnce(Option<&T>) -> Option<T> + Send + 'static,
    {
        self.on_mutate = Some(Box::new(patch));
        self
    }

    /// Called after a failed mutation has been rolled back.
    #[must_use]
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&QueryError, &MutationContext<T>) + Send + 'static,
    {
        self.on_error = Some(Box::new(hook));
        self
    }

    /// Called once after the mutation resolves, on success and on failure.
    #[must_use]
    pub fn on_settled<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(Result<&R, &QueryError>, &MutationContext<T>, &Invalidator) + Send + 'static,
    {
        self.on_settled = Some(Box::new(hook));
        self
    }
}

/// First stage: the patch has been applied (or skipped) and the previous value captured.
struct Optimistic<T> {
    context: MutationContext<T>,
    applied: bool,
}

impl<T: Send + Sync + 'static> Optimistic<T> {
    fn apply(store: &Store, key: &QueryKey, patch: Option<OnMutate<T>>) -> Self {
        let previous = store.get::<T>(key).and_then(|entry| entry.data);
        let next = patch.and_then(|patch| patch(previous.as_deref()));
        let applied = next.is_some();
        if let Some(next) = next {
            store.set(key, Some(Arc::new(next)));
        }

        Self {
            context: MutationContext {
                key: key.clone(),
                previous,
            },
            applied,
        }
    }

    fn resolve<R>(
        self,
        store: &Store,
        result: Result<R, QueryError>,
        on_error: Option<OnError<T>>,
    ) -> Resolved<T, R> {
        if let Err(err) = &result {
            if self.applied {
                tracing::warn!(key = %self.context.key, error = %err, "mutation failed, rolling back");
                store.set(&self.context.key, self.context.previous.clone());
            }
            if let Some(on_error) = on_error {
                on_error(err, &self.context);
            }
        }

        Resolved {
            context: self.context,
            result,
        }
    }
}

/// Second stage: the remote call has resolved and any rollback is done.
struct Resolved<T, R> {
    context: MutationContext<T>,
    result: Result<R, QueryError>,
}

impl<T, R> Resolved<T, R> {
    fn settle(
        self,
        on_settled: Option<OnSettled<T, R>>,
        invalidator: &Invalidator,
    ) -> Result<R, QueryError> {
        if let Some(on_settled) = on_settled {
            on_settled(self.result.as_ref(), &self.context, invalidator);
        }
        tracing::debug!(key = %self.context.key, ok = self.result.is_ok(), "mutation settled");
        self.result
    }
}

/// Runs remote writes through the optimistic, resolution and settle stages.
#[derive(Debug, Clone)]
pub struct MutationOrchestrator {
    store: Arc<Store>,
    invalidator: Invalidator,
}

impl MutationOrchestrator {
    #[must_use]
    pub const fn new(store: Arc<Store>, invalidator: Invalidator) -> Self {
        Self { store, invalidator }
    }

    /// Starts a mutation of `key`.
    ///
    /// The optimistic patch is applied before this returns. The remote call
    /// and the remaining stages run on a spawned task, so the mutation settles
    /// even if the returned future is dropped. A failed remote call resolves
    /// the future with its error after the rollback and both hooks have run.
    /// A panicking remote call is rolled back and settled the same way, then
    /// the panic resumes in whoever awaits the returned future.
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
        let MutationOptions {
            on_mutate,
            on_error,
            on_settled,
        } = options;

        let optimistic = Optimistic::apply(&self.store, key, on_mutate);
        let store = Arc::clone(&self.store);
        let invalidator = self.invalidator.clone();

        let handle = tokio::spawn(async move {
            let call = AssertUnwindSafe(async move { remote_call().await });
            match call.catch_unwind().await {
                Ok(result) => optimistic
                    .resolve(&store, result, on_error)
                    .settle(on_settled, &invalidator),
                Err(panic) => {
                    let err = QueryError::NetworkError("remote call panicked".to_string());
                    let _ = optimistic
                        .resolve(&store, Err(err), on_error)
                        .settle(on_settled, &invalidator);
                    std::panic::resume_unwind(panic)
                }
            }
        });

        join(handle, "mutation").boxed()
    }
}
