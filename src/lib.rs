//! # tears-query - reactive resource cache
//!
//! A client-side cache for remote resources, similar to SWR or TanStack Query.
//! UI code reads snapshots, subscribes to keys and runs mutations; loaders and
//! remote calls that perform the actual network I/O are supplied by the caller.
//!
//! ## Architecture
//!
//! 1. **Keys**: [`QueryKey`], ordered tuples such as `["posts", 42, "likes"]`
//! 2. **Store**: [`Store`], one [`CacheEntry`] per key, the single source of truth
//! 3. **Subscriptions**: [`SubscriptionManager`], per-key callbacks fired on every write
//! 4. **Queries**: [`QueryRunner`], deduplicated fetches that write into the store
//! 5. **Mutations**: [`MutationOrchestrator`], optimistic patch, rollback on failure, settle
//! 6. **Invalidation**: [`Invalidator`], prefix-based staleness with refetch of watched keys
//!
//! [`QueryClient`] owns one store and wires all of the above together.
//!
//! ## Example
//!
//! ```rust,no_run
//! use futures::FutureExt;
//! use tears_query::prelude::*;
//!
//! #[derive(Debug, Clone)]
//! struct Post {
//!     likes: u32,
//!     is_liked: bool,
//! }
//!
//! # async fn run() -> Result<(), QueryError> {
//! let client = QueryClient::new();
//! let key = query_key!["posts", 42];
//!
//! client
//!     .fetch(&key, || async { Ok(Post { likes: 3, is_liked: false }) }.boxed())
//!     .await?;
//!
//! let _sub = client.subscribe(&key, |entry: CacheEntry<Post>| {
//!     println!("post is now {:?}", entry.data());
//! });
//!
//! let like = MutationOptions::new()
//!     .on_mutate(|post: Option<&Post>| {
//!         post.map(|post| Post { likes: post.likes + 1, is_liked: true })
//!     })
//!     .on_settled(|_result: Result<&(), &QueryError>, ctx, invalidator| {
//!         invalidator.invalidate(ctx.key());
//!     });
//! client.mutate(&key, || async { Ok(()) }.boxed(), like).await?;
//! # Ok(())
//! # }
//! ```

mod cache;
mod client;
mod config;
mod error;
mod invalidate;
mod key;
mod mutation;
pub mod prelude;
mod query;
mod store;
mod subscription;

pub use cache::{CacheEntry, QueryStatus};
pub use client::QueryClient;
pub use config::QueryConfig;
pub use error::QueryError;
pub use invalidate::Invalidator;
pub use key::{KeyError, KeyPart, QueryKey};
pub use mutation::{MutationContext, MutationFuture, MutationOptions, MutationOrchestrator};
pub use query::{QueryFuture, QueryRunner};
pub use store::Store;
pub use subscription::{Change, Subscription, SubscriptionManager};
