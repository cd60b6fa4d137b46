//! Prelude module for convenient imports.
//!
//! ```
//! use tears_query::prelude::*;
//! ```
//!
//! # What's included
//!
//! - [`QueryClient`] - The cache entry point
//! - [`QueryKey`] and [`query_key!`] - Resource identifiers
//! - [`CacheEntry`] and [`QueryStatus`] - What reads and subscriptions return
//! - [`MutationOptions`] - Hooks for optimistic mutations
//! - [`QueryError`] - Fetch and mutation failures
//! - [`Subscription`] - Handle returned by `subscribe`

pub use crate::cache::{CacheEntry, QueryStatus};
pub use crate::client::QueryClient;
pub use crate::config::QueryConfig;
pub use crate::error::QueryError;
pub use crate::key::QueryKey;
pub use crate::mutation::{MutationContext, MutationOptions};
pub use crate::query_key;
pub use crate::subscription::Subscription;
