//! Social feed example demonstrating optimistic likes and invalidation.
//!
//! This example shows:
//! - Reading a post through the cache and watching it for changes
//! - Liking a post optimistically, with rollback when the server is offline
//! - Deleting a post, gated on the signed-in user held under `["auth"]`
//! - Refetching the watched feed after the delete settles
//!
//! The "server" is an in-memory posts table with a small artificial latency.
//!
//! Run with: `RUST_LOG=tears_query=debug cargo run --example feed`

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use color_eyre::eyre::{WrapErr, eyre};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use tears_query::prelude::*;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

const LATENCY: Duration = Duration::from_millis(50);

/// A post as returned by the API
#[derive(Debug, Clone, PartialEq, Eq)]
struct Post {
    id: i64,
    author: String,
    likes: u32,
    is_liked: bool,
}

impl Post {
    fn toggle_like(&self) -> Self {
        let mut next = self.clone();
        if next.is_liked {
            next.likes = next.likes.saturating_sub(1);
        } else {
            next.likes += 1;
        }
        next.is_liked = !next.is_liked;
        next
    }
}

/// The signed-in user
#[derive(Debug)]
struct User {
    name: String,
}

/// In-memory posts API
struct Api {
    posts: Mutex<Vec<Post>>,
    offline: AtomicBool,
}

impl Api {
    fn new() -> Arc<Self> {
        let post = |id, author: &str, likes| Post {
            id,
            author: author.to_string(),
            likes,
            is_liked: false,
        };
        Arc::new(Self {
            posts: Mutex::new(vec![post(41, "grace", 12), post(42, "ada", 3)]),
            offline: AtomicBool::new(false),
        })
    }

    async fn reachable(&self) -> Result<(), QueryError> {
        tokio::time::sleep(LATENCY).await;
        if self.offline.load(Ordering::SeqCst) {
            return Err(QueryError::NetworkError("connection refused".to_string()));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Post>, QueryError> {
        self.reachable().await?;
        Ok(self.posts.lock().await.clone())
    }

    async fn get(&self, id: i64) -> Result<Post, QueryError> {
        self.reachable().await?;
        self.posts
            .lock()
            .await
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| QueryError::NotFoundError(format!("/posts/{id}")))
    }

    async fn like(&self, id: i64) -> Result<Post, QueryError> {
        self.reachable().await?;
        let mut posts = self.posts.lock().await;
        let post = posts
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| QueryError::NotFoundError(format!("/posts/{id}")))?;
        *post = post.toggle_like();
        Ok(post.clone())
    }

    async fn delete(&self, id: i64) -> Result<(), QueryError> {
        self.reachable().await?;
        let mut posts = self.posts.lock().await;
        let before = posts.len();
        posts.retain(|p| p.id != id);
        if posts.len() == before {
            return Err(QueryError::NotFoundError(format!("/posts/{id}")));
        }
        Ok(())
    }
}

fn feed_loader(
    api: &Arc<Api>,
) -> impl Fn() -> BoxFuture<'static, Result<Vec<Post>, QueryError>> + Send + Sync + 'static {
    let api = Arc::clone(api);
    move || {
        let api = Arc::clone(&api);
        async move { api.list().await }.boxed()
    }
}

fn post_loader(
    api: &Arc<Api>,
    id: i64,
) -> impl Fn() -> BoxFuture<'static, Result<Post, QueryError>> + Send + Sync + 'static {
    let api = Arc::clone(api);
    move || {
        let api = Arc::clone(&api);
        async move { api.get(id).await }.boxed()
    }
}

async fn like(client: &QueryClient, api: &Arc<Api>, id: i64) -> Result<Post, QueryError> {
    let api = Arc::clone(api);
    let options = MutationOptions::new()
        .on_mutate(|post: Option<&Post>| post.map(Post::toggle_like))
        .on_error(|err, ctx| {
            let restored = ctx.previous().map(|post| post.likes);
            println!("  like of {} failed ({err}), restored {restored:?} likes", ctx.key());
        })
        .on_settled(|_result, ctx, invalidator| {
            invalidator.invalidate(ctx.key());
        });
    let remote_call = move || async move { api.like(id).await }.boxed();
    client
        .mutate(&query_key!["posts", id], remote_call, options)
        .await
}

async fn delete(client: &QueryClient, api: &Arc<Api>, id: i64) -> color_eyre::Result<()> {
    let key = query_key!["posts", id];
    let post = client
        .get_query_data::<Post>(&key)
        .ok_or_else(|| eyre!("post {id} is not cached"))?;
    let allowed = client
        .get_query_data::<User>(&query_key!["auth"])
        .is_some_and(|user| user.name == post.author);
    if !allowed {
        println!("  delete of {key} refused: not the author");
        return Ok(());
    }

    let api = Arc::clone(api);
    let options = MutationOptions::<Post, ()>::new().on_settled(|_result, _ctx, invalidator| {
        invalidator.invalidate(&query_key!["posts"]);
    });
    client
        .mutate(&key, move || async move { api.delete(id).await }.boxed(), options)
        .await
        .wrap_err_with(|| format!("deleting post {id}"))?;
    client.remove(&key);
    Ok(())
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tears_query=info")),
        )
        .with_target(false)
        .without_time()
        .init();

    let api = Api::new();
    let client =
        QueryClient::with_config(QueryConfig::default().with_stale_time(Duration::from_secs(30)));
    let feed = query_key!["posts"];
    let post_key = query_key!["posts", 42];

    let posts = client.query(&feed, feed_loader(&api)).await?;
    println!("feed: {} posts", posts.len());
    client.fetch(&post_key, post_loader(&api, 42)).await?;

    let mut post_updates = client.watch::<Post>(&post_key);
    let mut feed_updates = client.watch::<Vec<Post>>(&feed);
    let printer = tokio::spawn(async move {
        while let Some(entry) = post_updates.next().await {
            if let Some(post) = entry.data() {
                let (likes, liked) = (post.likes, post.is_liked);
                println!("  post 42: {likes} likes, liked={liked} ({:?})", entry.status);
            }
        }
    });

    println!("liking post 42 while offline");
    api.offline.store(true, Ordering::SeqCst);
    if let Err(err) = like(&client, &api, 42).await {
        println!("  server said: {err}");
    }

    println!("liking post 42 while online");
    api.offline.store(false, Ordering::SeqCst);
    let confirmed = like(&client, &api, 42).await?;
    println!("  server confirmed {} likes", confirmed.likes);

    println!("deleting post 42 as grace");
    client.set_query_data(&query_key!["auth"], User { name: "grace".to_string() });
    delete(&client, &api, 42).await?;

    println!("deleting post 42 as ada");
    client.set_query_data(&query_key!["auth"], User { name: "ada".to_string() });
    delete(&client, &api, 42).await?;

    if let Some(entry) = feed_updates.next().await
        && let Some(posts) = entry.data()
    {
        println!("feed refetched: {} posts left", posts.len());
    }

    drop(feed_updates);
    printer.abort();
    Ok(())
}
