// Integration tests for the like and delete post flows

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tears_query::prelude::*;
use tokio::sync::{Mutex, mpsc};
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

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
            next.likes -= 1;
            next.is_liked = false;
        } else {
            next.likes += 1;
            next.is_liked = true;
        }
        next
    }
}

/// In-memory stand-in for the posts API.
#[derive(Default)]
struct Server {
    posts: Mutex<Vec<Post>>,
    offline: AtomicBool,
    list_calls: AtomicUsize,
}

impl Server {
    fn with_posts(posts: Vec<Post>) -> Arc<Self> {
        Arc::new(Self {
            posts: Mutex::new(posts),
            ..Self::default()
        })
    }

    async fn post(&self, id: i64) -> Result<Post, QueryError> {
        self.posts
            .lock()
            .await
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| QueryError::NotFoundError(format!("/posts/{id}")))
    }

    async fn list(&self) -> Result<Vec<Post>, QueryError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.posts.lock().await.clone())
    }

    async fn like(&self, id: i64) -> Result<Post, QueryError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(QueryError::NetworkError("connection refused".to_string()));
        }
        let mut posts = self.posts.lock().await;
        let post = posts
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| QueryError::NotFoundError(format!("/posts/{id}")))?;
        *post = post.toggle_like();
        Ok(post.clone())
    }

    async fn delete(&self, id: i64) -> Result<(), QueryError> {
        let mut posts = self.posts.lock().await;
        let before = posts.len();
        posts.retain(|p| p.id != id);
        if posts.len() == before {
            return Err(QueryError::NotFoundError(format!("/posts/{id}")));
        }
        Ok(())
    }
}

fn post_loader(
    server: &Arc<Server>,
    id: i64,
) -> impl Fn() -> BoxFuture<'static, Result<Post, QueryError>> + Send + Sync + 'static {
    let server = Arc::clone(server);
    move || {
        let server = Arc::clone(&server);
        async move { server.post(id).await }.boxed()
    }
}

fn list_loader(
    server: &Arc<Server>,
) -> impl Fn() -> BoxFuture<'static, Result<Vec<Post>, QueryError>> + Send + Sync + 'static {
    let server = Arc::clone(server);
    move || {
        let server = Arc::clone(&server);
        async move { server.list().await }.boxed()
    }
}

fn like_options(
    id: i64,
    settled: Arc<AtomicUsize>,
    invalidated: Arc<std::sync::Mutex<Vec<QueryKey>>>,
) -> MutationOptions<Post, Post> {
    MutationOptions::new()
        .on_mutate(|post: Option<&Post>| post.map(Post::toggle_like))
        .on_settled(move |_result, _ctx, invalidator| {
            let key = query_key!["posts", id];
            invalidator.invalidate(&key);
            invalidated.lock().unwrap().push(key);
            settled.fetch_add(1, Ordering::SeqCst);
        })
}

fn like_call(
    server: &Arc<Server>,
    id: i64,
) -> impl FnOnce() -> BoxFuture<'static, Result<Post, QueryError>> + Send + 'static {
    let server = Arc::clone(server);
    move || async move { server.like(id).await }.boxed()
}

fn post(id: i64, likes: u32, is_liked: bool) -> Post {
    Post {
        id,
        author: "ada".to_string(),
        likes,
        is_liked,
    }
}

#[tokio::test]
async fn test_failed_like_rolls_back_and_invalidates() {
    init_tracing();
    let server = Server::with_posts(vec![post(42, 3, false)]);
    server.offline.store(true, Ordering::SeqCst);
    let client = QueryClient::new();
    let key = query_key!["posts", 42];

    let before = client
        .fetch(&key, post_loader(&server, 42))
        .await
        .expect("post should load");
    assert_eq!(*before, post(42, 3, false));

    let settled = Arc::new(AtomicUsize::new(0));
    let invalidated = Arc::new(std::sync::Mutex::new(Vec::new()));
    let pending = client.mutate(
        &key,
        like_call(&server, 42),
        like_options(42, Arc::clone(&settled), Arc::clone(&invalidated)),
    );

    let optimistic = client
        .get_query_data::<Post>(&key)
        .expect("optimistic post should be cached");
    assert_eq!(*optimistic, post(42, 4, true));

    let err = pending.await.expect_err("like should fail");
    assert_eq!(err, QueryError::NetworkError("connection refused".to_string()));

    let after = client
        .get_query_data::<Post>(&key)
        .expect("post should still be cached");
    assert_eq!(*after, post(42, 3, false));
    assert!(Arc::ptr_eq(&after, &before));
    assert_eq!(settled.load(Ordering::SeqCst), 1);
    assert_eq!(*invalidated.lock().unwrap(), vec![key.clone()]);
    assert!(
        client
            .get_entry::<Post>(&key)
            .is_some_and(|entry| entry.is_stale())
    );
}

#[tokio::test]
async fn test_successful_like_keeps_optimistic_value_until_refetch() {
    init_tracing();
    let server = Server::with_posts(vec![post(42, 3, false)]);
    let client =
        QueryClient::with_config(QueryConfig::default().with_stale_time(Duration::from_secs(60)));
    let key = query_key!["posts", 42];
    client
        .fetch(&key, post_loader(&server, 42))
        .await
        .expect("post should load");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = client.subscribe(&key, move |entry: CacheEntry<Post>| {
        let _ = tx.send(entry);
    });
    assert!(!client.is_fetching(&key));

    let settled = Arc::new(AtomicUsize::new(0));
    let invalidated = Arc::new(std::sync::Mutex::new(Vec::new()));
    let pending = client.mutate(
        &key,
        like_call(&server, 42),
        like_options(42, Arc::clone(&settled), invalidated),
    );

    let optimistic = rx.recv().await.expect("optimistic write should notify");
    assert_eq!(optimistic.data(), Some(&post(42, 4, true)));

    let confirmed = pending.await.expect("like should succeed");
    assert_eq!(confirmed, post(42, 4, true));
    assert_eq!(settled.load(Ordering::SeqCst), 1);

    let reconciled = timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("invalidation should refetch the watched post")
        .expect("channel should stay open");
    assert_eq!(reconciled.data(), Some(&post(42, 4, true)));
    assert!(reconciled.is_success());
    assert!(!reconciled.is_stale());
}

#[tokio::test]
async fn test_delete_refetches_watched_collection() {
    init_tracing();
    let server = Server::with_posts(vec![post(7, 0, false), post(8, 1, true)]);
    let client =
        QueryClient::with_config(QueryConfig::default().with_stale_time(Duration::from_secs(60)));
    let posts = query_key!["posts"];
    client
        .fetch(&posts, list_loader(&server))
        .await
        .expect("posts should load");
    client
        .fetch(&query_key!["posts", 7], post_loader(&server, 7))
        .await
        .expect("post should load");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = client.subscribe(&posts, move |entry: CacheEntry<Vec<Post>>| {
        let _ = tx.send(entry);
    });
    assert_eq!(server.list_calls.load(Ordering::SeqCst), 1);

    let delete_server = Arc::clone(&server);
    let options = MutationOptions::<Post, ()>::new().on_settled(|_result, _ctx, invalidator| {
        invalidator.invalidate(&query_key!["posts"]);
    });
    client
        .mutate(
            &query_key!["posts", 7],
            move || async move { delete_server.delete(7).await }.boxed(),
            options,
        )
        .await
        .expect("delete should succeed");

    let refetched = timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("collection should be refetched")
        .expect("channel should stay open");
    assert_eq!(refetched.data().map(Vec::len), Some(1));
    assert_eq!(server.list_calls.load(Ordering::SeqCst), 2);

    // the deleted post has no subscribers: it is only marked stale
    assert!(
        client
            .get_entry::<Post>(&query_key!["posts", 7])
            .is_some_and(|entry| entry.is_stale())
    );
    assert!(!client.is_fetching(&query_key!["posts", 7]));
}

#[tokio::test]
async fn test_auth_key_gates_delete_action() {
    init_tracing();
    #[derive(Debug)]
    struct User {
        id: String,
    }

    let client = QueryClient::new();
    let auth = query_key!["auth"];
    let post = post(7, 0, false);

    let can_delete = |client: &QueryClient| {
        client
            .get_query_data::<User>(&auth)
            .is_some_and(|user| user.id == post.author)
    };

    assert!(!can_delete(&client));
    client.set_query_data(&auth, User { id: "grace".to_string() });
    assert!(!can_delete(&client));
    client.set_query_data(&auth, User { id: "ada".to_string() });
    assert!(can_delete(&client));
}

#[tokio::test]
async fn test_missing_post_reports_not_found() {
    init_tracing();
    let server = Server::with_posts(vec![]);
    let client = QueryClient::new();
    let key = query_key!["posts", 404];

    let err = client
        .fetch(&key, post_loader(&server, 404))
        .await
        .expect_err("fetch should fail");
    assert_eq!(err, QueryError::NotFoundError("/posts/404".to_string()));

    let entry = client.get_entry::<Post>(&key).expect("entry should exist");
    assert!(entry.is_error());
    assert!(entry.data().is_none());
}
