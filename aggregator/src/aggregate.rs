//! Fan-out/fan-in of posts with their authors and comments.
//!
//! One aggregation fetches the post list, then starts an author lookup and a
//! comments lookup for every selected post. Lookups run as tasks on the
//! runtime handle given at construction. Author lookups are shared per user
//! id within an aggregation, so posts by the same author wait on the same
//! pending task instead of issuing another upstream call.
//!
//! The join is all-or-nothing: the first failed lookup fails the whole
//! aggregation. Lookups already started are not cancelled; they run to
//! completion in the background and their side effects (user cache
//! population, breaker accounting) still apply.

use crate::errors::ClientError;
use crate::metrics_defs::{AGGREGATE_DURATION, AUTHOR_DEDUP_HIT};
use crate::model::{Comment, MergedPost, Post, User, UserId};
use crate::resilience::ResilientClient;
use futures::future::{self, BoxFuture, Shared};
use futures::{FutureExt, TryFutureExt};
use shared::{counter, histogram};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::time::Instant;

type SharedLookup<T> = Shared<BoxFuture<'static, Result<T, ClientError>>>;

/// Which posts to merge and whether to load their comments
#[derive(Clone, Debug, PartialEq)]
pub struct MergeFilter {
    /// Keep at most this many posts after filtering. Zero means no limit.
    pub limit: Option<usize>,
    pub include_comments: bool,
    pub user_id: Option<UserId>,
}

impl Default for MergeFilter {
    fn default() -> Self {
        MergeFilter {
            limit: None,
            include_comments: true,
            user_id: None,
        }
    }
}

#[derive(Clone)]
pub struct Aggregator {
    client: Arc<ResilientClient>,
    handle: Handle,
}

impl Aggregator {
    pub fn new(client: Arc<ResilientClient>, handle: Handle) -> Self {
        Aggregator { client, handle }
    }

    pub fn client(&self) -> &ResilientClient {
        &self.client
    }

    /// Merged posts in upstream order, or the first error any lookup hit.
    pub async fn fetch_merged(&self, filter: &MergeFilter) -> Result<Vec<MergedPost>, ClientError> {
        let started = Instant::now();
        let result = self.merge(filter).await;

        let status = if result.is_ok() { "success" } else { "error" };
        histogram!(AGGREGATE_DURATION, "status" => status).record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Aggregation failed");
        }

        result
    }

    async fn merge(&self, filter: &MergeFilter) -> Result<Vec<MergedPost>, ClientError> {
        let posts = select_posts(self.client.fetch_posts().await?, filter);

        let mut authors: HashMap<UserId, SharedLookup<User>> = HashMap::new();
        let mut joins = Vec::with_capacity(posts.len());

        for post in posts {
            let author = match authors.entry(post.user_id) {
                Entry::Occupied(pending) => {
                    counter!(AUTHOR_DEDUP_HIT).increment(1);
                    pending.get().clone()
                }
                Entry::Vacant(slot) => slot.insert(self.spawn_author(post.user_id)).clone(),
            };

            let comments = if filter.include_comments {
                self.spawn_comments(post.id)
            } else {
                future::ok(Vec::new()).boxed()
            };

            joins.push(future::try_join(author, comments).map_ok(move |(author, comments)| {
                MergedPost::new(post, Some(author), comments)
            }));
        }

        // Output position follows input position regardless of completion order
        future::try_join_all(joins).await
    }

    fn spawn_author(&self, user_id: UserId) -> SharedLookup<User> {
        let client = self.client.clone();
        let task = self
            .handle
            .spawn(async move { client.fetch_user(user_id).await });
        async move { task.await? }.boxed().shared()
    }

    fn spawn_comments(&self, post_id: u32) -> BoxFuture<'static, Result<Vec<Comment>, ClientError>> {
        let client = self.client.clone();
        let task = self
            .handle
            .spawn(async move { client.fetch_comments(post_id).await });
        async move { task.await? }.boxed()
    }
}

/// Applies the user filter, then the limit, preserving upstream order.
fn select_posts(mut posts: Vec<Post>, filter: &MergeFilter) -> Vec<Post> {
    if let Some(user_id) = filter.user_id {
        posts.retain(|p| p.user_id == user_id);
    }
    if let Some(limit) = filter.limit.filter(|l| *l > 0) {
        posts.truncate(limit);
    }
    posts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{UpstreamConfig, UserCacheConfig};
    use crate::errors::GatewayError;
    use crate::gateway::Endpoint;
    use crate::testutils::{self, ManualClock, ScriptedGateway};
    use serde_json::{Value, json};
    use std::time::Duration;

    fn aggregator(gateway: Arc<ScriptedGateway>) -> Aggregator {
        let upstream: UpstreamConfig = serde_json::from_value(json!({
            "base_url": "http://upstream.test",
            "posts": {"retries": 0},
            "users": {"retries": 0},
            "comments": {"retries": 0}
        }))
        .unwrap();
        let client = ResilientClient::new(
            gateway,
            upstream,
            &UserCacheConfig::default(),
            Arc::new(ManualClock::new(0)),
        );
        Aggregator::new(Arc::new(client), Handle::current())
    }

    fn posts_by(user_ids: &[u32]) -> Value {
        let posts: Vec<Value> = user_ids
            .iter()
            .enumerate()
            .map(|(i, uid)| {
                let id = i as u32 + 1;
                testutils::post(id, *uid, &format!("title {id}"), &format!("body {id}"))
            })
            .collect();
        Value::Array(posts)
    }

    fn stub_all(gateway: &ScriptedGateway, user_ids: &[u32]) {
        gateway.respond("/posts", posts_by(user_ids));
        for uid in user_ids {
            gateway.respond(&format!("/users/{uid}"), testutils::user(*uid, &format!("User {uid}")));
        }
        for id in 1..=user_ids.len() as u32 {
            gateway.respond(&format!("/posts/{id}/comments"), testutils::comments(id, id % 3));
        }
    }

    fn ids(merged: &[MergedPost]) -> Vec<u32> {
        merged.iter().map(|p| p.id).collect()
    }

    #[tokio::test]
    async fn test_merges_author_and_comments() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway
            .respond("/posts", json!([testutils::post(1, 1, "t", "b")]))
            .respond("/users/1", json!({"id": 1, "name": "User"}))
            .respond("/posts/1/comments", testutils::comments(1, 1));

        let merged = aggregator(gateway)
            .fetch_merged(&MergeFilter {
                limit: Some(1),
                ..MergeFilter::default()
            })
            .await
            .unwrap();

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].author_name(), Some("User"));
        assert_eq!(merged[0].comment_count, 1);
        assert_eq!(merged[0].title.as_deref(), Some("t"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_one_author_fetch_per_user() {
        let gateway = Arc::new(ScriptedGateway::new());
        stub_all(&gateway, &[1, 1, 2, 1, 2, 3]);
        // Keep the first lookups pending so later posts must attach to them
        gateway
            .delay("/users/1", Duration::from_millis(50))
            .delay("/users/2", Duration::from_millis(50));

        let merged = aggregator(gateway.clone())
            .fetch_merged(&MergeFilter::default())
            .await
            .unwrap();

        assert_eq!(merged.len(), 6);
        assert_eq!(gateway.calls("/users/1"), 1);
        assert_eq!(gateway.calls("/users/2"), 1);
        assert_eq!(gateway.calls("/users/3"), 1);
        assert_eq!(merged[3].author_name(), Some("User 1"));
        assert_eq!(merged[4].author_name(), Some("User 2"));
    }

    #[tokio::test]
    async fn test_comment_count_matches_comments() {
        let gateway = Arc::new(ScriptedGateway::new());
        stub_all(&gateway, &[1, 2, 3, 4]);

        let merged = aggregator(gateway)
            .fetch_merged(&MergeFilter::default())
            .await
            .unwrap();

        for post in &merged {
            assert_eq!(post.comment_count, post.comments.len());
            assert_eq!(post.comment_count, (post.id % 3) as usize);
        }
    }

    #[tokio::test]
    async fn test_without_comments_skips_lookups() {
        let gateway = Arc::new(ScriptedGateway::new());
        stub_all(&gateway, &[1, 2]);

        let merged = aggregator(gateway.clone())
            .fetch_merged(&MergeFilter {
                include_comments: false,
                ..MergeFilter::default()
            })
            .await
            .unwrap();

        assert!(merged.iter().all(|p| p.comments.is_empty() && p.comment_count == 0));
        assert_eq!(gateway.calls_with_prefix("/posts/"), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_output_follows_input_order() {
        let gateway = Arc::new(ScriptedGateway::new());
        stub_all(&gateway, &[1, 2, 3]);
        gateway
            .delay("/posts/1/comments", Duration::from_millis(60))
            .delay("/posts/2/comments", Duration::from_millis(30));

        let merged = aggregator(gateway)
            .fetch_merged(&MergeFilter::default())
            .await
            .unwrap();

        assert_eq!(ids(&merged), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_limit_applies_after_user_filter() {
        let gateway = Arc::new(ScriptedGateway::new());
        stub_all(&gateway, &[1, 2, 1, 2, 1]);

        let merged = aggregator(gateway.clone())
            .fetch_merged(&MergeFilter {
                limit: Some(2),
                include_comments: true,
                user_id: Some(1),
            })
            .await
            .unwrap();

        assert_eq!(ids(&merged), vec![1, 3]);
        assert_eq!(gateway.calls("/posts/5/comments"), 0);
        assert_eq!(gateway.calls("/users/2"), 0);
    }

    #[tokio::test]
    async fn test_zero_limit_keeps_everything() {
        let gateway = Arc::new(ScriptedGateway::new());
        stub_all(&gateway, &[1, 2, 3]);

        let merged = aggregator(gateway)
            .fetch_merged(&MergeFilter {
                limit: Some(0),
                ..MergeFilter::default()
            })
            .await
            .unwrap();

        assert_eq!(merged.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_selection() {
        let gateway = Arc::new(ScriptedGateway::new());
        stub_all(&gateway, &[1, 2]);

        let merged = aggregator(gateway.clone())
            .fetch_merged(&MergeFilter {
                user_id: Some(42),
                ..MergeFilter::default()
            })
            .await
            .unwrap();

        assert!(merged.is_empty());
        assert_eq!(gateway.total_calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_any_failure_fails_all_without_cancelling_siblings() {
        let gateway = Arc::new(ScriptedGateway::new());
        stub_all(&gateway, &[1, 2]);
        gateway
            .fail("/posts/1/comments", GatewayError::Status(500))
            .delay("/users/2", Duration::from_millis(50));

        let aggregator = aggregator(gateway.clone());
        let err = aggregator
            .fetch_merged(&MergeFilter::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ClientError::Upstream {
                endpoint: Endpoint::Comments,
                status: 500
            }
        );

        // The slow sibling still completes and populates the user cache
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(gateway.calls("/users/2"), 1);
        aggregator.client().fetch_user(2).await.unwrap();
        assert_eq!(gateway.calls("/users/2"), 1);
    }

    #[tokio::test]
    async fn test_posts_failure_propagates() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.fail("/posts", GatewayError::Transport("connection refused".into()));

        let err = aggregator(gateway.clone())
            .fetch_merged(&MergeFilter::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ClientError::Transient {
                endpoint: Endpoint::Posts,
                ..
            }
        ));
        assert_eq!(gateway.total_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_author_is_shared_by_all_posts() {
        let gateway = Arc::new(ScriptedGateway::new());
        stub_all(&gateway, &[7, 7, 7]);
        gateway.fail("/users/7", GatewayError::Status(404));

        let err = aggregator(gateway.clone())
            .fetch_merged(&MergeFilter {
                include_comments: false,
                ..MergeFilter::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Upstream { status: 404, .. }));
        assert_eq!(gateway.calls("/users/7"), 1);
    }
}
