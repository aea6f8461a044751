//! Resilient access to the upstream API.
//!
//! Every outbound call goes through the same layers, outermost first:
//!
//! ```text
//! cache (users only) → circuit breaker → retry → per-attempt timeout → gateway
//! ```
//!
//! The breaker sees one outcome per call: retries happen inside it, so an
//! exhausted retry loop counts as a single failure. Payload decoding happens
//! after the breaker has recorded the call as answered.

pub mod breaker;
pub mod cache;
pub mod retry;

use crate::clock::Clock;
use crate::config::{UpstreamConfig, UserCacheConfig};
use crate::errors::ClientError;
use crate::gateway::{Endpoint, Gateway, paths};
use crate::model::{Comment, Post, PostId, User, UserId};
use breaker::{CircuitBreakers, CircuitStatus};
use bytes::Bytes;
use cache::UserCache;
use retry::with_retry;
use serde::de::DeserializeOwned;
use std::sync::Arc;

pub struct ResilientClient {
    gateway: Arc<dyn Gateway>,
    upstream: UpstreamConfig,
    breakers: CircuitBreakers,
    users: UserCache,
}

impl ResilientClient {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        upstream: UpstreamConfig,
        user_cache: &UserCacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let breakers = CircuitBreakers::new(&upstream, clock);
        ResilientClient {
            gateway,
            upstream,
            breakers,
            users: UserCache::new(user_cache),
        }
    }

    /// Breaker, retry and timeout around one raw gateway call.
    pub async fn call(&self, endpoint: Endpoint, path: &str) -> Result<Bytes, ClientError> {
        let permit = self.breakers.get(endpoint).try_acquire()?;
        let policy = self.upstream.policy(endpoint);

        match with_retry(endpoint, policy, || self.gateway.get(path)).await {
            Ok(body) => {
                permit.succeed();
                Ok(body)
            }
            Err(e) => {
                permit.fail();
                Err(ClientError::from_gateway(endpoint, e))
            }
        }
    }

    async fn call_json<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        path: &str,
    ) -> Result<T, ClientError> {
        let body = self.call(endpoint, path).await?;
        serde_json::from_slice(&body).map_err(|e| ClientError::Decode {
            endpoint,
            reason: e.to_string(),
        })
    }

    pub async fn fetch_posts(&self) -> Result<Vec<Post>, ClientError> {
        self.call_json(Endpoint::Posts, &paths::posts()).await
    }

    pub async fn fetch_user(&self, id: UserId) -> Result<User, ClientError> {
        if let Some(user) = self.users.get(id) {
            return Ok(user);
        }

        let user: User = self.call_json(Endpoint::Users, &paths::user(id)).await?;
        self.users.insert(user.clone());
        Ok(user)
    }

    pub async fn fetch_comments(&self, post_id: PostId) -> Result<Vec<Comment>, ClientError> {
        self.call_json(Endpoint::Comments, &paths::comments(post_id))
            .await
    }

    pub fn circuit_status(&self, endpoint: Endpoint) -> CircuitStatus {
        self.breakers.get(endpoint).status()
    }
}
