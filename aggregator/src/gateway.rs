use crate::errors::GatewayError;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;
use url::Url;

/// Upstream endpoints. Each one has its own retry policy and circuit breaker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Posts,
    Users,
    Comments,
}

impl Endpoint {
    pub const ALL: [Endpoint; 3] = [Endpoint::Posts, Endpoint::Users, Endpoint::Comments];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Posts => "posts",
            Endpoint::Users => "users",
            Endpoint::Comments => "comments",
        }
    }

    pub(crate) const fn index(&self) -> usize {
        match self {
            Endpoint::Posts => 0,
            Endpoint::Users => 1,
            Endpoint::Comments => 2,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream paths, relative to the configured base URL.
pub mod paths {
    use crate::model::{PostId, UserId};

    pub fn posts() -> String {
        "/posts".to_string()
    }

    pub fn user(id: UserId) -> String {
        format!("/users/{id}")
    }

    pub fn comments(post_id: PostId) -> String {
        format!("/posts/{post_id}/comments")
    }
}

/// Performs a single raw GET against the upstream API.
///
/// Implementations report any status >= 400 as [`GatewayError::Status`] and
/// everything that prevented a response as [`GatewayError::Transport`].
/// No retries or timeouts are applied at this level.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn get(&self, path: &str) -> Result<Bytes, GatewayError>;
}

pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(base_url: &Url, connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(HttpGateway {
            client,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn get(&self, path: &str) -> Result<Bytes, GatewayError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout
            } else {
                GatewayError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() >= 400 {
            tracing::debug!(url = %url, status = status.as_u16(), "Upstream returned error status");
            return Err(GatewayError::Status(status.as_u16()));
        }

        response
            .bytes()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))
    }
}
