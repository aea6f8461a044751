use crate::gateway::Endpoint;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Listener and admin listener cannot share port {0}")]
    PortConflict(u16),

    #[error("Upstream base URL must use http or https, got {0}")]
    UnsupportedScheme(String),

    #[error("Rate limit capacity must be greater than 0")]
    ZeroCapacity,

    #[error("Circuit breaker failure threshold for {0} must be greater than 0")]
    ZeroFailureThreshold(Endpoint),

    #[error("Timeout for {0} must be greater than 0")]
    ZeroTimeout(Endpoint),
}

/// Service configuration for the posts aggregator
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Main listener serving the posts API
    #[serde(default = "Listener::default_api")]
    pub listener: Listener,
    /// Listener for liveness and readiness probes
    #[serde(default = "Listener::default_admin")]
    pub admin_listener: Listener,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub user_cache: UserCacheConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        if self.listener.port == self.admin_listener.port {
            return Err(ValidationError::PortConflict(self.listener.port));
        }

        match self.upstream.base_url.scheme() {
            "http" | "https" => {}
            other => return Err(ValidationError::UnsupportedScheme(other.to_string())),
        }

        for endpoint in Endpoint::ALL {
            let policy = self.upstream.policy(endpoint);
            if policy.failure_threshold == 0 {
                return Err(ValidationError::ZeroFailureThreshold(endpoint));
            }
            if policy.timeout_ms == 0 {
                return Err(ValidationError::ZeroTimeout(endpoint));
            }
        }

        if self.rate_limit.capacity == 0 {
            return Err(ValidationError::ZeroCapacity);
        }

        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    fn default_api() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }

    fn default_admin() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 8081,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// The single upstream REST API and the call policy for each of its endpoints
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct UpstreamConfig {
    /// Invalid URLs are rejected during deserialization.
    pub base_url: Url,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub posts: EndpointPolicy,
    #[serde(default)]
    pub users: EndpointPolicy,
    #[serde(default)]
    pub comments: EndpointPolicy,
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

impl UpstreamConfig {
    pub fn policy(&self, endpoint: Endpoint) -> &EndpointPolicy {
        match endpoint {
            Endpoint::Posts => &self.posts,
            Endpoint::Users => &self.users,
            Endpoint::Comments => &self.comments,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Retry, timeout and circuit breaker settings for one upstream endpoint
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointPolicy {
    /// Additional attempts after the first one fails
    pub retries: u32,
    /// Fixed delay between attempts
    pub retry_delay_ms: u64,
    /// Upper bound for a single attempt
    pub timeout_ms: u64,
    /// Consecutive failed calls that open the circuit
    pub failure_threshold: u32,
    /// How long an open circuit fails fast before admitting a probe
    pub cool_down_ms: u64,
}

impl Default for EndpointPolicy {
    fn default() -> Self {
        EndpointPolicy {
            retries: 2,
            retry_delay_ms: 200,
            timeout_ms: 5000,
            failure_threshold: 5,
            cool_down_ms: 5000,
        }
    }
}

impl EndpointPolicy {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cool_down(&self) -> Duration {
        Duration::from_millis(self.cool_down_ms)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests admitted per client key in each minute window
    pub capacity: u32,
    /// Accepted for compatibility. Buckets are always reset to `capacity`
    /// at the start of each minute window.
    pub refill_per_minute: u32,
    /// Upper bound on the number of tracked client keys
    pub max_keys: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            capacity: 60,
            refill_per_minute: 60,
            max_keys: 100_000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct UserCacheConfig {
    pub ttl_secs: u64,
    pub max_entries: u64,
}

impl Default for UserCacheConfig {
    fn default() -> Self {
        UserCacheConfig {
            ttl_secs: 300,
            max_entries: 10_000,
        }
    }
}

impl UserCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct SecurityConfig {
    /// When unset or blank, requests are not authenticated.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl SecurityConfig {
    pub fn effective_api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|key| !key.trim().is_empty())
    }
}
