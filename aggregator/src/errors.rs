use crate::gateway::Endpoint;
use thiserror::Error;

/// Raw outcome of a failed gateway call, before any policy is applied
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("upstream responded with status {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("attempt timed out")]
    Timeout,
}

/// Terminal errors surfaced by the resilient client once every policy has run.
///
/// Cloneable so that a deduplicated lookup can hand the same failure to
/// every post waiting on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("upstream {endpoint} responded with status {status}")]
    Upstream { endpoint: Endpoint, status: u16 },

    #[error("upstream {endpoint} unreachable: {reason}")]
    Transient { endpoint: Endpoint, reason: String },

    #[error("circuit for upstream {endpoint} is open")]
    FastFail { endpoint: Endpoint },

    #[error("could not decode {endpoint} payload: {reason}")]
    Decode { endpoint: Endpoint, reason: String },

    #[error("lookup task failed: {0}")]
    Task(String),
}

impl ClientError {
    pub(crate) fn from_gateway(endpoint: Endpoint, error: GatewayError) -> Self {
        match error {
            GatewayError::Status(status) => ClientError::Upstream { endpoint, status },
            GatewayError::Transport(reason) => ClientError::Transient { endpoint, reason },
            GatewayError::Timeout => ClientError::Transient {
                endpoint,
                reason: "timed out".into(),
            },
        }
    }
}

impl From<tokio::task::JoinError> for ClientError {
    fn from(e: tokio::task::JoinError) -> Self {
        ClientError::Task(e.to_string())
    }
}

/// Errors that stop the service from running
#[derive(Error, Debug)]
pub enum BffError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] crate::config::ValidationError),

    #[error("could not build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
