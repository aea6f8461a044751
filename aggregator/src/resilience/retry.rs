use crate::config::EndpointPolicy;
use crate::errors::GatewayError;
use crate::gateway::Endpoint;
use crate::metrics_defs::{UPSTREAM_ATTEMPT_DURATION, UPSTREAM_RETRIES};
use shared::{counter, histogram};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};

/// Bounds a single attempt. Elapsing counts as [`GatewayError::Timeout`].
pub async fn with_timeout<T, Fut>(limit: Duration, attempt: Fut) -> Result<T, GatewayError>
where
    Fut: Future<Output = Result<T, GatewayError>>,
{
    timeout(limit, attempt)
        .await
        .unwrap_or(Err(GatewayError::Timeout))
}

/// Runs `attempt` until it succeeds or `policy.retries` additional attempts
/// have failed, sleeping the fixed retry delay in between. Every failure kind
/// is retried: error statuses, transport errors and timeouts.
pub async fn with_retry<T, F, Fut>(
    endpoint: Endpoint,
    policy: &EndpointPolicy,
    mut attempt: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut retries = 0;

    loop {
        let started = Instant::now();
        let outcome = with_timeout(policy.timeout(), attempt()).await;
        let label = if outcome.is_ok() { "success" } else { "error" };
        histogram!(UPSTREAM_ATTEMPT_DURATION, "endpoint" => endpoint.as_str(), "outcome" => label)
            .record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if retries < policy.retries => {
                retries += 1;
                tracing::debug!(
                    endpoint = %endpoint,
                    error = %e,
                    retry = retries,
                    "Upstream attempt failed, retrying"
                );
                counter!(UPSTREAM_RETRIES, "endpoint" => endpoint.as_str()).increment(1);
                sleep(policy.retry_delay()).await;
            }
            Err(e) => {
                tracing::warn!(endpoint = %endpoint, error = %e, "Upstream retries exhausted");
                return Err(e);
            }
        }
    }
}
