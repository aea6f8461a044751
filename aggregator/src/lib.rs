pub mod aggregate;
pub mod api;
pub mod clock;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod metrics_defs;
pub mod model;
pub mod query;
pub mod rate_limiter;
pub mod resilience;

#[cfg(test)]
mod testutils;

use aggregate::Aggregator;
use api::AppState;
use clock::{Clock, SystemClock};
use config::Config;
use errors::BffError;
use gateway::{Endpoint, HttpGateway};
use rate_limiter::RateLimiter;
use resilience::ResilientClient;
use resilience::breaker::CircuitStatus;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::runtime::Handle;

/// Serves the posts API and the admin probes until either listener fails.
///
/// Upstream lookups are spawned on `handle`.
pub async fn run(config: Config, handle: Handle) -> Result<(), BffError> {
    config.validate()?;
    shared::metrics_defs::describe_all(metrics_defs::ALL_METRICS);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let gateway = HttpGateway::new(&config.upstream.base_url, config.upstream.connect_timeout())?;
    let client = Arc::new(ResilientClient::new(
        Arc::new(gateway),
        config.upstream.clone(),
        &config.user_cache,
        clock.clone(),
    ));

    let state = AppState::new(
        Aggregator::new(client.clone(), handle),
        Arc::new(RateLimiter::new(&config.rate_limit, clock)),
        config.security.effective_api_key(),
    );
    if config.security.effective_api_key().is_none() {
        tracing::info!("No API key configured, requests are not authenticated");
    }

    let api_task = async {
        let listener =
            TcpListener::bind(format!("{}:{}", config.listener.host, config.listener.port)).await?;
        tracing::info!(
            host = %config.listener.host,
            port = config.listener.port,
            upstream = %config.upstream.base_url,
            "Serving posts API"
        );
        axum::serve(listener, api::router(state)).await?;
        Ok::<_, BffError>(())
    };

    // Not ready while the posts circuit is open: every aggregation would fail fast
    let admin_service = AdminService::<_, BffError>::new(move || {
        client.circuit_status(Endpoint::Posts) != CircuitStatus::Open
    });
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    tokio::try_join!(api_task, admin_task)?;
    Ok(())
}
