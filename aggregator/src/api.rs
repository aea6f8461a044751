use crate::aggregate::{Aggregator, MergeFilter};
use crate::errors::ClientError;
use crate::model::{MergedPost, PostId, UserId};
use crate::query::{self, QueryParams, SortKey, SortOrder, Stats};
use crate::rate_limiter::{RateLimiter, client_key};
use axum::{
    Json, Router,
    extract::{
        Path, Query, Request, State,
        rejection::{PathRejection, QueryRejection},
    },
    http::{HeaderName, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const API_KEY_HEADER: &str = "x-api-key";
const TOTAL_COUNT_HEADER: HeaderName = HeaderName::from_static("x-total-count");
const PAGE_HEADER: HeaderName = HeaderName::from_static("x-page");
const SIZE_HEADER: HeaderName = HeaderName::from_static("x-size");

const MAX_LIMIT: i64 = 100;

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("Missing or invalid API key")]
    Unauthorized,

    #[error("Too many requests")]
    RateLimited { retry_after: Duration },

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Post {0} not found")]
    NotFound(PostId),

    #[error(transparent)]
    Client(#[from] ClientError),
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "unauthorized",
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::Client(ClientError::FastFail { .. }) => "upstream_unavailable",
            ApiError::Client(_) => "external_api_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Client(ClientError::FastFail { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Client(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::InvalidRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::InvalidRequest(rejection.body_text())
    }
}

#[derive(Serialize)]
struct ApiErrorResponse {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ApiErrorResponse {
            error: self.kind(),
            message: self.to_string(),
        });

        match self {
            ApiError::RateLimited { retry_after } => {
                // Whole seconds, never zero
                let seconds = retry_after.as_secs_f64().ceil().max(1.0) as u64;
                (status, [(header::RETRY_AFTER, seconds.to_string())], body).into_response()
            }
            _ => (status, body).into_response(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    aggregator: Aggregator,
    rate_limiter: Arc<RateLimiter>,
    api_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(aggregator: Aggregator, rate_limiter: Arc<RateLimiter>, api_key: Option<&str>) -> Self {
        AppState {
            aggregator,
            rate_limiter,
            api_key: api_key.map(Arc::from),
        }
    }
}

/// Routes of the posts API.
///
/// Middleware runs in this order on the way in: API key check, request
/// logging, rate limiting.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/posts", get(list_posts))
        .route("/v2/posts", get(query_posts))
        .route("/v2/posts/stats", get(post_stats))
        .route("/v2/posts/users/{user_id}", get(posts_by_user))
        .route("/v2/posts/{id}", get(post_by_id))
        .layer(middleware::from_fn_with_state(state.clone(), enforce_rate_limit))
        .layer(middleware::from_fn(log_requests))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .with_state(state)
}

async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected) = state.api_key.as_deref() {
        let provided = request
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        if provided != Some(expected) {
            return Err(ApiError::Unauthorized);
        }
    }
    Ok(next.run(request).await)
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    tracing::info!(
        %method,
        path = %path,
        query = request.uri().query().unwrap_or_default(),
        "Incoming request"
    );

    let started = Instant::now();
    let response = next.run(request).await;
    tracing::info!(
        %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        "Request completed"
    );
    response
}

async fn enforce_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().host());
    let key = client_key(request.headers(), host);

    if !state.rate_limiter.allow(&key) {
        tracing::debug!(key = %key, "Rate limit exceeded");
        return Err(ApiError::RateLimited {
            retry_after: state.rate_limiter.retry_after(),
        });
    }
    Ok(next.run(request).await)
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    limit: Option<i64>,
    include_comments: Option<bool>,
    user_id: Option<UserId>,
}

async fn list_posts(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<Vec<MergedPost>>, ApiError> {
    let Query(params) = params?;
    let limit = match params.limit {
        Some(limit) if !(1..=MAX_LIMIT).contains(&limit) => {
            return Err(ApiError::InvalidRequest(format!(
                "limit must be between 1 and {MAX_LIMIT}"
            )));
        }
        limit => limit.map(|l| l as usize),
    };

    let filter = MergeFilter {
        limit,
        include_comments: params.include_comments.unwrap_or(true),
        user_id: params.user_id,
    };
    Ok(Json(state.aggregator.fetch_merged(&filter).await?))
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PageParams {
    page: Option<i64>,
    size: Option<i64>,
    q: Option<String>,
    sort_by: Option<String>,
    order: Option<String>,
    user_id: Option<UserId>,
    include_comments: Option<bool>,
}

async fn query_posts(
    State(state): State<AppState>,
    params: Result<Query<PageParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = params?;
    let filter = MergeFilter {
        limit: None,
        include_comments: params.include_comments.unwrap_or(true),
        user_id: params.user_id,
    };
    let posts = state.aggregator.fetch_merged(&filter).await?;

    let query = QueryParams {
        q: params.q,
        sort_by: params.sort_by.as_deref().map(SortKey::parse).unwrap_or_default(),
        order: params.order.as_deref().map(SortOrder::parse).unwrap_or_default(),
        page: params.page,
        size: params.size,
    };
    let page = query::apply(posts, &query);

    let headers = [
        (TOTAL_COUNT_HEADER, page.total.to_string()),
        (PAGE_HEADER, page.page.to_string()),
        (SIZE_HEADER, page.size.to_string()),
    ];
    Ok((headers, Json(page.items)))
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct CommentsParam {
    include_comments: Option<bool>,
}

async fn post_by_id(
    State(state): State<AppState>,
    id: Result<Path<PostId>, PathRejection>,
    params: Result<Query<CommentsParam>, QueryRejection>,
) -> Result<Json<MergedPost>, ApiError> {
    let (Path(id), Query(params)) = (id?, params?);
    let filter = MergeFilter {
        include_comments: params.include_comments.unwrap_or(true),
        ..MergeFilter::default()
    };
    state
        .aggregator
        .fetch_merged(&filter)
        .await?
        .into_iter()
        .find(|p| p.id == id)
        .map(Json)
        .ok_or(ApiError::NotFound(id))
}

async fn posts_by_user(
    State(state): State<AppState>,
    user_id: Result<Path<UserId>, PathRejection>,
    params: Result<Query<CommentsParam>, QueryRejection>,
) -> Result<Json<Vec<MergedPost>>, ApiError> {
    let (Path(user_id), Query(params)) = (user_id?, params?);
    let filter = MergeFilter {
        limit: None,
        include_comments: params.include_comments.unwrap_or(false),
        user_id: Some(user_id),
    };
    Ok(Json(state.aggregator.fetch_merged(&filter).await?))
}

async fn post_stats(State(state): State<AppState>) -> Result<Json<Stats>, ApiError> {
    let posts = state.aggregator.fetch_merged(&MergeFilter::default()).await?;
    Ok(Json(query::stats(&posts)))
}
