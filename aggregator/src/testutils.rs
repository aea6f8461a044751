use crate::clock::Clock;
use crate::errors::GatewayError;
use crate::gateway::Gateway;
use async_trait::async_trait;
use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::get;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use url::Url;

type Reply = Result<Value, GatewayError>;

#[derive(Default)]
struct Route {
    script: VecDeque<Reply>,
    fallback: Option<Reply>,
    delay: Option<Duration>,
}

/// In-memory gateway replying from per-path scripts and counting calls.
///
/// Scripted replies are consumed in order; once exhausted the last reply
/// keeps being returned. Unknown paths answer with status 404.
#[derive(Default)]
pub struct ScriptedGateway {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, path: &str, body: Value) -> &Self {
        self.script(path, vec![Ok(body)])
    }

    pub fn fail(&self, path: &str, error: GatewayError) -> &Self {
        self.script(path, vec![Err(error)])
    }

    pub fn script(&self, path: &str, replies: Vec<Reply>) -> &Self {
        let mut routes = self.routes.lock();
        let route = routes.entry(path.to_string()).or_default();
        route.fallback = replies.last().cloned();
        route.script = replies.into();
        self
    }

    pub fn delay(&self, path: &str, delay: Duration) -> &Self {
        self.routes.lock().entry(path.to_string()).or_default().delay = Some(delay);
        self
    }

    pub fn calls(&self, path: &str) -> usize {
        self.calls.lock().get(path).copied().unwrap_or(0)
    }

    pub fn calls_with_prefix(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(_, count)| count)
            .sum()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn get(&self, path: &str) -> Result<Bytes, GatewayError> {
        *self.calls.lock().entry(path.to_string()).or_default() += 1;

        let (reply, delay) = {
            let mut routes = self.routes.lock();
            match routes.get_mut(path) {
                Some(route) => {
                    let reply = route
                        .script
                        .pop_front()
                        .or_else(|| route.fallback.clone())
                        .unwrap_or(Err(GatewayError::Status(404)));
                    (reply, route.delay)
                }
                None => (Err(GatewayError::Status(404)), None),
            }
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        reply.map(|value| Bytes::from(value.to_string()))
    }
}

pub fn post(id: u32, user_id: u32, title: &str, body: &str) -> Value {
    json!({"userId": user_id, "id": id, "title": title, "body": body})
}

pub fn user(id: u32, name: &str) -> Value {
    json!({"id": id, "name": name, "username": name.to_lowercase(), "email": format!("{id}@example.com")})
}

pub fn comments(post_id: u32, count: u32) -> Value {
    let items: Vec<Value> = (1..=count)
        .map(|i| {
            json!({"postId": post_id, "id": post_id * 100 + i, "email": "c@x.com", "body": format!("comment {i}")})
        })
        .collect();
    Value::Array(items)
}

/// Fake upstream with a single post by user 1 carrying one comment.
pub fn fake_upstream_router() -> Router {
    Router::new()
        .route(
            "/posts",
            get(|| async { Json(json!([post(1, 1, "t", "b")])) }),
        )
        .route(
            "/users/{id}",
            get(|Path(id): Path<u32>| async move {
                match id {
                    1 => Ok(Json(json!({"id": 1, "name": "User", "email": "u@x.com"}))),
                    _ => Err(StatusCode::NOT_FOUND),
                }
            }),
        )
        .route(
            "/posts/{id}/comments",
            get(|Path(id): Path<u32>| async move { Json(comments(id, 1)) }),
        )
}

/// Serves `router` on an ephemeral local port and returns its base URL.
pub async fn spawn_upstream(router: Router) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to address");
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    Url::parse(&format!("http://127.0.0.1:{port}")).unwrap()
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        ManualClock {
            millis: AtomicU64::new(start_millis),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}
