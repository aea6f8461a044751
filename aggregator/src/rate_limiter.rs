//! Per-client token buckets gating request admission.
//!
//! Every bucket is refilled to full capacity at the start of each minute
//! window; there is no partial refill within a window. Buckets live in a
//! bounded concurrent map and are evicted after sitting idle past the end
//! of their window, which is indistinguishable from a freshly created one.
//!
//! The map never evicts a bucket for lack of room. Once `max_keys` buckets
//! are tracked, requests from keys without a bucket draw from a single
//! shared overflow bucket instead, so filling the map cannot hand out fresh
//! capacity.

use crate::clock::Clock;
use crate::config::RateLimitConfig;
use crate::metrics_defs::{RATE_LIMIT_OVERFLOW, RATE_LIMIT_REJECTED};
use http::HeaderMap;
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use parking_lot::Mutex;
use shared::counter;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

// Longer than one full window, so an evicted bucket would have been reset anyway.
const BUCKET_IDLE_TTL: Duration = Duration::from_secs(120);

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    last_refill_window: u64,
}

impl Bucket {
    fn full(capacity: u32, window: u64) -> Self {
        Bucket {
            tokens: capacity,
            last_refill_window: window,
        }
    }
}

pub struct RateLimiter {
    capacity: u32,
    max_keys: u64,
    buckets: Cache<String, Arc<Mutex<Bucket>>>,
    /// Buckets inserted and not yet removed, including ones being inserted
    tracked_keys: Arc<AtomicU64>,
    overflow: Mutex<Bucket>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        if config.refill_per_minute != config.capacity {
            tracing::warn!(
                capacity = config.capacity,
                refill_per_minute = config.refill_per_minute,
                "refill_per_minute is ignored; buckets reset to full capacity every minute"
            );
        }

        let tracked_keys = Arc::new(AtomicU64::new(0));
        let on_removal = tracked_keys.clone();
        let buckets = Cache::builder()
            .max_capacity(config.max_keys)
            .eviction_policy(EvictionPolicy::lru())
            .time_to_idle(BUCKET_IDLE_TTL)
            .eviction_listener(move |_key, _bucket, _cause: RemovalCause| {
                let _ = on_removal.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    n.checked_sub(1)
                });
            })
            .build();

        RateLimiter {
            capacity: config.capacity,
            max_keys: config.max_keys,
            buckets,
            tracked_keys,
            overflow: Mutex::new(Bucket::full(config.capacity, clock.minute_epoch())),
            clock,
        }
    }

    /// Consumes a token for `key` if one is left in the current window.
    pub fn allow(&self, key: &str) -> bool {
        let window = self.clock.minute_epoch();

        let allowed = match self.bucket(key, window) {
            Some(bucket) => self.take(&mut bucket.lock(), window),
            None => {
                counter!(RATE_LIMIT_OVERFLOW).increment(1);
                self.take(&mut self.overflow.lock(), window)
            }
        };

        if !allowed {
            counter!(RATE_LIMIT_REJECTED).increment(1);
        }
        allowed
    }

    /// Backoff hint for rejected callers: time until buckets are refilled.
    pub fn retry_after(&self) -> Duration {
        self.clock.until_next_minute()
    }

    /// The bucket tracked for `key`, or `None` when the map is full and `key`
    /// has no bucket yet.
    fn bucket(&self, key: &str, window: u64) -> Option<Arc<Mutex<Bucket>>> {
        if let Some(bucket) = self.buckets.get(key) {
            return Some(bucket);
        }

        if !self.reserve_slot() {
            return None;
        }

        let mut inserted = false;
        let bucket = self.buckets.get_with_by_ref(key, || {
            inserted = true;
            Arc::new(Mutex::new(Bucket::full(self.capacity, window)))
        });
        if !inserted {
            // Another caller created it first
            self.tracked_keys.fetch_sub(1, Ordering::SeqCst);
        }
        Some(bucket)
    }

    fn reserve_slot(&self) -> bool {
        self.tracked_keys
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_keys).then_some(n + 1)
            })
            .is_ok()
    }

    fn take(&self, bucket: &mut Bucket, window: u64) -> bool {
        if bucket.last_refill_window != window {
            bucket.tokens = self.capacity;
            bucket.last_refill_window = window;
        }

        if bucket.tokens == 0 {
            return false;
        }

        bucket.tokens -= 1;
        true
    }
}

/// Derives the rate limit key for a request: the first `X-Forwarded-For`
/// entry, else `X-Real-IP`, else the request host without its port.
pub fn client_key(headers: &HeaderMap, host: Option<&str>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(forwarded) = header(FORWARDED_FOR) {
        let first = forwarded.split(',').next().unwrap_or(forwarded).trim();
        return first.to_string();
    }

    if let Some(real_ip) = header(REAL_IP) {
        return real_ip.to_string();
    }

    host.map(|h| h.split(':').next().unwrap_or(h).to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
