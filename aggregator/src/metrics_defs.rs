//! Metrics definitions for the posts aggregator.

use shared::metrics_defs::{MetricDef, MetricType};

pub const RATE_LIMIT_REJECTED: MetricDef = MetricDef {
    name: "rate_limit.rejected",
    metric_type: MetricType::Counter,
    description: "Requests rejected because the client's bucket was empty",
};

pub const RATE_LIMIT_OVERFLOW: MetricDef = MetricDef {
    name: "rate_limit.overflow",
    metric_type: MetricType::Counter,
    description: "Requests charged to the shared overflow bucket because the key map was full",
};

pub const UPSTREAM_ATTEMPT_DURATION: MetricDef = MetricDef {
    name: "upstream.attempt.duration",
    metric_type: MetricType::Histogram,
    description: "Duration of a single upstream attempt in seconds. Tagged with endpoint, outcome.",
};

pub const UPSTREAM_RETRIES: MetricDef = MetricDef {
    name: "upstream.retries",
    metric_type: MetricType::Counter,
    description: "Upstream attempts made after a failed first attempt. Tagged with endpoint.",
};

pub const CIRCUIT_OPENED: MetricDef = MetricDef {
    name: "circuit_breaker.opened",
    metric_type: MetricType::Counter,
    description: "Transitions of an endpoint circuit into the open state. Tagged with endpoint.",
};

pub const CIRCUIT_FAST_FAIL: MetricDef = MetricDef {
    name: "circuit_breaker.fast_fail",
    metric_type: MetricType::Counter,
    description: "Calls rejected without contacting upstream. Tagged with endpoint.",
};

pub const CIRCUIT_STATE: MetricDef = MetricDef {
    name: "circuit_breaker.state",
    metric_type: MetricType::Gauge,
    description: "Current circuit state: 0 closed, 1 open, 2 half-open. Tagged with endpoint.",
};

pub const USER_CACHE_HIT: MetricDef = MetricDef {
    name: "user_cache.hit",
    metric_type: MetricType::Counter,
    description: "User lookups served from the cache",
};

pub const USER_CACHE_MISS: MetricDef = MetricDef {
    name: "user_cache.miss",
    metric_type: MetricType::Counter,
    description: "User lookups that went to upstream",
};

pub const AUTHOR_DEDUP_HIT: MetricDef = MetricDef {
    name: "aggregate.author_dedup.hit",
    metric_type: MetricType::Counter,
    description: "Posts that reused an author lookup already started in the same aggregation",
};

pub const AGGREGATE_DURATION: MetricDef = MetricDef {
    name: "aggregate.duration",
    metric_type: MetricType::Histogram,
    description: "Time to fetch and merge posts in seconds. Tagged with status.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    RATE_LIMIT_REJECTED,
    RATE_LIMIT_OVERFLOW,
    UPSTREAM_ATTEMPT_DURATION,
    UPSTREAM_RETRIES,
    CIRCUIT_OPENED,
    CIRCUIT_FAST_FAIL,
    CIRCUIT_STATE,
    USER_CACHE_HIT,
    USER_CACHE_MISS,
    AUTHOR_DEDUP_HIT,
    AGGREGATE_DURATION,
];
