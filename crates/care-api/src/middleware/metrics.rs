//! # Prometheus Metrics
//!
//! HTTP metrics recorded by [`metrics_middleware`] into a `prometheus`
//! registry and exposed at `/metrics` in the text exposition format:
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `care_api_http_requests_total` | counter | method, path, status |
//! | `care_api_http_errors_total` | counter | method, path, status |
//! | `care_api_login_rate_limited_total` | counter | path |
//! | `care_api_http_request_duration_seconds` | histogram | method, path |
//!
//! `path` is the matched route template (`/clients/:id`), so ids never
//! become label values. Requests that match no route share the
//! [`UNMATCHED_PATH`] label.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use prometheus::core::Collector;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

/// Path label for requests that matched no route.
pub const UNMATCHED_PATH: &str = "unmatched";

const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// Shared metrics state backed by a Prometheus registry.
#[derive(Clone)]
pub struct ApiMetrics {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Registry,
    http_requests_total: IntCounterVec,
    http_errors_total: IntCounterVec,
    rate_limited_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
}

impl std::fmt::Debug for ApiMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiMetrics")
            .field("requests", &self.requests())
            .field("errors", &self.errors())
            .field("rate_limited", &self.rate_limited())
            .finish()
    }
}

impl ApiMetrics {
    /// Create every collector and register it with a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("care_api_http_requests_total", "HTTP requests served."),
            &["method", "path", "status"],
        )?;
        let http_errors_total = IntCounterVec::new(
            Opts::new(
                "care_api_http_errors_total",
                "HTTP responses with a 4xx or 5xx status.",
            ),
            &["method", "path", "status"],
        )?;
        let rate_limited_total = IntCounterVec::new(
            Opts::new(
                "care_api_login_rate_limited_total",
                "Login attempts rejected by the rate limiter.",
            ),
            &["path"],
        )?;
        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "care_api_http_request_duration_seconds",
                "HTTP request latency in seconds.",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["method", "path"],
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_errors_total.clone()))?;
        registry.register(Box::new(rate_limited_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                http_requests_total,
                http_errors_total,
                rate_limited_total,
                http_request_duration_seconds,
            }),
        })
    }

    /// Total requests across every label set.
    pub fn requests(&self) -> u64 {
        counter_sum(&self.inner.http_requests_total)
    }

    pub fn errors(&self) -> u64 {
        counter_sum(&self.inner.http_errors_total)
    }

    pub fn rate_limited(&self) -> u64 {
        counter_sum(&self.inner.rate_limited_total)
    }

    fn record_request(&self, method: &str, path: &str, status: StatusCode, duration_secs: f64) {
        let status_label = status.as_str();
        self.inner
            .http_requests_total
            .with_label_values(&[method, path, status_label])
            .inc();
        self.inner
            .http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
        if status.is_client_error() || status.is_server_error() {
            self.inner
                .http_errors_total
                .with_label_values(&[method, path, status_label])
                .inc();
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.inner.rate_limited_total.with_label_values(&[path]).inc();
        }
    }

    /// Gather the registry and encode it in the Prometheus text format.
    pub fn gather_and_encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.inner.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn counter_sum(vec: &IntCounterVec) -> u64 {
    vec.collect()
        .iter()
        .flat_map(|family| family.get_metric())
        .map(|m| m.get_counter().get_value() as u64)
        .sum()
}

/// Record count, latency and outcome of every request.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let metrics = request.extensions().get::<ApiMetrics>().cloned();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_PATH.to_string());
    let start = Instant::now();

    let response = next.run(request).await;

    if let Some(m) = metrics {
        m.record_request(&method, &path, response.status(), start.elapsed().as_secs_f64());
    }
    response
}
