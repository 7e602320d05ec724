//! Per-request HTTP metrics.
//!
//! The `endpoint` label is the matched route template (`/users/:id`), or the
//! raw path when nothing matched. Query strings never reach a label.

use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;

use callmeter_core::error::Result;
use callmeter_core::{CounterVec, GaugeVec, HistogramVec, Registry};

use crate::app_state::AppState;

pub const REQUESTS_TOTAL: &str = "http_requests_total";
pub const REQUEST_DURATION: &str = "http_request_duration_ms";
pub const REQUESTS_ACTIVE: &str = "http_requests_active";

#[derive(Clone, Debug)]
pub struct HttpMetrics {
    requests: CounterVec,
    duration: HistogramVec,
    active: GaugeVec,
}

impl HttpMetrics {
    pub fn register(registry: &Registry, buckets_ms: &[f64]) -> Result<Self> {
        Ok(Self {
            requests: registry.counter_vec(
                REQUESTS_TOTAL,
                "HTTP requests by method, endpoint and status code",
                &["method", "endpoint", "status_code"],
            )?,
            duration: registry.histogram_vec(
                REQUEST_DURATION,
                "HTTP request duration in milliseconds",
                &["method", "endpoint"],
                buckets_ms,
            )?,
            active: registry.gauge_vec(
                REQUESTS_ACTIVE,
                "HTTP requests currently being served",
                &["endpoint"],
            )?,
        })
    }

    fn report(&self, res: Result<()>) {
        if let Err(e) = res {
            tracing::warn!(error = %e, "http metric update failed");
        }
    }
}

/// Releases the active gauge however the request ends.
struct ActiveRequest<'a> {
    metrics: &'a HttpMetrics,
    endpoint: &'a str,
}

impl<'a> ActiveRequest<'a> {
    fn enter(metrics: &'a HttpMetrics, endpoint: &'a str) -> Self {
        metrics.report(metrics.active.inc(&[endpoint]));
        Self { metrics, endpoint }
    }
}

impl Drop for ActiveRequest<'_> {
    fn drop(&mut self) {
        self.metrics
            .report(self.metrics.active.dec(&[self.endpoint]));
    }
}

/// Middleware for `axum::middleware::from_fn_with_state`.
pub async fn track_requests(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(metrics) = state.http_metrics().cloned() else {
        return next.run(req).await;
    };

    let method = req.method().as_str().to_string();
    let endpoint = match req.extensions().get::<MatchedPath>() {
        Some(p) => p.as_str().to_string(),
        None => req.uri().path().to_string(),
    };

    let active = ActiveRequest::enter(&metrics, &endpoint);
    let started = Instant::now();
    let res = next.run(req).await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    drop(active);

    let status = res.status().as_u16().to_string();
    metrics.report(
        metrics
            .requests
            .inc(&[method.as_str(), endpoint.as_str(), status.as_str()]),
    );
    metrics.report(
        metrics
            .duration
            .observe(&[method.as_str(), endpoint.as_str()], elapsed_ms),
    );

    res
}
