//! Prometheus metrics for the Easel server.
//!
//! Exposes metrics for upstream lookups, refresh coordination, batch
//! operations and the background sweep.
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry no artifact keys, only aggregate counts and latencies.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Upstream metrics
pub static UPSTREAM_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "easel_upstream_requests_total",
            "Upstream lookups by outcome (success, failure)",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static UPSTREAM_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "easel_upstream_duration_seconds",
            "Time taken by a single upstream lookup",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
    )
    .expect("metric creation failed")
});

// Coordination metrics
pub static CACHE_HITS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "easel_cache_hits_total",
        "Refresh requests served from a fresh SUCCESS row",
    )
    .expect("metric creation failed")
});

pub static FOLLOWER_WAITS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "easel_follower_waits_total",
        "Refresh requests that lost the claim and waited for another refresher",
    )
    .expect("metric creation failed")
});

pub static FOLLOWER_TAKEOVERS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "easel_follower_takeovers_total",
        "Followers that re-claimed a row after its lease expired",
    )
    .expect("metric creation failed")
});

pub static FOLLOWER_TIMEOUTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "easel_follower_timeouts_total",
        "Followers that gave up waiting for a live claim",
    )
    .expect("metric creation failed")
});

// Operation metrics
pub static OPERATIONS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "easel_operations_created_total",
        "Total number of batch operations created",
    )
    .expect("metric creation failed")
});

pub static OPERATIONS_FINALIZED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "easel_operations_finalized_total",
            "Batch operations reaching a terminal status, by status",
        ),
        &["status"],
    )
    .expect("metric creation failed")
});

pub static BATCH_DRIVERS_ACTIVE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "easel_batch_drivers_active",
        "Number of batch refresh drivers currently running",
    )
    .expect("metric creation failed")
});

pub static BATCH_DRIVERS_PANICKED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "easel_batch_drivers_panicked_total",
        "Batch refresh drivers that panicked",
    )
    .expect("metric creation failed")
});

// Sweep metrics
pub static SWEEP_TICKS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "easel_sweep_ticks_total",
            "Sweep ticks by result (ran, skipped, error)",
        ),
        &["result"],
    )
    .expect("metric creation failed")
});

pub static SWEEP_ROWS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "easel_sweep_rows_total",
            "Rows handled by the sweep, by outcome (succeeded, failed, skipped, error)",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// This function is idempotent - subsequent calls after the first are no-ops.
/// This allows safe use in integration tests or when embedding multiple routers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(UPSTREAM_REQUESTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPSTREAM_DURATION.clone()))
            .expect("metric registration failed");

        REGISTRY
            .register(Box::new(CACHE_HITS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(FOLLOWER_WAITS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(FOLLOWER_TAKEOVERS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(FOLLOWER_TIMEOUTS.clone()))
            .expect("metric registration failed");

        REGISTRY
            .register(Box::new(OPERATIONS_CREATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(OPERATIONS_FINALIZED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BATCH_DRIVERS_ACTIVE.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BATCH_DRIVERS_PANICKED.clone()))
            .expect("metric registration failed");

        REGISTRY
            .register(Box::new(SWEEP_TICKS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SWEEP_ROWS.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Helper to record an upstream lookup outcome.
pub fn record_upstream(outcome: &str, seconds: f64) {
    UPSTREAM_REQUESTS.with_label_values(&[outcome]).inc();
    UPSTREAM_DURATION.observe(seconds);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        // This would panic if any metric creation failed
        register_metrics();
        register_metrics();
    }

    #[tokio::test]
    async fn handler_exposes_registered_families() {
        register_metrics();
        record_upstream("success", 0.01);
        let response = metrics_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
