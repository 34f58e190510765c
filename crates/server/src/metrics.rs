//! Prometheus metrics for the Warden server.
//!
//! The `/metrics` endpoint is unauthenticated so Prometheus can scrape it.
//! It only exposes aggregate counters, but it should still be reachable
//! from the scraper's network only.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::{Arc, LazyLock, Once};
use warden_restore::RestoreProcess;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static RESTORES_LAUNCHED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "warden_restores_launched_total",
        "Total number of restore processes launched",
    )
    .expect("metric creation failed")
});

pub static RESTORES_SUCCEEDED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "warden_restores_succeeded_total",
        "Total number of restore processes that completed successfully",
    )
    .expect("metric creation failed")
});

pub static RESTORES_FAILED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "warden_restores_failed_total",
            "Total number of restore processes that failed, by error kind",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

pub static RESUMES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "warden_restore_resumes_total",
            "Total number of resume requests, by result",
        ),
        &["result"],
    )
    .expect("metric creation failed")
});

pub static INTERRUPTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "warden_restore_interrupts_total",
        "Total number of interrupted restore attempts",
    )
    .expect("metric creation failed")
});

pub static BYTES_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "warden_restore_bytes_received_total",
        "Total logical stream bytes consumed by finished restores",
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry. Safe to call repeatedly.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(RESTORES_LAUNCHED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(RESTORES_SUCCEEDED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(RESTORES_FAILED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(RESUMES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(INTERRUPTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_RECEIVED.clone()))
            .expect("metric registration failed");
    });
}

/// Count a launch and record the outcome once the process completes.
pub fn track_restore(process: Arc<RestoreProcess>) {
    RESTORES_LAUNCHED.inc();
    tokio::spawn(async move {
        let outcome = process.wait().await;
        BYTES_RECEIVED.inc_by(process.status().bytes_read);
        match outcome {
            Ok(()) => RESTORES_SUCCEEDED.inc(),
            Err(err) => RESTORES_FAILED
                .with_label_values(&[kind_label(err.kind())])
                .inc(),
        }
    });
}

pub fn record_resume(accepted: bool) {
    let label = if accepted { "accepted" } else { "rejected" };
    RESUMES.with_label_values(&[label]).inc();
}

fn kind_label(kind: warden_restore::ErrorKind) -> &'static str {
    use warden_restore::ErrorKind;
    match kind {
        ErrorKind::InvalidArgument => "invalid_argument",
        ErrorKind::FailedPrecondition => "failed_precondition",
        ErrorKind::Canceled => "canceled",
        ErrorKind::DeadlineExceeded => "deadline_exceeded",
        ErrorKind::NotFound => "not_found",
        ErrorKind::Internal => "internal",
    }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        register_metrics();
        register_metrics();
        record_resume(true);
        assert!(RESUMES.with_label_values(&["accepted"]).get() >= 1);
    }
}
