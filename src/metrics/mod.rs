//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Tracked broadcasts by state
//! - Submission, confirmation and staleness outcomes
//! - Per-record failures and reorg alerts
//! - Block pass latency

use crate::error::BroadcastResult;

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    pub static ref BROADCASTS_TRACKED: GaugeVec = register_gauge_vec!(
        "broadcast_tracker_broadcasts_tracked",
        "Tracked broadcasts by state",
        &["state"]
    ).unwrap();

    pub static ref CHAIN_BLOCK_HEIGHT: GaugeVec = register_gauge_vec!(
        "broadcast_tracker_chain_block_height",
        "Chain tip observed by the last block pass",
        &[]
    ).unwrap();

    pub static ref BROADCASTS_CREATED: CounterVec = register_counter_vec!(
        "broadcast_tracker_broadcasts_created_total",
        "Total broadcasts accepted for tracking",
        &[]
    ).unwrap();

    pub static ref BROADCAST_OUTCOMES: CounterVec = register_counter_vec!(
        "broadcast_tracker_outcomes_total",
        "Total broadcast lifecycle transitions",
        &["outcome"]
    ).unwrap();

    pub static ref RECORD_FAILURES: CounterVec = register_counter_vec!(
        "broadcast_tracker_record_failures_total",
        "Total per-record failures during block passes",
        &["kind"]
    ).unwrap();

    pub static ref REORG_ALERTS: CounterVec = register_counter_vec!(
        "broadcast_tracker_reorg_alerts_total",
        "Confirmed transactions reverted by a reorg",
        &[]
    ).unwrap();

    pub static ref PASS_LATENCY: HistogramVec = register_histogram_vec!(
        "broadcast_tracker_pass_latency_seconds",
        "Block pass latency",
        &["result"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "broadcast_tracker_health_check_success_total",
        "Total successful health checks",
        &[]
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "broadcast_tracker_health_check_failure_total",
        "Total failed health checks",
        &[]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> BroadcastResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::error::BroadcastError::Internal(e.to_string()))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| crate::error::BroadcastError::Internal(e.to_string()))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// Helper functions to record metrics

pub fn record_tracked(pending: usize, submitted: usize) {
    BROADCASTS_TRACKED
        .with_label_values(&["pending"])
        .set(pending as f64);
    BROADCASTS_TRACKED
        .with_label_values(&["submitted"])
        .set(submitted as f64);
}

pub fn record_chain_height(index: u64) {
    CHAIN_BLOCK_HEIGHT.with_label_values(&[]).set(index as f64);
}

pub fn record_broadcast_created() {
    BROADCASTS_CREATED.with_label_values(&[]).inc();
}

pub fn record_submitted() {
    BROADCAST_OUTCOMES.with_label_values(&["submitted"]).inc();
}

pub fn record_confirmed() {
    BROADCAST_OUTCOMES.with_label_values(&["confirmed"]).inc();
}

pub fn record_stale() {
    BROADCAST_OUTCOMES.with_label_values(&["stale"]).inc();
}

pub fn record_failure(kind: &str) {
    RECORD_FAILURES.with_label_values(&[kind]).inc();
}

pub fn record_reorg_alert() {
    REORG_ALERTS.with_label_values(&[]).inc();
}

pub fn record_pass_latency(ok: bool, latency_secs: f64) {
    PASS_LATENCY
        .with_label_values(&[if ok { "ok" } else { "failed" }])
        .observe(latency_secs);
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.with_label_values(&[]).inc();
}
