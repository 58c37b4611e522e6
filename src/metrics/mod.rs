//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Order lifecycle counts and transitions
//! - Commitment and rescue activity
//! - Settlement latency
//! - Chain connection status

use crate::error::CoordinatorResult;
use crate::model::OrderStats;

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, Encoder, GaugeVec, Histogram,
    IntCounter, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Order lifecycle metrics
    pub static ref ORDERS_ADMITTED: IntCounter = register_int_counter!(
        "lockstep_orders_admitted_total",
        "Total orders admitted"
    ).unwrap();

    pub static ref ORDERS_COMPLETED: IntCounter = register_int_counter!(
        "lockstep_orders_completed_total",
        "Total orders settled to COMPLETED"
    ).unwrap();

    pub static ref ORDERS_FAILED: IntCounter = register_int_counter!(
        "lockstep_orders_failed_total",
        "Total orders ending in FAILED"
    ).unwrap();

    pub static ref ORDERS_BY_STATUS: GaugeVec = register_gauge_vec!(
        "lockstep_orders_by_status",
        "Current order count per status",
        &["status"]
    ).unwrap();

    // Commitment metrics
    pub static ref COMMITMENTS: IntCounter = register_int_counter!(
        "lockstep_commitments_total",
        "Total resolver commitments accepted"
    ).unwrap();

    pub static ref COMMITMENTS_LAPSED: IntCounter = register_int_counter!(
        "lockstep_commitments_lapsed_total",
        "Total commitments that missed their deadline"
    ).unwrap();

    pub static ref RESCUES: IntCounter = register_int_counter!(
        "lockstep_rescues_total",
        "Total defaulted orders taken over by a rescuer"
    ).unwrap();

    // Settlement metrics
    pub static ref FUNDS_MOVED: IntCounter = register_int_counter!(
        "lockstep_fund_moves_total",
        "Total user fund pulls into source escrows"
    ).unwrap();

    pub static ref SECRETS_PUBLISHED: IntCounter = register_int_counter!(
        "lockstep_secrets_published_total",
        "Total competition windows opened"
    ).unwrap();

    pub static ref SETTLEMENT_LATENCY: Histogram = register_histogram!(
        "lockstep_settlement_latency_seconds",
        "Fund move to completed reveal latency",
        vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]
    ).unwrap();

    // Chain metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "lockstep_chain_connected",
        "Chain connection status (1=connected, 0=disconnected)",
        &["chain_id"]
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

    pub async fn run(&self) -> CoordinatorResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::error::CoordinatorError::Internal(e.to_string()))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| crate::error::CoordinatorError::Internal(e.to_string()))?;

        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// Helper functions to record metrics

pub fn record_order_admitted() {
    ORDERS_ADMITTED.inc();
}

pub fn record_order_completed() {
    ORDERS_COMPLETED.inc();
}

pub fn record_order_failed() {
    ORDERS_FAILED.inc();
}

pub fn record_commitment() {
    COMMITMENTS.inc();
}

pub fn record_commitment_lapsed() {
    COMMITMENTS_LAPSED.inc();
}

pub fn record_rescue() {
    RESCUES.inc();
}

pub fn record_funds_moved() {
    FUNDS_MOVED.inc();
}

pub fn record_secret_published() {
    SECRETS_PUBLISHED.inc();
}

pub fn observe_settlement_latency(latency_secs: f64) {
    SETTLEMENT_LATENCY.observe(latency_secs);
}

pub fn record_chain_health(chain_id: u64, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[&chain_id.to_string()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_order_gauges(stats: &OrderStats) {
    for (status, count) in [
        ("active", stats.active),
        ("committed", stats.committed),
        ("settling", stats.settling),
        ("competing", stats.competing),
        ("completed", stats.completed),
        ("failed", stats.failed),
        ("rescue_available", stats.rescue_available),
    ] {
        ORDERS_BY_STATUS
            .with_label_values(&[status])
            .set(count as f64);
    }
}
