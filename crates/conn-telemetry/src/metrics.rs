//! Prometheus metrics for the chain backend connection.
//!
//! All metrics follow the naming convention: `cc_<component>_<metric>_<unit>`
//!
//! Collectors update whether or not they are registered; `register_metrics`
//! only makes them visible to `encode_metrics`.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // BLOCK POLLER
    // =========================================================================

    /// Blocks fetched from the backend by the block poller
    pub static ref BLOCKS_POLLED: IntCounter = IntCounter::new(
        "cc_block_poller_blocks_total",
        "Blocks fetched from the backend"
    ).expect("metric creation failed");

    /// Per-client block deliveries
    pub static ref BLOCK_DELIVERIES: IntCounter = IntCounter::new(
        "cc_dispatch_block_deliveries_total",
        "Blocks handed to rescan clients"
    ).expect("metric creation failed");

    /// Connection-wide watermark height
    pub static ref WATERMARK_HEIGHT: IntGauge = IntGauge::new(
        "cc_watermark_height",
        "Height of the last block fanned out to clients"
    ).expect("metric creation failed");

    // =========================================================================
    // TRANSACTION POLLER
    // =========================================================================

    /// Transactions fetched from the backend mempool
    pub static ref TXS_POLLED: IntCounter = IntCounter::new(
        "cc_tx_poller_transactions_total",
        "Mempool transactions fetched from the backend"
    ).expect("metric creation failed");

    /// Per-client transaction deliveries
    pub static ref TX_DELIVERIES: IntCounter = IntCounter::new(
        "cc_dispatch_tx_deliveries_total",
        "Mempool transactions handed to rescan clients"
    ).expect("metric creation failed");

    /// Transaction ids currently held by the mempool tracker
    pub static ref MEMPOOL_TRACKED: IntGauge = IntGauge::new(
        "cc_mempool_tracked_transactions",
        "Transaction ids in the connection-wide mempool tracker"
    ).expect("metric creation failed");

    // =========================================================================
    // CLIENTS
    // =========================================================================

    /// Registered rescan clients
    pub static ref CLIENTS_REGISTERED: IntGauge = IntGauge::new(
        "cc_clients_registered",
        "Rescan clients currently registered"
    ).expect("metric creation failed");

    /// Deliveries dropped because a client buffer was full
    pub static ref DROPPED_DELIVERIES: IntCounter = IntCounter::new(
        "cc_dispatch_dropped_deliveries_total",
        "Deliveries dropped for lagging clients"
    ).expect("metric creation failed");

    // =========================================================================
    // BACKEND
    // =========================================================================

    /// Failed RPC calls by method
    pub static ref RPC_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("cc_rpc_failures_total", "Failed backend RPC calls"),
        &["method"]
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(BLOCKS_POLLED.clone()),
        Box::new(BLOCK_DELIVERIES.clone()),
        Box::new(WATERMARK_HEIGHT.clone()),
        Box::new(TXS_POLLED.clone()),
        Box::new(TX_DELIVERIES.clone()),
        Box::new(MEMPOOL_TRACKED.clone()),
        Box::new(CLIENTS_REGISTERED.clone()),
        Box::new(DROPPED_DELIVERIES.clone()),
        Box::new(RPC_FAILURES.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }
    Ok(())
}

/// Encode all registered metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
