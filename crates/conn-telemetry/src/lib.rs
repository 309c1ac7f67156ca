//! # Connection Telemetry
//!
//! Structured logging and Prometheus metrics for the chain backend
//! connection.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use conn_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env();
//! init_telemetry(&config).expect("Failed to init telemetry");
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `CC_LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `CC_JSON_LOGS` | `false` | JSON log lines |
//! | `CC_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `CC_METRICS` | `true` | Register Prometheus collectors |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use metrics::{
    encode_metrics, register_metrics, BLOCKS_POLLED, BLOCK_DELIVERIES, CLIENTS_REGISTERED,
    DROPPED_DELIVERIES, MEMPOOL_TRACKED, RPC_FAILURES, TXS_POLLED, TX_DELIVERIES,
    WATERMARK_HEIGHT,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and, if enabled, register the metrics.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    init_logging(config)?;
    if config.metrics_enabled {
        register_metrics()?;
    }
    Ok(())
}

/// Increment a counter, optionally with label values.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}
