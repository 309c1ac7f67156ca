//! # Backend Configuration
//!
//! Everything needed to reach the backend node and pace the pollers.
//! Built once and never mutated after the connection is created.

use std::time::Duration;

use bitcoin::Network;
use serde::{Deserialize, Serialize};

use crate::domain::{
    ChainConnError, Result, DEFAULT_CLIENT_BUFFER, DEFAULT_POLL_BLOCK_INTERVAL_MS,
    DEFAULT_POLL_TX_INTERVAL_MS,
};

/// Chain backend connection configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Chain the backend must serve.
    pub network: Network,

    /// RPC endpoint, `host:port`.
    pub host: String,

    /// RPC username.
    pub user: String,

    /// RPC password.
    pub pass: String,

    /// Talk plain HTTP instead of HTTPS.
    pub disable_tls: bool,

    /// PEM certificate(s) trusted in addition to the system roots.
    pub certificates: Option<Vec<u8>>,

    /// Poll the backend over RPC. When `false` events come from an
    /// external push transport and `Connection::start` spawns nothing.
    pub rpc_polling: bool,

    /// Interval between block poller ticks, in milliseconds.
    pub poll_block_interval_ms: u64,

    /// Interval between transaction poller ticks, in milliseconds.
    pub poll_tx_interval_ms: u64,

    /// Capacity of each client's inbound hand-off.
    pub client_buffer_size: usize,

    /// Per-request RPC timeout, in seconds.
    pub rpc_timeout_secs: u64,

    /// Clients fetch missed blocks themselves when they detect a gap.
    pub auto_catch_up: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            network: Network::Regtest,
            host: "127.0.0.1:18443".to_string(),
            user: String::new(),
            pass: String::new(),
            disable_tls: true,
            certificates: None,
            rpc_polling: true,
            poll_block_interval_ms: DEFAULT_POLL_BLOCK_INTERVAL_MS,
            poll_tx_interval_ms: DEFAULT_POLL_TX_INTERVAL_MS,
            client_buffer_size: DEFAULT_CLIENT_BUFFER,
            rpc_timeout_secs: 30,
            auto_catch_up: true,
        }
    }
}

impl BackendConfig {
    /// Create a config for testing (short intervals, small buffers).
    pub fn for_testing() -> Self {
        Self {
            poll_block_interval_ms: 50,
            poll_tx_interval_ms: 50,
            client_buffer_size: 64,
            rpc_timeout_secs: 5,
            ..Self::default()
        }
    }

    /// Block poller interval.
    pub fn poll_block_interval(&self) -> Duration {
        Duration::from_millis(self.poll_block_interval_ms)
    }

    /// Transaction poller interval.
    pub fn poll_tx_interval(&self) -> Duration {
        Duration::from_millis(self.poll_tx_interval_ms)
    }

    /// RPC request timeout.
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    /// Base URL of the RPC endpoint.
    pub fn rpc_url(&self) -> String {
        let scheme = if self.disable_tls { "http" } else { "https" };
        format!("{}://{}", scheme, self.host)
    }

    /// Reject configurations the connection cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ChainConnError::InvalidConfig("host is empty".to_string()));
        }
        if self.poll_block_interval_ms == 0 {
            return Err(ChainConnError::InvalidConfig(
                "poll_block_interval_ms must be non-zero".to_string(),
            ));
        }
        if self.poll_tx_interval_ms == 0 {
            return Err(ChainConnError::InvalidConfig(
                "poll_tx_interval_ms must be non-zero".to_string(),
            ));
        }
        if self.client_buffer_size == 0 {
            return Err(ChainConnError::InvalidConfig(
                "client_buffer_size must be non-zero".to_string(),
            ));
        }
        if self.rpc_timeout_secs == 0 {
            return Err(ChainConnError::InvalidConfig(
                "rpc_timeout_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
