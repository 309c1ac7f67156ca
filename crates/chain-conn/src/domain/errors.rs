//! # Domain Errors
//!
//! Error types for the chain backend connection.
//!
//! | Variant | Scope | Surfaced to |
//! |---------|-------|-------------|
//! | `BackendUnreachable`, `NetworkMismatch`, `InvalidConfig` | construction | caller of `Connection::create` |
//! | `RpcQueryFailed` | one poller tick | logs only, retried next tick |
//! | `HeightGapDetected` | one client | that client's handler / subscriber |
//! | `ClientAlreadyRemoved`, `ClientLagging` | one delivery | poller logs, skipped |
//! | `ConnectionStopped` | registration after `stop` | caller of `Connection::new_client` |

use bitcoin::Network;
use thiserror::Error;

use super::value_objects::ClientId;

/// Chain connection error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainConnError {
    /// The initial handshake/authentication with the backend failed.
    #[error("Backend unreachable: {0}")]
    BackendUnreachable(String),

    /// The backend serves a different chain than the one configured.
    #[error("Backend network mismatch: expected {expected}, backend reports {actual}")]
    NetworkMismatch {
        /// Configured network.
        expected: Network,
        /// Network reported by the backend.
        actual: Network,
    },

    /// Configuration rejected by `BackendConfig::validate`.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A single RPC call failed (transport, auth, or JSON-RPC error object).
    #[error("RPC query {method} failed: {reason}")]
    RpcQueryFailed {
        /// RPC method name.
        method: &'static str,
        /// Failure description.
        reason: String,
    },

    /// A block arrived whose height is not exactly one above the client's.
    #[error("Height gap detected: local height {local}, incoming block {incoming}")]
    HeightGapDetected {
        /// Client's best height when the block arrived.
        local: u32,
        /// Height of the rejected block.
        incoming: u32,
    },

    /// The target client is no longer registered or its sink is closed.
    #[error("Client {0} already removed")]
    ClientAlreadyRemoved(ClientId),

    /// The target client's inbound buffer is full; the event was dropped.
    #[error("Client {0} is lagging, delivery dropped")]
    ClientLagging(ClientId),

    /// The connection was stopped; it accepts no new clients.
    #[error("Connection stopped")]
    ConnectionStopped,

    /// Address string could not be parsed for the configured network.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

impl ChainConnError {
    /// Shorthand for an RPC failure.
    pub fn rpc(method: &'static str, reason: impl ToString) -> Self {
        Self::RpcQueryFailed {
            method,
            reason: reason.to_string(),
        }
    }

    /// Whether a delivery error means the target should simply be skipped.
    pub fn is_benign_delivery(&self) -> bool {
        matches!(self, Self::ClientAlreadyRemoved(_))
    }

    /// Whether this is a gap ahead of the client (as opposed to a stale block).
    pub fn is_forward_gap(&self) -> bool {
        matches!(self, Self::HeightGapDetected { local, incoming } if *incoming > local.saturating_add(1))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ChainConnError>;
