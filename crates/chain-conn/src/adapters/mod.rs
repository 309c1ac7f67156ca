//! # Adapters
//!
//! Concrete backends behind the outbound port.

#[cfg(feature = "rpc")]
pub mod bitcoind_rpc;

#[cfg(feature = "rpc")]
pub use bitcoind_rpc::BitcoindRpcClient;
