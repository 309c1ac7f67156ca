//! # Application Layer
//!
//! The connection, its pollers, and the per-subscriber rescan clients.

pub mod block_poller;
pub mod connection;
pub mod dispatcher;
pub mod mempool_tracker;
pub mod registry;
pub mod rescan_client;
pub mod tx_poller;
pub mod watermark;

pub use block_poller::BlockPoller;
pub use connection::Connection;
pub use dispatcher::{DeliveryReport, EventDispatcher};
pub use mempool_tracker::MempoolTracker;
pub use registry::ClientRegistry;
pub use rescan_client::{AppliedBlock, RescanClient};
pub use tx_poller::{TxPoller, TxTickReport};
pub use watermark::Watermark;

use conn_telemetry::{metric_inc, RPC_FAILURES};

use crate::domain::ChainConnError;

/// Count a failed backend call by method.
pub(crate) fn record_rpc_failure(err: &ChainConnError) {
    let method = match err {
        ChainConnError::RpcQueryFailed { method, .. } => *method,
        _ => "other",
    };
    metric_inc!(RPC_FAILURES, &[method]);
}
