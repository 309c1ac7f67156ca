//! # Chain Backend Connection
//!
//! Polls a bitcoind-compatible full node over JSON-RPC and fans connected
//! blocks and mempool transactions out to any number of in-process rescan
//! clients.
//!
//! ## Event Flow
//!
//! ```text
//!   BlockPoller ──getblockchaininfo/getblock──┐
//!                                             ├──→ EventDispatcher ──snapshot──→ RescanClient (buffer) ──→ handler ──→ Notification
//!   TxPoller ───getrawmempool/getrawtx────────┘          │                    └→ RescanClient (buffer) ──→ handler ──→ Notification
//!                                                        │
//!   push transport ─────ChainEventSink::dispatch─────────┘
//! ```
//!
//! ## Invariants
//!
//! | Invariant | Enforcement |
//! |-----------|-------------|
//! | Client best block advances only by exactly one height | `RescanClient::receive_block` |
//! | Watermark never moves backwards | `Watermark::advance` |
//! | Watermark advances only after every client was handed the block (a client may briefly lead it by one) | `EventDispatcher::dispatch_block` |
//! | Each mempool transaction is fetched once while it stays listed | `MempoolTracker::reconcile` |
//! | No connection-wide lock held while delivering to a client | `EventDispatcher::fan_out` |
//!
//! ## Module Structure (Hexagonal Architecture)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  adapters/bitcoind_rpc.rs  - ChainBackend over HTTP JSON-RPC    │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ implements ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ports/inbound.rs  - ChainConnApi, ChainEventSink               │
//! │  ports/outbound.rs - ChainBackend (+ MockChainBackend)          │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ uses ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  application/ - Connection, pollers, registry, rescan clients   │
//! │  algorithms/  - watch-list matching, mempool diff, walk plan    │
//! │  domain/      - value objects, errors, invariants               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chain_conn::{BackendConfig, Connection};
//!
//! let conn = Connection::create(BackendConfig::default()).await?;
//! let client = conn.new_client()?;
//! client.watch_address_str("bcrt1q...")?;
//! client.notify_blocks();
//! let mut notifications = client.take_notifications().unwrap();
//! client.start()?;
//! conn.start();
//!
//! while let Some(n) = notifications.recv().await {
//!     println!("{:?}", n);
//! }
//! ```

#![warn(missing_docs)]
#![allow(missing_docs)] // TODO: Document the remaining accessor methods

pub mod adapters;
pub mod algorithms;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export main types
pub use application::{
    AppliedBlock, BlockPoller, ClientRegistry, Connection, DeliveryReport, EventDispatcher,
    MempoolTracker, RescanClient, TxPoller, TxTickReport, Watermark,
};
pub use config::BackendConfig;
pub use domain::{
    BlockStamp, ChainConnError, ChainEvent, ClientId, ConnectedBlock, Notification, WatchList,
};
pub use ports::{ChainBackend, ChainConnApi, ChainEventSink, MockChainBackend, MockMethod};

#[cfg(feature = "rpc")]
pub use adapters::BitcoindRpcClient;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
