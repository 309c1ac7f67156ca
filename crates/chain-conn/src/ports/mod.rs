//! # Ports Module
//!
//! Inbound (API, event sink) and outbound (backend RPC) traits.

pub mod inbound;
pub mod outbound;

pub use inbound::{ChainConnApi, ChainEventSink};
pub use outbound::{ChainBackend, MockChainBackend, MockMethod};
