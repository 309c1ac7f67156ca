//! # Inbound Ports
//!
//! What the outside world can ask of a connection, and how an alternative
//! event source pushes chain events into it.

use std::sync::Arc;

use async_trait::async_trait;

use crate::application::RescanClient;
use crate::domain::{BlockStamp, ChainEvent, ClientId, Result};

/// Chain connection API - inbound port.
#[async_trait]
pub trait ChainConnApi: Send + Sync {
    /// Allocate, register and return a new rescan client. Fails once the
    /// connection is stopped.
    fn new_client(&self) -> Result<Arc<RescanClient>>;

    /// Unregister a client without stopping it.
    fn remove_client(&self, id: ClientId) -> Option<Arc<RescanClient>>;

    /// Spawn the pollers. Returns `false` if already started (or stopped).
    fn start(&self) -> bool;

    /// Stop every client and poller and wait for the pollers to exit.
    async fn stop(&self);

    /// Connection-wide watermark.
    fn best_block(&self) -> BlockStamp;

    /// Number of registered clients.
    fn client_count(&self) -> usize;
}

/// Sink for chain events - inbound port for event sources.
///
/// The pollers feed the connection through this, and a push-based transport
/// can feed the same fan-out without going through the pollers.
pub trait ChainEventSink: Send + Sync {
    /// Fan one event out to every interested client.
    fn dispatch(&self, event: ChainEvent);
}
