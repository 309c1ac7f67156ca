//! # Event Dispatcher
//!
//! Fans chain events out to the registered clients. The pollers call it
//! after each fetch; a push-based transport can call it directly through
//! `ChainEventSink`.
//!
//! Every fan-out snapshots the registry first and delivers without holding
//! any connection-wide lock. A client whose buffer is full loses the event
//! (it recovers blocks through catch-up); a client removed mid-fan-out is
//! skipped silently.
//!
//! Blocks and removals go to every client; new transactions only to the
//! clients they are relevant to. A removal cannot be filtered by the
//! client's mirror: the matching add may still be queued in its buffer.
//!
//! The watermark advances after the block has been handed off, so for a
//! moment a fast client's best block can be one above `watermark()`.

use std::sync::Arc;

use bitcoin::{Transaction, Txid};
use conn_telemetry::{metric_inc, BLOCK_DELIVERIES, DROPPED_DELIVERIES, TX_DELIVERIES};
use tracing::{debug, warn};

use super::mempool_tracker::MempoolTracker;
use super::registry::ClientRegistry;
use super::rescan_client::RescanClient;
use super::watermark::Watermark;
use crate::domain::{BlockStamp, ChainConnError, ChainEvent, ConnectedBlock};
use crate::ports::ChainEventSink;

/// Outcome of one fan-out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Clients that accepted the event.
    pub delivered: usize,
    /// Clients whose buffer was full.
    pub dropped: usize,
    /// Clients removed while the fan-out ran.
    pub skipped: usize,
}

/// Fan-out of chain events over a client registry.
pub struct EventDispatcher {
    registry: Arc<ClientRegistry>,
    tracker: Arc<MempoolTracker>,
    watermark: Arc<Watermark>,
}

impl EventDispatcher {
    pub(crate) fn new(
        registry: Arc<ClientRegistry>,
        tracker: Arc<MempoolTracker>,
        watermark: Arc<Watermark>,
    ) -> Self {
        Self {
            registry,
            tracker,
            watermark,
        }
    }

    /// Connection-wide best block.
    pub fn watermark(&self) -> BlockStamp {
        self.watermark.get()
    }

    /// Deliver a connected block to every client, then advance the
    /// watermark.
    pub fn dispatch_block(&self, block: Arc<ConnectedBlock>) -> DeliveryReport {
        let report = self.fan_out(
            |_| true,
            || ChainEvent::BlockConnected(Arc::clone(&block)),
        );
        BLOCK_DELIVERIES.inc_by(report.delivered as u64);

        if !self.watermark.advance(block.stamp()) {
            debug!(
                "[conn] Watermark not advanced by {} (currently {})",
                block.stamp(),
                self.watermark.get()
            );
        }
        report
    }

    /// Record a mempool transaction and deliver it to every client watching
    /// it (or watching everything).
    pub fn dispatch_transaction(&self, tx: Arc<Transaction>) -> DeliveryReport {
        self.tracker.insert(tx.compute_txid());
        let report = self.fan_out(
            |client| client.wants_transaction(&tx),
            || ChainEvent::MempoolTxAdded(Arc::clone(&tx)),
        );
        TX_DELIVERIES.inc_by(report.delivered as u64);
        report
    }

    /// Forget a transaction that left the mempool and tell every client.
    pub fn dispatch_removal(&self, txid: Txid) -> DeliveryReport {
        self.tracker.remove(&txid);
        self.fan_out(|_| true, || ChainEvent::MempoolTxRemoved(txid))
    }

    fn fan_out(
        &self,
        interested: impl Fn(&RescanClient) -> bool,
        event: impl Fn() -> ChainEvent,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for client in self.registry.snapshot() {
            if !interested(client.as_ref()) {
                continue;
            }
            match client.deliver(event()) {
                Ok(()) => report.delivered += 1,
                Err(ChainConnError::ClientLagging(id)) => {
                    warn!("[client {}] Buffer full, event dropped", id);
                    metric_inc!(DROPPED_DELIVERIES);
                    report.dropped += 1;
                }
                Err(_) => report.skipped += 1,
            }
        }
        report
    }
}

impl ChainEventSink for EventDispatcher {
    fn dispatch(&self, event: ChainEvent) {
        let kind = event.kind();
        let report = match event {
            ChainEvent::BlockConnected(block) => self.dispatch_block(block),
            ChainEvent::MempoolTxAdded(tx) => self.dispatch_transaction(tx),
            ChainEvent::MempoolTxRemoved(txid) => self.dispatch_removal(txid),
        };
        debug!(
            event = kind,
            delivered = report.delivered,
            dropped = report.dropped,
            skipped = report.skipped,
            "[conn] Event dispatched"
        );
    }
}
