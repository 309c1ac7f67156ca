//! # Transaction Poller
//!
//! Periodically lists the backend mempool, fetches every id the tracker has
//! not seen, and fans each transaction out to the clients that care. An id
//! whose fetch fails stays unseen and is retried on the next tick.

use std::sync::Arc;
use std::time::Duration;

use conn_telemetry::TXS_POLLED;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::dispatcher::EventDispatcher;
use super::mempool_tracker::MempoolTracker;
use super::record_rpc_failure;
use crate::domain::Result;
use crate::ports::ChainBackend;

/// Counts from one transaction poller tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TxTickReport {
    /// Transactions fetched and fanned out.
    pub added: usize,
    /// Ids that left the mempool.
    pub removed: usize,
    /// Ids whose fetch failed (retried next tick).
    pub failed: usize,
}

/// Background task discovering new mempool transactions.
pub struct TxPoller {
    backend: Arc<dyn ChainBackend>,
    dispatcher: Arc<EventDispatcher>,
    tracker: Arc<MempoolTracker>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl TxPoller {
    pub fn new(
        backend: Arc<dyn ChainBackend>,
        dispatcher: Arc<EventDispatcher>,
        tracker: Arc<MempoolTracker>,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            backend,
            dispatcher,
            tracker,
            interval,
            shutdown,
        }
    }

    /// Poll until shutdown is signalled.
    pub async fn run(mut self) {
        info!(
            "[tx-poller] Polling {} mempool every {:?}",
            self.backend.backend_id(),
            self.interval
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            if self.is_shutting_down() {
                break;
            }
            match self.poll_once().await {
                Ok(report) if report != TxTickReport::default() => debug!(
                    added = report.added,
                    removed = report.removed,
                    failed = report.failed,
                    "[tx-poller] Tick complete"
                ),
                Ok(_) => {}
                Err(e) => {
                    record_rpc_failure(&e);
                    warn!("[tx-poller] Tick abandoned: {}", e);
                }
            }
        }

        info!("[tx-poller] Stopped");
    }

    /// One tick over the backend mempool listing.
    pub async fn poll_once(&self) -> Result<TxTickReport> {
        let listing = self.backend.get_raw_mempool().await?;
        let delta = self.tracker.reconcile(&listing);
        if delta.is_empty() {
            return Ok(TxTickReport::default());
        }

        let mut report = TxTickReport {
            removed: delta.removed.len(),
            ..TxTickReport::default()
        };

        for txid in delta.removed {
            self.dispatcher.dispatch_removal(txid);
        }

        for txid in &delta.added {
            if self.is_shutting_down() {
                debug!("[tx-poller] Shutdown requested mid-tick");
                break;
            }
            match self.backend.get_raw_transaction(txid).await {
                Ok(tx) => {
                    TXS_POLLED.inc();
                    self.dispatcher.dispatch_transaction(Arc::new(tx));
                    report.added += 1;
                }
                Err(e) => {
                    record_rpc_failure(&e);
                    warn!("[tx-poller] Skipping {} until next tick: {}", txid, e);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}
