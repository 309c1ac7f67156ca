//! # Block Poller
//!
//! Periodically asks the backend for its best block and walks forward from
//! the watermark, fanning each block out in height order. A failed query
//! abandons the tick; the next tick resumes from the watermark, so no
//! height is skipped.

use std::sync::Arc;
use std::time::Duration;

use conn_telemetry::BLOCKS_POLLED;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::dispatcher::EventDispatcher;
use super::record_rpc_failure;
use crate::algorithms::{plan_forward_walk, WalkPlan};
use crate::domain::{ConnectedBlock, Result};
use crate::ports::ChainBackend;

/// Background task discovering new blocks.
pub struct BlockPoller {
    backend: Arc<dyn ChainBackend>,
    dispatcher: Arc<EventDispatcher>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl BlockPoller {
    pub fn new(
        backend: Arc<dyn ChainBackend>,
        dispatcher: Arc<EventDispatcher>,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            backend,
            dispatcher,
            interval,
            shutdown,
        }
    }

    /// Poll until shutdown is signalled.
    pub async fn run(mut self) {
        info!(
            "[block-poller] Polling {} every {:?}",
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
            if let Err(e) = self.poll_once().await {
                record_rpc_failure(&e);
                warn!("[block-poller] Tick abandoned: {}", e);
            }
        }

        info!("[block-poller] Stopped");
    }

    /// One tick: deliver every block between the watermark and the
    /// backend's best. Returns how many blocks were delivered.
    pub async fn poll_once(&self) -> Result<usize> {
        let best = self.backend.get_best_block().await?;

        let plan = plan_forward_walk(&self.dispatcher.watermark(), &best);
        if plan.block_count() > 0 {
            debug!(
                "[block-poller] Walking {} block(s) up to {}",
                plan.block_count(),
                best
            );
        }

        let heights = match plan {
            WalkPlan::UpToDate => return Ok(0),
            WalkPlan::Diverged { watermark, best } => {
                warn!(
                    "[block-poller] Backend best {} is not ahead of watermark {} (possible reorg); not walking backwards",
                    best, watermark
                );
                return Ok(0);
            }
            WalkPlan::Forward(heights) => heights,
        };

        let mut delivered = 0;
        for height in heights {
            if self.is_shutting_down() {
                debug!("[block-poller] Shutdown requested mid-walk at height {}", height);
                break;
            }

            let block = self.backend.get_block_by_height(height).await?;
            BLOCKS_POLLED.inc();

            let connected = Arc::new(ConnectedBlock::new(height, block));
            let watermark = self.dispatcher.watermark();
            if connected.prev_hash() != watermark.hash {
                warn!(
                    "[block-poller] Block {} does not build on watermark {} (possible reorg)",
                    connected.stamp(),
                    watermark
                );
            }

            let report = self.dispatcher.dispatch_block(connected);
            debug!(
                height = height,
                delivered = report.delivered,
                dropped = report.dropped,
                "[block-poller] Block dispatched"
            );
            delivered += 1;
        }
        Ok(delivered)
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}
