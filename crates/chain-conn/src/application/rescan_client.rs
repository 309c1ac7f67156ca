//! # Rescan Client
//!
//! Per-subscriber state: watch-list, best block, mempool mirror and the
//! notification sink. Events arrive through a bounded buffer and are
//! applied by the client's own handler task, so a slow subscriber never
//! blocks the pollers.
//!
//! ## Block continuity
//!
//! A block is applied only if its height is exactly one above the client's
//! best height. Stale blocks are dropped. A block further ahead is rejected
//! with `HeightGapDetected`; with `auto_catch_up` the handler fetches the
//! missing heights from the backend before applying it.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Network, OutPoint, ScriptBuf, Transaction, Txid};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::registry::ClientRegistry;
use super::record_rpc_failure;
use super::watermark::Watermark;
use crate::algorithms::{filter_block, paid_outpoints, tx_matches};
use crate::domain::{
    invariant_next_height, BlockStamp, ChainConnError, ChainEvent, ClientId, ConnectedBlock,
    Notification, Result, WatchList,
};
use crate::ports::ChainBackend;

/// What a client needs from its connection.
pub(crate) struct ClientContext {
    pub network: Network,
    pub backend: Arc<dyn ChainBackend>,
    pub watermark: Arc<Watermark>,
    pub registry: Weak<ClientRegistry>,
    pub buffer_size: usize,
    pub auto_catch_up: bool,
}

/// Result of applying one block to a client.
#[derive(Clone, Debug, PartialEq)]
pub struct AppliedBlock {
    /// The client's new best block.
    pub stamp: BlockStamp,
    /// Transactions of the block matching the watch-list.
    pub relevant_txs: Vec<Transaction>,
}

/// One subscriber's view of the chain.
pub struct RescanClient {
    id: ClientId,
    network: Network,
    auto_catch_up: bool,
    backend: Arc<dyn ChainBackend>,
    watermark: Arc<Watermark>,
    registry: Weak<ClientRegistry>,

    watch: RwLock<WatchList>,
    best: Mutex<BlockStamp>,
    mempool: Mutex<HashSet<Txid>>,
    notify_blocks: AtomicBool,
    notify_all_mempool: AtomicBool,
    stopped: AtomicBool,

    /// Serializes block application between the handler and `catch_up`.
    apply_lock: AsyncMutex<()>,

    inbound_tx: mpsc::Sender<ChainEvent>,
    inbound_rx: Mutex<Option<mpsc::Receiver<ChainEvent>>>,
    notification_tx: mpsc::UnboundedSender<Notification>,
    notification_rx: Mutex<Option<mpsc::UnboundedReceiver<Notification>>>,
    shutdown_tx: watch::Sender<bool>,
    handler: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RescanClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RescanClient")
            .field("id", &self.id)
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

impl RescanClient {
    pub(crate) fn new(id: ClientId, ctx: ClientContext) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::channel(ctx.buffer_size.max(1));
        let (notification_tx, notification_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        let best = ctx.watermark.get();

        Arc::new(Self {
            id,
            network: ctx.network,
            auto_catch_up: ctx.auto_catch_up,
            backend: ctx.backend,
            watermark: ctx.watermark,
            registry: ctx.registry,
            watch: RwLock::new(WatchList::new()),
            best: Mutex::new(best),
            mempool: Mutex::new(HashSet::new()),
            notify_blocks: AtomicBool::new(false),
            notify_all_mempool: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            apply_lock: AsyncMutex::new(()),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            notification_tx,
            notification_rx: Mutex::new(Some(notification_rx)),
            shutdown_tx,
            handler: Mutex::new(None),
        })
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    // =========================================================================
    // Subscription
    // =========================================================================

    /// Watch payments to `address`.
    pub fn watch_address(&self, address: &Address) {
        self.watch.write().add_address(address);
    }

    /// Watch payments to each of `addresses`.
    pub fn watch_addresses<'a>(&self, addresses: impl IntoIterator<Item = &'a Address>) {
        let mut watch = self.watch.write();
        for address in addresses {
            watch.add_address(address);
        }
    }

    /// Parse `address` for this client's network and watch it.
    pub fn watch_address_str(&self, address: &str) -> Result<Address> {
        let parsed = Address::<NetworkUnchecked>::from_str(address)
            .map_err(|e| ChainConnError::InvalidAddress(format!("{}: {}", address, e)))?
            .require_network(self.network)
            .map_err(|e| ChainConnError::InvalidAddress(format!("{}: {}", address, e)))?;
        self.watch_address(&parsed);
        Ok(parsed)
    }

    /// Watch payments to a raw output script.
    pub fn watch_script(&self, script: ScriptBuf) {
        self.watch.write().add_script(script);
    }

    /// Watch spends of each outpoint.
    pub fn watch_outpoints(&self, outpoints: impl IntoIterator<Item = OutPoint>) {
        let mut watch = self.watch.write();
        for outpoint in outpoints {
            watch.add_outpoint(outpoint);
        }
    }

    /// Opt into `BlockConnected` notifications. Every client follows
    /// blocks and gets `FilteredBlockConnected` regardless.
    pub fn notify_blocks(&self) {
        self.notify_blocks.store(true, Ordering::Release);
    }

    /// Opt into every mempool transaction, not just watched ones.
    pub fn notify_all_mempool(&self) {
        self.notify_all_mempool.store(true, Ordering::Release);
    }

    /// Take the notification receiver. Only the first call gets it.
    pub fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<Notification>> {
        self.notification_rx.lock().take()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Last block applied to this client.
    pub fn best_block(&self) -> BlockStamp {
        *self.best.lock()
    }

    /// Whether `txid` is in this client's mempool mirror.
    pub fn mempool_contains(&self, txid: &Txid) -> bool {
        self.mempool.lock().contains(txid)
    }

    pub fn mempool_len(&self) -> usize {
        self.mempool.lock().len()
    }

    /// Whether `script` is watched.
    pub fn is_watching_script(&self, script: &ScriptBuf) -> bool {
        self.watch.read().contains_script(script)
    }

    /// Whether spends of `outpoint` are watched.
    pub fn is_watching_outpoint(&self, outpoint: &OutPoint) -> bool {
        self.watch.read().contains_outpoint(outpoint)
    }

    pub fn is_started(&self) -> bool {
        self.handler.lock().is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub(crate) fn wants_blocks(&self) -> bool {
        self.notify_blocks.load(Ordering::Acquire)
    }

    pub(crate) fn wants_transaction(&self, tx: &Transaction) -> bool {
        self.notify_all_mempool.load(Ordering::Acquire) || tx_matches(&self.watch.read(), tx)
    }

    // =========================================================================
    // State transitions
    // =========================================================================

    /// Apply `block` if it directly follows the best block.
    ///
    /// On success the best block advances, outputs paying watched scripts
    /// become watched outpoints, and the block's transactions leave the
    /// mempool mirror.
    pub fn receive_block(&self, block: &ConnectedBlock) -> Result<AppliedBlock> {
        let stamp = block.stamp();
        {
            let mut best = self.best.lock();
            invariant_next_height(&best, block.height)?;
            *best = stamp;
        }

        let relevant_txs = filter_block(&mut self.watch.write(), &block.block);

        let mut mempool = self.mempool.lock();
        for txid in block.txids() {
            mempool.remove(&txid);
        }

        Ok(AppliedBlock {
            stamp,
            relevant_txs,
        })
    }

    /// Record `tx` in the mempool mirror. Returns `false` if already there.
    ///
    /// Outputs paying watched scripts become watched outpoints so a later
    /// spend is matched too.
    pub fn receive_transaction(&self, tx: &Transaction) -> bool {
        if !self.mempool.lock().insert(tx.compute_txid()) {
            return false;
        }
        let mut watch = self.watch.write();
        for outpoint in paid_outpoints(&watch, tx) {
            watch.add_outpoint(outpoint);
        }
        true
    }

    /// Drop `txid` from the mempool mirror.
    pub fn forget_transaction(&self, txid: &Txid) -> bool {
        self.mempool.lock().remove(txid)
    }

    /// Hand `event` to the handler without waiting.
    pub(crate) fn deliver(&self, event: ChainEvent) -> Result<()> {
        if self.is_stopped() {
            return Err(ChainConnError::ClientAlreadyRemoved(self.id));
        }
        self.inbound_tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => ChainConnError::ClientLagging(self.id),
            TrySendError::Closed(_) => ChainConnError::ClientAlreadyRemoved(self.id),
        })
    }

    /// Fetch and apply every block between the best block and the
    /// connection watermark. Returns the new best block.
    pub async fn catch_up(&self) -> Result<BlockStamp> {
        let _apply = self.apply_lock.lock().await;
        let target = self.watermark.get().height;
        self.catch_up_to(target).await
    }

    async fn catch_up_to(&self, target: u32) -> Result<BlockStamp> {
        let from = self.best_block();
        if from.height >= target {
            return Ok(from);
        }

        info!(
            "[client {}] Catching up from {} to height {}",
            self.id, from, target
        );

        for height in from.height + 1..=target {
            if self.is_stopped() {
                debug!("[client {}] Catch-up interrupted by stop", self.id);
                break;
            }

            let block = self
                .backend
                .get_block_by_height(height)
                .await
                .inspect_err(record_rpc_failure)?;

            match self.receive_block(&ConnectedBlock::new(height, block)) {
                Ok(applied) => self.emit_block(applied),
                Err(err) if err.is_forward_gap() => return Err(err),
                Err(_) => continue,
            }
        }

        let to = self.best_block();
        if to.height > from.height {
            self.notify(Notification::CaughtUp { from, to });
        }
        Ok(to)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Spawn the handler task. Returns `false` if it is already running.
    pub fn start(self: &Arc<Self>) -> Result<bool> {
        if self.is_stopped() {
            return Err(ChainConnError::ClientAlreadyRemoved(self.id));
        }
        let Some(inbound) = self.inbound_rx.lock().take() else {
            return Ok(false);
        };
        let shutdown = self.shutdown_tx.subscribe();

        let best = self.best_block();
        self.notify(Notification::ClientConnected(best));

        let client = Arc::clone(self);
        let handle = tokio::spawn(async move { client.run(inbound, shutdown).await });
        *self.handler.lock() = Some(handle);

        info!("[client {}] Started at {}", self.id, best);
        Ok(true)
    }

    /// Stop the handler and unregister. Safe to call more than once.
    pub async fn stop(&self) {
        let already_stopped = self.stopped.swap(true, Ordering::AcqRel);
        self.shutdown_tx.send_replace(true);

        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
        self.inbound_rx.lock().take();

        let handler = self.handler.lock().take();
        if let Some(handler) = handler {
            if let Err(e) = handler.await {
                warn!("[client {}] Handler task failed: {}", self.id, e);
            }
        }

        if !already_stopped {
            info!("[client {}] Stopped at {}", self.id, self.best_block());
        }
    }

    async fn run(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<ChainEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                event = inbound.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
            }
        }
        debug!("[client {}] Handler exited", self.id);
    }

    async fn handle_event(&self, event: ChainEvent) {
        trace!("[client {}] Handling {}", self.id, event.kind());
        match event {
            ChainEvent::BlockConnected(block) => self.handle_block(&block).await,
            ChainEvent::MempoolTxAdded(tx) => {
                if self.receive_transaction(&tx) {
                    self.notify(Notification::RelevantTx { tx, block: None });
                }
            }
            ChainEvent::MempoolTxRemoved(txid) => {
                self.forget_transaction(&txid);
            }
        }
    }

    async fn handle_block(&self, block: &ConnectedBlock) {
        let _apply = self.apply_lock.lock().await;

        let err = match self.receive_block(block) {
            Ok(applied) => return self.emit_block(applied),
            Err(err) => err,
        };

        if !err.is_forward_gap() {
            debug!("[client {}] Dropping stale block: {}", self.id, err);
            return;
        }

        warn!("[client {}] {}", self.id, err);
        self.notify(Notification::HeightGapDetected {
            local: self.best_block().height,
            incoming: block.height,
        });

        if !self.auto_catch_up {
            return;
        }

        if let Err(e) = self.catch_up_to(block.height.saturating_sub(1)).await {
            warn!("[client {}] Catch-up failed: {}", self.id, e);
            return;
        }

        match self.receive_block(block) {
            Ok(applied) => self.emit_block(applied),
            Err(e) => warn!("[client {}] Block still rejected after catch-up: {}", self.id, e),
        }
    }

    fn emit_block(&self, applied: AppliedBlock) {
        if self.wants_blocks() {
            self.notify(Notification::BlockConnected(applied.stamp));
        }
        for tx in &applied.relevant_txs {
            self.notify(Notification::RelevantTx {
                tx: Arc::new(tx.clone()),
                block: Some(applied.stamp),
            });
        }
        self.notify(Notification::FilteredBlockConnected {
            stamp: applied.stamp,
            relevant_txs: applied.relevant_txs,
        });
    }

    fn notify(&self, notification: Notification) {
        if self.notification_tx.send(notification).is_err() {
            trace!("[client {}] Notification receiver dropped", self.id);
        }
    }
}
