//! # Connection
//!
//! Owns the backend handle, the client registry, the mempool tracker and
//! the watermark, and runs the two pollers.
//!
//! ## Lifecycle
//!
//! `create` validates the config and checks the backend serves the
//! configured network. `start` spawns the pollers (only when RPC polling is
//! on). `stop` releases the backend handle, stops every client, signals the
//! pollers and waits for them. Registering a client after `stop` fails with
//! `ConnectionStopped`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::Txid;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::block_poller::BlockPoller;
use super::dispatcher::EventDispatcher;
use super::mempool_tracker::MempoolTracker;
use super::registry::ClientRegistry;
use super::rescan_client::{ClientContext, RescanClient};
use super::tx_poller::TxPoller;
use super::watermark::Watermark;
use crate::config::BackendConfig;
use crate::domain::{BlockStamp, ChainConnError, ClientId, Result};
use crate::ports::{ChainBackend, ChainConnApi};

/// Chain backend connection shared by any number of rescan clients.
pub struct Connection {
    config: BackendConfig,
    /// `None` once stopped.
    backend: RwLock<Option<Arc<dyn ChainBackend>>>,
    registry: Arc<ClientRegistry>,
    tracker: Arc<MempoolTracker>,
    watermark: Arc<Watermark>,
    dispatcher: Arc<EventDispatcher>,
    next_client_id: AtomicU64,
    started: AtomicBool,
    stopped: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    /// Connect to the bitcoind described by `config`.
    #[cfg(feature = "rpc")]
    pub async fn create(config: BackendConfig) -> Result<Self> {
        config.validate()?;
        let backend = crate::adapters::BitcoindRpcClient::new(&config)?;
        Self::with_backend(config, Arc::new(backend)).await
    }

    /// Connect through an already-built backend.
    pub async fn with_backend(config: BackendConfig, backend: Arc<dyn ChainBackend>) -> Result<Self> {
        config.validate()?;

        let network = backend
            .get_network()
            .await
            .map_err(|e| ChainConnError::BackendUnreachable(e.to_string()))?;
        if network != config.network {
            error!(
                "[conn] Backend {} serves {}, expected {}",
                backend.backend_id(),
                network,
                config.network
            );
            return Err(ChainConnError::NetworkMismatch {
                expected: config.network,
                actual: network,
            });
        }

        let best = backend
            .get_best_block()
            .await
            .map_err(|e| ChainConnError::BackendUnreachable(e.to_string()))?;

        info!(
            "[conn] Connected to {} ({}) at {}",
            backend.backend_id(),
            network,
            best
        );

        let registry = Arc::new(ClientRegistry::new());
        let tracker = Arc::new(MempoolTracker::new());
        let watermark = Arc::new(Watermark::new(best));
        let dispatcher = Arc::new(EventDispatcher::new(
            registry.clone(),
            tracker.clone(),
            watermark.clone(),
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            backend: RwLock::new(Some(backend)),
            registry,
            tracker,
            watermark,
            dispatcher,
            next_client_id: AtomicU64::new(1),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            shutdown_tx,
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Allocate and register a new client starting at the watermark.
    ///
    /// The client buffers events until its `start` is called.
    pub fn new_client(&self) -> Result<Arc<RescanClient>> {
        // Held until the client is registered so `stop` cannot drain first.
        let guard = self.backend.read();
        let Some(backend) = guard.as_ref() else {
            warn!("[conn] new_client() after stop() rejected");
            return Err(ChainConnError::ConnectionStopped);
        };

        let id = ClientId(self.next_client_id.fetch_add(1, Ordering::Relaxed));
        let client = RescanClient::new(
            id,
            ClientContext {
                network: self.config.network,
                backend: backend.clone(),
                watermark: self.watermark.clone(),
                registry: Arc::downgrade(&self.registry),
                buffer_size: self.config.client_buffer_size,
                auto_catch_up: self.config.auto_catch_up,
            },
        );
        self.registry.insert(client.clone());
        info!("[conn] Registered client {} at {}", id, client.best_block());
        Ok(client)
    }

    /// Unregister a client. Its handler keeps running until it is stopped.
    pub fn remove_client(&self, id: ClientId) -> Option<Arc<RescanClient>> {
        self.registry.remove(id)
    }

    /// Look up a registered client.
    pub fn client(&self, id: ClientId) -> Option<Arc<RescanClient>> {
        self.registry.get(id)
    }

    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    /// Spawn the block and transaction pollers.
    ///
    /// Returns `true` only for the call that actually started them. With
    /// RPC polling off nothing is spawned and events are expected through
    /// `dispatcher()`.
    pub fn start(&self) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            warn!("[conn] start() after stop() ignored");
            return false;
        }
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        if !self.config.rpc_polling {
            info!("[conn] RPC polling disabled, waiting for pushed events");
            return true;
        }

        let Some(backend) = self.backend() else {
            return false;
        };
        let block_poller = BlockPoller::new(
            backend.clone(),
            self.dispatcher.clone(),
            self.config.poll_block_interval(),
            self.shutdown_tx.subscribe(),
        );
        let tx_poller = TxPoller::new(
            backend,
            self.dispatcher.clone(),
            self.tracker.clone(),
            self.config.poll_tx_interval(),
            self.shutdown_tx.subscribe(),
        );

        let mut workers = self.workers.lock();
        workers.push(tokio::spawn(block_poller.run()));
        workers.push(tokio::spawn(tx_poller.run()));

        info!("[conn] Started at {}", self.watermark.get());
        true
    }

    /// Stop every client, signal the pollers and wait for them to exit.
    ///
    /// Safe to call without `start` and more than once.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        // Waits out any registration in flight.
        drop(self.backend.write().take());
        info!("[conn] Stopping {} clients", self.registry.len());

        for client in self.registry.drain() {
            client.stop().await;
        }

        self.shutdown_tx.send_replace(true);

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("[conn] Poller task failed: {}", e);
            }
        }

        info!("[conn] Stopped at {}", self.watermark.get());
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Connection-wide watermark.
    pub fn best_block(&self) -> BlockStamp {
        self.watermark.get()
    }

    /// Whether the connection has already fanned out `txid`.
    pub fn mempool_contains(&self, txid: &Txid) -> bool {
        self.tracker.contains(txid)
    }

    pub fn mempool_len(&self) -> usize {
        self.tracker.len()
    }

    /// Entry point for events pushed by something other than the pollers.
    pub fn dispatcher(&self) -> Arc<EventDispatcher> {
        self.dispatcher.clone()
    }

    /// Backend handle, released by `stop`.
    pub fn backend(&self) -> Option<Arc<dyn ChainBackend>> {
        self.backend.read().clone()
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }
}

#[async_trait]
impl ChainConnApi for Connection {
    fn new_client(&self) -> Result<Arc<RescanClient>> {
        Connection::new_client(self)
    }

    fn remove_client(&self, id: ClientId) -> Option<Arc<RescanClient>> {
        Connection::remove_client(self, id)
    }

    fn start(&self) -> bool {
        Connection::start(self)
    }

    async fn stop(&self) {
        Connection::stop(self).await
    }

    fn best_block(&self) -> BlockStamp {
        Connection::best_block(self)
    }

    fn client_count(&self) -> usize {
        Connection::client_count(self)
    }
}
