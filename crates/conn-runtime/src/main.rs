//! # Chain Connection Runtime
//!
//! Connects to a bitcoind node, registers one rescan client watching the
//! configured addresses, and logs what it is told until Ctrl+C.
//!
//! ## Startup Sequence
//!
//! 1. Initialize logging and metrics (`CC_LOG_LEVEL`, `CC_JSON_LOGS`)
//! 2. Load configuration (`CC_CONFIG_FILE`, then `CC_*` overrides)
//! 3. Connect and check the backend's network
//! 4. Register and start the client, then start the pollers
//! 5. On Ctrl+C stop the connection (clients first, then pollers)

mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use chain_conn::{ChainConnApi, Connection, Notification};
use conn_telemetry::{encode_metrics, init_telemetry, TelemetryConfig};
use tracing::{debug, info};

use crate::config::load_config;

fn log_notification(notification: &Notification) {
    match notification {
        Notification::ClientConnected(stamp) => info!("Client connected at {}", stamp),
        Notification::BlockConnected(stamp) => info!("Block connected: {}", stamp),
        Notification::FilteredBlockConnected {
            stamp,
            relevant_txs,
        } => {
            if !relevant_txs.is_empty() {
                info!(
                    "Block {} has {} relevant transaction(s)",
                    stamp,
                    relevant_txs.len()
                );
            }
        }
        Notification::RelevantTx { tx, block } => match block {
            Some(stamp) => info!("Relevant tx {} confirmed in {}", tx.compute_txid(), stamp),
            None => info!("Relevant tx {} in mempool", tx.compute_txid()),
        },
        Notification::HeightGapDetected { local, incoming } => {
            info!("Missed blocks between {} and {}", local, incoming)
        }
        Notification::CaughtUp { from, to } => info!("Caught up from {} to {}", from, to),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = TelemetryConfig::from_env();
    init_telemetry(&telemetry)?;

    let config = load_config()?;
    info!(
        "Connecting to {} ({})",
        config.backend.rpc_url(),
        config.backend.network
    );

    let conn: Arc<dyn ChainConnApi> = Arc::new(
        Connection::create(config.backend.clone())
            .await
            .context("connecting to backend")?,
    );

    let client = conn.new_client()?;
    for address in &config.watch_addresses {
        client.watch_address_str(address)?;
        info!("Watching {}", address);
    }
    if config.notify_blocks {
        client.notify_blocks();
    }
    if config.notify_all_mempool {
        client.notify_all_mempool();
    }

    let mut notifications = client
        .take_notifications()
        .context("notification receiver already taken")?;
    client.start()?;
    conn.start();

    info!("Connection is running. Press Ctrl+C to stop.");
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            notification = notifications.recv() => match notification {
                Some(notification) => log_notification(&notification),
                None => break,
            },
        }
    }

    conn.stop().await;

    if telemetry.metrics_enabled {
        debug!("Final metrics:\n{}", encode_metrics()?);
    }
    Ok(())
}
