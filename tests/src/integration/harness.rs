//! Shared setup for the scenario tests: a mock backend, a connection over
//! it, and helpers for waiting on asynchronous progress.

use std::sync::Arc;
use std::time::Duration;

use chain_conn::{BackendConfig, Connection, MockChainBackend, Notification};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

/// Poll interval used by the real-time tests.
pub const FAST_POLL_MS: u64 = 20;

/// Config with both pollers at `interval_ms`.
pub fn config_with_interval(interval_ms: u64) -> BackendConfig {
    BackendConfig {
        poll_block_interval_ms: interval_ms,
        poll_tx_interval_ms: interval_ms,
        ..BackendConfig::for_testing()
    }
}

/// Mock backend at `height` and a connection over it (not started).
pub async fn connect_at(height: u32, config: BackendConfig) -> (Arc<MockChainBackend>, Connection) {
    let mock = Arc::new(MockChainBackend::with_height(height));
    let conn = Connection::with_backend(config, mock.clone())
        .await
        .expect("mock backend accepts the handshake");
    (mock, conn)
}

/// Re-check `check` every few milliseconds until it holds or `within`
/// elapses. Works with both real and paused time.
pub async fn wait_until(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + within;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Collect `BlockConnected` heights until `height` is seen or `within`
/// elapses. Other notifications are handed to `other`.
pub async fn block_heights_until(
    rx: &mut UnboundedReceiver<Notification>,
    height: u32,
    within: Duration,
    mut other: impl FnMut(Notification),
) -> Vec<u32> {
    let deadline = Instant::now() + within;
    let mut heights = Vec::new();
    while heights.last() != Some(&height) {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(Notification::BlockConnected(stamp))) => heights.push(stamp.height),
            Ok(Some(notification)) => other(notification),
            _ => break,
        }
    }
    heights
}

/// Drain whatever is queued right now.
pub fn drain_now(rx: &mut UnboundedReceiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        out.push(notification);
    }
    out
}
