//! # Mempool Tracker
//!
//! Connection-wide set of transaction ids already fetched and fanned out.
//! Prevents re-fetching the same transaction every poll tick.

use std::collections::HashSet;

use bitcoin::Txid;
use conn_telemetry::MEMPOOL_TRACKED;
use parking_lot::Mutex;

use crate::algorithms::{diff_mempool, MempoolDelta};

/// Ids of mempool transactions the connection has already delivered.
#[derive(Debug, Default)]
pub struct MempoolTracker {
    seen: Mutex<HashSet<Txid>>,
}

impl MempoolTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare a backend listing against the tracked set.
    ///
    /// Ids absent from the listing are pruned here. New ids are NOT
    /// inserted: the caller inserts each one only after fetching it, so a
    /// failed fetch is retried on the next tick.
    pub fn reconcile(&self, listing: &[Txid]) -> MempoolDelta {
        let mut seen = self.seen.lock();
        let delta = diff_mempool(&seen, listing);
        for txid in &delta.removed {
            seen.remove(txid);
        }
        MEMPOOL_TRACKED.set(seen.len() as i64);
        delta
    }

    /// Record a delivered transaction. Returns `false` if already tracked.
    pub fn insert(&self, txid: Txid) -> bool {
        let mut seen = self.seen.lock();
        let inserted = seen.insert(txid);
        MEMPOOL_TRACKED.set(seen.len() as i64);
        inserted
    }

    /// Forget a transaction. Returns whether it was tracked.
    pub fn remove(&self, txid: &Txid) -> bool {
        let mut seen = self.seen.lock();
        let removed = seen.remove(txid);
        MEMPOOL_TRACKED.set(seen.len() as i64);
        removed
    }

    pub fn contains(&self, txid: &Txid) -> bool {
        self.seen.lock().contains(txid)
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}
