//! Connection-wide best block.

use conn_telemetry::WATERMARK_HEIGHT;
use parking_lot::RwLock;

use crate::domain::{invariant_watermark_monotonic, BlockStamp};

/// Height and hash of the last block fanned out to clients.
///
/// Only ever moves forward.
#[derive(Debug)]
pub struct Watermark {
    best: RwLock<BlockStamp>,
}

impl Watermark {
    /// Start at `initial`.
    pub fn new(initial: BlockStamp) -> Self {
        WATERMARK_HEIGHT.set(i64::from(initial.height));
        Self {
            best: RwLock::new(initial),
        }
    }

    /// Current value.
    pub fn get(&self) -> BlockStamp {
        *self.best.read()
    }

    /// Move to `next` if it is strictly higher. Returns whether it moved.
    pub fn advance(&self, next: BlockStamp) -> bool {
        let mut best = self.best.write();
        if !invariant_watermark_monotonic(&best, &next) {
            return false;
        }
        *best = next;
        WATERMARK_HEIGHT.set(i64::from(next.height));
        true
    }
}
