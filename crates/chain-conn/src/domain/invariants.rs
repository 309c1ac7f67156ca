//! # Domain Invariants
//!
//! Rules the watermark and every client's best block must uphold.

use super::errors::{ChainConnError, Result};
use super::value_objects::BlockStamp;

/// Default capacity of a client's inbound hand-off.
pub const DEFAULT_CLIENT_BUFFER: usize = 1000;

/// Default block poll interval (milliseconds).
pub const DEFAULT_POLL_BLOCK_INTERVAL_MS: u64 = 60_000;

/// Default transaction poll interval (milliseconds).
pub const DEFAULT_POLL_TX_INTERVAL_MS: u64 = 60_000;

/// Invariant: a client only accepts the block directly above its best block.
///
/// Anything else, ahead or behind, is reported as a height gap.
pub fn invariant_next_height(local: &BlockStamp, incoming: u32) -> Result<()> {
    if !local.is_followed_by(incoming) {
        return Err(ChainConnError::HeightGapDetected {
            local: local.height,
            incoming,
        });
    }
    Ok(())
}

/// Invariant: the connection watermark never moves backwards.
///
/// The watermark advances only after a block has been handed to every
/// client, so a client's handler may apply that block (and briefly report
/// a best height one above the watermark) before the advance lands.
pub fn invariant_watermark_monotonic(current: &BlockStamp, next: &BlockStamp) -> bool {
    next.height > current.height
}
