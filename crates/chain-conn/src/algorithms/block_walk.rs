//! # Forward Walk Planning
//!
//! Decides what a block poller tick has to fetch, given the connection
//! watermark and the backend's current best block.

use std::ops::RangeInclusive;

use crate::domain::BlockStamp;

/// What a block poller tick should do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalkPlan {
    /// Backend best equals the watermark.
    UpToDate,
    /// Fetch and deliver every height in the range, in order.
    Forward(RangeInclusive<u32>),
    /// Backend best is not above the watermark but differs from it.
    ///
    /// The watermark never moves backwards, so nothing is fetched.
    Diverged {
        /// Connection watermark.
        watermark: BlockStamp,
        /// Backend best block.
        best: BlockStamp,
    },
}

impl WalkPlan {
    /// Number of blocks the plan fetches.
    pub fn block_count(&self) -> usize {
        match self {
            Self::Forward(range) => range.clone().count(),
            _ => 0,
        }
    }
}

/// Plan the walk from `watermark` to `best`.
pub fn plan_forward_walk(watermark: &BlockStamp, best: &BlockStamp) -> WalkPlan {
    if best == watermark {
        return WalkPlan::UpToDate;
    }
    if best.height <= watermark.height {
        return WalkPlan::Diverged {
            watermark: *watermark,
            best: *best,
        };
    }
    WalkPlan::Forward((watermark.height + 1)..=best.height)
}
