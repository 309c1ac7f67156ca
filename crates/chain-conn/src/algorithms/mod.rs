//! # Algorithms
//!
//! Pure functions used by the pollers and the rescan clients.

pub mod block_walk;
pub mod matching;
pub mod mempool_diff;

pub use block_walk::{plan_forward_walk, WalkPlan};
pub use matching::{filter_block, paid_outpoints, tx_matches};
pub use mempool_diff::{diff_mempool, MempoolDelta};
