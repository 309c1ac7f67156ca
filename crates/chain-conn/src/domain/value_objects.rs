//! # Domain Value Objects
//!
//! Immutable value types shared by the pollers, the registry and the clients.

use std::fmt;
use std::sync::Arc;

use bitcoin::{Block, BlockHash, Transaction, Txid};
use serde::{Deserialize, Serialize};

/// Identifier of a rescan client within one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A (height, hash) pair identifying a block on the backend's chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockStamp {
    /// Block height.
    pub height: u32,
    /// Block hash.
    pub hash: BlockHash,
}

impl BlockStamp {
    /// Create a new block stamp.
    pub fn new(height: u32, hash: BlockHash) -> Self {
        Self { height, hash }
    }

    /// Whether `next` is the immediate successor height of this stamp.
    pub fn is_followed_by(&self, next: u32) -> bool {
        self.height.checked_add(1) == Some(next)
    }
}

impl fmt::Display for BlockStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.hash, self.height)
    }
}

/// A block fetched from the backend together with its height.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectedBlock {
    /// Height of the block on the backend's best chain.
    pub height: u32,
    /// The full block.
    pub block: Block,
}

impl ConnectedBlock {
    /// Create a connected block.
    pub fn new(height: u32, block: Block) -> Self {
        Self { height, block }
    }

    /// Stamp of this block.
    pub fn stamp(&self) -> BlockStamp {
        BlockStamp::new(self.height, self.block.block_hash())
    }

    /// Hash of the parent block.
    pub fn prev_hash(&self) -> BlockHash {
        self.block.header.prev_blockhash
    }

    /// Txids of every transaction in the block.
    pub fn txids(&self) -> impl Iterator<Item = Txid> + '_ {
        self.block.txdata.iter().map(Transaction::compute_txid)
    }
}

/// Chain events fanned out to clients.
///
/// This is the contract every event source (the pollers, or an external
/// push transport) feeds into `EventDispatcher::dispatch`.
#[derive(Clone, Debug)]
pub enum ChainEvent {
    /// A block was connected to the backend's best chain.
    BlockConnected(Arc<ConnectedBlock>),
    /// A transaction entered the backend's mempool.
    MempoolTxAdded(Arc<Transaction>),
    /// A transaction left the backend's mempool (mined or evicted).
    MempoolTxRemoved(Txid),
}

impl ChainEvent {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BlockConnected(_) => "block_connected",
            Self::MempoolTxAdded(_) => "mempool_tx_added",
            Self::MempoolTxRemoved(_) => "mempool_tx_removed",
        }
    }
}

/// Notifications a subscriber drains from its client's sink.
#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    /// The client's handler started; carries its starting best block.
    ClientConnected(BlockStamp),
    /// A block was connected (only for clients that opted into blocks).
    BlockConnected(BlockStamp),
    /// Block connected, with the transactions relevant to the watch-list.
    FilteredBlockConnected {
        /// The connected block.
        stamp: BlockStamp,
        /// Transactions matching the watch-list, in block order.
        relevant_txs: Vec<Transaction>,
    },
    /// A transaction relevant to the client entered the mempool or a block.
    RelevantTx {
        /// The transaction.
        tx: Arc<Transaction>,
        /// Containing block, `None` while unconfirmed.
        block: Option<BlockStamp>,
    },
    /// A block did not directly follow the client's best block.
    HeightGapDetected {
        /// Client's best height at the time.
        local: u32,
        /// Height of the rejected block.
        incoming: u32,
    },
    /// The client fetched missed blocks from the backend.
    CaughtUp {
        /// Best block before catching up.
        from: BlockStamp,
        /// Best block after catching up.
        to: BlockStamp,
    },
}
