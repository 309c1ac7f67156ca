//! # Outbound Ports
//!
//! The backend RPC surface the connection consumes, plus an in-memory
//! simulated node for tests.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::block::{Header, Version as BlockVersion};
use bitcoin::hashes::Hash;
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, Block, BlockHash, CompactTarget, Network, OutPoint, ScriptBuf, Sequence, Transaction,
    TxIn, TxMerkleNode, TxOut, Txid, Witness,
};
use parking_lot::RwLock;

use crate::domain::{BlockStamp, ChainConnError, Result};

/// Full-node RPC connection - outbound port.
///
/// Implementations are shared read-only by both pollers and by every
/// client's catch-up path, so all methods take `&self`.
#[async_trait]
pub trait ChainBackend: Send + Sync {
    /// Authenticate and report which chain the backend serves.
    async fn get_network(&self) -> Result<Network>;

    /// Current best block (height, hash).
    async fn get_best_block(&self) -> Result<BlockStamp>;

    /// Block at `height` on the backend's best chain.
    async fn get_block_by_height(&self, height: u32) -> Result<Block>;

    /// Ids of every transaction currently in the backend's mempool.
    async fn get_raw_mempool(&self) -> Result<Vec<Txid>>;

    /// Full transaction by id.
    async fn get_raw_transaction(&self, txid: &Txid) -> Result<Transaction>;

    /// Backend identifier (for logging).
    fn backend_id(&self) -> &str;
}

// =============================================================================
// Mock Implementation for Testing
// =============================================================================

/// RPC surface of the mock that can be made to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MockMethod {
    /// `get_network`
    Network,
    /// `get_best_block`
    BestBlock,
    /// `get_block_by_height`
    BlockByHeight,
    /// `get_raw_mempool`
    RawMempool,
    /// `get_raw_transaction`
    RawTransaction,
}

impl MockMethod {
    fn rpc_name(self) -> &'static str {
        match self {
            Self::Network => "getblockchaininfo",
            Self::BestBlock => "getbestblock",
            Self::BlockByHeight => "getblock",
            Self::RawMempool => "getrawmempool",
            Self::RawTransaction => "getrawtransaction",
        }
    }
}

struct MockChainState {
    network: Network,
    blocks: Vec<Block>,
    mempool: Vec<Transaction>,
    failing: HashSet<MockMethod>,
    failing_txids: HashSet<Txid>,
    calls: HashMap<MockMethod, usize>,
    salt: u32,
}

/// Simulated full node.
///
/// Starts with a genesis block at height 0. Blocks are mined on demand and
/// the mempool is an ordered list of transactions.
pub struct MockChainBackend {
    id: String,
    state: RwLock<MockChainState>,
}

impl Default for MockChainBackend {
    fn default() -> Self {
        Self::new(Network::Regtest)
    }
}

impl MockChainBackend {
    /// Create a mock serving `network`, holding only a genesis block.
    pub fn new(network: Network) -> Self {
        let genesis = mock_block(BlockHash::all_zeros(), 0, 0, Vec::new());
        Self {
            id: "mock-backend".to_string(),
            state: RwLock::new(MockChainState {
                network,
                blocks: vec![genesis],
                mempool: Vec::new(),
                failing: HashSet::new(),
                failing_txids: HashSet::new(),
                calls: HashMap::new(),
                salt: 0,
            }),
        }
    }

    /// Create a regtest mock already at `height`.
    pub fn with_height(height: u32) -> Self {
        let mock = Self::default();
        mock.mine_blocks(height);
        mock
    }

    /// Mine `count` coinbase-only blocks. Returns their stamps.
    pub fn mine_blocks(&self, count: u32) -> Vec<BlockStamp> {
        let mut state = self.state.write();
        (0..count)
            .map(|_| Self::push_block(&mut state, Vec::new()))
            .collect()
    }

    /// Mine one block containing the whole mempool, emptying it.
    pub fn mine_mempool(&self) -> BlockStamp {
        let mut state = self.state.write();
        let txs = std::mem::take(&mut state.mempool);
        Self::push_block(&mut state, txs)
    }

    /// Replace the top `depth` blocks with a competing branch of equal length.
    pub fn reorg(&self, depth: u32) -> BlockStamp {
        let mut state = self.state.write();
        let keep = state.blocks.len().saturating_sub(depth as usize).max(1);
        state.blocks.truncate(keep);
        state.salt += 1;
        let mut tip = Self::tip(&state);
        for _ in 0..depth {
            tip = Self::push_block(&mut state, Vec::new());
        }
        tip
    }

    /// Add a transaction to the mempool.
    pub fn add_to_mempool(&self, tx: Transaction) -> Txid {
        let txid = tx.compute_txid();
        self.state.write().mempool.push(tx);
        txid
    }

    /// Drop a transaction from the mempool (eviction).
    pub fn remove_from_mempool(&self, txid: &Txid) -> bool {
        let mut state = self.state.write();
        let before = state.mempool.len();
        state.mempool.retain(|tx| tx.compute_txid() != *txid);
        state.mempool.len() != before
    }

    /// Make every call of `method` fail (or succeed again).
    pub fn set_failing(&self, method: MockMethod, failing: bool) {
        let mut state = self.state.write();
        if failing {
            state.failing.insert(method);
        } else {
            state.failing.remove(&method);
        }
    }

    /// Make `get_raw_transaction` fail for one txid only.
    pub fn fail_transaction(&self, txid: Txid, failing: bool) {
        let mut state = self.state.write();
        if failing {
            state.failing_txids.insert(txid);
        } else {
            state.failing_txids.remove(&txid);
        }
    }

    /// Change the network reported by `get_network`.
    pub fn set_network(&self, network: Network) {
        self.state.write().network = network;
    }

    /// Current best block.
    pub fn best_block(&self) -> BlockStamp {
        Self::tip(&self.state.read())
    }

    /// Stamp of the block at `height`, if mined.
    pub fn stamp_at(&self, height: u32) -> Option<BlockStamp> {
        self.state
            .read()
            .blocks
            .get(height as usize)
            .map(|block| BlockStamp::new(height, block.block_hash()))
    }

    /// Number of transactions in the mempool.
    pub fn mempool_len(&self) -> usize {
        self.state.read().mempool.len()
    }

    /// Number of calls made to `method`, failed ones included.
    pub fn call_count(&self, method: MockMethod) -> usize {
        self.state.read().calls.get(&method).copied().unwrap_or(0)
    }

    fn tip(state: &MockChainState) -> BlockStamp {
        let height = (state.blocks.len() - 1) as u32;
        BlockStamp::new(height, state.blocks[height as usize].block_hash())
    }

    fn push_block(state: &mut MockChainState, mut txs: Vec<Transaction>) -> BlockStamp {
        let height = state.blocks.len() as u32;
        let prev = state.blocks[height as usize - 1].block_hash();
        txs.insert(0, mock_coinbase(height, state.salt));
        let block = mock_block(prev, height, state.salt, txs);
        let stamp = BlockStamp::new(height, block.block_hash());
        state.blocks.push(block);
        stamp
    }

    fn enter(&self, method: MockMethod) -> Result<()> {
        let mut state = self.state.write();
        *state.calls.entry(method).or_insert(0) += 1;
        if state.failing.contains(&method) {
            return Err(ChainConnError::rpc(method.rpc_name(), "mock failure"));
        }
        Ok(())
    }
}

fn mock_coinbase(height: u32, salt: u32) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::from_consensus(height),
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: ScriptBuf::from_bytes(salt.to_le_bytes().to_vec()),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(50 * 100_000_000),
            script_pubkey: ScriptBuf::new(),
        }],
    }
}

fn mock_block(prev: BlockHash, height: u32, salt: u32, txdata: Vec<Transaction>) -> Block {
    Block {
        header: Header {
            version: BlockVersion::ONE,
            prev_blockhash: prev,
            merkle_root: TxMerkleNode::all_zeros(),
            time: 1_600_000_000 + height,
            bits: CompactTarget::from_consensus(0x207f_ffff),
            nonce: height.wrapping_add(salt.wrapping_mul(1_000_003)),
        },
        txdata,
    }
}

#[async_trait]
impl ChainBackend for MockChainBackend {
    async fn get_network(&self) -> Result<Network> {
        self.enter(MockMethod::Network)?;
        Ok(self.state.read().network)
    }

    async fn get_best_block(&self) -> Result<BlockStamp> {
        self.enter(MockMethod::BestBlock)?;
        Ok(self.best_block())
    }

    async fn get_block_by_height(&self, height: u32) -> Result<Block> {
        self.enter(MockMethod::BlockByHeight)?;
        self.state
            .read()
            .blocks
            .get(height as usize)
            .cloned()
            .ok_or_else(|| ChainConnError::rpc("getblockhash", "Block height out of range"))
    }

    async fn get_raw_mempool(&self) -> Result<Vec<Txid>> {
        self.enter(MockMethod::RawMempool)?;
        Ok(self
            .state
            .read()
            .mempool
            .iter()
            .map(Transaction::compute_txid)
            .collect())
    }

    async fn get_raw_transaction(&self, txid: &Txid) -> Result<Transaction> {
        self.enter(MockMethod::RawTransaction)?;
        let state = self.state.read();
        if state.failing_txids.contains(txid) {
            return Err(ChainConnError::rpc("getrawtransaction", "mock failure"));
        }
        state
            .mempool
            .iter()
            .find(|tx| tx.compute_txid() == *txid)
            .cloned()
            .ok_or_else(|| {
                ChainConnError::rpc("getrawtransaction", "No such mempool transaction")
            })
    }

    fn backend_id(&self) -> &str {
        &self.id
    }
}
