//! # Ledger Engine Port
//!
//! The embedded Bitcoin ledger (chain state, mempool, block template
//! generation) is consumed through [`LedgerEngine`]. Script verification,
//! UTXO handling and PoW rules live behind this trait and are not part of
//! this workspace.

use crate::entities::Hash;
use crate::errors::LedgerError;
use crate::wire::{Block, Transaction};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A transaction admitted to the mempool.
#[derive(Debug, Clone)]
pub struct TxDesc {
    pub tx: Arc<Transaction>,
    pub hash: Hash,
    /// Fee in satoshis.
    pub fee: i64,
}

impl TxDesc {
    pub fn new(tx: Transaction, fee: i64) -> Self {
        let hash = tx.txid();
        Self {
            tx: Arc::new(tx),
            hash,
            fee,
        }
    }
}

/// A block known to the chain, with its height.
#[derive(Debug, Clone)]
pub struct ChainBlock {
    pub block: Arc<Block>,
    pub hash: Hash,
    pub height: u64,
}

impl ChainBlock {
    pub fn new(block: Block, height: u64) -> Self {
        let hash = block.block_hash();
        Self {
            block: Arc::new(block),
            hash,
            height,
        }
    }

    pub fn parent(&self) -> Hash {
        self.block.parent_hash()
    }

    /// Header timestamp in unix seconds.
    pub fn timestamp(&self) -> u64 {
        u64::from(self.block.header.timestamp)
    }
}

/// Snapshot of the best chain tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestState {
    pub hash: Hash,
    pub height: u64,
}

/// Result of handing a block to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessOutcome {
    /// The block extended (or reorganized to) the main chain.
    pub is_main_chain: bool,
    /// The parent is unknown; the block was parked, not connected.
    pub is_orphan: bool,
}

/// Validation flags passed to [`LedgerEngine::process_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BehaviorFlags(u32);

impl BehaviorFlags {
    pub const NONE: Self = Self(0);
    /// Skip checks already performed on a block we built ourselves.
    pub const FAST_ADD: Self = Self(1);
    /// Skip the proof-of-work check. Consensus finality replaces PoW here.
    pub const NO_POW_CHECK: Self = Self(1 << 1);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for BehaviorFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Address receiving the coinbase of locally built blocks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayoutAddress(pub String);

impl std::fmt::Display for PayoutAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A candidate block assembled from the mempool.
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub block: Block,
    pub height: u64,
}

/// Notifications emitted by the ledger.
///
/// Delivered over a bounded channel; the ledger drops events rather than
/// block when the receiver falls behind.
#[derive(Debug, Clone)]
pub enum LedgerEvent {
    /// Transactions entered the mempool.
    TxAccepted(Vec<TxDesc>),
    /// A block was connected to the main chain.
    BlockConnected(ChainBlock),
}

/// The embedded Bitcoin ledger.
pub trait LedgerEngine: Send + Sync {
    /// Mempool membership (including orphan transactions).
    fn have_transaction(&self, hash: &Hash) -> bool;

    /// Validate and admit a transaction.
    ///
    /// Returns every transaction that entered the mempool as a result,
    /// including orphans whose parent this transaction was.
    fn process_transaction(&self, tx: &Transaction) -> Result<Vec<TxDesc>, LedgerError>;

    /// Current mempool contents.
    fn tx_descriptors(&self) -> Vec<TxDesc>;

    /// Mempool contents eligible for inclusion in a block.
    fn mining_descriptors(&self) -> Vec<TxDesc>;

    /// Whether the block is known (main chain, side chain or orphan pool).
    fn have_block(&self, hash: &Hash) -> Result<bool, LedgerError>;

    fn process_block(
        &self,
        block: &Block,
        flags: BehaviorFlags,
    ) -> Result<ProcessOutcome, LedgerError>;

    fn best_snapshot(&self) -> Result<BestState, LedgerError>;

    /// Main-chain lookup.
    fn block_by_hash(&self, hash: &Hash) -> Result<ChainBlock, LedgerError>;

    /// Lookup across main and side chains.
    fn block_by_hash_any(&self, hash: &Hash) -> Result<ChainBlock, LedgerError>;

    fn block_hash_by_height(&self, height: u64) -> Result<Hash, LedgerError>;

    fn new_block_template(&self, payout: &PayoutAddress) -> Result<BlockTemplate, LedgerError>;
}
