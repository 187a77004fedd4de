//! # Test Utilities
//!
//! An in-memory [`LedgerEngine`] for exercising the gossip and VM crates
//! without a real chain database.
//!
//! Enable with the `test-utils` feature:
//!
//! ```toml
//! [dev-dependencies]
//! shared-types = { workspace = true, features = ["test-utils"] }
//! ```
//!
//! The engine keeps an ordered mempool, a block index with a main-chain
//! height table, an orphan-transaction pool and an orphan-block pool. Fault
//! injection switches (`reject_tx`, `reject_block`, `set_fail_templates`,
//! `set_unavailable`) drive the error paths.

use crate::entities::Hash;
use crate::errors::LedgerError;
use crate::ledger::{
    BehaviorFlags, BestState, BlockTemplate, ChainBlock, LedgerEngine, LedgerEvent, PayoutAddress,
    ProcessOutcome, TxDesc,
};
use crate::wire::{Block, BlockHeader, OutPoint, Transaction, TxIn, TxOut};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Fee assigned to every admitted transaction.
pub const TEST_FEE: i64 = 1_000;

/// Regtest difficulty bits.
pub const TEST_BITS: u32 = 0x207f_ffff;

const GENESIS_TIMESTAMP: u32 = 1_700_000_000;
const SUBSIDY: i64 = 50 * 100_000_000;

#[derive(Default)]
struct LedgerState {
    mempool: Vec<TxDesc>,
    /// Orphan transactions keyed by the txid of the parent they wait for.
    orphan_txs: HashMap<Hash, Vec<Transaction>>,
    blocks: HashMap<Hash, ChainBlock>,
    orphan_blocks: HashMap<Hash, Block>,
    main_chain: Vec<Hash>,
    rejected_txs: HashSet<Hash>,
    rejected_blocks: HashSet<Hash>,
    fail_templates: bool,
    unavailable: bool,
    templates_built: u32,
}

impl LedgerState {
    fn best(&self) -> Option<&ChainBlock> {
        self.main_chain.last().and_then(|hash| self.blocks.get(hash))
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.unavailable {
            return Err(LedgerError::Unavailable("in-memory ledger offline".into()));
        }
        Ok(())
    }
}

/// In-memory ledger engine.
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
    events: Mutex<Option<mpsc::Sender<LedgerEvent>>>,
    genesis: Hash,
    process_tx_calls: AtomicUsize,
    process_block_calls: AtomicUsize,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    /// A ledger holding only a genesis block at height 0.
    pub fn new() -> Self {
        let genesis_block = Block {
            header: BlockHeader {
                version: 1,
                prev_block: Hash::ZERO,
                merkle_root: Hash::ZERO,
                timestamp: GENESIS_TIMESTAMP,
                bits: TEST_BITS,
                nonce: 0,
            },
            transactions: vec![coinbase(0, &PayoutAddress("genesis".into()))],
        };
        let genesis = ChainBlock::new(genesis_block, 0);
        let hash = genesis.hash;

        let mut state = LedgerState::default();
        state.main_chain.push(hash);
        state.blocks.insert(hash, genesis);

        Self {
            state: Mutex::new(state),
            events: Mutex::new(None),
            genesis: hash,
            process_tx_calls: AtomicUsize::new(0),
            process_block_calls: AtomicUsize::new(0),
        }
    }

    /// Route ledger notifications into `sender`.
    pub fn with_events(self, sender: mpsc::Sender<LedgerEvent>) -> Self {
        *self.events.lock() = Some(sender);
        self
    }

    pub fn set_event_sender(&self, sender: mpsc::Sender<LedgerEvent>) {
        *self.events.lock() = Some(sender);
    }

    pub fn genesis_hash(&self) -> Hash {
        self.genesis
    }

    /// Park `tx` until the transaction it spends is admitted.
    pub fn add_orphan(&self, tx: Transaction) {
        let parent = tx
            .inputs
            .first()
            .map(|input| input.previous_output.txid)
            .unwrap_or(Hash::ZERO);
        self.state
            .lock()
            .orphan_txs
            .entry(parent)
            .or_default()
            .push(tx);
    }

    pub fn reject_tx(&self, hash: Hash) {
        self.state.lock().rejected_txs.insert(hash);
    }

    pub fn allow_tx(&self, hash: &Hash) {
        self.state.lock().rejected_txs.remove(hash);
    }

    pub fn reject_block(&self, hash: Hash) {
        self.state.lock().rejected_blocks.insert(hash);
    }

    pub fn set_fail_templates(&self, fail: bool) {
        self.state.lock().fail_templates = fail;
    }

    /// Make every fallible call return `LedgerError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    pub fn process_tx_calls(&self) -> usize {
        self.process_tx_calls.load(Ordering::SeqCst)
    }

    pub fn process_block_calls(&self) -> usize {
        self.process_block_calls.load(Ordering::SeqCst)
    }

    pub fn mempool_len(&self) -> usize {
        self.state.lock().mempool.len()
    }

    pub fn best_height(&self) -> u64 {
        self.state.lock().best().map(|b| b.height).unwrap_or(0)
    }

    /// Build and connect a block holding the whole mempool, as another
    /// producer on the network would.
    pub fn mine_block(&self) -> Result<ChainBlock, LedgerError> {
        let template = self.new_block_template(&PayoutAddress("external-miner".into()))?;
        let hash = template.block.block_hash();
        self.process_block(&template.block, BehaviorFlags::NO_POW_CHECK)?;
        self.block_by_hash(&hash)
    }

    /// Build a block on `parent` without connecting it.
    pub fn make_block(&self, parent: Hash, nonce: u32, txs: Vec<Transaction>) -> Block {
        let timestamp = self
            .state
            .lock()
            .blocks
            .get(&parent)
            .map(|b| b.block.header.timestamp + 1)
            .unwrap_or(GENESIS_TIMESTAMP);
        let mut transactions = vec![coinbase(u64::from(nonce), &PayoutAddress("peer".into()))];
        transactions.extend(txs);
        Block {
            header: BlockHeader {
                version: 0x2000_0000,
                prev_block: parent,
                merkle_root: merkle_stub(&transactions),
                timestamp,
                bits: TEST_BITS,
                nonce,
            },
            transactions,
        }
    }

    fn emit(&self, event: LedgerEvent) {
        if let Some(sender) = self.events.lock().as_ref() {
            // Like the real engine, never block the caller on a slow consumer.
            let _ = sender.try_send(event);
        }
    }
}

impl LedgerEngine for InMemoryLedger {
    fn have_transaction(&self, hash: &Hash) -> bool {
        let state = self.state.lock();
        state.mempool.iter().any(|desc| &desc.hash == hash)
            || state
                .orphan_txs
                .values()
                .flatten()
                .any(|tx| &tx.txid() == hash)
    }

    fn process_transaction(&self, tx: &Transaction) -> Result<Vec<TxDesc>, LedgerError> {
        self.process_tx_calls.fetch_add(1, Ordering::SeqCst);
        let accepted = {
            let mut state = self.state.lock();
            state.check_available()?;

            let hash = tx.txid();
            if state.rejected_txs.contains(&hash) {
                return Err(LedgerError::Rejected(format!("transaction {hash} is invalid")));
            }
            if state.mempool.iter().any(|desc| desc.hash == hash) {
                return Err(LedgerError::Duplicate(hash));
            }

            let mut accepted = vec![TxDesc::new(tx.clone(), TEST_FEE)];
            let mut cursor = 0;
            while cursor < accepted.len() {
                let parent = accepted[cursor].hash;
                if let Some(children) = state.orphan_txs.remove(&parent) {
                    accepted.extend(children.into_iter().map(|c| TxDesc::new(c, TEST_FEE)));
                }
                cursor += 1;
            }
            state.mempool.extend(accepted.iter().cloned());
            accepted
        };
        self.emit(LedgerEvent::TxAccepted(accepted.clone()));
        Ok(accepted)
    }

    fn tx_descriptors(&self) -> Vec<TxDesc> {
        self.state.lock().mempool.clone()
    }

    fn mining_descriptors(&self) -> Vec<TxDesc> {
        self.state.lock().mempool.clone()
    }

    fn have_block(&self, hash: &Hash) -> Result<bool, LedgerError> {
        let state = self.state.lock();
        state.check_available()?;
        Ok(state.blocks.contains_key(hash) || state.orphan_blocks.contains_key(hash))
    }

    fn process_block(
        &self,
        block: &Block,
        _flags: BehaviorFlags,
    ) -> Result<ProcessOutcome, LedgerError> {
        self.process_block_calls.fetch_add(1, Ordering::SeqCst);
        let connected = {
            let mut state = self.state.lock();
            state.check_available()?;

            let hash = block.block_hash();
            if state.rejected_blocks.contains(&hash) {
                return Err(LedgerError::Rejected(format!("block {hash} is invalid")));
            }
            if state.blocks.contains_key(&hash) || state.orphan_blocks.contains_key(&hash) {
                return Err(LedgerError::Duplicate(hash));
            }

            let parent = block.parent_hash();
            let Some(parent_height) = state.blocks.get(&parent).map(|b| b.height) else {
                state.orphan_blocks.insert(hash, block.clone());
                return Ok(ProcessOutcome {
                    is_main_chain: false,
                    is_orphan: true,
                });
            };

            let extends_tip = state.main_chain.last() == Some(&parent);
            let chain_block = ChainBlock::new(block.clone(), parent_height + 1);
            state.blocks.insert(hash, chain_block.clone());
            if !extends_tip {
                return Ok(ProcessOutcome::default());
            }

            state.main_chain.push(hash);
            let mined: HashSet<Hash> = block.transactions.iter().map(|tx| tx.txid()).collect();
            state.mempool.retain(|desc| !mined.contains(&desc.hash));
            chain_block
        };
        self.emit(LedgerEvent::BlockConnected(connected));
        Ok(ProcessOutcome {
            is_main_chain: true,
            is_orphan: false,
        })
    }

    fn best_snapshot(&self) -> Result<BestState, LedgerError> {
        let state = self.state.lock();
        state.check_available()?;
        state
            .best()
            .map(|b| BestState {
                hash: b.hash,
                height: b.height,
            })
            .ok_or_else(|| LedgerError::Unavailable("empty chain".into()))
    }

    fn block_by_hash(&self, hash: &Hash) -> Result<ChainBlock, LedgerError> {
        let state = self.state.lock();
        state.check_available()?;
        let block = state.blocks.get(hash).ok_or(LedgerError::NotFound(*hash))?;
        let on_main = state.main_chain.get(block.height as usize) == Some(hash);
        if !on_main {
            return Err(LedgerError::NotFound(*hash));
        }
        Ok(block.clone())
    }

    fn block_by_hash_any(&self, hash: &Hash) -> Result<ChainBlock, LedgerError> {
        let state = self.state.lock();
        state.check_available()?;
        state
            .blocks
            .get(hash)
            .cloned()
            .ok_or(LedgerError::NotFound(*hash))
    }

    fn block_hash_by_height(&self, height: u64) -> Result<Hash, LedgerError> {
        let state = self.state.lock();
        state.check_available()?;
        state
            .main_chain
            .get(height as usize)
            .copied()
            .ok_or(LedgerError::HeightNotFound(height))
    }

    fn new_block_template(&self, payout: &PayoutAddress) -> Result<BlockTemplate, LedgerError> {
        let mut state = self.state.lock();
        state.check_available()?;
        if state.fail_templates {
            return Err(LedgerError::Template("template generation disabled".into()));
        }
        let best = state
            .best()
            .cloned()
            .ok_or_else(|| LedgerError::Unavailable("empty chain".into()))?;
        state.templates_built += 1;

        let height = best.height + 1;
        let mut transactions = vec![coinbase(height, payout)];
        transactions.extend(state.mempool.iter().map(|desc| desc.tx.as_ref().clone()));
        let block = Block {
            header: BlockHeader {
                version: 0x2000_0000,
                prev_block: best.hash,
                merkle_root: merkle_stub(&transactions),
                timestamp: best.block.header.timestamp + 1,
                bits: TEST_BITS,
                nonce: state.templates_built,
            },
            transactions,
        };
        Ok(BlockTemplate { block, height })
    }
}

fn coinbase(height: u64, payout: &PayoutAddress) -> Transaction {
    let mut script_sig = height.to_le_bytes().to_vec();
    script_sig.extend_from_slice(payout.0.as_bytes());
    Transaction {
        version: 1,
        inputs: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig,
            sequence: u32::MAX,
            witness: Vec::new(),
        }],
        outputs: vec![TxOut {
            value: SUBSIDY,
            script_pubkey: payout.0.as_bytes().to_vec(),
        }],
        lock_time: 0,
    }
}

/// Commitment over the txids; stands in for the merkle root.
fn merkle_stub(transactions: &[Transaction]) -> Hash {
    let mut buf = Vec::with_capacity(transactions.len() * Hash::LEN);
    for tx in transactions {
        buf.extend_from_slice(tx.txid().as_bytes());
    }
    Hash::double_sha256(&buf)
}

/// A standalone transaction spending a fabricated outpoint.
pub fn sample_transaction(seed: u8) -> Transaction {
    Transaction {
        version: 2,
        inputs: vec![TxIn {
            previous_output: OutPoint {
                txid: Hash([seed; 32]),
                vout: 0,
            },
            script_sig: vec![0x51, seed],
            sequence: u32::MAX - 1,
            witness: Vec::new(),
        }],
        outputs: vec![TxOut {
            value: 10_000 + i64::from(seed),
            script_pubkey: vec![0x00, 0x14, seed],
        }],
        lock_time: 0,
    }
}

/// A transaction spending output 0 of `parent`.
pub fn child_transaction(parent: &Transaction) -> Transaction {
    Transaction {
        version: 2,
        inputs: vec![TxIn {
            previous_output: OutPoint {
                txid: parent.txid(),
                vout: 0,
            },
            script_sig: Vec::new(),
            sequence: u32::MAX,
            witness: vec![vec![0x30; 8]],
        }],
        outputs: vec![TxOut {
            value: 5_000,
            script_pubkey: vec![0x51],
        }],
        lock_time: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orphan_transactions_cascade() {
        let ledger = InMemoryLedger::new();
        let parent = sample_transaction(1);
        let child = child_transaction(&parent);
        let grandchild = child_transaction(&child);
        ledger.add_orphan(child.clone());
        ledger.add_orphan(grandchild.clone());

        assert!(ledger.have_transaction(&child.txid()));
        let accepted = ledger.process_transaction(&parent).unwrap();
        let hashes: Vec<Hash> = accepted.iter().map(|d| d.hash).collect();
        assert_eq!(hashes, vec![parent.txid(), child.txid(), grandchild.txid()]);
        assert_eq!(ledger.mempool_len(), 3);
    }

    #[test]
    fn test_mined_block_clears_mempool() {
        let ledger = InMemoryLedger::new();
        ledger.process_transaction(&sample_transaction(1)).unwrap();
        let block = ledger.mine_block().unwrap();
        assert_eq!(block.height, 1);
        assert_eq!(ledger.mempool_len(), 0);
        assert_eq!(ledger.block_hash_by_height(1).unwrap(), block.hash);
    }

    #[test]
    fn test_unknown_parent_is_orphan() {
        let ledger = InMemoryLedger::new();
        let block = ledger.make_block(Hash([9; 32]), 1, Vec::new());
        let outcome = ledger.process_block(&block, BehaviorFlags::NONE).unwrap();
        assert!(outcome.is_orphan);
        assert!(ledger.have_block(&block.block_hash()).unwrap());
        assert!(ledger.block_by_hash_any(&block.block_hash()).is_err());
    }

    #[test]
    fn test_side_chain_only_visible_through_any_lookup() {
        let ledger = InMemoryLedger::new();
        let main = ledger.mine_block().unwrap();
        let side = ledger.make_block(ledger.genesis_hash(), 77, Vec::new());
        let outcome = ledger.process_block(&side, BehaviorFlags::NONE).unwrap();
        assert!(!outcome.is_main_chain);
        assert!(ledger.block_by_hash(&side.block_hash()).is_err());
        assert_eq!(ledger.block_by_hash_any(&side.block_hash()).unwrap().height, 1);
        assert_eq!(ledger.best_snapshot().unwrap().hash, main.hash);
    }

    #[test]
    fn test_events_are_emitted() {
        let (tx, mut rx) = mpsc::channel(8);
        let ledger = InMemoryLedger::new().with_events(tx);
        ledger.process_transaction(&sample_transaction(3)).unwrap();
        ledger.mine_block().unwrap();
        assert!(matches!(rx.try_recv(), Ok(LedgerEvent::TxAccepted(descs)) if descs.len() == 1));
        assert!(matches!(rx.try_recv(), Ok(LedgerEvent::BlockConnected(b)) if b.height == 1));
    }
}
