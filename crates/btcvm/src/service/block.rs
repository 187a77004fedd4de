//! Block adapter: a ledger block in the shape the host engine consumes.

use crate::domain::ChainTips;
use crate::error::{Result, VmError};
use crate::ports::ConsensusBlock;
use async_trait::async_trait;
use shared_types::{
    BehaviorFlags, Block, BlockId, ChainBlock, LedgerEngine, LedgerError, WireDecode, WireEncode,
};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// An immutable view of one stored block.
///
/// Every field is captured at construction. The only side effect is
/// `accept`, which moves the VM's chain tips.
#[derive(Clone)]
pub struct BlockAdapter {
    block: Arc<Block>,
    id: BlockId,
    parent: BlockId,
    height: u64,
    timestamp: u64,
    bytes: Vec<u8>,
    tips: Arc<ChainTips>,
}

impl std::fmt::Debug for BlockAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockAdapter")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("height", &self.height)
            .field("timestamp", &self.timestamp)
            .field("size", &self.bytes.len())
            .finish()
    }
}

impl BlockAdapter {
    /// Wrap a block the ledger has already stored.
    pub fn from_chain_block(block: ChainBlock, tips: Arc<ChainTips>) -> Self {
        let bytes = block.block.to_wire_bytes();
        Self {
            id: block.hash,
            parent: block.parent(),
            height: block.height,
            timestamp: block.timestamp(),
            block: block.block,
            bytes,
            tips,
        }
    }

    /// Decode `bytes` and run them through ledger validation and storage.
    ///
    /// Blocks the ledger already holds are looked up as stored. A block that
    /// lands in the orphan pool is not retrievable and fails the lookup.
    pub fn parse(bytes: &[u8], ledger: &dyn LedgerEngine, tips: Arc<ChainTips>) -> Result<Self> {
        let block = Block::from_wire_bytes(bytes)?;
        let hash = block.block_hash();
        match ledger.process_block(&block, BehaviorFlags::NONE) {
            Ok(outcome) => debug!(
                block = %hash,
                main_chain = outcome.is_main_chain,
                orphan = outcome.is_orphan,
                "[btcvm] Processed parsed block"
            ),
            Err(LedgerError::Duplicate(_)) => debug!(block = %hash, "[btcvm] Parsed block already stored"),
            Err(e) => {
                error!(block = %hash, error = %e, "[btcvm] Failed to process parsed block");
                return Err(e.into());
            }
        }
        Self::from_id(hash, ledger, tips)
    }

    /// Look up a stored block on any branch.
    pub fn from_id(id: BlockId, ledger: &dyn LedgerEngine, tips: Arc<ChainTips>) -> Result<Self> {
        let block = ledger.block_by_hash_any(&id).map_err(VmError::Ledger)?;
        Ok(Self::from_chain_block(block, tips))
    }

    pub fn block(&self) -> &Arc<Block> {
        &self.block
    }

    /// Header timestamp in unix seconds.
    pub fn unix_timestamp(&self) -> u64 {
        self.timestamp
    }
}

#[async_trait]
impl ConsensusBlock for BlockAdapter {
    fn id(&self) -> BlockId {
        self.id
    }

    fn parent(&self) -> BlockId {
        self.parent
    }

    fn height(&self) -> u64 {
        self.height
    }

    fn timestamp(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.timestamp)
    }

    fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Validation ran when the block was stored.
    async fn verify(&self) -> Result<()> {
        debug!(block = %self.id, height = self.height, "[btcvm] Verify");
        Ok(())
    }

    /// Moves last-accepted and preferred to this block. Block building is
    /// driven by transaction events only, so nothing is scheduled here.
    async fn accept(&self) -> Result<()> {
        self.tips.accept(self.id);
        info!(block = %self.id, height = self.height, "[btcvm] Block accepted");
        Ok(())
    }

    async fn reject(&self) -> Result<()> {
        warn!(block = %self.id, height = self.height, "[btcvm] Block rejected by consensus");
        Ok(())
    }
}
