//! Dedup set: routes gossiped items into the ledger and tracks what this
//! node has seen in the advertised filter.

use crate::domain::{GossipFilter, GossipItem};
use crate::error::Result;
use crate::metrics::GossipMetrics;
use crate::ports::GossipSet;
use parking_lot::RwLock;
use shared_types::{BehaviorFlags, Block, Hash, LedgerEngine, LedgerError, Transaction};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Gossip set backed by the ledger engine.
///
/// The filter is an optimization for peers; `has` always asks the ledger.
/// `add` holds the write lock for the whole ledger round trip so concurrent
/// deliveries of the same item are processed once.
pub struct DedupSet {
    ledger: Arc<dyn LedgerEngine>,
    filter: RwLock<GossipFilter>,
    /// Re-announcements of transactions admitted as a side effect of `add`.
    outbound: mpsc::UnboundedSender<GossipItem>,
    metrics: Arc<GossipMetrics>,
}

impl DedupSet {
    pub fn new(
        ledger: Arc<dyn LedgerEngine>,
        filter: GossipFilter,
        outbound: mpsc::UnboundedSender<GossipItem>,
        metrics: Arc<GossipMetrics>,
    ) -> Self {
        Self {
            ledger,
            filter: RwLock::new(filter),
            outbound,
            metrics,
        }
    }

    /// Whether `id` is in the current filter generation.
    pub fn filter_contains(&self, id: &Hash) -> bool {
        self.filter.read().has(id)
    }

    pub fn filter_generation(&self) -> u64 {
        self.filter.read().generation()
    }

    fn add_tx(&self, filter: &mut GossipFilter, tx: Arc<Transaction>) -> Result<()> {
        let id = tx.txid();
        if self.ledger.have_transaction(&id) {
            debug!(tx = %id, "[gossip] Transaction already known");
            filter.add(&id);
            GossipMetrics::incr(&self.metrics.txs_known);
            return Ok(());
        }

        let accepted = match self.ledger.process_transaction(&tx) {
            Ok(accepted) => accepted,
            Err(LedgerError::Duplicate(_)) => {
                filter.add(&id);
                GossipMetrics::incr(&self.metrics.txs_known);
                return Ok(());
            }
            Err(e) => {
                // Not marked known: a corrected resend must get through.
                warn!(tx = %id, error = %e, "[gossip] Transaction rejected");
                GossipMetrics::incr(&self.metrics.txs_rejected);
                return Err(e.into());
            }
        };

        filter.add(&id);
        GossipMetrics::incr(&self.metrics.txs_added);
        info!(tx = %id, accepted = accepted.len(), "[gossip] Transaction admitted");

        for desc in accepted {
            if self.outbound.send(GossipItem::Tx(desc.tx)).is_err() {
                debug!("[gossip] Outbound queue closed, skipping re-announce");
                break;
            }
            GossipMetrics::incr(&self.metrics.items_queued);
        }
        Ok(())
    }

    fn add_block(&self, filter: &mut GossipFilter, block: Arc<Block>) -> Result<()> {
        let id = block.block_hash();
        match self.ledger.have_block(&id) {
            Ok(true) => {
                debug!(block = %id, "[gossip] Block already known");
                filter.add(&id);
                GossipMetrics::incr(&self.metrics.blocks_known);
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => {
                warn!(block = %id, error = %e, "[gossip] Block lookup failed");
                return Err(e.into());
            }
        }

        GossipMetrics::incr(&self.metrics.blocks_processed);
        match self.ledger.process_block(&block, BehaviorFlags::NONE) {
            Ok(outcome) if outcome.is_orphan => {
                debug!(block = %id, parent = %block.parent_hash(), "[gossip] Orphan block parked");
                GossipMetrics::incr(&self.metrics.blocks_orphaned);
            }
            Ok(outcome) => {
                info!(block = %id, main_chain = outcome.is_main_chain, "[gossip] Block processed");
            }
            Err(e @ LedgerError::Unavailable(_)) => {
                // The ledger never saw the bytes; leave the block eligible.
                warn!(block = %id, error = %e, "[gossip] Ledger unavailable, block not marked");
                GossipMetrics::incr(&self.metrics.blocks_failed);
                return Ok(());
            }
            Err(e) => {
                warn!(block = %id, error = %e, "[gossip] Block processing failed");
                GossipMetrics::incr(&self.metrics.blocks_failed);
            }
        }

        filter.add(&id);
        Ok(())
    }

    fn reset_filter_if_needed(&self, filter: &mut GossipFilter) {
        if !filter.needs_reset() {
            return;
        }
        let observed = filter.false_positive_rate();
        let live: Vec<Hash> = self
            .ledger
            .tx_descriptors()
            .iter()
            .map(|desc| desc.hash)
            .collect();
        if filter.reset_if_needed(live.into_iter()) {
            GossipMetrics::incr(&self.metrics.filter_resets);
            info!(
                generation = filter.generation(),
                observed_fpr = observed,
                live = filter.len(),
                "[gossip] Filter reset"
            );
        }
    }
}

impl GossipSet for DedupSet {
    fn add(&self, item: GossipItem) -> Result<()> {
        let mut filter = self.filter.write();
        let result = match item {
            GossipItem::Tx(tx) => self.add_tx(&mut filter, tx),
            GossipItem::Block(block) => self.add_block(&mut filter, block),
        };
        self.reset_filter_if_needed(&mut filter);
        result
    }

    fn has(&self, id: &Hash) -> bool {
        let _guard = self.filter.read();
        self.ledger.have_transaction(id) || self.ledger.have_block(id).unwrap_or(false)
    }

    /// Pending transactions only. Blocks travel by push and regossip.
    fn iterate(&self, visit: &mut dyn FnMut(&GossipItem) -> bool) {
        let _guard = self.filter.read();
        for desc in self.ledger.tx_descriptors() {
            if !visit(&GossipItem::Tx(desc.tx)) {
                debug!("[gossip] Iteration stopped early");
                return;
            }
        }
    }

    fn get_filter(&self) -> (Vec<u8>, Vec<u8>) {
        self.filter.read().marshal()
    }
}
