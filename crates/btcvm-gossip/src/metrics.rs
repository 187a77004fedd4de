//! Metrics for the gossip layer

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free gossip counters.
#[derive(Debug, Default)]
pub struct GossipMetrics {
    /// Transactions newly admitted through gossip
    pub txs_added: AtomicU64,
    /// Transactions the ledger already had
    pub txs_known: AtomicU64,
    /// Transactions the ledger rejected
    pub txs_rejected: AtomicU64,
    /// Blocks handed to the ledger
    pub blocks_processed: AtomicU64,
    /// Blocks the ledger already had
    pub blocks_known: AtomicU64,
    /// Blocks that arrived before their parent
    pub blocks_orphaned: AtomicU64,
    /// Blocks whose processing failed
    pub blocks_failed: AtomicU64,
    /// Items undecodable or dropped as malformed
    pub items_malformed: AtomicU64,
    /// Filter regenerations
    pub filter_resets: AtomicU64,
    /// Items queued for push
    pub items_queued: AtomicU64,
    /// Push rounds completed
    pub push_rounds: AtomicU64,
    /// Pull rounds completed
    pub pull_rounds: AtomicU64,
    /// Driver rounds that returned an error
    pub round_errors: AtomicU64,
    /// Pull requests answered
    pub pull_requests_served: AtomicU64,
}

/// Point-in-time copy of [`GossipMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GossipMetricsSnapshot {
    pub txs_added: u64,
    pub txs_known: u64,
    pub txs_rejected: u64,
    pub blocks_processed: u64,
    pub blocks_known: u64,
    pub blocks_orphaned: u64,
    pub blocks_failed: u64,
    pub items_malformed: u64,
    pub filter_resets: u64,
    pub items_queued: u64,
    pub push_rounds: u64,
    pub pull_rounds: u64,
    pub round_errors: u64,
    pub pull_requests_served: u64,
}

impl GossipMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GossipMetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        GossipMetricsSnapshot {
            txs_added: load(&self.txs_added),
            txs_known: load(&self.txs_known),
            txs_rejected: load(&self.txs_rejected),
            blocks_processed: load(&self.blocks_processed),
            blocks_known: load(&self.blocks_known),
            blocks_orphaned: load(&self.blocks_orphaned),
            blocks_failed: load(&self.blocks_failed),
            items_malformed: load(&self.items_malformed),
            filter_resets: load(&self.filter_resets),
            items_queued: load(&self.items_queued),
            push_rounds: load(&self.push_rounds),
            pull_rounds: load(&self.pull_rounds),
            round_errors: load(&self.round_errors),
            pull_requests_served: load(&self.pull_requests_served),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = GossipMetrics::new();
        GossipMetrics::incr(&metrics.txs_added);
        GossipMetrics::add(&metrics.items_queued, 3);
        let snap = metrics.snapshot();
        assert_eq!(snap.txs_added, 1);
        assert_eq!(snap.items_queued, 3);
        assert_eq!(snap.blocks_failed, 0);
    }
}
