//! Metrics collection for the block builder and VM

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics collector for block scheduling and building
#[derive(Debug, Default)]
pub struct BuilderMetrics {
    /// Tx-accepted events received from the ledger
    pub tx_events: AtomicU64,

    /// Tx-accepted events dropped because the buffer was full
    pub tx_events_dropped: AtomicU64,

    /// Signals coalesced into an already pending window
    pub signals_coalesced: AtomicU64,

    /// Delay-computation tasks spawned
    pub schedules_started: AtomicU64,

    /// Windows closed without notifying because the mempool drained
    pub schedules_skipped: AtomicU64,

    /// Windows aborted because the current block was unreadable
    pub schedule_failures: AtomicU64,

    /// Notifications delivered to the host engine
    pub notifications_sent: AtomicU64,

    /// Notifications dropped on a full or closed engine channel
    pub notifications_dropped: AtomicU64,

    /// Build attempts recorded (success or failure)
    pub build_attempts: AtomicU64,

    /// Blocks built successfully
    pub blocks_built: AtomicU64,
}

/// Point-in-time copy of [`BuilderMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BuilderMetricsSnapshot {
    pub tx_events: u64,
    pub tx_events_dropped: u64,
    pub signals_coalesced: u64,
    pub schedules_started: u64,
    pub schedules_skipped: u64,
    pub schedule_failures: u64,
    pub notifications_sent: u64,
    pub notifications_dropped: u64,
    pub build_attempts: u64,
    pub blocks_built: u64,
}

impl BuilderMetrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a block built successfully
    pub fn record_block_built(&self) {
        self.blocks_built.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BuilderMetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        BuilderMetricsSnapshot {
            tx_events: load(&self.tx_events),
            tx_events_dropped: load(&self.tx_events_dropped),
            signals_coalesced: load(&self.signals_coalesced),
            schedules_started: load(&self.schedules_started),
            schedules_skipped: load(&self.schedules_skipped),
            schedule_failures: load(&self.schedule_failures),
            notifications_sent: load(&self.notifications_sent),
            notifications_dropped: load(&self.notifications_dropped),
            build_attempts: load(&self.build_attempts),
            blocks_built: load(&self.blocks_built),
        }
    }
}
