//! Gossip orchestrator: builds the filter, set, handler and drivers, and
//! owns the push and pull loops for the lifetime of normal operation.

use crate::config::{GossipConfig, PullGossipParams, PushGossipParams};
use crate::domain::{GossipFilter, GossipItem};
use crate::error::{GossipError, Result};
use crate::metrics::GossipMetrics;
use crate::ports::{GossipNetwork, GossipSet, Gossiper, PushGossiper};
use crate::service::handler::{GossipHandler, TARGET_RESPONSE_SIZE};
use crate::service::set::DedupSet;
use parking_lot::Mutex;
use shared_types::{shutdown_signalled, ChainBlock, Hash, LedgerEngine, TxDesc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Handler id of the gossip subprotocol. Ids 0-2 are reserved by the host.
pub const BTC_GOSSIP_HANDLER_ID: u64 = 100;

/// Items the push driver remembers as discarded.
pub const PUSH_DISCARDED_SIZE: usize = 1_000;

/// Target size of one push or pull round.
pub const TARGET_GOSSIP_SIZE: usize = 10;

struct PushQueues {
    items: mpsc::UnboundedReceiver<GossipItem>,
    blocks: mpsc::UnboundedReceiver<ChainBlock>,
}

/// Wires the gossip layer together and runs its periodic loops.
pub struct GossipOrchestrator {
    config: GossipConfig,
    set: Arc<DedupSet>,
    handler: Arc<GossipHandler>,
    push: Arc<dyn PushGossiper>,
    pull: Arc<dyn Gossiper>,
    outbound: mpsc::UnboundedSender<GossipItem>,
    /// Connected blocks, filtered by the push loop before queueing.
    blocks: mpsc::UnboundedSender<ChainBlock>,
    /// Taken by the push loop on start.
    queues: Mutex<Option<PushQueues>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    metrics: Arc<GossipMetrics>,
}

impl GossipOrchestrator {
    /// Build every gossip component and register the handler with the network.
    pub fn new(
        config: GossipConfig,
        ledger: Arc<dyn LedgerEngine>,
        network: Arc<dyn GossipNetwork>,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            push_frequency_ms = config.push_gossip_frequency_ms,
            pull_frequency_ms = config.pull_gossip_frequency_ms,
            regossip_frequency_ms = config.regossip_frequency_ms,
            "[gossip] Initializing unified gossip"
        );

        let metrics = Arc::new(GossipMetrics::new());
        let filter = GossipFilter::new(
            config.bloom_filter_size as usize,
            config.bloom_false_positive_rate,
            config.bloom_reset_threshold,
        );
        let (outbound, items) = mpsc::unbounded_channel();
        let (blocks, block_queue) = mpsc::unbounded_channel();
        let set = Arc::new(DedupSet::new(
            ledger,
            filter,
            outbound.clone(),
            metrics.clone(),
        ));
        let handler = Arc::new(GossipHandler::new(
            set.clone(),
            TARGET_RESPONSE_SIZE,
            metrics.clone(),
        ));

        let push_params = PushGossipParams {
            push: config.push_branching(),
            regossip: config.regossip_branching(),
            discarded_size: PUSH_DISCARDED_SIZE,
            target_gossip_size: TARGET_GOSSIP_SIZE,
            max_regossip_frequency: config.regossip_frequency(),
        };
        debug!(?push_params, "[gossip] Push parameters");
        let push = network.push_gossiper(push_params, set.clone())?;
        let pull = network.pull_gossiper(
            PullGossipParams {
                target_gossip_size: TARGET_GOSSIP_SIZE,
            },
            set.clone(),
        )?;
        network.add_handler(BTC_GOSSIP_HANDLER_ID, handler.clone())?;
        info!(handler_id = BTC_GOSSIP_HANDLER_ID, "[gossip] Registered gossip handler");

        Ok(Self {
            config,
            set,
            handler,
            push,
            pull,
            outbound,
            blocks,
            queues: Mutex::new(Some(PushQueues {
                items,
                blocks: block_queue,
            })),
            tasks: Mutex::new(Vec::new()),
            metrics,
        })
    }

    /// Spawn the push and pull loops. Both stop when `shutdown` fires.
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let queues = self.queues.lock().take().ok_or(GossipError::AlreadyStarted)?;

        let push = tokio::spawn(push_loop(
            self.push.clone(),
            self.set.clone(),
            queues,
            self.outbound.clone(),
            self.config.push_gossip_frequency(),
            shutdown.clone(),
            self.metrics.clone(),
        ));
        let pull = tokio::spawn(pull_loop(
            self.pull.clone(),
            self.config.pull_gossip_frequency(),
            shutdown,
            self.metrics.clone(),
        ));
        self.tasks.lock().extend([push, pull]);
        info!("[gossip] Gossip loops started");
        Ok(())
    }

    /// Queue newly admitted transactions for push.
    pub fn announce_txs(&self, txs: &[TxDesc]) {
        for desc in txs {
            if self.outbound.send(GossipItem::Tx(desc.tx.clone())).is_err() {
                return;
            }
            GossipMetrics::incr(&self.metrics.items_queued);
            debug!(tx = %desc.hash, "[gossip] Queued transaction");
        }
    }

    /// Hand a connected block to the push loop.
    ///
    /// Never waits on the filter lock; the push loop skips blocks the filter
    /// already has.
    pub fn announce_block(&self, block: ChainBlock) {
        if self.blocks.send(block).is_err() {
            debug!("[gossip] Push loop gone, block announcement dropped");
        }
    }

    /// Wait for the loops to exit after shutdown has been signalled.
    pub async fn join(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "[gossip] Gossip loop ended abnormally");
            }
        }
        info!("[gossip] Gossip loops stopped");
    }

    pub fn set(&self) -> &Arc<DedupSet> {
        &self.set
    }

    pub fn handler(&self) -> &Arc<GossipHandler> {
        &self.handler
    }

    pub fn metrics(&self) -> &Arc<GossipMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &GossipConfig {
        &self.config
    }

    /// Whether the set reports `id`.
    pub fn has(&self, id: &Hash) -> bool {
        self.set.has(id)
    }
}

/// Drain the queue, keeping the first occurrence of each id.
fn drain_unique(queue: &mut mpsc::UnboundedReceiver<GossipItem>) -> Vec<GossipItem> {
    let mut seen = HashSet::new();
    let mut batch = Vec::new();
    while let Ok(item) = queue.try_recv() {
        if seen.insert(item.id()) {
            batch.push(item);
        }
    }
    batch
}

/// Move announced blocks the filter has not seen onto the item queue.
fn queue_unseen_blocks(
    blocks: &mut mpsc::UnboundedReceiver<ChainBlock>,
    set: &DedupSet,
    items: &mpsc::UnboundedSender<GossipItem>,
    metrics: &GossipMetrics,
) {
    while let Ok(block) = blocks.try_recv() {
        if set.filter_contains(&block.hash) {
            debug!(block = %block.hash, height = block.height, "[gossip] Skipping block, already in filter");
            continue;
        }
        if items.send(GossipItem::Block(block.block.clone())).is_ok() {
            GossipMetrics::incr(&metrics.items_queued);
            info!(block = %block.hash, height = block.height, "[gossip] Queued block");
        }
    }
}

async fn push_loop(
    push: Arc<dyn PushGossiper>,
    set: Arc<DedupSet>,
    mut queues: PushQueues,
    items: mpsc::UnboundedSender<GossipItem>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    metrics: Arc<GossipMetrics>,
) {
    info!(frequency_ms = period.as_millis() as u64, "[gossip] Push gossip loop started");
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown_signalled(&mut shutdown) => break,
            _ = ticker.tick() => {}
        }
        queue_unseen_blocks(&mut queues.blocks, &set, &items, &metrics);
        let batch = drain_unique(&mut queues.items);
        if !batch.is_empty() {
            debug!(count = batch.len(), "[gossip] Handing items to push driver");
            push.add(batch);
        }
        let round = tokio::select! {
            _ = shutdown_signalled(&mut shutdown) => break,
            round = push.gossip() => round,
        };
        match round {
            Ok(()) => GossipMetrics::incr(&metrics.push_rounds),
            Err(e) => {
                GossipMetrics::incr(&metrics.round_errors);
                warn!(error = %e, "[gossip] Push round failed");
            }
        }
    }
    info!("[gossip] Push gossip loop stopped");
}

async fn pull_loop(
    pull: Arc<dyn Gossiper>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    metrics: Arc<GossipMetrics>,
) {
    info!(frequency_ms = period.as_millis() as u64, "[gossip] Pull gossip loop started");
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown_signalled(&mut shutdown) => break,
            _ = ticker.tick() => {}
        }
        let round = tokio::select! {
            _ = shutdown_signalled(&mut shutdown) => break,
            round = pull.gossip() => round,
        };
        match round {
            Ok(()) => GossipMetrics::incr(&metrics.pull_rounds),
            Err(e) => {
                GossipMetrics::incr(&metrics.round_errors);
                warn!(error = %e, "[gossip] Pull round failed");
            }
        }
    }
    info!("[gossip] Pull gossip loop stopped");
}
