//! The VM facade driven by the host engine.

use crate::config::VmConfig;
use crate::domain::ChainTips;
use crate::error::{BuildError, BuilderError, Result, VmError};
use crate::logging::init_logging;
use crate::ports::{ChainVm, HealthStatus, VmDeps};
use crate::service::block::BlockAdapter;
use crate::service::builder::BlockBuilder;
use async_trait::async_trait;
use btcvm_gossip::{GossipNetwork, GossipOrchestrator, NodeId};
use parking_lot::Mutex;
use shared_types::{
    shutdown_channel, shutdown_signalled, BehaviorFlags, BlockId, ChainBlock, ChainState,
    EngineMessage, LedgerEngine, LedgerEvent,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// VM version reported to the host engine.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// State wired up by `initialize`.
struct VmInner {
    config: VmConfig,
    ledger: Arc<dyn LedgerEngine>,
    network: Arc<dyn GossipNetwork>,
    tips: Arc<ChainTips>,
    builder: Arc<BlockBuilder>,
    /// Set once on the first entry into normal operation.
    gossip: Arc<OnceLock<Arc<GossipOrchestrator>>>,
    bootstrapped: AtomicBool,
    normal_op: Mutex<bool>,
    /// Serializes block construction.
    build_lock: Mutex<()>,
    router: Mutex<Option<JoinHandle<()>>>,
}

/// Bitcoin ledger VM.
pub struct BtcVm {
    inner: OnceLock<VmInner>,
    init_lock: Mutex<()>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    stopped: AtomicBool,
}

impl Default for BtcVm {
    fn default() -> Self {
        Self::new()
    }
}

impl BtcVm {
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = shutdown_channel();
        Self {
            inner: OnceLock::new(),
            init_lock: Mutex::new(()),
            shutdown_tx,
            shutdown_rx,
            stopped: AtomicBool::new(false),
        }
    }

    fn inner(&self) -> Result<&VmInner> {
        self.inner.get().ok_or(VmError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.get().is_some()
    }

    /// The block builder, once initialized.
    pub fn builder(&self) -> Option<&Arc<BlockBuilder>> {
        self.inner.get().map(|inner| &inner.builder)
    }

    /// The gossip orchestrator, once normal operation has started.
    pub fn gossip(&self) -> Option<Arc<GossipOrchestrator>> {
        self.inner.get().and_then(|inner| inner.gossip.get().cloned())
    }

    /// Build on the current tip; the attempt is recorded either way.
    fn build(&self, inner: &VmInner) -> Result<BlockAdapter> {
        let _guard = inner.build_lock.lock();
        let parent = inner
            .ledger
            .best_snapshot()
            .map_err(BuildError::CurrentBlock)?;

        let built = build_on(inner, &parent.hash);
        inner.builder.handle_build_attempt(parent.hash);

        match built {
            Ok(block) => {
                inner.builder.metrics().record_block_built();
                info!(
                    block = %block.hash,
                    height = block.height,
                    txs = block.block.transactions.len(),
                    "[btcvm] Built block"
                );
                Ok(BlockAdapter::from_chain_block(block, inner.tips.clone()))
            }
            Err(e) => {
                warn!(parent = %parent.hash, error = %e, "[btcvm] Block build failed");
                Err(e.into())
            }
        }
    }

    /// Start gossip and block building. Runs once per VM.
    fn start_normal_op(&self, inner: &VmInner) -> Result<()> {
        let mut started = inner.normal_op.lock();
        if *started {
            return Ok(());
        }

        let orchestrator = GossipOrchestrator::new(
            inner.config.gossip.clone(),
            inner.ledger.clone(),
            inner.network.clone(),
        )?;
        orchestrator.start(self.shutdown_rx.clone())?;
        // The cell is only written while `normal_op` is held and false.
        let _ = inner.gossip.set(Arc::new(orchestrator));

        inner.builder.start();
        if !inner.ledger.mining_descriptors().is_empty() {
            info!("[btcvm] Mempool non-empty at startup, signalling builder");
            inner.builder.signal_can_build();
        }
        *started = true;
        info!("[btcvm] Normal operation started");
        Ok(())
    }
}

fn build_on(inner: &VmInner, parent: &BlockId) -> std::result::Result<ChainBlock, BuildError> {
    let payout = inner
        .config
        .mining_address()
        .ok_or(BuildError::NoMiningAddress)?;
    let template = inner
        .ledger
        .new_block_template(payout)
        .map_err(BuildError::Template)?;
    let hash = template.block.block_hash();
    debug!(
        block = %hash,
        parent = %parent,
        height = template.height,
        "[btcvm] Processing block template"
    );

    let outcome = inner
        .ledger
        .process_block(&template.block, BehaviorFlags::NO_POW_CHECK)
        .map_err(BuildError::Process)?;
    if outcome.is_orphan {
        return Err(BuildError::Orphan(hash));
    }
    Ok(ChainBlock::new(template.block, template.height))
}

/// Fan ledger notifications out to the builder and the gossip layer.
async fn route_ledger_events(
    mut events: mpsc::Receiver<LedgerEvent>,
    builder: Arc<BlockBuilder>,
    gossip: Arc<OnceLock<Arc<GossipOrchestrator>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown_signalled(&mut shutdown) => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        match event {
            LedgerEvent::TxAccepted(txs) => {
                builder.on_tx_accepted(&txs);
                if let Some(gossip) = gossip.get() {
                    gossip.announce_txs(&txs);
                }
            }
            LedgerEvent::BlockConnected(block) => {
                debug!(block = %block.hash, height = block.height, "[btcvm] Block connected");
                if let Some(gossip) = gossip.get() {
                    gossip.announce_block(block);
                }
            }
        }
    }
    debug!("[btcvm] Ledger event router stopped");
}

#[async_trait]
impl ChainVm for BtcVm {
    type Block = BlockAdapter;

    async fn initialize(&self, deps: VmDeps, config: &[u8]) -> Result<()> {
        let _init = self.init_lock.lock();
        if self.inner.get().is_some() {
            return Err(VmError::AlreadyInitialized);
        }

        let config = VmConfig::from_bytes(config)?;
        if let Err(e) = init_logging(&config.log) {
            debug!(error = %e, "[btcvm] Using existing log subscriber");
        }

        let VmDeps {
            ledger,
            ledger_events,
            network,
            to_engine,
        } = deps;

        let best = ledger.best_snapshot().map_err(|e| {
            error!(error = %e, "[btcvm] Ledger unavailable at initialization");
            VmError::Ledger(e)
        })?;
        let tips = Arc::new(ChainTips::new(best.hash));
        let builder = BlockBuilder::new(
            ledger.clone(),
            to_engine,
            config.builder.clone(),
            self.shutdown_rx.clone(),
        );
        let gossip = Arc::new(OnceLock::new());
        let router = tokio::spawn(route_ledger_events(
            ledger_events,
            builder.clone(),
            gossip.clone(),
            self.shutdown_rx.clone(),
        ));

        if config.mining_addrs.is_empty() {
            warn!("[btcvm] No mining address configured, block building will fail");
        }
        info!(
            tip = %best.hash,
            height = best.height,
            mining_addrs = config.mining_addrs.len(),
            "[btcvm] VM initialized"
        );

        let inner = VmInner {
            config,
            ledger,
            network,
            tips,
            builder,
            gossip,
            bootstrapped: AtomicBool::new(false),
            normal_op: Mutex::new(false),
            build_lock: Mutex::new(()),
            router: Mutex::new(Some(router)),
        };
        if self.inner.set(inner).is_err() {
            return Err(VmError::AlreadyInitialized);
        }
        Ok(())
    }

    async fn set_state(&self, state: ChainState) -> Result<()> {
        let inner = self.inner()?;
        info!(%state, "[btcvm] Chain state changed");
        match state {
            ChainState::StateSyncing | ChainState::Bootstrapping => {
                inner.bootstrapped.store(false, Ordering::SeqCst);
                Ok(())
            }
            ChainState::NormalOp => {
                self.start_normal_op(inner)?;
                inner.bootstrapped.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn build_block(&self) -> Result<BlockAdapter> {
        let inner = self.inner()?;
        self.build(inner)
    }

    async fn parse_block(&self, bytes: &[u8]) -> Result<BlockAdapter> {
        let inner = self.inner()?;
        BlockAdapter::parse(bytes, inner.ledger.as_ref(), inner.tips.clone())
    }

    async fn get_block(&self, id: BlockId) -> Result<BlockAdapter> {
        let inner = self.inner()?;
        BlockAdapter::from_id(id, inner.ledger.as_ref(), inner.tips.clone())
    }

    async fn set_preference(&self, id: BlockId) -> Result<()> {
        let inner = self.inner()?;
        inner.tips.set_preferred(id);
        debug!(block = %id, "[btcvm] Preference set");
        Ok(())
    }

    async fn last_accepted(&self) -> Result<BlockId> {
        Ok(self.inner()?.tips.last_accepted())
    }

    async fn get_block_id_at_height(&self, height: u64) -> Result<BlockId> {
        let inner = self.inner()?;
        Ok(inner.ledger.block_hash_by_height(height)?)
    }

    async fn wait_for_event(&self, cancel: &CancellationToken) -> Result<EngineMessage> {
        let builder = self.inner.get().map(|inner| &inner.builder);
        match builder {
            Some(builder) if builder.is_started() => Ok(builder.wait_for_event(cancel).await?),
            _ => {
                // Nothing can become buildable before normal operation.
                let mut shutdown = self.shutdown_rx.clone();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(BuilderError::Cancelled.into()),
                    _ = shutdown_signalled(&mut shutdown) => Err(BuilderError::Shutdown.into()),
                }
            }
        }
    }

    async fn shutdown(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("[btcvm] Shutting down");
        self.shutdown_tx.send_replace(true);

        if let Some(inner) = self.inner.get() {
            if let Some(gossip) = inner.gossip.get() {
                gossip.join().await;
            }
            inner.builder.join().await;
            let router = inner.router.lock().take();
            if let Some(router) = router {
                if let Err(e) = router.await {
                    warn!(error = %e, "[btcvm] Ledger event router ended abnormally");
                }
            }
        }
        info!("[btcvm] Shutdown complete");
        Ok(())
    }

    async fn version(&self) -> Result<String> {
        Ok(VERSION.to_string())
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let inner = self.inner()?;
        Ok(HealthStatus {
            bootstrapped: inner.bootstrapped.load(Ordering::SeqCst),
            tips: inner.tips.snapshot(),
            builder: inner.builder.state(),
            gossip_running: inner.gossip.get().is_some() && !self.stopped.load(Ordering::SeqCst),
        })
    }

    async fn app_gossip(&self, peer: NodeId, msg: &[u8]) -> Result<()> {
        let inner = self.inner()?;
        inner.network.app_gossip(peer, msg).await?;
        Ok(())
    }
}
