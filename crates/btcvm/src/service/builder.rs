//! Block builder: turns tx-accepted events into build requests for the host
//! engine, spaced by the target block time and the retry delay.
//!
//! ```text
//!            tx accepted
//!   Idle ───────────────► Pending
//!    ▲                       │
//!    │  delay elapsed:       │
//!    │  engine notified, or  │
//!    │  mempool drained      │
//!    └───────────────────────┘
//! ```
//!
//! A build attempt closes the current window and re-enters Pending at once
//! when transactions remain. After a notification the next tx event opens a
//! new window, whether or not the engine built.

use crate::config::BuilderConfig;
use crate::domain::{BuildAttempt, BuildSchedule, BuilderState};
use crate::error::BuilderError;
use crate::metrics::BuilderMetrics;
use parking_lot::Mutex;
use shared_types::{shutdown_signalled, EngineMessage, Hash, LedgerEngine, TxDesc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct PendingWindow {
    state: BuilderState,
    /// Incremented on every Idle -> Pending transition.
    window: u64,
    /// The delay-computation task of the current window.
    task: Option<JoinHandle<()>>,
}

/// Event-driven block build scheduler.
pub struct BlockBuilder {
    ledger: Arc<dyn LedgerEngine>,
    config: BuilderConfig,
    to_engine: mpsc::Sender<EngineMessage>,
    shutdown: watch::Receiver<bool>,
    pending: Mutex<PendingWindow>,
    schedule: Mutex<BuildSchedule>,
    /// Bumped on every build signal; waiters subscribe before checking.
    signals: watch::Sender<u64>,
    tx_events: mpsc::Sender<()>,
    tx_events_rx: Mutex<Option<mpsc::Receiver<()>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    metrics: Arc<BuilderMetrics>,
}

impl BlockBuilder {
    pub fn new(
        ledger: Arc<dyn LedgerEngine>,
        to_engine: mpsc::Sender<EngineMessage>,
        config: BuilderConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Arc<Self> {
        let (tx_events, tx_events_rx) = mpsc::channel(config.tx_event_buffer.max(1));
        let (signals, _) = watch::channel(0);
        Arc::new(Self {
            ledger,
            config,
            to_engine,
            shutdown,
            pending: Mutex::new(PendingWindow {
                state: BuilderState::Idle,
                window: 0,
                task: None,
            }),
            schedule: Mutex::new(BuildSchedule::new()),
            signals,
            tx_events,
            tx_events_rx: Mutex::new(Some(tx_events_rx)),
            listener: Mutex::new(None),
            started: AtomicBool::new(false),
            metrics: Arc::new(BuilderMetrics::new()),
        })
    }

    /// Spawn the listener converting tx events into signals.
    ///
    /// Returns false if already started.
    pub fn start(self: &Arc<Self>) -> bool {
        let Some(mut events) = self.tx_events_rx.lock().take() else {
            return false;
        };
        let builder = Arc::clone(self);
        let mut shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            info!("[btcvm] Block builder listening for transactions");
            loop {
                tokio::select! {
                    _ = shutdown_signalled(&mut shutdown) => break,
                    event = events.recv() => match event {
                        Some(()) => {
                            builder.signal_can_build();
                        }
                        None => break,
                    },
                }
            }
            info!("[btcvm] Block builder listener stopped");
        });
        *self.listener.lock() = Some(handle);
        self.started.store(true, Ordering::SeqCst);
        true
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Ledger callback for newly admitted transactions.
    ///
    /// Never blocks; a full buffer already holds an undelivered event, so
    /// dropping this one loses nothing.
    pub fn on_tx_accepted(&self, txs: &[TxDesc]) {
        if txs.is_empty() {
            return;
        }
        BuilderMetrics::incr(&self.metrics.tx_events);
        match self.tx_events.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => {
                BuilderMetrics::incr(&self.metrics.tx_events_dropped);
                debug!(count = txs.len(), "[btcvm] Tx event buffer full, event coalesced");
            }
            Err(TrySendError::Closed(())) => {
                debug!("[btcvm] Tx event listener gone");
            }
        }
    }

    /// Open a pending window unless one is already open.
    ///
    /// Returns true if a delay-computation task was spawned.
    pub fn signal_can_build(self: &Arc<Self>) -> bool {
        let opened = {
            let mut pending = self.pending.lock();
            if pending.state.has_pending() {
                BuilderMetrics::incr(&self.metrics.signals_coalesced);
                debug!(window = pending.window, "[btcvm] Build signal coalesced");
                false
            } else {
                pending.window += 1;
                pending.state = BuilderState::Pending;
                let task = tokio::spawn(Arc::clone(self).schedule_build(pending.window));
                pending.task = Some(task);
                true
            }
        };
        if opened {
            BuilderMetrics::incr(&self.metrics.schedules_started);
        }
        self.signals.send_modify(|n| *n += 1);
        opened
    }

    /// Record a build attempt against `parent`, successful or not.
    ///
    /// Closes the current window and opens a new one if transactions remain.
    pub fn handle_build_attempt(self: &Arc<Self>, parent: Hash) {
        self.schedule.lock().record(Instant::now(), parent);
        BuilderMetrics::incr(&self.metrics.build_attempts);
        {
            let mut pending = self.pending.lock();
            pending.state = BuilderState::Idle;
            if let Some(task) = pending.task.take() {
                task.abort();
            }
        }
        debug!(parent = %parent, "[btcvm] Build attempt recorded");

        if self.need_to_build() {
            debug!("[btcvm] Transactions remain after build attempt");
            self.signal_can_build();
        }
    }

    /// Block until a build should be attempted.
    ///
    /// Waits until the mempool holds transactions, then for the same delay
    /// the scheduler applies. Leaves the pending window to the scheduler.
    pub async fn wait_for_event(
        &self,
        cancel: &CancellationToken,
    ) -> Result<EngineMessage, BuilderError> {
        let mut shutdown = self.shutdown.clone();
        loop {
            if cancel.is_cancelled() {
                return Err(BuilderError::Cancelled);
            }
            if *shutdown.borrow() {
                return Err(BuilderError::Shutdown);
            }
            // Subscribe before checking so a signal raised in between wakes us.
            let mut signalled = self.signals.subscribe();
            if self.need_to_build() {
                break;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BuilderError::Cancelled),
                _ = shutdown_signalled(&mut shutdown) => return Err(BuilderError::Shutdown),
                changed = signalled.changed() => {
                    if changed.is_err() {
                        return Err(BuilderError::Shutdown);
                    }
                }
            }
        }

        let current = self.ledger.best_snapshot()?.hash;
        let delay = self.build_delay(&current);
        if delay.is_zero() {
            return Ok(EngineMessage::PendingTxs);
        }
        debug!(delay_ms = delay.as_millis() as u64, "[btcvm] Waiting out build delay");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BuilderError::Cancelled),
            _ = shutdown_signalled(&mut shutdown) => Err(BuilderError::Shutdown),
            _ = tokio::time::sleep(delay) => Ok(EngineMessage::PendingTxs),
        }
    }

    pub fn state(&self) -> BuilderState {
        self.pending.lock().state
    }

    pub fn has_pending(&self) -> bool {
        self.state().has_pending()
    }

    pub fn last_attempt(&self) -> Option<BuildAttempt> {
        self.schedule.lock().last_attempt()
    }

    pub fn metrics(&self) -> &Arc<BuilderMetrics> {
        &self.metrics
    }

    /// Wait for the listener and any scheduled task after shutdown.
    pub async fn join(&self) {
        let listener = self.listener.lock().take();
        let task = self.pending.lock().task.take();
        for handle in listener.into_iter().chain(task) {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "[btcvm] Builder task ended abnormally");
                }
            }
        }
    }

    fn need_to_build(&self) -> bool {
        !self.ledger.mining_descriptors().is_empty()
    }

    fn build_delay(&self, current: &Hash) -> std::time::Duration {
        self.schedule
            .lock()
            .delay(Instant::now(), current, &self.config)
    }

    /// Body of the per-window delay task. Always leaves the window Idle
    /// unless superseded.
    async fn schedule_build(self: Arc<Self>, window: u64) {
        let current = match self.ledger.best_snapshot() {
            Ok(best) => best.hash,
            Err(e) => {
                error!(error = %e, "[btcvm] Failed to read current block, dropping build signal");
                BuilderMetrics::incr(&self.metrics.schedule_failures);
                self.close_window(window);
                return;
            }
        };

        let delay = self.build_delay(&current);
        if !delay.is_zero() {
            debug!(
                delay_ms = delay.as_millis() as u64,
                parent = %current,
                "[btcvm] Scheduling build request"
            );
            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_signalled(&mut shutdown) => {
                    debug!("[btcvm] Scheduled build abandoned on shutdown");
                    return;
                }
            }
        }

        let need_to_build = self.need_to_build();
        let mut pending = self.pending.lock();
        if pending.window != window || pending.state != BuilderState::Pending {
            debug!(window, "[btcvm] Scheduled build superseded");
            return;
        }
        pending.task = None;
        if !need_to_build {
            pending.state = BuilderState::Idle;
            BuilderMetrics::incr(&self.metrics.schedules_skipped);
            debug!("[btcvm] No transactions left to build");
            return;
        }

        match self.to_engine.try_send(EngineMessage::PendingTxs) {
            Ok(()) => {
                pending.state = BuilderState::Idle;
                BuilderMetrics::incr(&self.metrics.notifications_sent);
                debug!(parent = %current, "[btcvm] Notified engine of pending transactions");
            }
            Err(TrySendError::Full(_)) => {
                pending.state = BuilderState::Idle;
                BuilderMetrics::incr(&self.metrics.notifications_dropped);
                warn!("[btcvm] Engine channel full, dropping build notification");
            }
            Err(TrySendError::Closed(_)) => {
                pending.state = BuilderState::Idle;
                BuilderMetrics::incr(&self.metrics.notifications_dropped);
                warn!("[btcvm] Engine channel closed, dropping build notification");
            }
        }
    }

    fn close_window(&self, window: u64) {
        let mut pending = self.pending.lock();
        if pending.window == window && pending.state == BuilderState::Pending {
            pending.state = BuilderState::Idle;
            pending.task = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::test_utils::{sample_transaction, InMemoryLedger};
    use shared_types::shutdown_channel;
    use std::time::Duration;

    fn builder_with(
        ledger: Arc<InMemoryLedger>,
        capacity: usize,
    ) -> (
        Arc<BlockBuilder>,
        mpsc::Receiver<EngineMessage>,
        watch::Sender<bool>,
    ) {
        let (to_engine, from_builder) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = shutdown_channel();
        let builder = BlockBuilder::new(ledger, to_engine, BuilderConfig::default(), shutdown_rx);
        (builder, from_builder, shutdown_tx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_signal_notifies_without_delay() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.process_transaction(&sample_transaction(1)).unwrap();
        let (builder, mut engine, _shutdown) = builder_with(ledger, 4);

        assert!(builder.signal_can_build());
        assert_eq!(builder.state(), BuilderState::Pending);
        assert_eq!(engine.recv().await, Some(EngineMessage::PendingTxs));
        tokio::task::yield_now().await;
        assert_eq!(builder.state(), BuilderState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_after_notification_opens_new_window() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.process_transaction(&sample_transaction(1)).unwrap();
        let (builder, mut engine, _shutdown) = builder_with(ledger, 4);

        assert!(builder.signal_can_build());
        assert_eq!(engine.recv().await, Some(EngineMessage::PendingTxs));
        tokio::task::yield_now().await;

        // The engine did not build; the next signal still gets through.
        assert!(builder.signal_can_build());
        assert_eq!(engine.recv().await, Some(EngineMessage::PendingTxs));
        assert_eq!(builder.metrics().snapshot().notifications_sent, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_while_pending_is_coalesced() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.process_transaction(&sample_transaction(1)).unwrap();
        let (builder, mut engine, _shutdown) = builder_with(ledger, 4);

        assert!(builder.signal_can_build());
        assert!(!builder.signal_can_build());
        assert!(!builder.signal_can_build());
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(engine.try_recv(), Ok(EngineMessage::PendingTxs));
        assert!(engine.try_recv().is_err());
        let snap = builder.metrics().snapshot();
        assert_eq!(snap.schedules_started, 1);
        assert_eq!(snap.signals_coalesced, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_mempool_closes_window_silently() {
        let ledger = Arc::new(InMemoryLedger::new());
        let (builder, mut engine, _shutdown) = builder_with(ledger, 4);

        builder.signal_can_build();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(builder.state(), BuilderState::Idle);
        assert!(engine.try_recv().is_err());
        assert_eq!(builder.metrics().snapshot().schedules_skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_engine_channel_drops_notification() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.process_transaction(&sample_transaction(1)).unwrap();
        let (builder, mut engine, _shutdown) = builder_with(ledger, 1);

        builder.signal_can_build();
        tokio::time::sleep(Duration::from_millis(10)).await;
        builder.handle_build_attempt(Hash([9; 32]));
        // The re-signal waits out the target delay, then finds the channel full.
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(builder.state(), BuilderState::Idle);
        assert_eq!(builder.metrics().snapshot().notifications_dropped, 1);
        assert_eq!(engine.try_recv(), Ok(EngineMessage::PendingTxs));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_tip_clears_pending() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.process_transaction(&sample_transaction(1)).unwrap();
        ledger.set_unavailable(true);
        let (builder, mut engine, _shutdown) = builder_with(ledger.clone(), 4);

        builder.signal_can_build();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(builder.state(), BuilderState::Idle);
        assert_eq!(builder.metrics().snapshot().schedule_failures, 1);
        assert!(engine.try_recv().is_err());

        ledger.set_unavailable(false);
        assert!(builder.signal_can_build());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_on_cancellation() {
        let ledger = Arc::new(InMemoryLedger::new());
        let (builder, _engine, _shutdown) = builder_with(ledger, 4);
        let cancel = CancellationToken::new();

        let waiter = {
            let builder = builder.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { builder.wait_for_event(&cancel).await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!waiter.is_finished());

        cancel.cancel();
        assert_eq!(waiter.await.unwrap(), Err(BuilderError::Cancelled));
    }
}
