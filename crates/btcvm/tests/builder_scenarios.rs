//! Block builder timing scenarios on a paused clock.

use btcvm::{
    BlockAdapter, BlockBuilder, BuilderConfig, BuilderError, BuilderState, ChainTips,
    ConsensusBlock,
};
use shared_types::test_utils::{sample_transaction, InMemoryLedger};
use shared_types::{shutdown_channel, EngineMessage, LedgerEngine, TxDesc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

struct Harness {
    ledger: Arc<InMemoryLedger>,
    builder: Arc<BlockBuilder>,
    engine: mpsc::Receiver<EngineMessage>,
    shutdown: watch::Sender<bool>,
}

impl Harness {
    fn new() -> Self {
        let ledger = Arc::new(InMemoryLedger::new());
        let (to_engine, engine) = mpsc::channel(16);
        let (shutdown, shutdown_rx) = shutdown_channel();
        let builder = BlockBuilder::new(
            ledger.clone(),
            to_engine,
            BuilderConfig::default(),
            shutdown_rx,
        );
        assert!(builder.start());
        Self {
            ledger,
            builder,
            engine,
            shutdown,
        }
    }

    /// Admit a transaction and deliver its event to the builder.
    fn submit(&self, seed: u8) -> Vec<TxDesc> {
        let accepted = self
            .ledger
            .process_transaction(&sample_transaction(seed))
            .unwrap();
        self.builder.on_tx_accepted(&accepted);
        accepted
    }

    fn notifications(&mut self) -> usize {
        let mut count = 0;
        while self.engine.try_recv().is_ok() {
            count += 1;
        }
        count
    }
}

async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn test_first_transaction_notifies_once() {
    let mut h = Harness::new();
    assert_eq!(h.builder.state(), BuilderState::Idle);

    h.submit(1);
    advance(1).await;
    assert_eq!(h.notifications(), 1);
    assert_eq!(h.builder.state(), BuilderState::Idle);

    advance(5_000).await;
    assert_eq!(h.notifications(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_new_parent_waits_target_block_time() {
    let mut h = Harness::new();
    h.builder.handle_build_attempt(h.ledger.genesis_hash());
    // Another producer moves the tip.
    h.ledger.mine_block().unwrap();

    h.submit(1);
    advance(1_900).await;
    assert_eq!(h.notifications(), 0);
    assert_eq!(h.builder.state(), BuilderState::Pending);

    advance(200).await;
    assert_eq!(h.notifications(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_attempt_retries_after_short_delay() {
    let mut h = Harness::new();
    h.submit(1);
    advance(1).await;
    assert_eq!(h.notifications(), 1);

    // The build against the current tip fails; the transaction stays pending.
    let tip = h.ledger.best_snapshot().unwrap().hash;
    h.builder.handle_build_attempt(tip);
    assert_eq!(h.builder.state(), BuilderState::Pending);

    advance(90).await;
    assert_eq!(h.notifications(), 0);
    advance(20).await;
    assert_eq!(h.notifications(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_events_while_pending_are_coalesced() {
    let mut h = Harness::new();
    h.builder.handle_build_attempt(h.ledger.genesis_hash());
    h.ledger.mine_block().unwrap();

    for seed in 1..=5 {
        h.submit(seed);
        advance(10).await;
    }
    advance(3_000).await;

    assert_eq!(h.notifications(), 1);
    let snap = h.builder.metrics().snapshot();
    assert_eq!(snap.schedules_started, 1);
    assert_eq!(snap.signals_coalesced, 4);
}

#[tokio::test(start_paused = true)]
async fn test_events_after_unanswered_notification_notify_again() {
    let mut h = Harness::new();
    h.submit(1);
    advance(1).await;
    assert_eq!(h.notifications(), 1);

    // The engine never builds, as on a validator that is not proposing.
    for seed in 2..=6 {
        h.submit(seed);
        advance(10_000).await;
        assert_eq!(h.notifications(), 1, "tx {seed} was not announced");
        assert_eq!(h.builder.state(), BuilderState::Idle);
    }
    assert_eq!(h.builder.metrics().snapshot().notifications_sent, 6);
}

#[tokio::test(start_paused = true)]
async fn test_new_window_after_notification_uses_last_attempt_time() {
    let mut h = Harness::new();
    h.builder.handle_build_attempt(h.ledger.genesis_hash());
    h.ledger.mine_block().unwrap();

    h.submit(1);
    advance(2_100).await;
    assert_eq!(h.notifications(), 1);

    // The last attempt is older than the target time, so no further wait.
    h.submit(2);
    advance(1).await;
    assert_eq!(h.notifications(), 1);
    assert_eq!(h.builder.metrics().snapshot().schedules_started, 2);
}

#[tokio::test(start_paused = true)]
async fn test_mempool_drained_before_delay_skips_notification() {
    let mut h = Harness::new();
    h.builder.handle_build_attempt(h.ledger.genesis_hash());
    h.ledger.mine_block().unwrap();

    h.submit(1);
    advance(500).await;
    // Included by someone else while we waited.
    h.ledger.mine_block().unwrap();
    advance(2_000).await;

    assert_eq!(h.notifications(), 0);
    assert_eq!(h.builder.state(), BuilderState::Idle);
    assert_eq!(h.builder.metrics().snapshot().schedules_skipped, 1);
}

#[tokio::test(start_paused = true)]
async fn test_accept_does_not_trigger_building() {
    let mut h = Harness::new();
    let tips = Arc::new(ChainTips::new(h.ledger.genesis_hash()));
    let block = h.ledger.mine_block().unwrap();
    let adapter = BlockAdapter::from_chain_block(block, tips.clone());

    adapter.accept().await.unwrap();
    advance(5_000).await;

    assert_eq!(tips.last_accepted(), adapter.id());
    assert_eq!(h.builder.state(), BuilderState::Idle);
    assert_eq!(h.notifications(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_event_blocks_until_transaction() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let waiter = {
        let builder = h.builder.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { builder.wait_for_event(&cancel).await })
    };

    advance(10_000).await;
    assert!(!waiter.is_finished());

    h.submit(1);
    let result = tokio::time::timeout(Duration::from_millis(50), waiter)
        .await
        .expect("waiter woke")
        .unwrap();
    assert_eq!(result, Ok(EngineMessage::PendingTxs));
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_event_applies_retry_delay() {
    let h = Harness::new();
    h.submit(1);
    let tip = h.ledger.best_snapshot().unwrap().hash;
    h.builder.handle_build_attempt(tip);

    let start = Instant::now();
    let cancel = CancellationToken::new();
    assert_eq!(
        h.builder.wait_for_event(&cancel).await,
        Ok(EngineMessage::PendingTxs)
    );
    let waited = start.elapsed();
    assert!(waited >= Duration::from_millis(100), "waited {waited:?}");
    assert!(waited < Duration::from_millis(150), "waited {waited:?}");
}

#[tokio::test(start_paused = true)]
async fn test_wait_blocks_after_mempool_drained() {
    let mut h = Harness::new();
    h.submit(1);
    advance(1).await;
    assert_eq!(h.notifications(), 1);
    // A peer's block includes the transaction.
    h.ledger.mine_block().unwrap();
    assert!(h.ledger.mining_descriptors().is_empty());

    let cancel = CancellationToken::new();
    let waiter = {
        let builder = h.builder.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { builder.wait_for_event(&cancel).await })
    };
    advance(10_000).await;
    assert!(!waiter.is_finished());

    h.submit(2);
    let result = tokio::time::timeout(Duration::from_millis(50), waiter)
        .await
        .expect("waiter woke")
        .unwrap();
    assert_eq!(result, Ok(EngineMessage::PendingTxs));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_wait_leaves_scheduled_task_running() {
    let mut h = Harness::new();
    h.builder.handle_build_attempt(h.ledger.genesis_hash());
    h.ledger.mine_block().unwrap();
    h.submit(1);

    let cancel = CancellationToken::new();
    let waiter = {
        let builder = h.builder.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { builder.wait_for_event(&cancel).await })
    };
    advance(500).await;
    cancel.cancel();
    assert_eq!(waiter.await.unwrap(), Err(BuilderError::Cancelled));

    advance(2_000).await;
    assert_eq!(h.notifications(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_aborts_waits_and_scheduled_builds() {
    let mut h = Harness::new();
    h.builder.handle_build_attempt(h.ledger.genesis_hash());
    h.ledger.mine_block().unwrap();
    h.submit(1);

    let waiter = {
        let builder = h.builder.clone();
        tokio::spawn(async move { builder.wait_for_event(&CancellationToken::new()).await })
    };
    advance(500).await;
    h.shutdown.send(true).unwrap();

    assert_eq!(waiter.await.unwrap(), Err(BuilderError::Shutdown));
    h.builder.join().await;
    advance(5_000).await;
    assert_eq!(h.notifications(), 0);
}
