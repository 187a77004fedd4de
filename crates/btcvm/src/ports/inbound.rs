//! Inbound ports (driving side - API)
//!
//! The contract the host BFT engine calls into.

use crate::domain::{BuilderState, TipSnapshot};
use crate::error::Result;
use crate::ports::outbound::VmDeps;
use async_trait::async_trait;
use btcvm_gossip::NodeId;
use serde::Serialize;
use shared_types::{BlockId, ChainState, EngineMessage};
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;

/// A block as the host engine sees it.
#[async_trait]
pub trait ConsensusBlock: Send + Sync {
    fn id(&self) -> BlockId;

    fn parent(&self) -> BlockId;

    fn height(&self) -> u64;

    fn timestamp(&self) -> SystemTime;

    /// Canonical serialized bytes.
    fn bytes(&self) -> &[u8];

    async fn verify(&self) -> Result<()>;

    /// Mark the block final.
    async fn accept(&self) -> Result<()>;

    async fn reject(&self) -> Result<()>;
}

/// Status reported to the host engine's health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub bootstrapped: bool,
    pub tips: TipSnapshot,
    pub builder: BuilderState,
    pub gossip_running: bool,
}

/// Primary port: the VM driven by the host engine
#[async_trait]
pub trait ChainVm: Send + Sync {
    type Block: ConsensusBlock;

    /// Wire capabilities and parse configuration. Callable once.
    async fn initialize(&self, deps: VmDeps, config: &[u8]) -> Result<()>;

    async fn set_state(&self, state: ChainState) -> Result<()>;

    /// Build a block on the current tip from the mempool.
    async fn build_block(&self) -> Result<Self::Block>;

    /// Decode and store a block received from consensus.
    async fn parse_block(&self, bytes: &[u8]) -> Result<Self::Block>;

    async fn get_block(&self, id: BlockId) -> Result<Self::Block>;

    async fn set_preference(&self, id: BlockId) -> Result<()>;

    async fn last_accepted(&self) -> Result<BlockId>;

    async fn get_block_id_at_height(&self, height: u64) -> Result<BlockId>;

    /// Block until a build should be attempted, or `cancel` fires.
    async fn wait_for_event(&self, cancel: &CancellationToken) -> Result<EngineMessage>;

    /// Stop background work. Idempotent.
    async fn shutdown(&self) -> Result<()>;

    async fn version(&self) -> Result<String>;

    /// Fails with `NotInitialized` before `initialize`.
    async fn health_check(&self) -> Result<HealthStatus>;

    /// Inbound gossip bytes from a peer.
    async fn app_gossip(&self, peer: NodeId, msg: &[u8]) -> Result<()>;
}
