//! Outbound ports (SPI) for the gossip layer.
//!
//! Peer transport, validator-stake lookup and the push/pull drivers belong
//! to the host network layer; these traits are the capabilities consumed
//! from it.

use super::inbound::{AppHandler, GossipSet};
use crate::config::{PullGossipParams, PushGossipParams};
use crate::domain::{GossipItem, NodeId};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// A driver performing one round of its gossip protocol per call.
#[async_trait]
pub trait Gossiper: Send + Sync {
    async fn gossip(&self) -> Result<()>;
}

/// Push driver: fans out queued items and regossips previously sent ones.
pub trait PushGossiper: Gossiper {
    /// Queue items for the next push round.
    fn add(&self, items: Vec<GossipItem>);
}

/// The host network layer.
#[async_trait]
pub trait GossipNetwork: Send + Sync {
    fn push_gossiper(
        &self,
        params: PushGossipParams,
        set: Arc<dyn GossipSet>,
    ) -> Result<Arc<dyn PushGossiper>>;

    fn pull_gossiper(
        &self,
        params: PullGossipParams,
        set: Arc<dyn GossipSet>,
    ) -> Result<Arc<dyn Gossiper>>;

    /// Route messages carrying `handler_id` to `handler`.
    fn add_handler(&self, handler_id: u64, handler: Arc<dyn AppHandler>) -> Result<()>;

    /// Deliver raw inbound gossip bytes for routing to the registered handler.
    async fn app_gossip(&self, peer: NodeId, msg: &[u8]) -> Result<()>;
}
