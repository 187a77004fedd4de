//! Inbound ports (API) for the gossip layer.
//!
//! Implemented here, called by the network layer's gossip drivers.

use crate::domain::{GossipItem, NodeId};
use crate::error::Result;
use async_trait::async_trait;
use shared_types::Hash;

/// The set of items a gossip driver propagates.
pub trait GossipSet: Send + Sync {
    /// Route a newly seen item into the ledger and mark it known.
    fn add(&self, item: GossipItem) -> Result<()>;

    /// Ledger ground truth: pending transaction or known block.
    fn has(&self, id: &Hash) -> bool;

    /// Visit pending items; `visit` returns false to stop early.
    fn iterate(&self, visit: &mut dyn FnMut(&GossipItem) -> bool);

    /// Serialized membership filter and its salt.
    fn get_filter(&self) -> (Vec<u8>, Vec<u8>);
}

/// Handler for one application subprotocol, registered by id.
#[async_trait]
pub trait AppHandler: Send + Sync {
    /// Unsolicited message from a peer.
    async fn app_gossip(&self, peer: NodeId, msg: &[u8]) -> Result<()>;

    /// Request from a peer; the returned bytes are sent back as the response.
    async fn app_request(&self, peer: NodeId, msg: &[u8]) -> Result<Vec<u8>>;

    /// Response to a request this node sent.
    async fn app_response(&self, peer: NodeId, msg: &[u8]) -> Result<()>;
}
