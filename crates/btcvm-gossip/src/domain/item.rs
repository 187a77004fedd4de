//! The unit of propagation: one transaction or one block.

use serde::{Deserialize, Serialize};
use shared_types::{Block, Hash, Transaction};
use std::fmt;
use std::sync::Arc;

/// Wire discriminator preceding every gossiped payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum GossipKind {
    Tx = 0x01,
    Block = 0x02,
}

impl GossipKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Tx),
            0x02 => Some(Self::Block),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for GossipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tx => f.write_str("tx"),
            Self::Block => f.write_str("block"),
        }
    }
}

/// A transaction or block wrapped for gossip.
///
/// Payloads are shared, so cloning an item never copies a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GossipItem {
    Tx(Arc<Transaction>),
    Block(Arc<Block>),
}

impl GossipItem {
    pub fn tx(tx: impl Into<Arc<Transaction>>) -> Self {
        Self::Tx(tx.into())
    }

    pub fn block(block: impl Into<Arc<Block>>) -> Self {
        Self::Block(block.into())
    }

    /// Content hash of the payload: the txid or the block hash.
    pub fn id(&self) -> Hash {
        match self {
            Self::Tx(tx) => tx.txid(),
            Self::Block(block) => block.block_hash(),
        }
    }

    pub fn kind(&self) -> GossipKind {
        match self {
            Self::Tx(_) => GossipKind::Tx,
            Self::Block(_) => GossipKind::Block,
        }
    }
}

/// Identity of a remote node on the host network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 20]);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeID-{}", hex::encode(self.0))
    }
}
