//! # Core Entities
//!
//! Identity and lifecycle types shared between the ledger engine, the gossip
//! layer and the host consensus engine.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A 32-byte content hash (double SHA-256 for Bitcoin objects).
///
/// Stored in internal byte order; displayed byte-reversed as Bitcoin tools do.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

/// Block identity as seen by the host consensus engine.
///
/// Identical to the ledger block hash, so no translation table is needed.
pub type BlockId = Hash;

impl Hash {
    /// The all-zero hash (null previous-block / coinbase outpoint).
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// Length in bytes.
    pub const LEN: usize = 32;

    /// Build from a slice, `None` unless it is exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Double SHA-256 of `data`.
    pub fn double_sha256(data: &[u8]) -> Self {
        let first = Sha256::digest(data);
        let second = Sha256::digest(first);
        Self(second.into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.write_str(&hex::encode(reversed))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({self})")
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Lifecycle state requested by the host consensus engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainState {
    /// Fetching a state summary.
    StateSyncing,
    /// Replaying historical blocks.
    Bootstrapping,
    /// Following the tip; gossip and block building are live.
    NormalOp,
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChainState::StateSyncing => "state_syncing",
            ChainState::Bootstrapping => "bootstrapping",
            ChainState::NormalOp => "normal_op",
        };
        f.write_str(name)
    }
}

/// Message delivered to the host consensus engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMessage {
    /// Transactions are pending; the engine should call `build_block`.
    PendingTxs,
}
