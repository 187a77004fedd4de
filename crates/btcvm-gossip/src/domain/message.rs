//! Gossip subprotocol messages.
//!
//! Items inside a message are individually codec-encoded so one malformed
//! item does not poison the rest of the message.

use serde::{Deserialize, Serialize};

/// Largest protocol message accepted from a peer.
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GossipMessage {
    /// Items pushed without being requested.
    Push { items: Vec<Vec<u8>> },
    /// Request for pending items absent from the sender's filter.
    PullRequest { filter: Vec<u8>, salt: Vec<u8> },
    /// Answer to a pull request.
    PullResponse { items: Vec<Vec<u8>> },
}

impl GossipMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(format!("message of {} bytes exceeds limit", bytes.len()));
        }
        bincode::deserialize(bytes).map_err(|e| e.to_string())
    }
}
