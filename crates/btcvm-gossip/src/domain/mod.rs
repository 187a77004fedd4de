//! Domain layer: gossip items, their codec, and the dedup filter.

pub mod bloom;
pub mod codec;
pub mod filter;
pub mod item;
pub mod message;

pub use bloom::{BloomFilter, BloomParams};
pub use codec::GossipCodec;
pub use filter::GossipFilter;
pub use item::{GossipItem, GossipKind, NodeId};
pub use message::GossipMessage;
