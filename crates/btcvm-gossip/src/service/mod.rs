//! Service layer: the dedup set, the protocol handler and the orchestrator.

pub mod handler;
pub mod orchestrator;
pub mod set;

pub use handler::{GossipHandler, TARGET_RESPONSE_SIZE};
pub use orchestrator::{GossipOrchestrator, BTC_GOSSIP_HANDLER_ID};
pub use set::DedupSet;
