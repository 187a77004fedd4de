//! Outbound ports (driven side - SPI)
//!
//! Capabilities the VM consumes, injected once at `initialize`.

use btcvm_gossip::GossipNetwork;
use shared_types::{EngineMessage, LedgerEngine, LedgerEvent};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Everything the VM needs from its environment.
pub struct VmDeps {
    /// The embedded Bitcoin ledger.
    pub ledger: Arc<dyn LedgerEngine>,
    /// Tx-accepted and block-connected notifications from the ledger.
    pub ledger_events: mpsc::Receiver<LedgerEvent>,
    /// Peer transport and gossip drivers.
    pub network: Arc<dyn GossipNetwork>,
    /// Build notifications to the host engine.
    pub to_engine: mpsc::Sender<EngineMessage>,
}
