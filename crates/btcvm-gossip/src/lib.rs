//! # BTCVM Gossip
//!
//! Unified propagation of Bitcoin transactions and blocks between peers and
//! the local ledger engine.
//!
//! ## Architecture
//!
//! ```text
//! peer ──► GossipNetwork ──► GossipHandler ──► GossipCodec::decode
//!                                                   │
//!                                                   ▼
//!                            DedupSet::add ──► LedgerEngine (process tx / block)
//!                                │
//!                                └─► outbound queue ──► push loop ──► PushGossiper
//!
//! ledger events ──► GossipOrchestrator::announce_{txs,block} ──► outbound queue
//! ```
//!
//! ## Wire Format
//!
//! ```text
//! [kind: u8 (0x01 tx | 0x02 block)][payload: Bitcoin witness encoding]
//! ```
//!
//! ## Invariants
//!
//! - An item's identity is its content hash; two nodes building the same
//!   transaction agree on its id.
//! - Added items test positive in the filter until the next reset.
//! - Rejected transactions are never marked known; blocks are marked known
//!   once the ledger has seen their bytes, whatever the outcome.
//! - Pull iteration yields pending transactions only.

pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod ports;
pub mod service;

pub use config::{BranchingFactor, GossipConfig, PullGossipParams, PushGossipParams};
pub use domain::{
    BloomFilter, GossipCodec, GossipFilter, GossipItem, GossipKind, GossipMessage, NodeId,
};
pub use error::{ConfigErrors, ConfigViolation, DecodeError, GossipError, Result};
pub use metrics::{GossipMetrics, GossipMetricsSnapshot};
pub use ports::{AppHandler, GossipNetwork, GossipSet, Gossiper, PushGossiper};
pub use service::{
    DedupSet, GossipHandler, GossipOrchestrator, BTC_GOSSIP_HANDLER_ID, TARGET_RESPONSE_SIZE,
};
