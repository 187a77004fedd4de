//! # BTCVM
//!
//! A Bitcoin ledger embedded as a VM in a BFT consensus host engine. The
//! host decides block order and finality; this crate decides when a block
//! is worth building and exposes ledger blocks in the host's block contract.
//!
//! ## Architecture
//!
//! ```text
//! LedgerEngine ──events──► router ──┬─► BlockBuilder ──PendingTxs──► host engine
//!                                   └─► GossipOrchestrator ──► peers
//!
//! host engine ──► BtcVm (ChainVm) ──► build / parse / get ──► BlockAdapter
//!                                                      │
//!                                   accept ──► ChainTips
//! ```
//!
//! ## Build timing
//!
//! | Situation                         | Delay before notifying host |
//! |-----------------------------------|-----------------------------|
//! | No build attempted yet            | none                        |
//! | Tip unchanged since last attempt  | retry delay (100 ms)        |
//! | Tip moved since last attempt      | target block time (2 s)     |
//!
//! Delays are measured from the last attempt, successful or not.

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod ports;
pub mod service;

pub use config::{BuilderConfig, LogConfig, VmConfig};
pub use domain::{BuildSchedule, BuilderState, ChainTips, TipSnapshot};
pub use error::{BuildError, BuilderError, LoggingError, Result, VmError};
pub use logging::init_logging;
pub use metrics::{BuilderMetrics, BuilderMetricsSnapshot};
pub use ports::{ChainVm, ConsensusBlock, HealthStatus, VmDeps};
pub use service::{BlockAdapter, BlockBuilder, BtcVm, VERSION};
