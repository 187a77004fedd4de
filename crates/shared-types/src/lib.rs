//! # Shared Types Crate
//!
//! Types shared by every btcvm crate:
//!
//! - **entities**: `Hash`, chain states and messages exchanged with the host
//!   consensus engine.
//! - **wire**: Bitcoin P2P wire types (`Transaction`, `Block`) with their
//!   byte-exact encoding and content hashes.
//! - **ledger**: the `LedgerEngine` capability consumed from the embedded
//!   chain/mempool implementation, and the events it emits.
//! - **shutdown**: the process-wide shutdown broadcast.
//!
//! ## Design Principles
//!
//! - **Content identity**: a transaction or block hash depends only on its
//!   bytes, never on arrival order or peer.
//! - **Injected capabilities**: the ledger engine is a trait object handed to
//!   constructors; its notifications arrive over a channel, not callbacks.

pub mod entities;
pub mod errors;
pub mod ledger;
pub mod shutdown;
pub mod wire;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use entities::*;
pub use errors::*;
pub use ledger::*;
pub use shutdown::{shutdown_channel, shutdown_signalled};
pub use wire::{Block, BlockHeader, OutPoint, Transaction, TxIn, TxOut, WireDecode, WireEncode};
