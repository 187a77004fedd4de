//! # Error Types
//!
//! Errors shared across crates: wire decoding and ledger-engine failures.

use crate::entities::Hash;
use thiserror::Error;

/// Errors raised while decoding Bitcoin wire bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// Input ended before a field could be read.
    #[error("Unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    /// A variable-length integer used a longer form than necessary.
    #[error("Non-canonical varint encoding")]
    NonCanonicalVarInt,

    /// A length prefix claims more elements than bytes remain.
    #[error("Count {count} exceeds remaining input of {remaining} bytes")]
    CountTooLarge { count: u64, remaining: usize },

    /// Segwit marker present but followed by an unknown flag.
    #[error("Invalid witness flag byte: {0:#04x}")]
    BadWitnessFlag(u8),

    /// Bytes were left over after a complete value was decoded.
    #[error("{0} trailing bytes after decoded value")]
    TrailingBytes(usize),
}

/// Errors reported by the ledger engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The engine's consensus or policy rules rejected the item.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// The item is already known to the engine.
    #[error("Already have {0}")]
    Duplicate(Hash),

    /// No block or transaction with this hash.
    #[error("Not found: {0}")]
    NotFound(Hash),

    /// No main-chain block at this height.
    #[error("No block at height {0}")]
    HeightNotFound(u64),

    /// Block template generation failed.
    #[error("Template generation failed: {0}")]
    Template(String),

    /// The engine could not serve the request (storage, shutdown).
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    /// Failures that do not indicate invalid data.
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::Duplicate(_) | Self::Unavailable(_))
    }
}
