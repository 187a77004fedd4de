//! Error types for the gossip layer

use crate::domain::GossipKind;
use shared_types::{LedgerError, WireError};
use thiserror::Error;

/// Errors decoding a gossiped item.
///
/// A decode failure rejects that one item; other items in the same message
/// are still processed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Empty gossip payload")]
    Empty,

    #[error("Unknown gossip item kind: {0:#04x}")]
    UnknownKind(u8),

    #[error("Malformed {kind} payload: {source}")]
    Malformed {
        kind: GossipKind,
        #[source]
        source: WireError,
    },
}

/// Errors from gossip operations.
#[derive(Debug, Error)]
pub enum GossipError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The ledger engine refused an item or failed to answer.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Invalid gossip configuration: {0}")]
    Config(#[from] ConfigErrors),

    #[error("Malformed protocol message: {0}")]
    Protocol(String),

    #[error("Invalid peer filter: {0}")]
    InvalidFilter(String),

    #[error("Handler {0} already registered")]
    HandlerExists(u64),

    #[error("Gossip loops already started")]
    AlreadyStarted,

    /// The network layer failed (peer send, driver construction).
    #[error("Network error: {0}")]
    Network(String),
}

impl GossipError {
    /// Whether the error concerns a single message rather than the node.
    pub fn is_per_message(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::Protocol(_) | Self::InvalidFilter(_) | Self::Ledger(_)
        )
    }
}

/// One violated configuration constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigViolation {
    pub field: &'static str,
    pub reason: String,
}

impl std::fmt::Display for ConfigViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Every constraint a configuration violates, in field order.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}", render_violations(.0))]
pub struct ConfigErrors(pub Vec<ConfigViolation>);

impl ConfigErrors {
    pub fn violations(&self) -> &[ConfigViolation] {
        &self.0
    }

    /// Whether `field` is among the violations.
    pub fn mentions(&self, field: &str) -> bool {
        self.0.iter().any(|v| v.field == field)
    }
}

fn render_violations(violations: &[ConfigViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for gossip operations.
pub type Result<T> = std::result::Result<T, GossipError>;
