//! Error types for the VM facade and block builder

use btcvm_gossip::{ConfigErrors, GossipError};
use shared_types::{Hash, LedgerError, WireError};
use thiserror::Error;

/// Result type alias for VM operations
pub type Result<T> = std::result::Result<T, VmError>;

/// Why a build-block request produced no block.
#[derive(Debug, Error)]
pub enum BuildError {
    /// No payout address is configured for coinbase outputs
    #[error("No mining address configured")]
    NoMiningAddress,

    /// The current tip could not be read
    #[error("Failed to read current block: {0}")]
    CurrentBlock(#[source] LedgerError),

    /// The ledger could not assemble a template
    #[error("Template generation failed: {0}")]
    Template(#[source] LedgerError),

    /// The ledger refused the block it just templated
    #[error("Built block rejected: {0}")]
    Process(#[source] LedgerError),

    /// The built block did not connect to a known parent
    #[error("Built block {0} is an orphan")]
    Orphan(Hash),
}

impl BuildError {
    /// Whether retrying against the same parent may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::NoMiningAddress => false,
            Self::CurrentBlock(e) | Self::Template(e) | Self::Process(e) => e.is_soft(),
            Self::Orphan(_) => true,
        }
    }
}

/// Why a wait for a buildable event ended without a signal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuilderError {
    /// The caller's cancellation token fired
    #[error("Wait cancelled")]
    Cancelled,

    /// The process-wide shutdown broadcast fired
    #[error("Shutting down")]
    Shutdown,

    /// The current tip could not be read while computing the delay
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Failure installing the global tracing subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("Global subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

/// Errors returned to the host engine.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("VM not initialized")]
    NotInitialized,

    #[error("VM already initialized")]
    AlreadyInitialized,

    /// The configuration bytes were not valid JSON for `VmConfig`
    #[error("Malformed VM configuration: {0}")]
    ConfigFormat(String),

    #[error("Invalid VM configuration: {0}")]
    Config(#[from] ConfigErrors),

    #[error("Build failed: {0}")]
    Build(#[from] BuildError),

    #[error("Builder error: {0}")]
    Builder(#[from] BuilderError),

    /// Block bytes from the host engine did not decode
    #[error("Malformed block: {0}")]
    Parse(#[from] WireError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Gossip error: {0}")]
    Gossip(#[from] GossipError),
}

impl VmError {
    /// Check if the host engine may retry the call later
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::NotInitialized => true,
            Self::Build(e) => e.is_recoverable(),
            Self::Builder(e) => matches!(e, BuilderError::Cancelled | BuilderError::Ledger(_)),
            Self::Ledger(e) => e.is_soft(),
            _ => false,
        }
    }

    /// Check if the error came from a cancelled or shut-down wait
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Self::Builder(BuilderError::Cancelled | BuilderError::Shutdown)
        )
    }
}
