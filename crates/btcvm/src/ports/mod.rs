//! Ports: the host-engine contract and the injected capabilities.

pub mod inbound;
pub mod outbound;

pub use inbound::{ChainVm, ConsensusBlock, HealthStatus};
pub use outbound::VmDeps;
