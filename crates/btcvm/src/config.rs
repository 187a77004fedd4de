//! VM configuration
//!
//! Parsed from the JSON bytes the host engine hands to `initialize`. Every
//! section has defaults, so an empty payload yields a working configuration
//! as long as a mining address is not needed.

use crate::error::{Result, VmError};
use btcvm_gossip::{ConfigErrors, ConfigViolation, GossipConfig};
use serde::{Deserialize, Serialize};
use shared_types::PayoutAddress;
use std::time::Duration;

/// Target interval between blocks built on different parents.
pub const DEFAULT_TARGET_BLOCK_TIME_MS: u64 = 2_000;

/// Interval before retrying a build against the same parent.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 100;

/// Capacity of the tx-accepted event buffer feeding the builder.
pub const DEFAULT_TX_EVENT_BUFFER: usize = 1_024;

/// Top-level VM configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Payout addresses for locally built blocks; the first one is used.
    pub mining_addrs: Vec<PayoutAddress>,
    pub gossip: GossipConfig,
    pub builder: BuilderConfig,
    pub log: LogConfig,
}

impl VmConfig {
    /// Parse and validate configuration bytes. Empty input yields defaults.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let config: Self = if bytes.iter().all(u8::is_ascii_whitespace) {
            Self::default()
        } else {
            serde_json::from_slice(bytes).map_err(|e| VmError::ConfigFormat(e.to_string()))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every section, reporting all violations together.
    pub fn validate(&self) -> std::result::Result<(), ConfigErrors> {
        let mut violations = match self.gossip.validate() {
            Ok(()) => Vec::new(),
            Err(errors) => errors.0,
        };
        violations.extend(self.builder.violations());
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ConfigErrors(violations))
        }
    }

    /// Payout address for built blocks.
    pub fn mining_address(&self) -> Option<&PayoutAddress> {
        self.mining_addrs.first()
    }
}

/// Block builder timing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    pub target_block_time_ms: u64,
    pub retry_delay_ms: u64,
    pub tx_event_buffer: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            target_block_time_ms: DEFAULT_TARGET_BLOCK_TIME_MS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            tx_event_buffer: DEFAULT_TX_EVENT_BUFFER,
        }
    }
}

impl BuilderConfig {
    pub fn target_block_time(&self) -> Duration {
        Duration::from_millis(self.target_block_time_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    fn violations(&self) -> Vec<ConfigViolation> {
        let mut violations = Vec::new();
        if self.tx_event_buffer == 0 {
            violations.push(ConfigViolation {
                field: "builder.tx_event_buffer",
                reason: "must be positive".into(),
            });
        }
        if self.retry_delay_ms > self.target_block_time_ms {
            violations.push(ConfigViolation {
                field: "builder.retry_delay_ms",
                reason: format!(
                    "must not exceed target_block_time_ms ({}), got {}",
                    self.target_block_time_ms, self.retry_delay_ms
                ),
            });
        }
        violations
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}
