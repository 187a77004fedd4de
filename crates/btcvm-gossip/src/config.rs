//! Gossip configuration
//!
//! Durations are carried as signed milliseconds so a malformed config file
//! surfaces as a validation error instead of a deserialization failure.

use crate::error::{ConfigErrors, ConfigViolation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fanout, loop frequency and filter sizing for the gossip layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    /// Fraction of validator stake to push new items to, in [0, 1].
    pub push_gossip_percent_stake: f64,
    /// Maximum validators to push new items to.
    pub push_gossip_num_validators: i64,
    /// Maximum non-validator peers to push new items to.
    pub push_gossip_num_peers: i64,
    pub push_gossip_frequency_ms: i64,
    pub pull_gossip_frequency_ms: i64,
    /// Maximum validators to regossip known items to.
    pub push_regossip_num_validators: i64,
    pub push_regossip_num_peers: i64,
    pub regossip_frequency_ms: i64,
    /// Expected element count the filter is sized for.
    pub bloom_filter_size: i64,
    /// Target false-positive rate, in (0, 1).
    pub bloom_false_positive_rate: f64,
    /// Estimated false-positive rate that triggers a filter reset, in (0, 1).
    pub bloom_reset_threshold: f64,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            push_gossip_percent_stake: 0.9,
            push_gossip_num_validators: 100,
            push_gossip_num_peers: 0,
            push_gossip_frequency_ms: 100,
            pull_gossip_frequency_ms: 1_000,
            push_regossip_num_validators: 10,
            push_regossip_num_peers: 0,
            regossip_frequency_ms: 30_000,
            bloom_filter_size: 8_192,
            bloom_false_positive_rate: 0.01,
            bloom_reset_threshold: 0.05,
        }
    }
}

impl GossipConfig {
    /// Check every constraint, reporting all violations at once.
    pub fn validate(&self) -> Result<(), ConfigErrors> {
        let mut violations = Vec::new();
        let mut check = |ok: bool, field: &'static str, reason: String| {
            if !ok {
                violations.push(ConfigViolation { field, reason });
            }
        };

        check(
            (0.0..=1.0).contains(&self.push_gossip_percent_stake),
            "push_gossip_percent_stake",
            format!("must be within [0, 1], got {}", self.push_gossip_percent_stake),
        );
        for (field, value) in [
            ("push_gossip_num_validators", self.push_gossip_num_validators),
            ("push_gossip_num_peers", self.push_gossip_num_peers),
            ("push_regossip_num_validators", self.push_regossip_num_validators),
            ("push_regossip_num_peers", self.push_regossip_num_peers),
        ] {
            check(value >= 0, field, format!("must be non-negative, got {value}"));
        }
        for (field, value) in [
            ("push_gossip_frequency_ms", self.push_gossip_frequency_ms),
            ("pull_gossip_frequency_ms", self.pull_gossip_frequency_ms),
            ("regossip_frequency_ms", self.regossip_frequency_ms),
        ] {
            check(value > 0, field, format!("must be positive, got {value}ms"));
        }
        check(
            self.bloom_filter_size > 0,
            "bloom_filter_size",
            format!("must be positive, got {}", self.bloom_filter_size),
        );
        for (field, value) in [
            ("bloom_false_positive_rate", self.bloom_false_positive_rate),
            ("bloom_reset_threshold", self.bloom_reset_threshold),
        ] {
            check(
                value > 0.0 && value < 1.0,
                field,
                format!("must be within (0, 1), got {value}"),
            );
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ConfigErrors(violations))
        }
    }

    pub fn push_gossip_frequency(&self) -> Duration {
        millis(self.push_gossip_frequency_ms)
    }

    pub fn pull_gossip_frequency(&self) -> Duration {
        millis(self.pull_gossip_frequency_ms)
    }

    pub fn regossip_frequency(&self) -> Duration {
        millis(self.regossip_frequency_ms)
    }

    /// Fanout for first-time pushes.
    pub fn push_branching(&self) -> BranchingFactor {
        BranchingFactor {
            stake_percentage: self.push_gossip_percent_stake,
            validators: self.push_gossip_num_validators.max(0) as usize,
            peers: self.push_gossip_num_peers.max(0) as usize,
        }
    }

    /// Fanout for periodic regossip; stake weighting is not applied.
    pub fn regossip_branching(&self) -> BranchingFactor {
        BranchingFactor {
            stake_percentage: 0.0,
            validators: self.push_regossip_num_validators.max(0) as usize,
            peers: self.push_regossip_num_peers.max(0) as usize,
        }
    }
}

fn millis(ms: i64) -> Duration {
    Duration::from_millis(ms.max(0) as u64)
}

/// How many peers a push round targets.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct BranchingFactor {
    pub stake_percentage: f64,
    pub validators: usize,
    pub peers: usize,
}

/// Parameters handed to the network layer's push driver.
#[derive(Clone, Debug, PartialEq)]
pub struct PushGossipParams {
    pub push: BranchingFactor,
    pub regossip: BranchingFactor,
    /// Items remembered as discarded to avoid re-pushing them.
    pub discarded_size: usize,
    /// Bytes targeted per push message.
    pub target_gossip_size: usize,
    pub max_regossip_frequency: Duration,
}

/// Parameters handed to the network layer's pull driver.
#[derive(Clone, Debug, PartialEq)]
pub struct PullGossipParams {
    pub target_gossip_size: usize,
}
