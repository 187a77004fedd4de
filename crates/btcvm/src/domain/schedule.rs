//! Build scheduling rules.
//!
//! Pure timing logic: given the last recorded build attempt and the current
//! tip, how long until the next build should be requested.

use crate::config::BuilderConfig;
use serde::Serialize;
use shared_types::Hash;
use std::time::Duration;
use tokio::time::Instant;

/// Builder lifecycle as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuilderState {
    /// No pending signal and no request outstanding.
    Idle,
    /// A delay-computation task is waiting out the build delay. Further tx
    /// events are coalesced into it.
    Pending,
}

impl BuilderState {
    pub fn has_pending(self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// The most recent build attempt, successful or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildAttempt {
    pub at: Instant,
    pub parent: Hash,
}

/// Timing state of the builder.
#[derive(Debug, Clone, Default)]
pub struct BuildSchedule {
    last: Option<BuildAttempt>,
}

impl BuildSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, at: Instant, parent: Hash) {
        self.last = Some(BuildAttempt { at, parent });
    }

    pub fn last_attempt(&self) -> Option<BuildAttempt> {
        self.last
    }

    /// Remaining wait before building on `current`.
    ///
    /// Zero before the first attempt. Retrying on the same parent waits the
    /// retry delay from the last attempt; a new parent waits the target
    /// block time. Never negative.
    pub fn delay(&self, now: Instant, current: &Hash, config: &BuilderConfig) -> Duration {
        let Some(last) = self.last else {
            return Duration::ZERO;
        };
        let wait = if last.parent == *current {
            config.retry_delay()
        } else {
            config.target_block_time()
        };
        (last.at + wait).saturating_duration_since(now)
    }
}
