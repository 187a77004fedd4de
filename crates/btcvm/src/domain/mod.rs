//! Domain layer: build timing rules and chain-tip bookkeeping.

pub mod chain_tips;
pub mod schedule;

pub use chain_tips::{ChainTips, TipSnapshot};
pub use schedule::{BuildAttempt, BuildSchedule, BuilderState};
