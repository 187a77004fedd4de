//! Preferred and last-accepted block identities.

use parking_lot::RwLock;
use serde::Serialize;
use shared_types::BlockId;

/// Copy of the tip pair taken under one read lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TipSnapshot {
    pub preferred: BlockId,
    pub last_accepted: BlockId,
}

/// The VM's view of consensus progress.
///
/// Written by block acceptance and preference changes, read by status
/// queries. Independent of the builder's scheduling lock.
#[derive(Debug)]
pub struct ChainTips {
    inner: RwLock<TipSnapshot>,
}

impl ChainTips {
    /// Both tips start at `tip`.
    pub fn new(tip: BlockId) -> Self {
        Self {
            inner: RwLock::new(TipSnapshot {
                preferred: tip,
                last_accepted: tip,
            }),
        }
    }

    /// An accepted block becomes both last accepted and preferred.
    pub fn accept(&self, id: BlockId) {
        let mut tips = self.inner.write();
        tips.last_accepted = id;
        tips.preferred = id;
    }

    pub fn set_preferred(&self, id: BlockId) {
        self.inner.write().preferred = id;
    }

    pub fn last_accepted(&self) -> BlockId {
        self.inner.read().last_accepted
    }

    pub fn preferred(&self) -> BlockId {
        self.inner.read().preferred
    }

    pub fn snapshot(&self) -> TipSnapshot {
        *self.inner.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::Hash;

    #[test]
    fn test_accept_moves_both_tips() {
        let tips = ChainTips::new(Hash([1; 32]));
        tips.set_preferred(Hash([2; 32]));
        assert_eq!(tips.last_accepted(), Hash([1; 32]));
        assert_eq!(tips.preferred(), Hash([2; 32]));

        tips.accept(Hash([3; 32]));
        assert_eq!(
            tips.snapshot(),
            TipSnapshot {
                preferred: Hash([3; 32]),
                last_accepted: Hash([3; 32]),
            }
        );
    }
}
