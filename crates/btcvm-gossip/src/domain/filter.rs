//! Gossip dedup filter: a salted Bloom filter plus its reset policy.

use super::bloom::{optimal_parameters, BloomFilter, SALT_LEN};
use rand::Rng;
use shared_types::Hash;

/// The filter a node advertises to peers during pull gossip.
///
/// Each reset re-seeds with a fresh salt and bumps `generation`, so peers
/// and callers can tell generations apart even when contents coincide.
#[derive(Debug, Clone)]
pub struct GossipFilter {
    bloom: BloomFilter,
    min_target_elements: usize,
    target_fpr: f64,
    reset_fpr: f64,
    generation: u64,
}

impl GossipFilter {
    pub fn new(min_target_elements: usize, target_fpr: f64, reset_fpr: f64) -> Self {
        let min_target_elements = min_target_elements.max(1);
        Self {
            bloom: Self::fresh(min_target_elements, target_fpr),
            min_target_elements,
            target_fpr,
            reset_fpr,
            generation: 0,
        }
    }

    fn fresh(capacity: usize, target_fpr: f64) -> BloomFilter {
        let salt: [u8; SALT_LEN] = rand::thread_rng().gen();
        BloomFilter::new(optimal_parameters(capacity, target_fpr), salt)
    }

    pub fn add(&mut self, id: &Hash) {
        self.bloom.insert(id.as_bytes());
    }

    pub fn has(&self, id: &Hash) -> bool {
        self.bloom.contains(id.as_bytes())
    }

    pub fn needs_reset(&self) -> bool {
        self.bloom.false_positive_rate() > self.reset_fpr
    }

    /// Re-seed the filter if its estimated false-positive rate exceeds the
    /// reset threshold, then re-insert `live`.
    ///
    /// The new filter is sized for twice the live set (at least the
    /// configured minimum) so it does not immediately refill.
    pub fn reset_if_needed<I>(&mut self, live: I) -> bool
    where
        I: ExactSizeIterator<Item = Hash>,
    {
        if !self.needs_reset() {
            return false;
        }
        let capacity = self.min_target_elements.max(live.len().saturating_mul(2));
        self.bloom = Self::fresh(capacity, self.target_fpr);
        for id in live {
            self.add(&id);
        }
        self.generation += 1;
        true
    }

    /// Serialized filter and its salt.
    pub fn marshal(&self) -> (Vec<u8>, Vec<u8>) {
        (self.bloom.marshal(), self.bloom.salt().to_vec())
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn false_positive_rate(&self) -> f64 {
        self.bloom.false_positive_rate()
    }

    pub fn len(&self) -> usize {
        self.bloom.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bloom.is_empty()
    }
}
