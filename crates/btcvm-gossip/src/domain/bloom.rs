//! Salted Bloom filter
//!
//! INVARIANTS:
//! - No false negatives: once inserted, `contains()` returns true until the
//!   filter is cleared or re-seeded.
//! - Positions depend on the salt, so peers holding the salt can test
//!   membership and a re-seeded filter shares no bit layout with its
//!   predecessor.

use bitvec::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::LN_2;
use std::io::Cursor;

/// Salt length in bytes.
pub const SALT_LEN: usize = 32;

/// Upper bound on a peer-supplied filter, in bits.
pub const MAX_FILTER_BITS: usize = 8 * 1024 * 1024;

const MAX_HASH_COUNT: usize = 16;

/// Size (m) and hash count (k) for a target capacity and false-positive rate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BloomParams {
    pub size_bits: usize,
    pub hash_count: usize,
}

/// m = -n*ln(p) / ln(2)^2, k = (m/n) * ln(2)
pub fn optimal_parameters(capacity: usize, target_fpr: f64) -> BloomParams {
    let n = capacity.max(1) as f64;
    let m = (-n * target_fpr.ln() / (LN_2 * LN_2)).ceil().max(8.0) as usize;
    let k = ((m as f64 / n) * LN_2).round() as usize;
    BloomParams {
        size_bits: m,
        hash_count: k.clamp(1, MAX_HASH_COUNT),
    }
}

/// FPR = (1 - e^(-kn/m))^k
pub fn estimate_fpr(m: usize, n: usize, k: usize) -> f64 {
    if m == 0 {
        return 1.0;
    }
    let exponent = -(k as f64) * (n as f64) / (m as f64);
    (1.0 - exponent.exp()).powi(k as i32)
}

/// Bloom filter keyed by a random salt.
#[derive(Clone, Debug)]
pub struct BloomFilter {
    bits: BitVec<u8, Lsb0>,
    k: usize,
    n: usize,
    salt: [u8; SALT_LEN],
}

/// Serialized form; the salt travels separately.
#[derive(Serialize, Deserialize)]
struct FilterWire {
    bits: Vec<u8>,
    len: usize,
    k: usize,
    n: usize,
}

impl BloomFilter {
    pub fn new(params: BloomParams, salt: [u8; SALT_LEN]) -> Self {
        Self {
            bits: bitvec![u8, Lsb0; 0; params.size_bits.max(1)],
            k: params.hash_count.max(1),
            n: 0,
            salt,
        }
    }

    pub fn insert(&mut self, element: &[u8]) {
        for pos in self.positions(element) {
            self.bits.set(pos, true);
        }
        self.n += 1;
    }

    pub fn contains(&self, element: &[u8]) -> bool {
        self.positions(element).all(|pos| self.bits[pos])
    }

    /// Estimated false-positive rate at the current fill.
    pub fn false_positive_rate(&self) -> f64 {
        estimate_fpr(self.bits.len(), self.n, self.k)
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn size_bits(&self) -> usize {
        self.bits.len()
    }

    pub fn hash_count(&self) -> usize {
        self.k
    }

    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    /// Filter bytes, without the salt.
    pub fn marshal(&self) -> Vec<u8> {
        let wire = FilterWire {
            bits: self.bits.as_raw_slice().to_vec(),
            len: self.bits.len(),
            k: self.k,
            n: self.n,
        };
        bincode::serialize(&wire).unwrap_or_default()
    }

    /// Rebuild a filter from [`marshal`](Self::marshal) output and its salt.
    pub fn parse(bytes: &[u8], salt: &[u8]) -> Result<Self, String> {
        let salt: [u8; SALT_LEN] = salt
            .try_into()
            .map_err(|_| format!("salt must be {SALT_LEN} bytes, got {}", salt.len()))?;
        let wire: FilterWire = bincode::deserialize(bytes).map_err(|e| e.to_string())?;
        if wire.len == 0 || wire.len > MAX_FILTER_BITS {
            return Err(format!("filter size {} out of range", wire.len));
        }
        if wire.k == 0 || wire.k > MAX_HASH_COUNT {
            return Err(format!("hash count {} out of range", wire.k));
        }
        if wire.bits.len() * 8 < wire.len {
            return Err("filter bits shorter than declared size".into());
        }
        let mut bits = BitVec::<u8, Lsb0>::from_vec(wire.bits);
        bits.truncate(wire.len);
        Ok(Self {
            bits,
            k: wire.k,
            n: wire.n,
            salt,
        })
    }

    /// k positions by double hashing: h(i) = h1 + i*h2 over murmur3(salt || element).
    fn positions(&self, element: &[u8]) -> impl Iterator<Item = usize> {
        let mut keyed = Vec::with_capacity(SALT_LEN + element.len());
        keyed.extend_from_slice(&self.salt);
        keyed.extend_from_slice(element);
        let hash = murmur3::murmur3_x64_128(&mut Cursor::new(&keyed), 0).unwrap_or(0);
        let h1 = hash as u64;
        let h2 = ((hash >> 64) as u64) | 1;
        let m = self.bits.len() as u64;
        (0..self.k as u64).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % m) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(capacity: usize, fpr: f64, salt: u8) -> BloomFilter {
        BloomFilter::new(optimal_parameters(capacity, fpr), [salt; SALT_LEN])
    }

    #[test]
    fn test_optimal_parameters() {
        // n=100, p=0.01 -> m~959, k~7
        let params = optimal_parameters(100, 0.01);
        assert!((900..=1000).contains(&params.size_bits), "m={}", params.size_bits);
        assert!((6..=8).contains(&params.hash_count), "k={}", params.hash_count);
    }

    #[test]
    fn test_no_false_negatives_bulk() {
        let mut bloom = filter(1_000, 0.01, 1);
        let elements: Vec<[u8; 32]> = (0..1_000u32)
            .map(|i| {
                let mut e = [0u8; 32];
                e[..4].copy_from_slice(&i.to_le_bytes());
                e
            })
            .collect();
        for e in &elements {
            bloom.insert(e);
        }
        for e in &elements {
            assert!(bloom.contains(e), "false negative");
        }
    }

    #[test]
    fn test_false_positive_rate_bounded() {
        let mut bloom = filter(200, 0.01, 2);
        for i in 0..200u32 {
            bloom.insert(format!("in-{i}").as_bytes());
        }
        let hits = (0..20_000u32)
            .filter(|i| bloom.contains(format!("out-{i}").as_bytes()))
            .count();
        let observed = hits as f64 / 20_000.0;
        assert!(observed <= 0.02, "observed fpr {observed}");
    }

    #[test]
    fn test_estimated_fpr_grows_with_fill() {
        let mut bloom = filter(10, 0.01, 3);
        let empty = bloom.false_positive_rate();
        for i in 0..50u32 {
            bloom.insert(&i.to_le_bytes());
        }
        assert_eq!(empty, 0.0);
        assert!(bloom.false_positive_rate() > 0.05);
    }

    #[test]
    fn test_salt_changes_layout() {
        let mut a = filter(100, 0.01, 4);
        let mut b = filter(100, 0.01, 5);
        a.insert(b"element");
        b.insert(b"element");
        assert_ne!(a.marshal(), b.marshal());
    }

    #[test]
    fn test_marshal_parse_preserves_membership() {
        let mut bloom = filter(100, 0.01, 6);
        bloom.insert(b"one");
        bloom.insert(b"two");
        let restored = BloomFilter::parse(&bloom.marshal(), bloom.salt()).unwrap();
        assert!(restored.contains(b"one"));
        assert!(restored.contains(b"two"));
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.size_bits(), bloom.size_bits());
    }

    #[test]
    fn test_parse_rejects_bad_salt_and_bytes() {
        let bloom = filter(100, 0.01, 7);
        assert!(BloomFilter::parse(&bloom.marshal(), &[0u8; 3]).is_err());
        assert!(BloomFilter::parse(&[0xff; 5], bloom.salt()).is_err());
    }
}
