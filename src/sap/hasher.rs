//! Message identification hash allocation
//!
//! Every distinct payload we announce gets a non-zero 16-bit hash. The same
//! content keeps its hash for as long as it is active, so re-announcements
//! are recognisable as repeats. Hashes are drawn at random from a seeded
//! generator, avoiding the ones currently in use.

use std::collections::HashMap;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};

/// Allocator of message identification hashes
#[derive(Debug)]
pub struct Hasher {
    rng: StdRng,
    by_content: HashMap<Bytes, u16>,
    by_hash: HashMap<u16, Bytes>,
}

impl Hasher {
    /// Create a hasher seeded from system entropy
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Create a deterministic hasher
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            rng,
            by_content: HashMap::new(),
            by_hash: HashMap::new(),
        }
    }

    /// Hash for `content`, allocating one if it has none
    pub fn hash(&mut self, content: &[u8]) -> Result<u16> {
        if let Some(hash) = self.by_content.get(content) {
            return Ok(*hash);
        }

        let free = u16::MAX as usize - self.by_hash.len();
        if free == 0 {
            return Err(Error::IdentifierSpaceExhausted);
        }

        // Random probing while the space is sparse, a linear probe from a
        // random start once it is crowded
        let hash = if free > (u16::MAX as usize) / 16 {
            loop {
                let candidate = self.rng.gen_range(1..=u16::MAX);
                if !self.by_hash.contains_key(&candidate) {
                    break candidate;
                }
            }
        } else {
            let start = self.rng.gen_range(0..u16::MAX as u32);
            (0..u16::MAX as u32)
                .map(|i| ((start + i) % u16::MAX as u32 + 1) as u16)
                .find(|h| !self.by_hash.contains_key(h))
                .ok_or(Error::IdentifierSpaceExhausted)?
        };

        let content = Bytes::copy_from_slice(content);
        self.by_content.insert(content.clone(), hash);
        self.by_hash.insert(hash, content);
        Ok(hash)
    }

    /// Release the hash held by `content`
    ///
    /// Returns the released hash, if there was one.
    pub fn expire(&mut self, content: &[u8]) -> Option<u16> {
        let hash = self.by_content.remove(content)?;
        self.by_hash.remove(&hash);
        Some(hash)
    }

    /// Number of hashes in use
    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_content_same_hash() {
        let mut hasher = Hasher::with_seed(1);
        let a = hasher.hash(b"a").unwrap();
        let b = hasher.hash(b"b").unwrap();

        assert_ne!(a, 0);
        assert_ne!(a, b);
        assert_eq!(hasher.hash(b"a").unwrap(), a);
        assert_eq!(hasher.len(), 2);
    }

    #[test]
    fn test_seeded_is_deterministic() {
        let mut x = Hasher::with_seed(42);
        let mut y = Hasher::with_seed(42);

        for content in [&b"one"[..], b"two", b"three"] {
            assert_eq!(x.hash(content).unwrap(), y.hash(content).unwrap());
        }
    }

    #[test]
    fn test_expire_frees_hash() {
        let mut hasher = Hasher::with_seed(7);
        let a = hasher.hash(b"a").unwrap();

        assert_eq!(hasher.expire(b"a"), Some(a));
        assert_eq!(hasher.expire(b"a"), None);
        assert!(hasher.is_empty());
    }

    #[test]
    fn test_exhaustion() {
        let mut hasher = Hasher::with_seed(3);
        let mut seen = std::collections::HashSet::new();

        for n in 0..u16::MAX as u32 {
            let hash = hasher.hash(&n.to_be_bytes()).unwrap();
            assert!(hash != 0 && seen.insert(hash));
        }

        assert!(matches!(
            hasher.hash(b"one too many"),
            Err(Error::IdentifierSpaceExhausted)
        ));

        // any freed hash becomes available again
        let freed = hasher.expire(&7u32.to_be_bytes()).unwrap();
        assert_eq!(hasher.hash(b"one too many").unwrap(), freed);
    }
}
