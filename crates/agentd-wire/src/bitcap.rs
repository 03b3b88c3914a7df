//! Capability bitset.
//!
//! A dense bit array over `u32` words, sized to the number of capability
//! bits the dataservice API defines. Reduction is monotone: intersecting a
//! set with a mask can only clear bits, never set them.

use crate::dataservice::caps::ApiCap;

/// Number of capability bits carried by a [`BitCap`].
pub const BITCAP_BITS: usize = ApiCap::BITS_MAX;

/// Number of `u32` words backing a [`BitCap`].
pub const BITCAP_WORDS: usize = BITCAP_BITS.div_ceil(32);

/// Size in bytes of the raw wire representation of a [`BitCap`].
pub const BITCAP_SIZE: usize = BITCAP_WORDS * 4;

/// A fixed-width capability bitset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitCap {
    words: [u32; BITCAP_WORDS],
}

impl BitCap {
    /// A bitset with every capability granted.
    pub fn all() -> Self {
        BitCap {
            words: [u32::MAX; BITCAP_WORDS],
        }
    }

    /// A bitset with every capability denied.
    pub fn none() -> Self {
        BitCap {
            words: [0; BITCAP_WORDS],
        }
    }

    /// Grants a single capability.
    pub fn set(&mut self, cap: ApiCap) {
        self.words[cap as usize / 32] |= 1 << (cap as usize % 32);
    }

    /// Revokes a single capability.
    pub fn clear(&mut self, cap: ApiCap) {
        self.words[cap as usize / 32] &= !(1 << (cap as usize % 32));
    }

    /// True if the capability is granted.
    pub fn is_set(&self, cap: ApiCap) -> bool {
        self.words[cap as usize / 32] & (1 << (cap as usize % 32)) != 0
    }

    /// Intersection: `self ∧ other`.
    pub fn intersect(&self, other: &BitCap) -> BitCap {
        let mut out = *self;
        for (w, o) in out.words.iter_mut().zip(other.words.iter()) {
            *w &= o;
        }
        out
    }

    /// Union: `self ∨ other`.
    pub fn union(&self, other: &BitCap) -> BitCap {
        let mut out = *self;
        for (w, o) in out.words.iter_mut().zip(other.words.iter()) {
            *w |= o;
        }
        out
    }

    /// True if every capability granted here is also granted by `other`.
    pub fn is_subset_of(&self, other: &BitCap) -> bool {
        self.intersect(other) == *self
    }

    /// Raw wire representation: each word big-endian, lowest word first.
    pub fn to_bytes(&self) -> [u8; BITCAP_SIZE] {
        let mut out = [0u8; BITCAP_SIZE];
        for (i, w) in self.words.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&w.to_be_bytes());
        }
        out
    }

    /// Parses the raw wire representation.
    ///
    /// Fails when `raw` is not exactly [`BITCAP_SIZE`] bytes.
    pub fn from_bytes(raw: &[u8]) -> Option<BitCap> {
        if raw.len() != BITCAP_SIZE {
            return None;
        }

        let mut words = [0u32; BITCAP_WORDS];
        for (i, w) in words.iter_mut().enumerate() {
            let mut word = [0u8; 4];
            word.copy_from_slice(&raw[i * 4..i * 4 + 4]);
            *w = u32::from_be_bytes(word);
        }
        Some(BitCap { words })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_has_every_bit() {
        let caps = BitCap::all();
        assert!(caps.is_set(ApiCap::RootContextCreate));
        assert!(caps.is_set(ApiCap::AppBlockWrite));
    }

    #[test]
    fn none_has_no_bit() {
        let caps = BitCap::none();
        assert!(!caps.is_set(ApiCap::RootContextCreate));
        assert!(!caps.is_set(ApiCap::AppBlockWrite));
    }

    #[test]
    fn set_then_clear() {
        let mut caps = BitCap::none();
        caps.set(ApiCap::AppBlockRead);
        assert!(caps.is_set(ApiCap::AppBlockRead));
        caps.clear(ApiCap::AppBlockRead);
        assert!(!caps.is_set(ApiCap::AppBlockRead));
    }

    #[test]
    fn set_is_isolated() {
        let mut caps = BitCap::none();
        caps.set(ApiCap::AppPqTransactionSubmit);
        assert!(!caps.is_set(ApiCap::AppPqTransactionFirstRead));
        assert!(!caps.is_set(ApiCap::AppTransactionRead));
    }

    #[test]
    fn intersect_only_shrinks() {
        let mut mask = BitCap::all();
        mask.clear(ApiCap::AppBlockWrite);

        let reduced = BitCap::all().intersect(&mask);
        assert!(!reduced.is_set(ApiCap::AppBlockWrite));
        assert!(reduced.is_set(ApiCap::AppBlockRead));
        assert!(reduced.is_subset_of(&BitCap::all()));

        // A second intersection with a permissive mask cannot restore bits.
        let again = reduced.intersect(&BitCap::all());
        assert_eq!(again, reduced);
    }

    #[test]
    fn union_combines() {
        let mut a = BitCap::none();
        a.set(ApiCap::AppBlockRead);
        let mut b = BitCap::none();
        b.set(ApiCap::AppTransactionRead);

        let u = a.union(&b);
        assert!(u.is_set(ApiCap::AppBlockRead));
        assert!(u.is_set(ApiCap::AppTransactionRead));
    }

    #[test]
    fn subset_reflexive_and_strict() {
        let mut small = BitCap::none();
        small.set(ApiCap::AppBlockRead);
        assert!(small.is_subset_of(&small));
        assert!(small.is_subset_of(&BitCap::all()));
        assert!(!BitCap::all().is_subset_of(&small));
    }

    #[test]
    fn byte_round_trip() {
        let mut caps = BitCap::none();
        caps.set(ApiCap::RootContextReduceCaps);
        caps.set(ApiCap::AppGlobalSettingWrite);
        let parsed = BitCap::from_bytes(&caps.to_bytes()).unwrap();
        assert_eq!(parsed, caps);
    }

    #[test]
    fn from_bytes_rejects_wrong_size() {
        assert!(BitCap::from_bytes(&[0u8; BITCAP_SIZE + 1]).is_none());
        assert!(BitCap::from_bytes(&[]).is_none());
    }
}
