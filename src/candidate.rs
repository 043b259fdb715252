//! # Candidate — One Search Job
//!
//! Immutable description of a single search round: the base integer `B`
//! derived from the pool target hash. The pool hands the engine a 256-bit
//! hash `h` and the candidate space is anchored at
//!
//! ```text
//! B = 2^(z+264) + h · 2^z
//! ```
//!
//! where `z` is the configured trailing-bit count. The leading power of two
//! fixes the candidate magnitude (and so the share difficulty); the hash
//! occupies the 256 bits above the `z` zeroed trailing bits, which leave room
//! below `B` for the primorial alignment `x`, the window walk `k·Q`, and the
//! constellation shift, all of which stay under 256 bits.

use anyhow::{ensure, Result};
use rug::Integer;

/// A search job: the base `B` every candidate in the round builds on.
#[derive(Clone, Debug)]
pub struct Candidate {
    base: Integer,
}

impl Candidate {
    /// Build the round base from a pool target hash. The hash must be a
    /// non-negative integer of at most 256 bits.
    pub fn from_hash(hash: &Integer, trailing_bits: u32) -> Result<Self> {
        ensure!(*hash >= 0u32, "target hash must be non-negative");
        ensure!(
            hash.significant_bits() <= 256,
            "target hash has {} bits, limit is 256",
            hash.significant_bits()
        );
        let base =
            (Integer::from(1u32) << (trailing_bits + 264)) + Integer::from(hash << trailing_bits);
        Ok(Candidate { base })
    }

    /// Use an arbitrary base directly. This is how reduced configurations
    /// aim the window at small known constellations.
    pub fn from_base(base: Integer) -> Self {
        Candidate { base }
    }

    /// The base integer `B`.
    #[inline]
    pub fn base(&self) -> &Integer {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_has_expected_magnitude() {
        let hash = Integer::from(0xdead_beefu32);
        let c = Candidate::from_hash(&hash, 256).unwrap();
        // 2^(z+264) dominates: exactly z+265 significant bits.
        assert_eq!(c.base().significant_bits(), 256 + 265);
    }

    #[test]
    fn hash_lands_above_trailing_bits() {
        let hash = Integer::from(0xdead_beefu32);
        let c = Candidate::from_hash(&hash, 300).unwrap();
        let shifted_down = Integer::from(c.base() >> 300u32);
        assert_eq!(shifted_down, (Integer::from(1u32) << 264u32) + 0xdead_beefu32);
        // The z trailing bits are zero.
        let low = Integer::from(c.base() % (Integer::from(1u32) << 300u32));
        assert_eq!(low, 0u32);
    }

    #[test]
    fn zero_hash_is_accepted() {
        let c = Candidate::from_hash(&Integer::new(), 256).unwrap();
        assert_eq!(*c.base(), Integer::from(1u32) << 520u32);
    }

    #[test]
    fn full_width_hash_is_accepted() {
        let hash = (Integer::from(1u32) << 256u32) - 1u32;
        assert!(Candidate::from_hash(&hash, 256).is_ok());
    }

    #[test]
    fn oversized_hash_is_rejected() {
        let hash = Integer::from(1u32) << 256u32;
        assert!(Candidate::from_hash(&hash, 256).is_err());
    }

    #[test]
    fn negative_hash_is_rejected() {
        assert!(Candidate::from_hash(&Integer::from(-1), 256).is_err());
    }

    #[test]
    fn from_base_is_verbatim() {
        let c = Candidate::from_base(Integer::from(42u32));
        assert_eq!(*c.base(), 42u32);
    }
}
