//! # SearchParams — Engine Configuration
//!
//! The consensus constants of the sextuplet search, carried as a validated
//! value so reduced configurations can drive the engine in tests. Production
//! use is `SearchParams::riecoin()`; everything about the candidate space —
//! constellation geometry, primorial, sieve window — is fixed by those values
//! and the structs downstream never consult anything else.
//!
//! ## The candidate space
//!
//! Candidates have the form `B + x + k·Q + C + o`, where `Q` is the primorial
//! of all primes up to 167 (so no candidate has a factor ≤ 167 by
//! construction), `C = 16057` aligns the window on the sextuplet residue
//! class mod `Q`, `x` shifts `B` onto a multiple of `Q`, `k` ranges over the
//! sieve window, and `o` runs over the six constellation offsets.
//!
//! ## References
//!
//! - Riecoin proof-of-work: <https://riecoin.dev/>
//! - OEIS: [A022008](https://oeis.org/A022008) — initial members of prime
//!   sextuplets (p, p+4, p+6, p+10, p+12, p+16).

use anyhow::{ensure, Result};
use rug::Integer;

/// The six constellation offsets. Sextuplet geometry is consensus-fixed;
/// every module indexes residues and Fermat tests by position in this array.
pub const CONSTELLATION_OFFSETS: [u32; 6] = [0, 4, 6, 10, 12, 16];

/// Gaps between consecutive constellation offsets, used when walking a
/// candidate (or its residues) from one offset to the next.
pub const OFFSET_GAPS: [u32; 5] = [4, 2, 4, 2, 4];

/// Limb budget for reported candidates: 32 limbs of 64 bits.
pub const MAX_CANDIDATE_BITS: u32 = 2048;

/// Engine configuration. Construct with [`SearchParams::riecoin`] for the
/// consensus search; tests build reduced instances directly.
#[derive(Clone, Debug)]
pub struct SearchParams {
    /// Largest sieving prime; the generated table must end exactly here.
    pub max_sieve_prime: u32,
    /// Number of odd primes generated by trial division (`L`). Primes with
    /// table index below this have their primorial inverses precomputed and
    /// are sieved through the per-prime offset array.
    pub low_prime_count: usize,
    /// Table index of the first sieving prime (`F`). Primes below it divide
    /// the primorial and must not be sieved.
    pub first_prime_index: usize,
    /// Sieve window size `W` in candidate positions. Multiple of 32 and of
    /// `segment_size`.
    pub sieve_size: usize,
    /// Segment length `S` for the cache-friendly low-prime pass.
    pub segment_size: usize,
    /// 32-bit multiplicands whose product is the primorial `Q`.
    pub primorial_multiplicands: Vec<u32>,
    /// Additive shift `C` placing candidates on the sextuplet residue class
    /// modulo `Q`.
    pub constellation_shift: u32,
    /// Bit offset `z` of the pool target hash inside the candidate base:
    /// `B = 2^(z+264) + h·2^z`.
    pub trailing_bits: u32,
    /// Tester threads per round; 0 means one per available core.
    pub workers: usize,
    /// Run the high-prime sieve pass concurrently with the testers. Bits only
    /// ever transition 0→1, so a tester racing ahead of the sieve at worst
    /// Fermat-tests a composite that the sieve would have removed. Disable to
    /// get a bit-for-bit reproducible hit set on reduced configurations,
    /// where small Fermat pseudoprimes make the race observable.
    pub overlap_sieve_and_test: bool,
}

impl SearchParams {
    /// The Riecoin-consensus configuration: primes to ~9.6·10⁸, a 19.2M
    /// position window in eight segments, `Q = 167#`, `C = 16057`.
    pub fn riecoin() -> Self {
        SearchParams {
            max_sieve_prime: 962_696_017,
            low_prime_count: 3_343,
            first_prime_index: 39,
            sieve_size: 8 * 2_400_000,
            segment_size: 2_400_000,
            primorial_multiplicands: vec![
                223_092_870,
                2_756_205_443,
                907_383_479,
                4_132_280_413,
                121_330_189,
                257_557_397,
                490_995_677,
                27_221,
            ],
            constellation_shift: 16_057,
            trailing_bits: 256,
            workers: 0,
            overlap_sieve_and_test: true,
        }
    }

    /// Structural validation. Table-dependent invariants (the generated
    /// table ending at `max_sieve_prime`) are checked at generation time.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.sieve_size > 0 && self.sieve_size % 32 == 0,
            "sieve_size {} must be a positive multiple of 32",
            self.sieve_size
        );
        ensure!(
            self.segment_size > 0 && self.sieve_size % self.segment_size == 0,
            "segment_size {} must divide sieve_size {}",
            self.segment_size,
            self.sieve_size
        );
        ensure!(
            self.low_prime_count > 5,
            "low_prime_count {} must exceed the five wheel primes",
            self.low_prime_count
        );
        ensure!(
            self.first_prime_index < self.low_prime_count,
            "first_prime_index {} must be below low_prime_count {}",
            self.first_prime_index,
            self.low_prime_count
        );
        ensure!(
            !self.primorial_multiplicands.is_empty(),
            "primorial_multiplicands must not be empty"
        );
        ensure!(
            (256..=MAX_CANDIDATE_BITS - 272).contains(&self.trailing_bits),
            "trailing_bits {} outside [256, {}]",
            self.trailing_bits,
            MAX_CANDIDATE_BITS - 272
        );
        Ok(())
    }

    /// The primorial `Q` as a big integer.
    pub fn primorial(&self) -> Integer {
        let mut q = Integer::from(1u32);
        for &m in &self.primorial_multiplicands {
            q *= m;
        }
        q
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn riecoin_params_validate() {
        SearchParams::riecoin().validate().unwrap();
    }

    #[test]
    fn riecoin_primorial_is_167_sharp() {
        // Q = 167# reproduced from the eight multiplicands; pinned residue
        // mod 1e9+7 and the 220-bit size bound.
        let q = SearchParams::riecoin().primorial();
        assert_eq!(q.mod_u(1_000_000_007), 211_620_392);
        assert_eq!(q.significant_bits(), 220);
    }

    #[test]
    fn riecoin_primorial_divisible_by_small_primes() {
        let q = SearchParams::riecoin().primorial();
        for p in [2u32, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 163, 167] {
            assert!(q.is_divisible_u(p), "{}# must be divisible by {}", 167, p);
        }
        assert!(!q.is_divisible_u(173));
        assert!(!q.is_divisible_u(179));
    }

    #[test]
    fn offsets_and_gaps_agree() {
        for (i, &gap) in OFFSET_GAPS.iter().enumerate() {
            assert_eq!(
                CONSTELLATION_OFFSETS[i] + gap,
                CONSTELLATION_OFFSETS[i + 1]
            );
        }
    }

    #[test]
    fn validate_rejects_unaligned_window() {
        let mut p = SearchParams::riecoin();
        p.sieve_size = 100;
        assert!(p.validate().is_err());
    }

    #[test]
    fn validate_rejects_non_dividing_segment() {
        let mut p = SearchParams::riecoin();
        p.segment_size = 7_000_000;
        assert!(p.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_prime_indices() {
        let mut p = SearchParams::riecoin();
        p.first_prime_index = p.low_prime_count;
        assert!(p.validate().is_err());
    }

    #[test]
    fn validate_rejects_short_trailing_bits() {
        let mut p = SearchParams::riecoin();
        p.trailing_bits = 128;
        assert!(p.validate().is_err());
    }
}
