//! # Sieve — Two-Tier Constellation Sieve over the Candidate Window
//!
//! For a round base `B`, marks every window position `k` where some sieving
//! prime divides one of the six values `B + x + k·Q + C + o`. What survives
//! has no factor up to the table bound at any constellation offset and goes
//! to the Fermat testers.
//!
//! ## Algorithm
//!
//! 1. **Alignment**: `x = (Q − B mod Q) mod Q` puts `B + x` on a multiple of
//!    the primorial, so adding `C` lands every candidate on the sextuplet
//!    residue class mod `Q` and no prime dividing `Q` can strike the window.
//! 2. **Residue derivation**: for a sieving prime `p`, the position hit by
//!    offset `o` satisfies `k ≡ −(r + o)·Q⁻¹ (mod p)` with
//!    `r = (B + x + C) mod p`. The six positions are obtained from the first
//!    by stepping `−gap·Q⁻¹` along the constellation gaps, five conditional
//!    subtractions per prime instead of six full reductions.
//! 3. **Low tier**: primes with precomputed inverses stride every segment,
//!    carrying `k − S` into the next segment so each prime picks up exactly
//!    where it left off.
//! 4. **High tier**: the remaining primes compute their inverse and residues
//!    on the fly and stride whatever falls inside the window — at most one
//!    position per offset once `p ≥ W`. No per-prime state is kept, which is
//!    what lets the table run to ~10⁹ primes.
//!
//! ## Bitmap discipline
//!
//! Both tiers write 32-bit words with relaxed atomic OR; bits only ever go
//! 0→1 within a round. Testers may therefore scan concurrently with the high
//! tier: the worst case is testing a composite the sieve was about to mark,
//! which the Fermat chain rejects anyway.

use rayon::prelude::*;
use rug::Integer;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;
use tracing::debug;

use crate::candidate::Candidate;
use crate::params::{SearchParams, OFFSET_GAPS};
use crate::primes::{inverse, mulmod, PrimeTable};
use crate::search::CancelToken;

/// High-tier work unit: primes per cancellation check.
const HIGH_TIER_CHUNK: usize = 4_096;

/// The per-round dual bitmap over `[0, W)`. A set bit in either map means
/// "composite at some constellation offset"; a position is a candidate only
/// while both maps are clear there.
pub struct SieveState {
    low_bits: Vec<AtomicU32>,
    high_bits: Vec<AtomicU32>,
    len: usize,
}

impl SieveState {
    /// Allocate a cleared state covering `len` positions (`len % 32 == 0`).
    pub fn new(len: usize) -> Self {
        assert!(len > 0 && len % 32 == 0);
        let words = len / 32;
        SieveState {
            low_bits: (0..words).map(|_| AtomicU32::new(0)).collect(),
            high_bits: (0..words).map(|_| AtomicU32::new(0)).collect(),
            len,
        }
    }

    /// Window size in positions.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True while neither tier has marked position `k`.
    #[inline]
    pub fn is_candidate(&self, k: usize) -> bool {
        let bit = 1u32 << (k & 31);
        self.low_bits[k >> 5].load(Ordering::Relaxed) & bit == 0
            && self.high_bits[k >> 5].load(Ordering::Relaxed) & bit == 0
    }

    #[inline]
    fn mark_low(&self, k: usize) {
        self.low_bits[k >> 5].fetch_or(1 << (k & 31), Ordering::Relaxed);
    }

    #[inline]
    fn mark_high(&self, k: usize) {
        self.high_bits[k >> 5].fetch_or(1 << (k & 31), Ordering::Relaxed);
    }

    /// Positions marked composite by either tier.
    pub fn marked_count(&self) -> u64 {
        self.low_bits
            .iter()
            .zip(&self.high_bits)
            .map(|(l, h)| {
                (l.load(Ordering::Relaxed) | h.load(Ordering::Relaxed)).count_ones() as u64
            })
            .sum()
    }

    /// Indices of all unmarked positions, in order.
    pub fn survivors(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |&k| self.is_candidate(k))
    }

    /// Test support: mark a position through the low-tier map.
    #[cfg(test)]
    pub(crate) fn mark_for_tests(&self, k: usize) {
        self.mark_low(k);
    }

    /// Raw word copies of both bitmaps, for equality checks in tests.
    pub fn snapshot(&self) -> (Vec<u32>, Vec<u32>) {
        (
            self.low_bits
                .iter()
                .map(|w| w.load(Ordering::Relaxed))
                .collect(),
            self.high_bits
                .iter()
                .map(|w| w.load(Ordering::Relaxed))
                .collect(),
        )
    }
}

/// Drives both sieve tiers for one round.
pub struct SieveEngine<'a> {
    table: &'a PrimeTable,
    params: &'a SearchParams,
    primorial: &'a Integer,
}

impl<'a> SieveEngine<'a> {
    pub fn new(table: &'a PrimeTable, params: &'a SearchParams, primorial: &'a Integer) -> Self {
        SieveEngine {
            table,
            params,
            primorial,
        }
    }

    /// Step 1: `B + x + C`, the integer at window position 0. Congruent to
    /// `C` mod `Q`, and exceeds `B` by less than `C + Q`.
    pub fn aligned_base(&self, candidate: &Candidate) -> Integer {
        let r = Integer::from(candidate.base() % self.primorial);
        let mut aligned = if r == 0u32 {
            Integer::new()
        } else {
            Integer::from(self.primorial - &r)
        };
        aligned += candidate.base();
        aligned += self.params.constellation_shift;
        aligned
    }

    /// The six window positions struck by prime `p`, given `qinv = Q⁻¹ mod p`
    /// and `r = (B + x + C) mod p`. Position `i` satisfies
    /// `(B + x + k·Q + C + oᵢ) ≡ 0 (mod p)`.
    pub fn constellation_residues(p: u32, qinv: u32, r: u32) -> [u32; 6] {
        let steps = OFFSET_GAPS.map(|gap| mulmod(qinv, gap, p));
        let k0 = (p - mulmod(r, qinv, p)) % p;
        let mut residues = [k0; 6];
        let mut k = k0;
        for (slot, &step) in residues[1..].iter_mut().zip(steps.iter()) {
            k = if k < step { k + (p - step) } else { k - step };
            *slot = k;
        }
        residues
    }

    /// Step 2: initial residues for every low-tier prime. Index `j` of the
    /// result parallels the prime table; entries below the first sieving
    /// prime stay zero and are never read.
    pub fn init_offsets(&self, aligned: &Integer) -> Vec<[u32; 6]> {
        let first = self.table.first_prime_index();
        let low = self.table.low_prime_count();
        let mut offsets = vec![[0u32; 6]; low];
        for (j, slot) in offsets.iter_mut().enumerate().take(low).skip(first) {
            let p = self.table.prime(j);
            let qinv = self.table.primorial_inverse(j);
            debug_assert_eq!(
                qinv,
                inverse(self.primorial.mod_u(p), p),
                "inverse table disagrees with recomputation at prime {}",
                p
            );
            *slot = Self::constellation_residues(p, qinv, aligned.mod_u(p));
        }
        offsets
    }

    /// Step 3: segmented low-tier pass. Mutates `offsets` as it carries each
    /// prime's next position across segment boundaries. Returns false if the
    /// round went stale mid-pass.
    pub fn sieve_low(
        &self,
        offsets: &mut [[u32; 6]],
        state: &SieveState,
        cancel: &CancelToken,
    ) -> bool {
        let start = Instant::now();
        let first = self.table.first_prime_index();
        let low = self.table.low_prime_count();
        let segment = self.params.segment_size;

        let mut base = 0;
        while base < state.len() {
            for j in first..low {
                let p = self.table.prime(j) as usize;
                for slot in offsets[j].iter_mut() {
                    let mut k = *slot as usize;
                    while k < segment {
                        state.mark_low(base + k);
                        k += p;
                    }
                    *slot = (k - segment) as u32;
                }
            }
            base += segment;
            if cancel.poll() {
                return false;
            }
        }
        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "low-tier sieve pass complete"
        );
        true
    }

    /// Step 4: high-tier pass over every prime past the low range, residues
    /// and inverses computed on the fly, data-parallel in table order.
    /// Returns false if the round went stale mid-pass.
    pub fn sieve_high(&self, aligned: &Integer, state: &SieveState, cancel: &CancelToken) -> bool {
        let start = Instant::now();
        let low = self.table.low_prime_count();
        if low >= self.table.len() {
            return !cancel.is_set();
        }
        let w = state.len();

        self.table.primes()[low..]
            .par_chunks(HIGH_TIER_CHUNK)
            .for_each(|chunk| {
                if cancel.poll() {
                    return;
                }
                for &p in chunk {
                    let qinv = inverse(self.primorial.mod_u(p), p);
                    debug_assert_ne!(qinv, 0, "sieving prime {} divides the primorial", p);
                    let residues = Self::constellation_residues(p, qinv, aligned.mod_u(p));
                    for k0 in residues {
                        let mut k = k0 as usize;
                        while k < w {
                            state.mark_high(k);
                            k += p as usize;
                        }
                    }
                }
            });
        if cancel.is_set() {
            return false;
        }
        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "high-tier sieve pass complete"
        );
        true
    }

    /// Both passes back to back; the coordinator overlaps the high pass with
    /// testing instead when configured to.
    pub fn sieve(
        &self,
        aligned: &Integer,
        offsets: &mut [[u32; 6]],
        state: &SieveState,
        cancel: &CancelToken,
    ) -> bool {
        self.sieve_low(offsets, state, cancel) && self.sieve_high(aligned, state, cancel)
    }
}
