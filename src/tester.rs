//! # Tester — Scheduled Fermat Chain over Sieve Survivors
//!
//! Scans a section of the sieve window, reconstructs the candidate integer
//! for every position both bitmaps left clear, and runs base-2 Fermat tests
//! at the six constellation offsets. Most survivors die at the first or
//! second offset, so the chain is ordered to bail as early as possible:
//!
//! 1. Offset 0 must be probable prime, or the position is abandoned.
//! 2. Offsets 4, 6, 10 are tested; fewer than two probable primes so far
//!    abandons the position.
//! 3. Offsets 12 and 16 complete the chain.
//!
//! Anything reaching step 3 is reported through the pool callback as the
//! base value together with its probable-prime count. The count is what the
//! pool grades the share by; under this schedule it is always at least two.
//!
//! The walk mutates a single big integer by the constellation gaps instead
//! of rebuilding `B + x + k·Q + C + o` per offset, the same exponent-free
//! increments the sieve's residue derivation uses.
//!
//! Cancellation is checked every 256 positions, both against the shared
//! round flag and the pool's staleness callback.

use rug::Integer;
use std::ops::Range;
use std::sync::atomic::Ordering;

use crate::fermat_probable_prime;
use crate::params::{CONSTELLATION_OFFSETS, OFFSET_GAPS};
use crate::progress::RoundProgress;
use crate::search::CancelToken;
use crate::sieve::SieveState;
use crate::PoolClient;

/// A Fermat test worker bound to one round's shared state.
pub struct Tester<'a> {
    state: &'a SieveState,
    aligned: &'a Integer,
    primorial: &'a Integer,
    client: &'a dyn PoolClient,
    cancel: &'a CancelToken<'a>,
    progress: &'a RoundProgress,
}

impl<'a> Tester<'a> {
    pub fn new(
        state: &'a SieveState,
        aligned: &'a Integer,
        primorial: &'a Integer,
        client: &'a dyn PoolClient,
        cancel: &'a CancelToken<'a>,
        progress: &'a RoundProgress,
    ) -> Self {
        Tester {
            state,
            aligned,
            primorial,
            client,
            cancel,
            progress,
        }
    }

    /// Test every surviving position in `section`. Returns false if the
    /// round was cancelled before the section was exhausted.
    pub fn run(&self, section: Range<usize>) -> bool {
        for k in section {
            if k & 0xff == 0 && self.cancel.poll() {
                return false;
            }
            if !self.state.is_candidate(k) {
                continue;
            }
            self.progress.tested.fetch_add(1, Ordering::Relaxed);

            let mut n = Integer::from(self.primorial * k as u32);
            n += self.aligned;
            let mut count = 0u32;

            if fermat_probable_prime(&n) {
                count += 1;
            } else {
                continue;
            }
            for &gap in &OFFSET_GAPS[..3] {
                n += gap;
                if fermat_probable_prime(&n) {
                    count += 1;
                }
            }
            if count < 2 {
                continue;
            }
            for &gap in &OFFSET_GAPS[3..] {
                n += gap;
                if fermat_probable_prime(&n) {
                    count += 1;
                }
            }

            n -= CONSTELLATION_OFFSETS[5];
            self.progress.found.fetch_add(1, Ordering::Relaxed);
            self.client.report_success(&n, count);
        }
        true
    }
}
