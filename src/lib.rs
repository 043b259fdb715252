//! # Rieforge — Riecoin Prime-Sextuplet Search Engine
//!
//! Compute core for pool-mining the Riecoin proof-of-work: given a 256-bit
//! target hash, find integers that are simultaneously base-2 probable prime
//! at the six offsets {0, 4, 6, 10, 12, 16}. Every such hit is a share; the
//! pool side performs deterministic confirmation.
//!
//! ## Module Organization
//!
//! - [`params`] — consensus constants ([`SearchParams`]) and constellation
//!   geometry
//! - [`primes`] — wheel-factored prime table and primorial inverses
//!   ([`PrimeTable`])
//! - [`candidate`] — round base construction from the target hash
//!   ([`Candidate`])
//! - [`sieve`] — two-tier constellation sieve over the candidate window
//!   ([`SieveEngine`], [`SieveState`])
//! - [`tester`] — scheduled Fermat chain over survivors ([`Tester`])
//! - [`search`] — round coordination, worker fan-out, cancellation
//!   ([`Searcher`])
//! - [`progress`] — shared round counters and the round summary
//!
//! ## Pipeline
//!
//! Each round follows **align → sieve → parallel test → report**: the target
//! hash becomes a primorial-aligned base, the sieve strikes every window
//! position with a small factor at any constellation offset, and Fermat
//! workers chain through the offsets of whatever survives, delivering hits
//! through the injected [`PoolClient`].
//!
//! The prime table is built once per process and shared read-only; all other
//! state lives and dies with a round.

pub mod candidate;
pub mod params;
pub mod primes;
pub mod progress;
pub mod search;
pub mod sieve;
pub mod tester;

pub use candidate::Candidate;
pub use params::SearchParams;
pub use primes::PrimeTable;
pub use progress::{RoundProgress, RoundReport};
pub use search::{CancelToken, Searcher};
pub use sieve::{SieveEngine, SieveState};
pub use tester::Tester;

use rug::Integer;

/// Capabilities the pool layer injects into the engine. Implementations are
/// shared across the round's worker threads, so both operations must be
/// cheap and thread-safe.
pub trait PoolClient: Send + Sync {
    /// A hit: `candidate` is the base of the constellation (offset 0) and
    /// `count` how many of the six offsets came back probable prime under
    /// the scheduled chain. The integer is borrowed; copy it to keep it.
    fn report_success(&self, candidate: &Integer, count: u32);

    /// True when the current work unit is stale and the round should wind
    /// down. Polled from every worker thread.
    fn check_restart(&self) -> bool;
}

/// Base-2 Fermat probable-prime test: `2^(n−1) ≡ 1 (mod n)`.
///
/// A pseudoprime filter, not a proof — composites like 341 pass. The engine
/// only ever feeds it integers far beyond the sieve bound, and downstream
/// software confirms hits deterministically. Note that 2 itself fails
/// (`2^1 ≡ 0 (mod 2)`), which is fine at candidate magnitudes.
pub fn fermat_probable_prime(n: &Integer) -> bool {
    if *n <= 1u32 {
        return false;
    }
    let exponent = Integer::from(n - 1u32);
    match Integer::from(2u32).pow_mod(&exponent, n) {
        Ok(residue) => residue == 1u32,
        Err(_) => false,
    }
}
