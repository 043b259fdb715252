//! # Progress — Atomic Round Counters
//!
//! Lock-free counters shared between the sieve thread and the Fermat
//! workers, plus the immutable summary a finished round hands back to the
//! caller. Workers bump the atomics from their inner loops; the coordinator
//! snapshots them once after the join.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Live counters for the round in flight.
#[derive(Default)]
pub struct RoundProgress {
    /// Survivors whose Fermat chain was started.
    pub tested: AtomicU64,
    /// Hits handed to the pool callback.
    pub found: AtomicU64,
}

impl RoundProgress {
    pub fn new() -> Self {
        RoundProgress::default()
    }
}

/// Summary of one completed (or aborted) search round.
#[derive(Clone, Debug)]
pub struct RoundReport {
    /// Window positions the sieve marked composite.
    pub sieved_out: u64,
    /// Survivors whose Fermat chain was started.
    pub tested: u64,
    /// Hits reported to the pool callback.
    pub found: u64,
    /// True when the round stopped early because the work went stale.
    pub aborted: bool,
    /// Wall time of the low-tier sieve pass.
    pub sieve_time: Duration,
    /// Wall time of the testing phase (including the overlapped high-tier
    /// pass when the engine runs them together).
    pub test_time: Duration,
}
