//! # Search — Round Coordinator
//!
//! Owns everything the engine needs across rounds — the prime table, the
//! primorial, the pool callbacks — and runs one round per `search` call:
//! derive the aligned base, sieve the window, fan the survivors out to
//! Fermat workers, join, summarise.
//!
//! ## Round anatomy
//!
//! The low-tier sieve runs on the calling thread; with a few thousand primes
//! it finishes long before the ~5·10⁷-prime high tier would. The high tier
//! and the testers then run together in one thread scope (the bitmaps are
//! monotone, so testers never miss a mark they were owed — at worst they
//! Fermat-test a doomed composite). Setting
//! `SearchParams::overlap_sieve_and_test` to false serialises the two phases
//! instead, trading throughput for a bit-reproducible hit set.
//!
//! ## Cancellation
//!
//! One relaxed atomic flag per round, latched by whichever thread first sees
//! the pool's `check_restart` return true: the sieve polls at segment and
//! chunk boundaries, the testers every 256 positions. An aborted round still
//! returns its report; hits already delivered stay valid.

use anyhow::{ensure, Result};
use rug::Integer;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::info;

use crate::candidate::Candidate;
use crate::params::{SearchParams, MAX_CANDIDATE_BITS};
use crate::primes::PrimeTable;
use crate::progress::{RoundProgress, RoundReport};
use crate::sieve::{SieveEngine, SieveState};
use crate::tester::Tester;
use crate::PoolClient;

/// Per-round cancellation latch: one writer wins, every worker reads.
pub struct CancelToken<'a> {
    flag: AtomicBool,
    client: &'a dyn PoolClient,
}

impl<'a> CancelToken<'a> {
    pub fn new(client: &'a dyn PoolClient) -> Self {
        CancelToken {
            flag: AtomicBool::new(false),
            client,
        }
    }

    /// True once any worker latched staleness.
    #[inline]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Check the latch, then the pool. Latches and reports true when the
    /// work unit has gone stale.
    pub fn poll(&self) -> bool {
        if self.is_set() {
            return true;
        }
        if self.client.check_restart() {
            self.flag.store(true, Ordering::Relaxed);
            return true;
        }
        false
    }
}

/// The engine handle: prime table and callbacks bound once, then one
/// `search` call per pool work unit.
pub struct Searcher {
    params: SearchParams,
    table: Arc<PrimeTable>,
    primorial: Integer,
    client: Arc<dyn PoolClient>,
    workers: usize,
}

impl Searcher {
    /// One-time initialisation: validate the configuration, build the prime
    /// table, bind the pool callbacks.
    pub fn new(params: SearchParams, client: Arc<dyn PoolClient>) -> Result<Self> {
        let table = Arc::new(PrimeTable::generate(&params)?);
        let primorial = params.primorial();
        let workers = if params.workers == 0 {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(2)
        } else {
            params.workers
        };
        info!(
            workers,
            primes = table.len(),
            window = params.sieve_size,
            "search engine initialised"
        );
        Ok(Searcher {
            params,
            table,
            primorial,
            client,
            workers,
        })
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    pub fn prime_table(&self) -> &PrimeTable {
        &self.table
    }

    /// Run one round against a pool target hash (≤ 256 bits).
    pub fn search(&mut self, target: &Integer) -> Result<RoundReport> {
        let candidate = Candidate::from_hash(target, self.params.trailing_bits)?;
        self.search_candidate(&candidate)
    }

    /// Run one round against an explicit candidate base.
    pub fn search_candidate(&mut self, candidate: &Candidate) -> Result<RoundReport> {
        let engine = SieveEngine::new(&self.table, &self.params, &self.primorial);
        let aligned = engine.aligned_base(candidate);
        ensure!(
            aligned.significant_bits() <= MAX_CANDIDATE_BITS - 8,
            "candidate base of {} bits exceeds the reporting limb budget",
            aligned.significant_bits()
        );

        let cancel = CancelToken::new(&*self.client);
        let state = SieveState::new(self.params.sieve_size);
        let progress = RoundProgress::new();

        let sieve_start = Instant::now();
        let mut offsets = engine.init_offsets(&aligned);
        let low_ok = engine.sieve_low(&mut offsets, &state, &cancel);
        let sieve_time = sieve_start.elapsed();

        let test_start = Instant::now();
        if low_ok {
            if self.params.overlap_sieve_and_test {
                let tester = Tester::new(
                    &state,
                    &aligned,
                    &self.primorial,
                    &*self.client,
                    &cancel,
                    &progress,
                );
                let tester = &tester;
                thread::scope(|s| {
                    s.spawn(|| {
                        engine.sieve_high(&aligned, &state, &cancel);
                    });
                    for section in partition(state.len(), self.workers) {
                        s.spawn(move || {
                            tester.run(section);
                        });
                    }
                });
            } else {
                engine.sieve_high(&aligned, &state, &cancel);
                if !cancel.is_set() {
                    let tester = Tester::new(
                        &state,
                        &aligned,
                        &self.primorial,
                        &*self.client,
                        &cancel,
                        &progress,
                    );
                    let tester = &tester;
                    thread::scope(|s| {
                        for section in partition(state.len(), self.workers) {
                            s.spawn(move || {
                                tester.run(section);
                            });
                        }
                    });
                }
            }
        }
        let test_time = test_start.elapsed();

        let report = RoundReport {
            sieved_out: state.marked_count(),
            tested: progress.tested.load(Ordering::Relaxed),
            found: progress.found.load(Ordering::Relaxed),
            aborted: cancel.is_set(),
            sieve_time,
            test_time,
        };
        info!(
            sieved_out = report.sieved_out,
            tested = report.tested,
            found = report.found,
            aborted = report.aborted,
            sieve_ms = report.sieve_time.as_millis() as u64,
            test_ms = report.test_time.as_millis() as u64,
            "round finished"
        );
        Ok(report)
    }
}

/// Split `[0, len)` into up to `workers` contiguous sections, the last one
/// absorbing the remainder.
fn partition(len: usize, workers: usize) -> Vec<Range<usize>> {
    let workers = workers.max(1);
    let chunk = len / workers;
    (0..workers)
        .map(|i| {
            let start = i * chunk;
            let end = if i == workers - 1 { len } else { start + chunk };
            start..end
        })
        .filter(|r| !r.is_empty())
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Pool stub that never cancels and discards hits.
    #[derive(Default)]
    pub(crate) struct NeverRestart;

    impl PoolClient for NeverRestart {
        fn report_success(&self, _candidate: &Integer, _count: u32) {}
        fn check_restart(&self) -> bool {
            false
        }
    }

    /// Pool stub that collects every hit.
    #[derive(Default)]
    pub(crate) struct RecordingClient {
        reports: Mutex<Vec<(Integer, u32)>>,
    }

    impl RecordingClient {
        /// Hits so far, ordered by candidate value — reporting order across
        /// workers carries no guarantee, so comparisons go through this.
        pub(crate) fn sorted_reports(&self) -> Vec<(Integer, u32)> {
            let mut reports = self.reports.lock().unwrap().clone();
            reports.sort();
            reports
        }
    }

    impl PoolClient for RecordingClient {
        fn report_success(&self, candidate: &Integer, count: u32) {
            self.reports
                .lock()
                .unwrap()
                .push((candidate.clone(), count));
        }
        fn check_restart(&self) -> bool {
            false
        }
    }

    /// Pool stub whose work goes stale after a number of staleness polls.
    pub(crate) struct StaleAfter {
        polls_before_stale: usize,
        polls: AtomicUsize,
        reports: Mutex<Vec<(Integer, u32)>>,
    }

    impl StaleAfter {
        pub(crate) fn new(polls_before_stale: usize) -> Self {
            StaleAfter {
                polls_before_stale,
                polls: AtomicUsize::new(0),
                reports: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn report_count(&self) -> usize {
            self.reports.lock().unwrap().len()
        }
    }

    impl PoolClient for StaleAfter {
        fn report_success(&self, candidate: &Integer, count: u32) {
            self.reports
                .lock()
                .unwrap()
                .push((candidate.clone(), count));
        }
        fn check_restart(&self) -> bool {
            self.polls.fetch_add(1, Ordering::Relaxed) >= self.polls_before_stale
        }
    }

    /// Primes to 97 over a 3,840-position window, primorial 30, shift 7,
    /// serialised phases for reproducible hit sets.
    fn toy_params() -> SearchParams {
        let mut p = SearchParams::riecoin();
        p.max_sieve_prime = 97;
        p.low_prime_count = 8;
        p.first_prime_index = 2;
        p.primorial_multiplicands = vec![30];
        p.constellation_shift = 7;
        p.sieve_size = 3840;
        p.segment_size = 1280;
        p.workers = 2;
        p.overlap_sieve_and_test = false;
        p
    }

    #[test]
    fn round_finds_known_sextuplets() {
        // Base 0 places candidates on 30k + 7: the window covers the
        // sextuplets at 16057, 19417, 43777 and one partial hit at 112237.
        let client = Arc::new(RecordingClient::default());
        let mut searcher = Searcher::new(toy_params(), client.clone()).unwrap();
        let report = searcher
            .search_candidate(&Candidate::from_base(Integer::new()))
            .unwrap();

        let expected: Vec<(Integer, u32)> = vec![
            (Integer::from(16057u32), 6),
            (Integer::from(19417u32), 6),
            (Integer::from(43777u32), 6),
            (Integer::from(112_237u32), 5),
        ];
        assert_eq!(client.sorted_reports(), expected);
        assert!(!report.aborted);
        assert_eq!(report.found, 4);
        assert_eq!(report.tested, 5);
        assert_eq!(report.sieved_out, 3840 - 5);
    }

    #[test]
    fn rounds_are_deterministic() {
        let client = Arc::new(RecordingClient::default());
        let mut searcher = Searcher::new(toy_params(), client.clone()).unwrap();
        let candidate = Candidate::from_base(Integer::from(1_000_000u32));

        let first = searcher.search_candidate(&candidate).unwrap();
        let after_first = client.sorted_reports();
        let second = searcher.search_candidate(&candidate).unwrap();
        let after_second = client.sorted_reports();

        assert_eq!(first.found, second.found);
        assert_eq!(first.tested, second.tested);
        assert_eq!(first.sieved_out, second.sieved_out);
        // The second round reported exactly the same multiset again.
        let mut doubled = after_first.clone();
        doubled.extend(after_first);
        doubled.sort();
        assert_eq!(after_second, doubled);
    }

    #[test]
    fn immediately_stale_round_aborts() {
        let client = Arc::new(StaleAfter::new(0));
        let mut searcher = Searcher::new(toy_params(), client.clone()).unwrap();
        let report = searcher
            .search_candidate(&Candidate::from_base(Integer::new()))
            .unwrap();
        assert!(report.aborted);
        assert_eq!(report.found, 0);
        assert_eq!(client.report_count(), 0);
    }

    #[test]
    fn late_staleness_keeps_earlier_reports() {
        // Let the sieve finish and cancel somewhere in the test phase: the
        // report's found counter must match what the pool actually received.
        let client = Arc::new(StaleAfter::new(8));
        let mut searcher = Searcher::new(toy_params(), client.clone()).unwrap();
        let report = searcher
            .search_candidate(&Candidate::from_base(Integer::new()))
            .unwrap();
        assert_eq!(report.found as usize, client.report_count());
    }

    #[test]
    fn hash_target_round_runs_clean() {
        // A real-shaped target: B = 2^520 + h·2^256. Candidates are ~520-bit
        // integers; a 97-deep sieve leaves a handful of survivors and the
        // Fermat chain almost surely rejects them all.
        let client = Arc::new(RecordingClient::default());
        let mut searcher = Searcher::new(toy_params(), client.clone()).unwrap();
        let target = Integer::from_str_radix(
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
            16,
        )
        .unwrap();
        let report = searcher.search(&target).unwrap();
        assert!(!report.aborted);
        assert_eq!(report.sieved_out + report.tested, 3840);
    }

    #[test]
    fn oversized_target_is_rejected() {
        let client = Arc::new(NeverRestart);
        let mut searcher = Searcher::new(toy_params(), client).unwrap();
        let target = Integer::from(1u32) << 256u32;
        assert!(searcher.search(&target).is_err());
    }

    #[test]
    fn overlapped_round_reports_the_same_sextuplets() {
        // With the high tier racing the testers, full sextuplets can never
        // be lost: bits only appear, and the three windows' sextuplets have
        // no table-prime factor to begin with.
        let mut params = toy_params();
        params.overlap_sieve_and_test = true;
        let client = Arc::new(RecordingClient::default());
        let mut searcher = Searcher::new(params, client.clone()).unwrap();
        searcher
            .search_candidate(&Candidate::from_base(Integer::new()))
            .unwrap();
        let reports = client.sorted_reports();
        for base in [16057u32, 19417, 43777] {
            assert!(
                reports.contains(&(Integer::from(base), 6)),
                "missing sextuplet at {}",
                base
            );
        }
    }

    #[test]
    fn partition_covers_window_disjointly() {
        for (len, workers) in [(3840usize, 2usize), (3840, 3), (64, 7), (32, 64)] {
            let sections = partition(len, workers);
            let mut seen = vec![false; len];
            for section in &sections {
                for k in section.clone() {
                    assert!(!seen[k], "position {} covered twice", k);
                    seen[k] = true;
                }
            }
            assert!(seen.iter().all(|&s| s), "len {} workers {}", len, workers);
        }
    }

    #[test]
    fn searcher_rejects_bad_params() {
        let mut params = toy_params();
        params.segment_size = 7;
        assert!(Searcher::new(params, Arc::new(NeverRestart)).is_err());
    }
}
