//! # Timing harness
//!
//! A measurement is `iters` back-to-back runs of a strategy, bracketed by two counter reads and
//! preceded by `warmup_iters` untimed runs. It is repeated `test_trials` times and the smallest
//! elapsed count wins: scheduling and interrupt noise only ever adds cycles.

use crate::config::BenchConfig;

/// Source of per-core cycle counts.
pub trait CycleCounter {
    fn now(&mut self) -> u64;
}

/// The processor's time stamp counter.
#[cfg(target_arch = "x86_64")]
#[derive(Debug, Default, Clone, Copy)]
pub struct Tsc;

#[cfg(target_arch = "x86_64")]
impl CycleCounter for Tsc {
    #[inline(always)]
    fn now(&mut self) -> u64 {
        crate::hw::rdtsc()
    }
}

/// Smallest elapsed count over `cfg.test_trials` measured batches of `run`.
#[inline(never)]
pub fn measure<C: CycleCounter>(clock: &mut C, cfg: &BenchConfig, mut run: impl FnMut()) -> u64 {
    let mut best = u64::MAX;
    for _ in 0..cfg.test_trials {
        // exclude the cold start: predictors, caches, page faults
        for _ in 0..cfg.warmup_iters {
            run();
        }
        let start = clock.now();
        for _ in 0..cfg.iters {
            run();
        }
        let elapsed = clock.now().wrapping_sub(start);
        best = best.min(elapsed);
    }
    best
}
