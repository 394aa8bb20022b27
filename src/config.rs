//! Compiled-in run parameters.
//!
//! The defaults are the values every published number was taken with; change them only for
//! local experiments, results are not comparable otherwise.

/// Untimed runs of a strategy before each measured batch.
pub const WARMUP_ITERS: u32 = 50;
/// Timed runs per measured batch.
pub const ITERS: u32 = 1000;
/// Passes over the whole catalog; the report keeps the best of these.
pub const TRIALS: u32 = 10;
/// Measured batches per strategy per pass.
pub const TEST_TRIALS: u32 = 1;
/// Bytes per code buffer.
pub const CODE_SIZE: usize = 1024;
/// Buffers available to the region-rotation strategies.
pub const NUM_REGIONS: usize = 64;
/// Alignment every code buffer must have.
pub const CACHE_LINE: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchConfig {
    pub warmup_iters: u32,
    pub iters: u32,
    pub trials: u32,
    pub test_trials: u32,
    /// Core to pin the measuring thread to, `None` leaves scheduling to the OS.
    pub pin_core: Option<usize>,
    /// Ask the OS for maximum thread priority before measuring.
    pub max_priority: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            warmup_iters: WARMUP_ITERS,
            iters: ITERS,
            trials: TRIALS,
            test_trials: TEST_TRIALS,
            pin_core: core_affinity::get_core_ids()
                .and_then(|ids| ids.first().map(|core| core.id)),
            max_priority: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let cfg = BenchConfig::default();
        assert_eq!(cfg.warmup_iters, 50);
        assert_eq!(cfg.iters, 1000);
        assert_eq!(cfg.trials, 10);
        assert_eq!(cfg.test_trials, 1);
        assert!(cfg.max_priority);
    }

    #[test]
    fn buffer_geometry() {
        assert_eq!(CODE_SIZE % CACHE_LINE, 0);
        assert!(NUM_REGIONS.is_power_of_two());
    }
}
