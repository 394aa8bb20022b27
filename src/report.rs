//! # Report driver
//!
//! Allocates everything once, runs every strategy of the filtered catalog `trials` times in
//! registration order, keeps the best measurement per strategy and prints one line each.

use std::fmt;

/// Unit printed after every count.
pub const UNIT: &str = "rdtsc counts";

/// Best (lowest) count per strategy across outer trials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestTimes {
    times: Vec<u64>,
}

impl BestTimes {
    pub fn new(len: usize) -> Self {
        BestTimes {
            times: vec![u64::MAX; len],
        }
    }

    pub fn record(&mut self, index: usize, cycles: u64) {
        let slot = &mut self.times[index];
        if cycles < *slot {
            *slot = cycles;
        }
    }

    pub fn get(&self, index: usize) -> u64 {
        self.times[index]
    }

    pub fn into_vec(self) -> Vec<u64> {
        self.times
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportLine {
    pub name: &'static str,
    pub cycles: u64,
}

/// Final result, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub lines: Vec<ReportLine>,
}

impl Report {
    pub fn new(names: impl IntoIterator<Item = &'static str>, best: BestTimes) -> Self {
        let lines = names
            .into_iter()
            .zip(best.into_vec())
            .map(|(name, cycles)| ReportLine { name, cycles })
            .collect();
        Report { lines }
    }
}

impl fmt::Display for ReportLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>20}  {:>9} {}", self.name, self.cycles, UNIT)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

#[cfg(all(unix, target_arch = "x86_64"))]
pub use driver::{Harness, run, tune_current_thread};

#[cfg(all(unix, target_arch = "x86_64"))]
mod driver {
    use log::{debug, info, warn};

    use super::{BestTimes, Report};
    use crate::config::{BenchConfig, CODE_SIZE, NUM_REGIONS};
    use crate::error::BenchResult;
    use crate::format_size_fixed_int;
    use crate::hw::CpuFeatures;
    use crate::strategy::{self, Context, Entry};
    use crate::timing::{CycleCounter, Tsc, measure};

    /// The catalog bound to its shared context.
    pub struct Harness {
        cfg: BenchConfig,
        cx: Context,
        entries: Vec<Entry>,
    }

    impl Harness {
        pub fn new(cfg: BenchConfig, cx: Context, entries: Vec<Entry>) -> Self {
            Harness { cfg, cx, entries }
        }

        pub fn context(&self) -> &Context {
            &self.cx
        }

        /// Run every entry `cfg.trials` times, keeping each one's best measurement.
        pub fn run<C: CycleCounter>(&mut self, clock: &mut C) -> Report {
            let mut best = BestTimes::new(self.entries.len());
            for trial in 0..self.cfg.trials {
                for (index, entry) in self.entries.iter_mut().enumerate() {
                    let cx = &mut self.cx;
                    let cycles = measure(clock, &self.cfg, || entry.strategy.apply(cx));
                    best.record(index, cycles);
                }
                debug!("trial {}/{} complete", trial + 1, self.cfg.trials);
            }
            Report::new(self.entries.iter().map(|e| e.name), best)
        }
    }

    /// Pin the calling thread and raise its priority as configured. Failures only warn.
    pub fn tune_current_thread(cfg: &BenchConfig) {
        if let Some(cpu_num) = cfg.pin_core {
            let core_num = core_affinity::CoreId { id: cpu_num };
            if core_affinity::set_for_current(core_num) {
                info!("Pinned to CPU core {cpu_num}");
            } else {
                warn!("Couldn't pin to CPU core {cpu_num} (NOTE: this is expected on macOS)");
            }
        }

        if cfg.max_priority
            && thread_priority::set_current_thread_priority(thread_priority::ThreadPriority::Max)
                .is_err()
        {
            warn!("Couldn't set maximum thread priority, expect noisier counts");
        }
    }

    /// Full run with the time stamp counter: tune, probe, allocate, measure.
    pub fn run(cfg: BenchConfig) -> BenchResult<Report> {
        tune_current_thread(&cfg);

        let cpu = CpuFeatures::detect();
        info!("CPU features: {cpu}");
        let (entries, skipped) = strategy::catalog(&cpu);
        for (name, feature) in &skipped {
            info!("Skipping {name}: needs {feature}");
        }

        let cx = Context::new()?;
        info!(
            "Allocated {NUM_REGIONS} code regions of {} plus write/execute alias pair",
            format_size_fixed_int(CODE_SIZE as u64).trim_start()
        );
        info!(
            "Running {} strategies, {} trials of {} iterations",
            entries.len(),
            cfg.trials,
            cfg.iters
        );

        let mut harness = Harness::new(cfg, cx, entries);
        Ok(harness.run(&mut Tsc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_times_keep_minimum() {
        let mut best = BestTimes::new(2);
        for (i, t) in [(0, 900), (1, 50), (0, 842), (1, 70), (0, 1000)] {
            best.record(i, t);
        }
        assert_eq!(best.get(0), 842);
        assert_eq!(best.get(1), 50);
    }

    #[test]
    fn unmeasured_slots_stay_at_max() {
        assert_eq!(BestTimes::new(1).get(0), u64::MAX);
    }

    #[test]
    fn line_format() {
        let line = ReportLine {
            name: "jit_plain",
            cycles: 842,
        };
        assert_eq!(line.to_string(), "           jit_plain        842 rdtsc counts");
    }

    #[test]
    fn report_keeps_order() {
        let mut best = BestTimes::new(3);
        best.record(0, 3);
        best.record(1, 1);
        best.record(2, 2);
        let report = Report::new(["c", "a", "b"], best);
        let names: Vec<_> = report.lines.iter().map(|l| l.name).collect();
        assert_eq!(names, ["c", "a", "b"]);
        assert_eq!(report.to_string().lines().count(), 3);
    }
}
