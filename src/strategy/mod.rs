//! # Strategy catalog
//!
//! A strategy performs one complete "write code, then run it" cycle against the shared
//! [`Context`]. Strategies differ in what happens to the destination before, during and after
//! the write: clears, copies through a staging buffer, cache line maintenance, fences,
//! rotating destinations, and so on.
//!
//! [`registry`] lists every strategy in report order, each tagged with the CPU feature it needs.
//! [`catalog`] filters that list against the running processor.

mod cache;
mod clear;
mod copy;
mod pressure;
mod region;
mod ud2;
mod write;

pub use pressure::JumpChain;
pub use region::{AfterUse, Rotating};

use std::hint::black_box;

use crate::codegen::CodeGen;
use crate::config::{CODE_SIZE, NUM_REGIONS};
use crate::error::BenchResult;
use crate::hw::{CpuFeatures, Feature};
use crate::mem::{AliasPair, ExecRegion, RegionSet};

/// Everything the strategies share for the lifetime of the run.
pub struct Context {
    /// Running immediate, continued across every strategy and trial.
    pub codegen: CodeGen,
    pub regions: RegionSet,
    pub alias: AliasPair,
    /// Written once at startup and only ever executed, never rewritten.
    pub resident: ExecRegion,
    pub chains: Chains,
}

/// Instruction stream polluters, run before the timed write.
pub struct Chains {
    pub k32: JumpChain,
    pub k32_unaligned: JumpChain,
    pub k64: JumpChain,
    pub k64_unaligned: JumpChain,
}

impl Context {
    /// Allocate the full region set, the alias pair, the resident stream and the jump chains.
    pub fn new() -> BenchResult<Self> {
        Self::with_regions(NUM_REGIONS)
    }

    /// As [`Context::new`] with a smaller region set. Rotating strategies must not use more
    /// regions than this.
    pub fn with_regions(count: usize) -> BenchResult<Self> {
        let regions = RegionSet::allocate(count, CODE_SIZE)?;
        let alias = AliasPair::new(CODE_SIZE)?;
        let mut codegen = CodeGen::new();
        let mut resident = ExecRegion::new(CODE_SIZE)?;
        codegen.forward(resident.as_mut_slice(), 0);

        let chains = Chains {
            k32: JumpChain::build(32 * 1024, false)?,
            k32_unaligned: JumpChain::build(32 * 1024, true)?,
            k64: JumpChain::build(64 * 1024, false)?,
            k64_unaligned: JumpChain::build(64 * 1024, true)?,
        };

        Ok(Context {
            codegen,
            regions,
            alias,
            resident,
            chains,
        })
    }
}

/// One write + execute cycle.
pub trait Strategy {
    fn apply(&mut self, cx: &mut Context);
}

/// A strategy with no state of its own.
pub struct Stateless(pub fn(&mut Context));

impl Strategy for Stateless {
    #[inline(always)]
    fn apply(&mut self, cx: &mut Context) {
        (self.0)(cx)
    }
}

/// Where a strategy's code ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The first buffer of the region set.
    Primary,
    /// Cycles through the first `n` buffers of the region set.
    Rotating(usize),
    /// A region allocated and released inside the call.
    Fresh,
    /// The write/execute alias pair.
    Alias,
}

/// Registry entry: a named strategy and the feature it needs.
pub struct Entry {
    pub name: &'static str,
    pub requires: Feature,
    pub target: Target,
    pub strategy: Box<dyn Strategy>,
}

impl Entry {
    fn new(
        name: &'static str,
        requires: Feature,
        target: Target,
        strategy: impl Strategy + 'static,
    ) -> Self {
        Entry {
            name,
            requires,
            target,
            strategy: Box::new(strategy),
        }
    }

    fn plain(name: &'static str, requires: Feature, f: fn(&mut Context)) -> Self {
        Self::new(name, requires, Target::Primary, Stateless(f))
    }

    fn rotating(name: &'static str, requires: Feature, count: usize, after: AfterUse) -> Self {
        Self::new(name, requires, Target::Rotating(count), Rotating::new(count, after))
    }
}

/// Every strategy, in report order.
pub fn registry() -> Vec<Entry> {
    use Feature::*;

    vec![
        Entry::plain("jit_plain", Baseline, write::jit_plain),
        Entry::plain("jit_only", Baseline, write::jit_only),
        Entry::plain("jit_reverse", Baseline, write::jit_reverse),
        Entry::plain("jit_memcpy", Baseline, copy::jit_memcpy),
        Entry::plain("jit_memcpy_sse2", Baseline, copy::jit_memcpy_sse2),
        Entry::plain("jit_memcpy_sse2_nt", Baseline, copy::jit_memcpy_sse2_nt),
        Entry::plain("jit_memcpy_avx", Avx, copy::jit_memcpy_avx),
        Entry::plain("jit_memcpy_avx_nt", Avx, copy::jit_memcpy_avx_nt),
        Entry::plain("jit_memcpy_avx3", Avx512f, copy::jit_memcpy_avx3),
        Entry::plain("jit_memcpy_avx3_nt", Avx512f, copy::jit_memcpy_avx3_nt),
        Entry::plain("jit_memcpy_sse2_rev", Baseline, copy::jit_memcpy_sse2_rev),
        Entry::plain("jit_memcpy_avx_rev", Avx, copy::jit_memcpy_avx_rev),
        Entry::plain("jit_memcpy_avx3_rev", Avx512f, copy::jit_memcpy_avx3_rev),
        Entry::plain("jit_memcpy_movsb", Baseline, copy::jit_memcpy_movsb),
        Entry::plain("jit_clr", Baseline, clear::jit_clr),
        Entry::plain("jit_clr_ret", Baseline, clear::jit_clr_ret),
        Entry::plain("jit_clr_1byte", Baseline, clear::jit_clr_1byte),
        Entry::plain("jit_clr_2byte", Baseline, clear::jit_clr_2byte),
        Entry::plain("jit_clr_scatter", Avx512f, clear::jit_clr_scatter),
        Entry::plain("jit_clr_stosb", Baseline, clear::jit_clr_stosb),
        Entry::plain("jit_clr_nt", Baseline, clear::jit_clr_nt),
        Entry::plain("jit_clr_nt_1line", Baseline, clear::jit_clr_nt_1line),
        Entry::plain("jit_clr_reverse", Baseline, clear::jit_clr_reverse),
        Entry::plain("jit_clr_1byte_rev", Baseline, clear::jit_clr_1byte_rev),
        Entry::plain("jit_clr_2byte_rev", Baseline, clear::jit_clr_2byte_rev),
        Entry::plain("jit_clzero", Clzero, clear::jit_clzero),
        Entry::plain("jit_cldemote", Cldemote, cache::jit_cldemote),
        Entry::plain("jit_cldemote_after", Cldemote, cache::jit_cldemote_after),
        Entry::plain("jit_clflush", Baseline, cache::jit_clflush),
        Entry::plain("jit_clflush_after", Baseline, cache::jit_clflush_after),
        Entry::plain("jit_clflushopt", Clflushopt, cache::jit_clflushopt),
        Entry::plain("jit_clflushopt_after", Clflushopt, cache::jit_clflushopt_after),
        Entry::plain("jit_prefetchw", Baseline, cache::jit_prefetchw),
        Entry::plain("jit_prefetcht1", Baseline, cache::jit_prefetcht1),
        Entry::plain("jit_prefetcht1_after", Baseline, cache::jit_prefetcht1_after),
        Entry::plain("jit_ud2", Baseline, ud2::jit_ud2),
        Entry::plain("jit_ud2_clr", Baseline, ud2::jit_ud2_clr),
        Entry::plain("jit_ud2_clr_1byte", Baseline, ud2::jit_ud2_clr_1byte),
        Entry::rotating("jit_2region", Baseline, 2, AfterUse::Keep),
        Entry::rotating("jit_4region", Baseline, 4, AfterUse::Keep),
        Entry::rotating("jit_8region", Baseline, 8, AfterUse::Keep),
        Entry::rotating("jit_16region", Baseline, 16, AfterUse::Keep),
        Entry::rotating("jit_32region", Baseline, 32, AfterUse::Keep),
        Entry::rotating("jit_64region", Baseline, 64, AfterUse::Keep),
        Entry::rotating("jit_2region_flush", Baseline, 2, AfterUse::Flush),
        Entry::rotating("jit_2region_flushopt", Clflushopt, 2, AfterUse::FlushOpt),
        Entry::rotating("jit_2region_clr", Baseline, 2, AfterUse::Clear),
        Entry::plain("jit_jmp32k", Baseline, pressure::jit_jmp32k),
        Entry::plain("jit_jmp32k_unalign", Baseline, pressure::jit_jmp32k_unalign),
        Entry::plain("jit_jmp64k", Baseline, pressure::jit_jmp64k),
        Entry::plain("jit_jmp64k_unalign", Baseline, pressure::jit_jmp64k_unalign),
        Entry::plain("jit_mfence", Baseline, cache::jit_mfence),
        Entry::plain("jit_serialize", Baseline, cache::jit_serialize),
        Entry::plain("jit_serialize_op", Serialize, cache::jit_serialize_op),
        Entry::new("jit_alias", Baseline, Target::Alias, Stateless(write::jit_alias)),
        Entry::new("jit_realloc", Baseline, Target::Fresh, Stateless(write::jit_realloc)),
    ]
}

/// Split the registry into the entries this processor can run and the names of those it can't.
pub fn catalog(cpu: &CpuFeatures) -> (Vec<Entry>, Vec<(&'static str, Feature)>) {
    let mut runnable = Vec::new();
    let mut skipped = Vec::new();
    for entry in registry() {
        if cpu.supports(entry.requires) {
            runnable.push(entry);
        } else {
            skipped.push((entry.name, entry.requires));
        }
    }
    (runnable, skipped)
}

/// Code staging buffer on the stack, aligned for the widest vector copy.
#[repr(C, align(64))]
struct Staging([u8; CODE_SIZE]);

impl Staging {
    #[inline(always)]
    fn new() -> Self {
        Staging([0; CODE_SIZE])
    }
}

/// Run the stream at the start of `region`.
#[inline(always)]
fn execute(region: &ExecRegion) {
    // SAFETY: every strategy finishes a complete stream before getting here
    black_box(unsafe { region.call() });
}

/// Stores to `p` made so far are kept as written, even if the code writes that follow
/// overwrite them.
#[inline(always)]
fn keep(p: *mut u8) {
    black_box(p);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn names_are_unique_and_fit_the_report() {
        let entries = registry();
        let mut seen = HashSet::new();
        for entry in &entries {
            assert!(entry.name.len() <= 20, "{} too long", entry.name);
            assert!(seen.insert(entry.name), "{} registered twice", entry.name);
        }
        assert_eq!(entries.len(), 56);
        assert_eq!(entries[0].name, "jit_plain");
        assert_eq!(entries.last().map(|e| e.name), Some("jit_realloc"));
    }

    #[test]
    fn baseline_cpu_skips_extension_entries() {
        let (runnable, skipped) = catalog(&CpuFeatures::default());
        assert!(runnable.iter().all(|e| e.requires == Feature::Baseline));
        assert!(skipped.contains(&("jit_memcpy_avx3", Feature::Avx512f)));
        assert!(skipped.contains(&("jit_clzero", Feature::Clzero)));
        assert_eq!(runnable.len() + skipped.len(), registry().len());
    }

    #[test]
    fn filter_keeps_registry_order() {
        let cpu = CpuFeatures {
            avx: true,
            ..CpuFeatures::default()
        };
        let (runnable, _) = catalog(&cpu);
        let names: Vec<_> = runnable.iter().map(|e| e.name).collect();
        let pos = |n| names.iter().position(|&x| x == n).unwrap();
        assert!(pos("jit_memcpy_sse2_nt") < pos("jit_memcpy_avx"));
        assert!(pos("jit_memcpy_avx_nt") < pos("jit_memcpy_sse2_rev"));
        assert!(names.contains(&"jit_memcpy_avx_rev"));
        assert!(!names.contains(&"jit_memcpy_avx3"));
    }

    #[test]
    fn rotating_entries_fit_the_region_set() {
        for entry in registry() {
            if let Target::Rotating(n) = entry.target {
                assert!(n <= NUM_REGIONS, "{}", entry.name);
            }
        }
    }
}
