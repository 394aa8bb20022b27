//! Run a long chain of jumps before the write so the instruction caches hold something else.

use super::{Context, execute};
use crate::codegen;
use crate::error::BenchResult;
use crate::mem::{self, ExecRegion};

/// A jump chain living in its own executable region.
pub struct JumpChain {
    region: ExecRegion,
    entry: usize,
}

impl JumpChain {
    /// `span` bytes of chain; `unaligned` puts each jump across a line boundary.
    pub fn build(span: usize, unaligned: bool) -> BenchResult<Self> {
        let mut region = ExecRegion::new(span)?;
        mem::check_alignment(region.as_ptr())?;
        let entry = codegen::jump_chain(region.as_mut_slice(), unaligned);
        Ok(JumpChain { region, entry })
    }

    pub fn code(&self) -> &[u8] {
        self.region.as_slice()
    }

    pub fn entry(&self) -> usize {
        self.entry
    }

    #[inline(always)]
    pub fn run(&self) {
        // SAFETY: `build` wrote a complete chain ending in RET, reachable from `entry`
        std::hint::black_box(unsafe { mem::invoke(self.region.as_ptr().add(self.entry)) });
    }
}

#[inline(always)]
fn write_and_run(cx: &mut Context) {
    let dst = cx.regions.primary_mut();
    cx.codegen.forward(dst.as_mut_slice(), 0);
    execute(dst);
}

pub fn jit_jmp32k(cx: &mut Context) {
    cx.chains.k32.run();
    write_and_run(cx);
}

/// Same span with half the jumps, each one split across two lines.
pub fn jit_jmp32k_unalign(cx: &mut Context) {
    cx.chains.k32_unaligned.run();
    write_and_run(cx);
}

pub fn jit_jmp64k(cx: &mut Context) {
    cx.chains.k64.run();
    write_and_run(cx);
}

pub fn jit_jmp64k_unalign(cx: &mut Context) {
    cx.chains.k64_unaligned.run();
    write_and_run(cx);
}
