//! Cache line maintenance, prefetch hints, fences and serialization around the write.

use super::{Context, execute};
use crate::config::CODE_SIZE;
use crate::hw;

/// Apply a per-line operation to the primary buffer before or after generating into it.
#[inline(always)]
fn with_lines(cx: &mut Context, after: bool, op: impl Fn(*mut u8)) {
    let dst = cx.regions.primary_mut();
    if !after {
        hw::for_each_line(dst.as_ptr(), CODE_SIZE, &op);
    }
    cx.codegen.forward(dst.as_mut_slice(), 0);
    if after {
        hw::for_each_line(dst.as_ptr(), CODE_SIZE, &op);
    }
    execute(dst);
}

pub fn jit_cldemote(cx: &mut Context) {
    // SAFETY: registered only with CLDEMOTE; lines lie inside the buffer
    with_lines(cx, false, |p| unsafe { hw::cldemote(p) });
}

pub fn jit_cldemote_after(cx: &mut Context) {
    // SAFETY: registered only with CLDEMOTE; lines lie inside the buffer
    with_lines(cx, true, |p| unsafe { hw::cldemote(p) });
}

pub fn jit_clflush(cx: &mut Context) {
    // SAFETY: lines lie inside the mapped buffer
    with_lines(cx, false, |p| unsafe { hw::clflush(p) });
}

pub fn jit_clflush_after(cx: &mut Context) {
    // SAFETY: lines lie inside the mapped buffer
    with_lines(cx, true, |p| unsafe { hw::clflush(p) });
}

pub fn jit_clflushopt(cx: &mut Context) {
    // SAFETY: registered only with CLFLUSHOPT; lines lie inside the buffer
    with_lines(cx, false, |p| unsafe { hw::clflushopt(p) });
}

pub fn jit_clflushopt_after(cx: &mut Context) {
    // SAFETY: registered only with CLFLUSHOPT; lines lie inside the buffer
    with_lines(cx, true, |p| unsafe { hw::clflushopt(p) });
}

/// Write-intent prefetch of every line before the write. Uses plain PREFETCHW rather than the
/// L2-targeted PREFETCHWT1, which almost no processor implements. Runs even where PREFETCHW
/// isn't reported; older parts treat it as a NOP.
pub fn jit_prefetchw(cx: &mut Context) {
    // SAFETY: hint only
    with_lines(cx, false, |p| unsafe { hw::prefetchw(p) });
}

pub fn jit_prefetcht1(cx: &mut Context) {
    // SAFETY: hint only
    with_lines(cx, false, |p| unsafe { hw::prefetcht1(p) });
}

pub fn jit_prefetcht1_after(cx: &mut Context) {
    // SAFETY: hint only
    with_lines(cx, true, |p| unsafe { hw::prefetcht1(p) });
}

pub fn jit_mfence(cx: &mut Context) {
    let dst = cx.regions.primary_mut();
    cx.codegen.forward(dst.as_mut_slice(), 0);
    hw::mfence();
    execute(dst);
}

/// Serialize with CPUID between write and execute.
pub fn jit_serialize(cx: &mut Context) {
    let dst = cx.regions.primary_mut();
    cx.codegen.forward(dst.as_mut_slice(), 0);
    hw::cpuid_serialize();
    execute(dst);
}

/// As [`jit_serialize`] with the dedicated SERIALIZE instruction.
pub fn jit_serialize_op(cx: &mut Context) {
    let dst = cx.regions.primary_mut();
    cx.codegen.forward(dst.as_mut_slice(), 0);
    // SAFETY: only registered when the processor reports SERIALIZE
    unsafe { hw::serialize() };
    execute(dst);
}
