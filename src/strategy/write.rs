//! Direct emission into the destination, with nothing else going on.

use std::hint::black_box;

use super::{Context, execute};
use crate::config::CODE_SIZE;
use crate::hw;
use crate::mem::ExecRegion;

/// Base case.
pub fn jit_plain(cx: &mut Context) {
    let dst = cx.regions.primary_mut();
    cx.codegen.forward(dst.as_mut_slice(), 0);
    execute(dst);
}

/// Write, but run the resident stream instead of the fresh one: what remains is the cost of
/// the processor noticing stores into code it may have fetched.
pub fn jit_only(cx: &mut Context) {
    cx.codegen.forward(cx.regions.primary_mut().as_mut_slice(), 0);
    execute(&cx.resident);
}

/// `RET` first, then the instructions from the top of the buffer down.
pub fn jit_reverse(cx: &mut Context) {
    let dst = cx.regions.primary_mut();
    cx.codegen.reverse(dst.as_mut_slice());
    execute(dst);
}

/// Write through the writable view, serialize, run through the executable view.
pub fn jit_alias(cx: &mut Context) {
    cx.codegen.forward(cx.alias.write_view(), 0);
    hw::cpuid_serialize();
    // SAFETY: the complete stream was just written through the other view
    black_box(unsafe { cx.alias.call() });
}

/// A brand new region per call, as strict W^X would force on a JIT that never reuses pages.
pub fn jit_realloc(cx: &mut Context) {
    let mut region = ExecRegion::new(CODE_SIZE)
        .unwrap_or_else(|err| panic!("per-call region allocation failed: {err}"));
    cx.codegen.forward(region.as_mut_slice(), 0);
    execute(&region);
}
