//! Keep the buffer invalid until the last store: a `UD2` sits at the entry while the rest of
//! the stream is written, and the first real instruction replaces it at the very end.
//!
//! Reaching the `UD2` at run time means a store was not visible to instruction fetch when the
//! call happened, and takes the process down.

use super::{Context, execute, keep};
use crate::codegen::{INSN_LEN, OP_ADD_EAX, UD2};
use crate::config::{CACHE_LINE, CODE_SIZE};
use crate::hw;

const PATCH_IMM: u32 = 0x5555_5555;

/// # Safety
/// `p` must be writable for one instruction.
#[inline(always)]
unsafe fn arm(p: *mut u8) {
    unsafe { p.cast::<u16>().write_unaligned(UD2.to_le()) };
}

/// # Safety
/// `p` must be writable for one instruction.
#[inline(always)]
unsafe fn patch(p: *mut u8) {
    unsafe {
        p.write(OP_ADD_EAX);
        p.add(1).cast::<u32>().write_unaligned(PATCH_IMM.to_le());
    }
}

pub fn jit_ud2(cx: &mut Context) {
    let dst = cx.regions.primary_mut();
    let p = dst.as_ptr();
    // SAFETY: the buffer is CODE_SIZE writable bytes
    unsafe { arm(p) };
    keep(p);
    cx.codegen.forward(dst.as_mut_slice(), INSN_LEN);
    // SAFETY: the buffer is CODE_SIZE writable bytes
    unsafe { patch(p) };
    execute(dst);
}

/// Also zero everything after the `UD2` before generating.
pub fn jit_ud2_clr(cx: &mut Context) {
    let dst = cx.regions.primary_mut();
    let p = dst.as_ptr();
    // SAFETY: the buffer is CODE_SIZE writable bytes
    unsafe {
        arm(p);
        p.add(2).write_bytes(0, CODE_SIZE - 2);
    }
    keep(p);
    cx.codegen.forward(dst.as_mut_slice(), INSN_LEN);
    // SAFETY: the buffer is CODE_SIZE writable bytes
    unsafe { patch(p) };
    execute(dst);
}

/// Also zero the first byte of every line after the first.
pub fn jit_ud2_clr_1byte(cx: &mut Context) {
    let dst = cx.regions.primary_mut();
    let p = dst.as_ptr();
    // SAFETY: the buffer is CODE_SIZE writable bytes
    unsafe { arm(p) };
    keep(p);
    hw::for_each_line(
        p.wrapping_add(CACHE_LINE),
        CODE_SIZE - CACHE_LINE,
        // SAFETY: line starts after the first stay inside the buffer
        |line| unsafe { hw::zero_byte(line) },
    );
    cx.codegen.forward(dst.as_mut_slice(), INSN_LEN);
    // SAFETY: the buffer is CODE_SIZE writable bytes
    unsafe { patch(p) };
    execute(dst);
}
