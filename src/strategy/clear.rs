//! Clear some or all of the destination before writing into it.

use super::{Context, execute, keep};
use crate::codegen::OP_RET;
use crate::config::{CACHE_LINE, CODE_SIZE};
use crate::hw::{self, simd};

/// Zero a 16-bit value across each pair of lines, at offsets `63 + 128k`.
#[inline(always)]
fn clear_straddled(p: *mut u8) {
    let mut off = CACHE_LINE - 1;
    while off + 2 <= CODE_SIZE {
        // SAFETY: in bounds by the loop condition
        unsafe { p.add(off).cast::<u16>().write_unaligned(0) };
        off += 2 * CACHE_LINE;
    }
}

#[inline(always)]
fn clear_line_heads(p: *mut u8) {
    // SAFETY: every line start is inside the buffer
    hw::for_each_line(p, CODE_SIZE, |line| unsafe { hw::zero_byte(line) });
}

pub fn jit_clr(cx: &mut Context) {
    let dst = cx.regions.primary_mut();
    dst.as_mut_slice().fill(0);
    keep(dst.as_ptr());
    cx.codegen.forward(dst.as_mut_slice(), 0);
    execute(dst);
}

/// Fill with `RET` so any prefix of the buffer is a valid stream.
pub fn jit_clr_ret(cx: &mut Context) {
    let dst = cx.regions.primary_mut();
    dst.as_mut_slice().fill(OP_RET);
    keep(dst.as_ptr());
    cx.codegen.forward(dst.as_mut_slice(), 0);
    execute(dst);
}

pub fn jit_clr_1byte(cx: &mut Context) {
    let dst = cx.regions.primary_mut();
    clear_line_heads(dst.as_ptr());
    cx.codegen.forward(dst.as_mut_slice(), 0);
    execute(dst);
}

pub fn jit_clr_2byte(cx: &mut Context) {
    let dst = cx.regions.primary_mut();
    clear_straddled(dst.as_ptr());
    keep(dst.as_ptr());
    cx.codegen.forward(dst.as_mut_slice(), 0);
    execute(dst);
}

/// One scattered dword per line. Needs AVX-512F.
pub fn jit_clr_scatter(cx: &mut Context) {
    let dst = cx.regions.primary_mut();
    // SAFETY: CODE_SIZE is a whole number of 1 KiB scatter blocks
    unsafe { simd::scatter_zero_lines(dst.as_ptr(), CODE_SIZE) };
    cx.codegen.forward(dst.as_mut_slice(), 0);
    execute(dst);
}

pub fn jit_clr_stosb(cx: &mut Context) {
    let dst = cx.regions.primary_mut();
    // SAFETY: the destination is CODE_SIZE writable bytes
    unsafe { hw::rep_stosb(dst.as_ptr(), 0, CODE_SIZE) };
    cx.codegen.forward(dst.as_mut_slice(), 0);
    execute(dst);
}

pub fn jit_clr_nt(cx: &mut Context) {
    let dst = cx.regions.primary_mut();
    // SAFETY: 64-byte aligned, CODE_SIZE is a multiple of 16
    unsafe { simd::stream_zero(dst.as_ptr(), CODE_SIZE) };
    hw::sfence();
    cx.codegen.forward(dst.as_mut_slice(), 0);
    execute(dst);
}

pub fn jit_clr_nt_1line(cx: &mut Context) {
    let dst = cx.regions.primary_mut();
    // SAFETY: the destination is cache line aligned
    unsafe { simd::stream_zero_lines(dst.as_ptr(), CODE_SIZE) };
    hw::sfence();
    cx.codegen.forward(dst.as_mut_slice(), 0);
    execute(dst);
}

pub fn jit_clr_reverse(cx: &mut Context) {
    let dst = cx.regions.primary_mut();
    dst.as_mut_slice().fill(0);
    keep(dst.as_ptr());
    cx.codegen.reverse(dst.as_mut_slice());
    execute(dst);
}

pub fn jit_clr_1byte_rev(cx: &mut Context) {
    let dst = cx.regions.primary_mut();
    clear_line_heads(dst.as_ptr());
    cx.codegen.reverse(dst.as_mut_slice());
    execute(dst);
}

pub fn jit_clr_2byte_rev(cx: &mut Context) {
    let dst = cx.regions.primary_mut();
    clear_straddled(dst.as_ptr());
    keep(dst.as_ptr());
    cx.codegen.reverse(dst.as_mut_slice());
    execute(dst);
}

/// Zero whole lines with CLZERO. AMD only.
pub fn jit_clzero(cx: &mut Context) {
    let dst = cx.regions.primary_mut();
    // SAFETY: registered only with CLZERO; lines lie inside the buffer
    hw::for_each_line(dst.as_ptr(), CODE_SIZE, |line| unsafe { hw::clzero(line) });
    cx.codegen.forward(dst.as_mut_slice(), 0);
    execute(dst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(64))]
    struct Buf([u8; CODE_SIZE]);

    #[test]
    fn straddled_clear_covers_every_line() {
        let mut buf = Buf([0xFF; CODE_SIZE]);
        clear_straddled(buf.0.as_mut_ptr());
        for line in 0..CODE_SIZE / CACHE_LINE {
            let touched = buf.0[line * CACHE_LINE..(line + 1) * CACHE_LINE]
                .iter()
                .any(|&b| b == 0);
            assert!(touched, "line {line} untouched");
        }
        assert_eq!(buf.0.iter().filter(|&&b| b == 0).count(), 16);
        assert_eq!(buf.0[63], 0);
        assert_eq!(buf.0[64], 0);
        assert_eq!(buf.0[959], 0);
        assert_eq!(buf.0[960], 0);
    }

    #[test]
    fn line_heads() {
        let mut buf = Buf([0xFF; CODE_SIZE]);
        clear_line_heads(buf.0.as_mut_ptr());
        assert_eq!(buf.0.iter().filter(|&&b| b == 0).count(), CODE_SIZE / CACHE_LINE);
    }
}
