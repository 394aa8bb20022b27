//! Generate into a stack buffer, then copy the whole thing into the destination.

use super::{Context, Staging, execute};
use crate::config::CODE_SIZE;
use crate::hw::{self, simd};

#[inline(always)]
fn staged(cx: &mut Context, copy: impl FnOnce(*mut u8, *const u8, usize)) {
    let mut tmp = Staging::new();
    cx.codegen.forward(&mut tmp.0, 0);
    let dst = cx.regions.primary_mut();
    copy(dst.as_ptr(), tmp.0.as_ptr(), CODE_SIZE);
    execute(dst);
}

pub fn jit_memcpy(cx: &mut Context) {
    let mut tmp = Staging::new();
    cx.codegen.forward(&mut tmp.0, 0);
    let dst = cx.regions.primary_mut();
    dst.as_mut_slice().copy_from_slice(&tmp.0);
    execute(dst);
}

pub fn jit_memcpy_sse2(cx: &mut Context) {
    // SAFETY: both buffers are 64-byte aligned and CODE_SIZE long
    staged(cx, |d, s, n| unsafe { simd::copy_sse2(d, s, n) });
}

pub fn jit_memcpy_sse2_nt(cx: &mut Context) {
    // SAFETY: as above
    staged(cx, |d, s, n| unsafe { simd::copy_sse2_nt(d, s, n) });
}

pub fn jit_memcpy_sse2_rev(cx: &mut Context) {
    // SAFETY: as above
    staged(cx, |d, s, n| unsafe { simd::copy_sse2_rev(d, s, n) });
}

pub fn jit_memcpy_avx(cx: &mut Context) {
    // SAFETY: aligned CODE_SIZE buffers, AVX checked at registration
    staged(cx, |d, s, n| unsafe { simd::copy_avx(d, s, n) });
}

pub fn jit_memcpy_avx_nt(cx: &mut Context) {
    // SAFETY: aligned CODE_SIZE buffers, AVX checked at registration
    staged(cx, |d, s, n| unsafe { simd::copy_avx_nt(d, s, n) });
}

pub fn jit_memcpy_avx_rev(cx: &mut Context) {
    // SAFETY: aligned CODE_SIZE buffers, AVX checked at registration
    staged(cx, |d, s, n| unsafe { simd::copy_avx_rev(d, s, n) });
}

pub fn jit_memcpy_avx3(cx: &mut Context) {
    // SAFETY: aligned CODE_SIZE buffers, AVX-512F checked at registration
    staged(cx, |d, s, n| unsafe { simd::copy_avx512(d, s, n) });
}

pub fn jit_memcpy_avx3_nt(cx: &mut Context) {
    // SAFETY: aligned CODE_SIZE buffers, AVX-512F checked at registration
    staged(cx, |d, s, n| unsafe { simd::copy_avx512_nt(d, s, n) });
}

pub fn jit_memcpy_avx3_rev(cx: &mut Context) {
    // SAFETY: aligned CODE_SIZE buffers, AVX-512F checked at registration
    staged(cx, |d, s, n| unsafe { simd::copy_avx512_rev(d, s, n) });
}

/// Hardware block copy.
pub fn jit_memcpy_movsb(cx: &mut Context) {
    // SAFETY: separate buffers, CODE_SIZE bytes each
    staged(cx, |d, s, n| unsafe { hw::rep_movsb(d, s, n) });
}
