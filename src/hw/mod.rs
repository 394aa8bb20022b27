//! # Hardware operations
//!
//! Every instruction-set specific primitive the strategies use lives here: the cycle counter,
//! cache line maintenance, prefetch hints, fences, serialization, string instructions and the
//! vector copy/clear loops in [`simd`]. The rest of the crate only sees plain functions over
//! raw pointers.
//!
//! Instructions newer than the toolchain's intrinsic coverage go through `asm!`. The callers
//! are responsible for only reaching feature-gated ones when [`CpuFeatures`] says the
//! processor has them.

pub mod simd;

use core::arch::asm;
use core::arch::x86_64::{__cpuid, __cpuid_count};
use std::fmt;
use std::hint::black_box;

use crate::config::CACHE_LINE;

/// Optional instruction set extension a strategy can depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Always present on x86_64 (SSE2, CLFLUSH, MFENCE, PREFETCHh).
    Baseline,
    Avx,
    Avx512f,
    Clflushopt,
    Cldemote,
    /// AMD only.
    Clzero,
    Serialize,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Feature::Baseline => "baseline",
            Feature::Avx => "AVX",
            Feature::Avx512f => "AVX-512F",
            Feature::Clflushopt => "CLFLUSHOPT",
            Feature::Cldemote => "CLDEMOTE",
            Feature::Clzero => "CLZERO",
            Feature::Serialize => "SERIALIZE",
        };
        f.write_str(name)
    }
}

/// Result of probing the running processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuFeatures {
    pub avx: bool,
    pub avx512f: bool,
    pub clflushopt: bool,
    pub cldemote: bool,
    pub clzero: bool,
    pub serialize: bool,
}

impl CpuFeatures {
    /// Probe with CPUID. AVX and AVX-512 go through `std` detection so OS state saving is
    /// accounted for.
    #[allow(unused_unsafe)]
    pub fn detect() -> Self {
        // SAFETY: CPUID is available on every x86_64 processor
        let max_leaf = unsafe { __cpuid(0) }.eax;
        let (ebx7, ecx7, edx7) = if max_leaf >= 7 {
            let leaf = unsafe { __cpuid_count(7, 0) };
            (leaf.ebx, leaf.ecx, leaf.edx)
        } else {
            (0, 0, 0)
        };
        let max_ext = unsafe { __cpuid(0x8000_0000) }.eax;
        let ebx_ext8 = if max_ext >= 0x8000_0008 {
            unsafe { __cpuid(0x8000_0008) }.ebx
        } else {
            0
        };

        CpuFeatures {
            avx: std::arch::is_x86_feature_detected!("avx"),
            avx512f: std::arch::is_x86_feature_detected!("avx512f"),
            clflushopt: ebx7 & (1 << 23) != 0,
            cldemote: ecx7 & (1 << 25) != 0,
            clzero: ebx_ext8 & 1 != 0,
            serialize: edx7 & (1 << 14) != 0,
        }
    }

    pub fn supports(&self, feature: Feature) -> bool {
        match feature {
            Feature::Baseline => true,
            Feature::Avx => self.avx,
            Feature::Avx512f => self.avx512f,
            Feature::Clflushopt => self.clflushopt,
            Feature::Cldemote => self.cldemote,
            Feature::Clzero => self.clzero,
            Feature::Serialize => self.serialize,
        }
    }
}

impl fmt::Display for CpuFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let all = [
            Feature::Avx,
            Feature::Avx512f,
            Feature::Clflushopt,
            Feature::Cldemote,
            Feature::Clzero,
            Feature::Serialize,
        ];
        let mut first = true;
        for feature in all.into_iter().filter(|&feat| self.supports(feat)) {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{feature}")?;
            first = false;
        }
        if first {
            f.write_str("baseline only")?;
        }
        Ok(())
    }
}

/// Time stamp counter.
#[inline(always)]
pub fn rdtsc() -> u64 {
    let lo: u32;
    let hi: u32;
    // SAFETY: RDTSC only reads the counter
    unsafe {
        asm!("rdtsc", out("eax") lo, out("edx") hi, options(nomem, nostack, preserves_flags));
    }
    (u64::from(hi) << 32) | u64::from(lo)
}

#[inline(always)]
pub fn mfence() {
    // SAFETY: fence has no operands
    unsafe { asm!("mfence", options(nostack, preserves_flags)) };
}

#[inline(always)]
pub fn sfence() {
    // SAFETY: fence has no operands
    unsafe { asm!("sfence", options(nostack, preserves_flags)) };
}

/// Serialize the pipeline with CPUID leaf 1.
#[inline(always)]
#[allow(unused_unsafe)]
pub fn cpuid_serialize() {
    // SAFETY: CPUID is available on every x86_64 processor
    let id = unsafe { __cpuid(1) };
    black_box(id.eax);
}

/// Serialize the pipeline with the SERIALIZE instruction.
///
/// # Safety
/// The processor must support SERIALIZE.
#[inline(always)]
pub unsafe fn serialize() {
    // encoded by hand: NP 0F 01 E8
    unsafe { asm!(".byte 0x0f, 0x01, 0xe8", options(nostack, preserves_flags)) };
}

/// Apply `op` to the first byte of every cache line in `[p, p + len)`.
#[inline(always)]
pub fn for_each_line(p: *mut u8, len: usize, mut op: impl FnMut(*mut u8)) {
    let mut off = 0;
    while off < len {
        op(p.wrapping_add(off));
        off += CACHE_LINE;
    }
}

/// # Safety
/// `p` must be a mapped address.
#[inline(always)]
pub unsafe fn clflush(p: *mut u8) {
    unsafe { asm!("clflush byte ptr [{0}]", in(reg) p, options(nostack, preserves_flags)) };
}

/// # Safety
/// `p` must be a mapped address and the processor must support CLFLUSHOPT.
#[inline(always)]
pub unsafe fn clflushopt(p: *mut u8) {
    unsafe { asm!("clflushopt byte ptr [{0}]", in(reg) p, options(nostack, preserves_flags)) };
}

/// # Safety
/// `p` must be a mapped address and the processor must support CLDEMOTE.
#[inline(always)]
pub unsafe fn cldemote(p: *mut u8) {
    unsafe { asm!("cldemote byte ptr [{0}]", in(reg) p, options(nostack, preserves_flags)) };
}

/// Zero the whole cache line containing `p`.
///
/// # Safety
/// The line must be writable and the processor must support CLZERO.
#[inline(always)]
pub unsafe fn clzero(p: *mut u8) {
    // encoded by hand: 0F 01 FC, address in RAX
    unsafe { asm!(".byte 0x0f, 0x01, 0xfc", in("rax") p, options(nostack, preserves_flags)) };
}

/// Prefetch with intent to write, into L1. Stands in for the `ET1` hint as well.
///
/// # Safety
/// Hint only; any address is fine. CPUs without PREFETCHW execute it as a NOP.
#[inline(always)]
pub unsafe fn prefetchw(p: *mut u8) {
    unsafe { asm!("prefetchw byte ptr [{0}]", in(reg) p, options(nostack, preserves_flags)) };
}

/// Prefetch into L2 and outward.
///
/// # Safety
/// Hint only; any address is fine.
#[inline(always)]
pub unsafe fn prefetcht1(p: *mut u8) {
    unsafe { asm!("prefetcht1 byte ptr [{0}]", in(reg) p, options(nostack, preserves_flags)) };
}

/// Plain byte store of zero, used to clear one byte per line.
///
/// # Safety
/// `p` must be writable.
#[inline(always)]
pub unsafe fn zero_byte(p: *mut u8) {
    unsafe { p.write_volatile(0) };
}

/// `REP MOVSB` block copy.
///
/// # Safety
/// Both ranges must be valid for `len` bytes and must not overlap.
#[inline(always)]
pub unsafe fn rep_movsb(dst: *mut u8, src: *const u8, len: usize) {
    unsafe {
        asm!(
            "rep movsb",
            inout("rcx") len => _,
            inout("rdi") dst => _,
            inout("rsi") src => _,
            options(nostack, preserves_flags)
        );
    }
}

/// `REP STOSB` fill.
///
/// # Safety
/// `dst` must be writable for `len` bytes.
#[inline(always)]
pub unsafe fn rep_stosb(dst: *mut u8, value: u8, len: usize) {
    unsafe {
        asm!(
            "rep stosb",
            inout("rcx") len => _,
            inout("rdi") dst => _,
            in("al") value,
            options(nostack, preserves_flags)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tsc_advances() {
        let a = rdtsc();
        let mut x = 0u64;
        for i in 0..10_000 {
            x = black_box(x.wrapping_add(i));
        }
        let b = rdtsc();
        assert!(b > a, "{a} -> {b}");
    }

    #[test]
    fn baseline_is_always_supported() {
        assert!(CpuFeatures::default().supports(Feature::Baseline));
        assert!(!CpuFeatures::default().supports(Feature::Avx512f));
        assert_eq!(CpuFeatures::default().to_string(), "baseline only");
    }

    #[test]
    fn detect_agrees_with_std() {
        let cpu = CpuFeatures::detect();
        assert_eq!(cpu.avx, std::arch::is_x86_feature_detected!("avx"));
    }

    #[test]
    fn string_instructions() {
        let src: Vec<u8> = (0..=255).collect();
        let mut dst = vec![0u8; 256];
        unsafe { rep_movsb(dst.as_mut_ptr(), src.as_ptr(), src.len()) };
        assert_eq!(src, dst);
        unsafe { rep_stosb(dst.as_mut_ptr().add(16), 0xC3, 32) };
        assert!(dst[16..48].iter().all(|&b| b == 0xC3));
        assert_eq!(dst[15], 15);
        assert_eq!(dst[48], 48);
    }

    #[test]
    fn line_ops_touch_every_line() {
        let mut buf = vec![0xFFu8; 1024];
        for_each_line(buf.as_mut_ptr(), buf.len(), |p| unsafe { zero_byte(p) });
        for (i, &b) in buf.iter().enumerate() {
            assert_eq!(b == 0, i % CACHE_LINE == 0, "offset {i}");
        }
        for_each_line(buf.as_mut_ptr(), buf.len(), |p| unsafe { clflush(p) });
        for_each_line(buf.as_mut_ptr(), buf.len(), |p| unsafe { prefetcht1(p) });
        for_each_line(buf.as_mut_ptr(), buf.len(), |p| unsafe { prefetchw(p) });
        mfence();
        cpuid_serialize();
        assert_eq!(buf[0], 0);
    }
}
