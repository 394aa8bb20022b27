//! Vector copy and clear loops.
//!
//! All routines expect both pointers aligned to the vector width and `len` a multiple of it;
//! code buffers and staging buffers are cache line aligned and `CODE_SIZE` is a multiple of
//! 64, so the strategies always satisfy that.

use core::arch::x86_64::*;

/// Copy with 16-byte stores, lowest address first.
///
/// # Safety
/// `dst` and `src` valid and 16-byte aligned for `len` bytes, `len % 16 == 0`.
#[inline(always)]
pub unsafe fn copy_sse2(dst: *mut u8, src: *const u8, len: usize) {
    let mut i = 0;
    while i < len {
        unsafe {
            let v = _mm_load_si128(src.add(i).cast());
            _mm_store_si128(dst.add(i).cast(), v);
        }
        i += 16;
    }
}

/// Copy with 16-byte non-temporal stores.
///
/// # Safety
/// As [`copy_sse2`].
#[inline(always)]
pub unsafe fn copy_sse2_nt(dst: *mut u8, src: *const u8, len: usize) {
    let mut i = 0;
    while i < len {
        unsafe {
            let v = _mm_load_si128(src.add(i).cast());
            _mm_stream_si128(dst.add(i).cast(), v);
        }
        i += 16;
    }
}

/// Copy with 16-byte stores, highest address first.
///
/// # Safety
/// As [`copy_sse2`].
#[inline(always)]
pub unsafe fn copy_sse2_rev(dst: *mut u8, src: *const u8, len: usize) {
    let mut i = len;
    while i > 0 {
        i -= 16;
        unsafe {
            let v = _mm_load_si128(src.add(i).cast());
            _mm_store_si128(dst.add(i).cast(), v);
        }
    }
}

/// # Safety
/// As [`copy_sse2`] with 32-byte alignment and granularity; the CPU must support AVX.
#[target_feature(enable = "avx")]
pub unsafe fn copy_avx(dst: *mut u8, src: *const u8, len: usize) {
    let mut i = 0;
    while i < len {
        unsafe {
            let v = _mm256_load_si256(src.add(i).cast());
            _mm256_store_si256(dst.add(i).cast(), v);
        }
        i += 32;
    }
}

/// # Safety
/// As [`copy_avx`].
#[target_feature(enable = "avx")]
pub unsafe fn copy_avx_nt(dst: *mut u8, src: *const u8, len: usize) {
    let mut i = 0;
    while i < len {
        unsafe {
            let v = _mm256_load_si256(src.add(i).cast());
            _mm256_stream_si256(dst.add(i).cast(), v);
        }
        i += 32;
    }
}

/// # Safety
/// As [`copy_avx`].
#[target_feature(enable = "avx")]
pub unsafe fn copy_avx_rev(dst: *mut u8, src: *const u8, len: usize) {
    let mut i = len;
    while i > 0 {
        i -= 32;
        unsafe {
            let v = _mm256_load_si256(src.add(i).cast());
            _mm256_store_si256(dst.add(i).cast(), v);
        }
    }
}

/// # Safety
/// As [`copy_sse2`] with 64-byte alignment and granularity; the CPU must support AVX-512F.
#[target_feature(enable = "avx512f")]
pub unsafe fn copy_avx512(dst: *mut u8, src: *const u8, len: usize) {
    let mut i = 0;
    while i < len {
        unsafe {
            let v = _mm512_load_si512(src.add(i).cast());
            _mm512_store_si512(dst.add(i).cast(), v);
        }
        i += 64;
    }
}

/// # Safety
/// As [`copy_avx512`].
#[target_feature(enable = "avx512f")]
pub unsafe fn copy_avx512_nt(dst: *mut u8, src: *const u8, len: usize) {
    let mut i = 0;
    while i < len {
        unsafe {
            let v = _mm512_load_si512(src.add(i).cast());
            _mm512_stream_si512(dst.add(i).cast(), v);
        }
        i += 64;
    }
}

/// # Safety
/// As [`copy_avx512`].
#[target_feature(enable = "avx512f")]
pub unsafe fn copy_avx512_rev(dst: *mut u8, src: *const u8, len: usize) {
    let mut i = len;
    while i > 0 {
        i -= 64;
        unsafe {
            let v = _mm512_load_si512(src.add(i).cast());
            _mm512_store_si512(dst.add(i).cast(), v);
        }
    }
}

/// Zero `len` bytes with 16-byte non-temporal stores. Not fenced.
///
/// # Safety
/// `dst` writable and 16-byte aligned for `len` bytes, `len % 16 == 0`.
#[inline(always)]
pub unsafe fn stream_zero(dst: *mut u8, len: usize) {
    let mut i = 0;
    while i < len {
        unsafe { _mm_stream_si128(dst.add(i).cast(), _mm_setzero_si128()) };
        i += 16;
    }
}

/// Zero the first 16 bytes of every cache line with a non-temporal store. Not fenced.
///
/// # Safety
/// `dst` writable and cache line aligned for `len` bytes.
#[inline(always)]
pub unsafe fn stream_zero_lines(dst: *mut u8, len: usize) {
    let mut i = 0;
    while i < len {
        unsafe { _mm_stream_si128(dst.add(i).cast(), _mm_setzero_si128()) };
        i += 64;
    }
}

/// Zero one dword at the start of each cache line, sixteen lines per scatter.
///
/// # Safety
/// `dst` writable for `len` bytes, `len % 1024 == 0`; the CPU must support AVX-512F.
#[target_feature(enable = "avx512f")]
pub unsafe fn scatter_zero_lines(dst: *mut u8, len: usize) {
    let offsets = _mm512_set_epi32(
        0x3c0, 0x380, 0x340, 0x300, 0x2c0, 0x280, 0x240, 0x200, 0x1c0, 0x180, 0x140, 0x100,
        0x0c0, 0x080, 0x040, 0x000,
    );
    let zero = _mm512_setzero_si512();
    let mut i = 0;
    while i < len {
        unsafe { _mm512_i32scatter_epi32::<1>(dst.add(i).cast(), offsets, zero) };
        i += 64 * 16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(64))]
    struct Lines([u8; 1024]);

    fn pattern() -> Lines {
        let mut buf = Lines([0; 1024]);
        for (i, b) in buf.0.iter_mut().enumerate() {
            *b = (i * 7 + 3) as u8;
        }
        buf
    }

    #[test]
    fn sse2_copies() {
        let src = pattern();
        for copy in [copy_sse2, copy_sse2_nt, copy_sse2_rev] {
            let mut dst = Lines([0; 1024]);
            unsafe { copy(dst.0.as_mut_ptr(), src.0.as_ptr(), 1024) };
            crate::hw::sfence();
            assert_eq!(dst.0, src.0);
        }
    }

    #[test]
    fn avx_copies() {
        if !std::arch::is_x86_feature_detected!("avx") {
            return;
        }
        let src = pattern();
        let mut dst = Lines([0; 1024]);
        unsafe { copy_avx(dst.0.as_mut_ptr(), src.0.as_ptr(), 1024) };
        assert_eq!(dst.0, src.0);
        let mut dst = Lines([0; 1024]);
        unsafe { copy_avx_nt(dst.0.as_mut_ptr(), src.0.as_ptr(), 1024) };
        crate::hw::sfence();
        assert_eq!(dst.0, src.0);
        let mut dst = Lines([0; 1024]);
        unsafe { copy_avx_rev(dst.0.as_mut_ptr(), src.0.as_ptr(), 1024) };
        assert_eq!(dst.0, src.0);
    }

    #[test]
    fn avx512_scatter_clears_line_heads() {
        if !std::arch::is_x86_feature_detected!("avx512f") {
            return;
        }
        let mut buf = pattern();
        unsafe { scatter_zero_lines(buf.0.as_mut_ptr(), 1024) };
        let reference = pattern();
        for i in 0..1024 {
            let expect = if i % 64 < 4 { 0 } else { reference.0[i] };
            assert_eq!(buf.0[i], expect, "offset {i}");
        }
    }

    #[test]
    fn stream_zeroing() {
        let mut buf = pattern();
        unsafe { stream_zero_lines(buf.0.as_mut_ptr(), 1024) };
        crate::hw::sfence();
        let reference = pattern();
        for i in 0..1024 {
            let expect = if i % 64 < 16 { 0 } else { reference.0[i] };
            assert_eq!(buf.0[i], expect, "offset {i}");
        }
        unsafe { stream_zero(buf.0.as_mut_ptr(), 1024) };
        crate::hw::sfence();
        assert!(buf.0.iter().all(|&b| b == 0));
    }
}
