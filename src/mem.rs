//! # Memory provisioning
//!
//! Readable + writable + executable regions straight from `mmap`, and a write/execute alias
//! pair: one shared memory object mapped twice, writable at one address and executable at
//! another. Both kinds unmap themselves on drop.
//!
//! Systems enforcing strict W^X refuse both; the harness treats that as fatal.

use crate::config::CACHE_LINE;
use crate::error::{BenchError, BenchResult};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr::{self, NonNull};

/// Signature every generated stream is invoked with. The return value is whatever the `ADD`s
/// left in `EAX` and carries no meaning.
pub type JitFn = unsafe extern "C" fn() -> i32;

/// Call into generated code at `entry`.
///
/// # Safety
/// `entry` must point at executable memory holding a complete, `RET`-terminated stream.
#[inline(always)]
pub unsafe fn invoke(entry: *const u8) -> i32 {
    let f = unsafe { std::mem::transmute::<*const u8, JitFn>(entry) };
    unsafe { f() }
}

/// Fail unless `ptr` sits on a cache line boundary.
pub fn check_alignment(ptr: *const u8) -> BenchResult<()> {
    let addr = ptr as usize;
    if addr % CACHE_LINE != 0 {
        return Err(BenchError::Misaligned { addr });
    }
    Ok(())
}

fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).unwrap_or(4096)
}

fn page_round(len: usize) -> usize {
    let page = page_size();
    len.div_ceil(page).max(1) * page
}

fn unmap(ptr: NonNull<u8>, len: usize) {
    // SAFETY: callers only pass mappings they own, with the length they were created with
    let rc = unsafe { libc::munmap(ptr.as_ptr().cast(), len) };
    if rc != 0 {
        log::warn!("munmap of {len} bytes at {ptr:p} failed: {}", io::Error::last_os_error());
    }
}

/// Anonymous read/write/execute mapping.
pub struct ExecRegion {
    ptr: NonNull<u8>,
    len: usize,
    map_len: usize,
}

impl ExecRegion {
    /// Map at least `len` bytes RWX. The usable length is exactly `len`.
    pub fn new(len: usize) -> BenchResult<Self> {
        let map_len = page_round(len);
        #[cfg(target_os = "macos")]
        let flags = libc::MAP_PRIVATE | libc::MAP_ANON | libc::MAP_JIT;
        #[cfg(not(target_os = "macos"))]
        let flags = libc::MAP_PRIVATE | libc::MAP_ANON;

        // SAFETY: fresh anonymous mapping, no existing memory is touched
        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                flags,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(BenchError::Alloc {
                len,
                source: io::Error::last_os_error(),
            });
        }
        let ptr = NonNull::new(raw.cast::<u8>()).ok_or_else(|| BenchError::Alloc {
            len,
            source: io::Error::other("mmap returned null"),
        })?;
        Ok(ExecRegion { ptr, len, map_len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the mapping is at least `len` bytes and lives as long as `self`
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` makes the borrow exclusive
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Run the stream starting at offset 0.
    ///
    /// # Safety
    /// The region must hold a complete, `RET`-terminated stream from its first byte.
    #[inline(always)]
    pub unsafe fn call(&self) -> i32 {
        unsafe { invoke(self.ptr.as_ptr()) }
    }
}

impl Drop for ExecRegion {
    fn drop(&mut self) {
        unmap(self.ptr, self.map_len);
    }
}

/// The fixed set of equally sized, cache line aligned code buffers shared by all strategies.
pub struct RegionSet {
    regions: Vec<ExecRegion>,
}

impl RegionSet {
    /// Allocate `count` regions of `len` bytes each, verifying the alignment of every one.
    pub fn allocate(count: usize, len: usize) -> BenchResult<Self> {
        let mut regions = Vec::with_capacity(count);
        for _ in 0..count {
            let region = ExecRegion::new(len)?;
            check_alignment(region.as_ptr())?;
            regions.push(region);
        }
        Ok(RegionSet { regions })
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// The buffer single-destination strategies write to.
    pub fn primary(&self) -> &ExecRegion {
        &self.regions[0]
    }

    pub fn primary_mut(&mut self) -> &mut ExecRegion {
        &mut self.regions[0]
    }

    pub fn get(&self, index: usize) -> &ExecRegion {
        &self.regions[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut ExecRegion {
        &mut self.regions[index]
    }
}

/// Two views of the same physical pages: `write` is RW, `exec` is RX.
pub struct AliasPair {
    write: NonNull<u8>,
    exec: NonNull<u8>,
    len: usize,
    map_len: usize,
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn shared_object() -> io::Result<OwnedFd> {
    // SAFETY: the name is a valid C string; the returned descriptor is owned by us
    let fd = unsafe { libc::memfd_create(c"smc-bench-alias".as_ptr(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

#[cfg(target_os = "macos")]
fn shared_object() -> io::Result<OwnedFd> {
    let name = std::ffi::CString::new(format!("/smc-bench-{}", std::process::id()))
        .map_err(io::Error::other)?;
    // SAFETY: valid C string; the descriptor is owned by us and the name removed right away
    let fd = unsafe {
        libc::shm_open(
            name.as_ptr(),
            libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
            0o600 as libc::c_uint,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };
    unsafe { libc::shm_unlink(name.as_ptr()) };
    Ok(fd)
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "macos")))]
fn shared_object() -> io::Result<OwnedFd> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

fn map_shared(fd: &OwnedFd, len: usize, prot: libc::c_int) -> io::Result<NonNull<u8>> {
    // SAFETY: maps an object we own; no existing memory is touched
    let raw = unsafe {
        libc::mmap(ptr::null_mut(), len, prot, libc::MAP_SHARED, fd.as_raw_fd(), 0)
    };
    if raw == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    NonNull::new(raw.cast::<u8>()).ok_or_else(|| io::Error::other("mmap returned null"))
}

impl AliasPair {
    pub fn new(len: usize) -> BenchResult<Self> {
        let map_len = page_round(len);
        let fd = shared_object().map_err(|source| BenchError::AliasMap {
            step: "shared memory object",
            source,
        })?;

        let size = libc::off_t::try_from(map_len).map_err(|_| BenchError::AliasMap {
            step: "resize",
            source: io::Error::from(io::ErrorKind::InvalidInput),
        })?;
        // SAFETY: `fd` is a valid descriptor we own
        if unsafe { libc::ftruncate(fd.as_raw_fd(), size) } != 0 {
            return Err(BenchError::AliasMap {
                step: "resize",
                source: io::Error::last_os_error(),
            });
        }

        let write = map_shared(&fd, map_len, libc::PROT_READ | libc::PROT_WRITE).map_err(
            |source| BenchError::AliasMap {
                step: "write mapping",
                source,
            },
        )?;
        let exec = match map_shared(&fd, map_len, libc::PROT_READ | libc::PROT_EXEC) {
            Ok(exec) => exec,
            Err(source) => {
                unmap(write, map_len);
                return Err(BenchError::AliasMap {
                    step: "execute mapping",
                    source,
                });
            }
        };

        let pair = AliasPair {
            write,
            exec,
            len,
            map_len,
        };
        check_alignment(pair.write_ptr())?;
        check_alignment(pair.exec_ptr())?;
        Ok(pair)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn write_ptr(&self) -> *mut u8 {
        self.write.as_ptr()
    }

    pub fn exec_ptr(&self) -> *const u8 {
        self.exec.as_ptr()
    }

    pub fn write_view(&mut self) -> &mut [u8] {
        // SAFETY: `len` bytes of the writable mapping, exclusively borrowed through `self`
        unsafe { std::slice::from_raw_parts_mut(self.write.as_ptr(), self.len) }
    }

    /// The executable mapping read back as data.
    pub fn exec_view(&self) -> &[u8] {
        // SAFETY: the execute mapping is also readable
        unsafe { std::slice::from_raw_parts(self.exec.as_ptr(), self.len) }
    }

    /// Run the stream through the executable mapping.
    ///
    /// # Safety
    /// A complete stream must have been written through the write view and made visible.
    #[inline(always)]
    pub unsafe fn call(&self) -> i32 {
        unsafe { invoke(self.exec.as_ptr()) }
    }
}

impl Drop for AliasPair {
    fn drop(&mut self) {
        unmap(self.exec, self.map_len);
        unmap(self.write, self.map_len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_check() {
        assert!(check_alignment(0x1000 as *const u8).is_ok());
        assert!(check_alignment(0x1040 as *const u8).is_ok());
        assert!(matches!(
            check_alignment(0x1001 as *const u8),
            Err(BenchError::Misaligned { addr: 0x1001 })
        ));
    }

    #[test]
    fn region_is_page_backed_and_writable() {
        let mut region = ExecRegion::new(1024).expect("rwx mapping");
        assert_eq!(region.len(), 1024);
        check_alignment(region.as_ptr()).unwrap();
        region.as_mut_slice().fill(0xC3);
        assert!(region.as_slice().iter().all(|&b| b == 0xC3));
    }

    #[test]
    fn region_set_is_uniform() {
        let set = RegionSet::allocate(4, 1024).unwrap();
        assert_eq!(set.len(), 4);
        for i in 0..4 {
            assert_eq!(set.get(i).len(), 1024);
            assert_eq!(set.get(i).as_ptr() as usize % CACHE_LINE, 0);
        }
        assert_ne!(set.get(0).as_ptr(), set.get(1).as_ptr());
    }

    #[test]
    fn alias_views_share_pages() {
        let mut pair = AliasPair::new(1024).expect("alias mapping");
        assert_ne!(pair.write_ptr() as *const u8, pair.exec_ptr());
        pair.write_view()[..4].copy_from_slice(&[1, 2, 3, 4]);
        pair.write_view()[1023] = 0xAB;
        assert_eq!(&pair.exec_view()[..4], &[1, 2, 3, 4]);
        assert_eq!(pair.exec_view()[1023], 0xAB);
    }
}
