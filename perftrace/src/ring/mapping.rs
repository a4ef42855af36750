//! Ownership of `mmap(2)` regions
//!
//! A [`Mapping`] unmaps itself on drop. Perf ring buffers are mapped shared
//! and writable (the consumer owns `data_tail`); anonymous mappings give the
//! same page-aligned layout without a kernel producer.

#![allow(unsafe_code)] // mmap/munmap/sysconf are FFI

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::ptr::NonNull;

/// Size of one memory page
#[must_use]
pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size)
        .ok()
        .filter(|&s| s > 0)
        .unwrap_or(4096)
}

/// An owned, page-aligned memory mapping
#[derive(Debug)]
pub struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is plain memory owned by this value; all shared-state
// access goes through atomics in `ControlPage`
unsafe impl Send for Mapping {}

impl Mapping {
    /// Map `len` bytes of a perf event file descriptor, shared and writable
    ///
    /// # Errors
    /// Returns the `mmap` errno (e.g. `EINVAL` for a bad size, `EPERM` when
    /// the locked-memory limit is exhausted)
    pub fn shared(fd: BorrowedFd<'_>, len: usize) -> io::Result<Self> {
        Self::map(len, libc::MAP_SHARED, fd.as_raw_fd())
    }

    /// Map `len` zeroed bytes of anonymous memory
    ///
    /// # Errors
    /// Returns the `mmap` errno
    pub fn anonymous(len: usize) -> io::Result<Self> {
        Self::map(len, libc::MAP_PRIVATE | libc::MAP_ANONYMOUS, -1)
    }

    fn map(len: usize, flags: libc::c_int, fd: libc::c_int) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "zero-length mapping",
            ));
        }

        // SAFETY: a fresh mapping chosen by the kernel, no existing memory is
        // affected; the result is checked against MAP_FAILED
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap returned NULL"))?;
        Ok(Self { ptr, len })
    }

    /// Start of the mapping
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe a mapping created by `map` and not yet
        // unmapped; nothing borrows it past this point
        let ret = unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) };
        if ret != 0 {
            log::warn!("munmap failed: {}", io::Error::last_os_error());
        }
    }
}
