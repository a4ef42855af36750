//! View over the kernel-owned control page
//!
//! The first page of a perf mapping is a `struct perf_event_mmap_page`. The
//! kernel advances `data_head` after writing records; the consumer advances
//! `data_tail` after reading them. `data_head` is loaded with acquire
//! ordering so record bytes written before it are visible, and `data_tail`
//! is stored with release ordering so the kernel never reuses bytes that are
//! still being copied out.

#![allow(unsafe_code)] // raw access to shared kernel memory

use std::ptr::{addr_of, addr_of_mut, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};

use perf_event_open_sys::bindings::perf_event_mmap_page;

#[derive(Debug)]
pub struct ControlPage {
    page: NonNull<perf_event_mmap_page>,
}

impl ControlPage {
    /// # Safety
    /// `base` must point to a live, page-aligned mapping of at least one page
    /// that outlives the returned value.
    pub(crate) unsafe fn from_base(base: NonNull<u8>) -> Self {
        Self { page: base.cast() }
    }

    fn head_cell(&self) -> &AtomicU64 {
        // SAFETY: data_head is an aligned u64 inside the live control page;
        // the kernel only ever accesses it atomically
        unsafe { AtomicU64::from_ptr(addr_of_mut!((*self.page.as_ptr()).data_head)) }
    }

    fn tail_cell(&self) -> &AtomicU64 {
        // SAFETY: as for `head_cell`
        unsafe { AtomicU64::from_ptr(addr_of_mut!((*self.page.as_ptr()).data_tail)) }
    }

    /// Kernel write cursor (monotonic, not wrapped)
    #[must_use]
    pub fn head(&self) -> u64 {
        self.head_cell().load(Ordering::Acquire)
    }

    /// Consumer read cursor as last published
    #[must_use]
    pub fn tail(&self) -> u64 {
        self.tail_cell().load(Ordering::Relaxed)
    }

    /// Publish the consumer read cursor
    pub fn set_tail(&self, tail: u64) {
        self.tail_cell().store(tail, Ordering::Release);
    }

    /// ABI version of the control page layout
    #[must_use]
    pub fn version(&self) -> u32 {
        // SAFETY: plain read of a field the kernel sets once at mmap time
        unsafe { addr_of!((*self.page.as_ptr()).version).read_volatile() }
    }

    /// Lowest ABI version this page is compatible with
    #[must_use]
    pub fn compat_version(&self) -> u32 {
        // SAFETY: as for `version`
        unsafe { addr_of!((*self.page.as_ptr()).compat_version).read_volatile() }
    }

    /// Offset of the data region from the start of the mapping (0 on kernels
    /// older than 4.1, which always start it one page in)
    #[must_use]
    pub fn data_offset(&self) -> u64 {
        // SAFETY: as for `version`
        unsafe { addr_of!((*self.page.as_ptr()).data_offset).read_volatile() }
    }

    /// Size of the data region (0 on kernels older than 4.1)
    #[must_use]
    pub fn data_size(&self) -> u64 {
        // SAFETY: as for `version`
        unsafe { addr_of!((*self.page.as_ptr()).data_size).read_volatile() }
    }

    /// Producer side of the cursor protocol, for tests that stand in for the
    /// kernel
    #[cfg(test)]
    pub(crate) fn publish_head(&self, head: u64) {
        self.head_cell().store(head, Ordering::Release);
    }
}
