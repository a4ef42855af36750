//! Wraparound-aware access to the circular data region
//!
//! Every read goes through [`segments`]: "n bytes at logical offset o" becomes
//! at most two bounded physical ranges, tail-to-end then start-to-remainder.

#![allow(unsafe_code)] // copies out of shared kernel memory

use std::ops::Range;
use std::ptr::NonNull;

/// Physical ranges covering `len` bytes starting at logical `offset` in a
/// circular region of `size` bytes
///
/// `size` must be a power of two and `len` at most `size`. The second range
/// is only present when the span crosses the end of the region.
#[must_use]
pub fn segments(offset: u64, len: usize, size: usize) -> (Range<usize>, Option<Range<usize>>) {
    debug_assert!(size.is_power_of_two());
    debug_assert!(len <= size);

    // Masking keeps the value below `size`, which is a usize
    #[allow(clippy::cast_possible_truncation)]
    let start = (offset & (size as u64 - 1)) as usize;
    let first_len = len.min(size - start);

    let first = start..start + first_len;
    let rest = len - first_len;
    let second = (rest > 0).then_some(0..rest);
    (first, second)
}

/// The circular record area following the control page
#[derive(Debug)]
pub struct DataRegion {
    base: NonNull<u8>,
    size: usize,
}

impl DataRegion {
    /// # Safety
    /// `base..base + size` must be readable for the lifetime of the value and
    /// `size` must be a power of two.
    pub(crate) unsafe fn new(base: NonNull<u8>, size: usize) -> Self {
        Self { base, size }
    }

    /// Length of the region in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Copy `out.len()` bytes starting at logical `cursor` into `out`,
    /// splitting the copy when the span wraps
    pub fn copy_out(&self, cursor: u64, out: &mut [u8]) {
        let (first, second) = segments(cursor, out.len(), self.size);
        let split = first.len();

        // SAFETY: `segments` keeps both ranges inside 0..size, and `out` is a
        // distinct allocation from the mapping
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.base.as_ptr().add(first.start),
                out.as_mut_ptr(),
                split,
            );
            if let Some(second) = second {
                std::ptr::copy_nonoverlapping(
                    self.base.as_ptr().add(second.start),
                    out.as_mut_ptr().add(split),
                    second.len(),
                );
            }
        }
    }

    /// Write `bytes` at logical `cursor`, wrapping like the kernel does
    #[cfg(test)]
    pub(crate) fn copy_in(&self, cursor: u64, bytes: &[u8]) {
        let (first, second) = segments(cursor, bytes.len(), self.size);
        let split = first.len();

        // SAFETY: as for `copy_out`, in the other direction; the test
        // mapping is private and writable
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.base.as_ptr().add(first.start),
                split,
            );
            if let Some(second) = second {
                std::ptr::copy_nonoverlapping(
                    bytes.as_ptr().add(split),
                    self.base.as_ptr().add(second.start),
                    second.len(),
                );
            }
        }
    }
}
