//! Event source configuration

use perftrace_common::DEFAULT_SAMPLE_TYPE;

use crate::domain::{CpuId, TraceError};

/// Ring buffer size used when none is configured (data pages, excluding the
/// control page)
pub const DEFAULT_BUFFER_PAGES: usize = 128;

/// How an [`EventSource`](super::EventSource) opens its kernel event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceConfig {
    pub cpu: CpuId,
    /// Data pages of the ring buffer; must be a power of two
    pub buffer_pages: usize,
    /// `PERF_SAMPLE_*` items requested for every sample
    pub sample_type: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            cpu: CpuId(0),
            buffer_pages: DEFAULT_BUFFER_PAGES,
            sample_type: DEFAULT_SAMPLE_TYPE,
        }
    }
}

impl SourceConfig {
    #[must_use]
    pub fn with_cpu(mut self, cpu: CpuId) -> Self {
        self.cpu = cpu;
        self
    }

    #[must_use]
    pub fn with_buffer_pages(mut self, pages: usize) -> Self {
        self.buffer_pages = pages;
        self
    }

    #[must_use]
    pub fn with_sample_type(mut self, sample_type: u64) -> Self {
        self.sample_type = sample_type;
        self
    }

    /// Total mapping length: one control page plus the data pages
    #[must_use]
    pub fn mapping_len(&self, page_size: usize) -> Option<usize> {
        self.buffer_pages.checked_add(1)?.checked_mul(page_size)
    }

    /// Check the buffer geometry before asking the kernel for it
    ///
    /// # Errors
    /// Returns `MappingFailed` if the page count is zero or not a power of two
    pub fn validate(&self, event: &str) -> Result<(), TraceError> {
        let pages = self.buffer_pages;
        if pages == 0 || !pages.is_power_of_two() {
            return Err(TraceError::MappingFailed {
                event: event.to_string(),
                cpu: self.cpu,
                reason: format!("buffer of {pages} pages is not a power of two"),
            });
        }
        Ok(())
    }
}
