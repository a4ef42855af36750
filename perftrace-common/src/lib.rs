//! # Shared Kernel ABI (perf ring buffer ↔ Userspace)
//!
//! Defines the record layouts and constants the kernel uses when it writes
//! tracepoint samples into a `perf_event_open(2)` ring buffer. Everything here
//! is `#[repr(C)]` or a plain constant so the same definitions can be used by
//! the consumer and by test producers that forge records in anonymous memory.
//!
//! ## Record Stream
//!
//! The data region of the mapping holds back-to-back records:
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬───────────────────────────┐
//! │ type u32 │ misc u16 │ size u16 │ payload (size - 8 bytes)  │
//! └──────────┴──────────┴──────────┴───────────────────────────┘
//! ```
//!
//! ## Key Types
//!
//! - [`RecordHeader`] - Fixed 8-byte header in front of every record
//! - [`TraceEntry`] - Common fields at the start of every tracepoint payload

#![no_std]

// ============================================================================
// Record Type Constants
// ============================================================================

/// `mmap(2)` of an executable region (not requested by tracepoint sources)
pub const PERF_RECORD_MMAP: u32 = 1;

/// **Overflow**: the kernel dropped records because the buffer was full
///
/// Payload: `{ id: u64, lost: u64 }`
pub const PERF_RECORD_LOST: u32 = 2;

/// Process name change
pub const PERF_RECORD_COMM: u32 = 3;

/// Process exit
pub const PERF_RECORD_EXIT: u32 = 4;

/// Sampling throttled by the kernel
pub const PERF_RECORD_THROTTLE: u32 = 5;

/// Sampling resumed after throttling
pub const PERF_RECORD_UNTHROTTLE: u32 = 6;

/// Process fork
pub const PERF_RECORD_FORK: u32 = 7;

/// Counter read
pub const PERF_RECORD_READ: u32 = 8;

/// **Tracepoint hit**: one sample per event when `sample_period == 1`
///
/// Payload layout is driven by the `sample_type` bits of the event.
pub const PERF_RECORD_SAMPLE: u32 = 9;

/// Lost samples (newer kernels, `PERF_RECORD_LOST_SAMPLES`)
pub const PERF_RECORD_LOST_SAMPLES: u32 = 13;

// ============================================================================
// Sample Format Flags (perf_event_attr.sample_type)
// ============================================================================

pub const PERF_SAMPLE_IP: u64 = 1 << 0;
pub const PERF_SAMPLE_TID: u64 = 1 << 1;
pub const PERF_SAMPLE_TIME: u64 = 1 << 2;
pub const PERF_SAMPLE_ADDR: u64 = 1 << 3;
pub const PERF_SAMPLE_READ: u64 = 1 << 4;
pub const PERF_SAMPLE_CALLCHAIN: u64 = 1 << 5;
pub const PERF_SAMPLE_ID: u64 = 1 << 6;
pub const PERF_SAMPLE_CPU: u64 = 1 << 7;
pub const PERF_SAMPLE_PERIOD: u64 = 1 << 8;
pub const PERF_SAMPLE_STREAM_ID: u64 = 1 << 9;
pub const PERF_SAMPLE_RAW: u64 = 1 << 10;
pub const PERF_SAMPLE_IDENTIFIER: u64 = 1 << 16;

/// Sample format bits whose payload has a fixed, self-describing layout.
///
/// Anything outside this mask (callchains, branch stacks, register dumps...)
/// makes the sample opaque to the decoder.
pub const SUPPORTED_SAMPLE_TYPE: u64 = PERF_SAMPLE_IDENTIFIER
    | PERF_SAMPLE_IP
    | PERF_SAMPLE_TID
    | PERF_SAMPLE_TIME
    | PERF_SAMPLE_ADDR
    | PERF_SAMPLE_ID
    | PERF_SAMPLE_STREAM_ID
    | PERF_SAMPLE_CPU
    | PERF_SAMPLE_PERIOD
    | PERF_SAMPLE_RAW;

/// Default sample format for tracepoint sources
pub const DEFAULT_SAMPLE_TYPE: u64 =
    PERF_SAMPLE_TID | PERF_SAMPLE_TIME | PERF_SAMPLE_CPU | PERF_SAMPLE_RAW;

// ============================================================================
// Shared Data Structures
// ============================================================================

/// Size in bytes of [`RecordHeader`]
pub const HEADER_SIZE: usize = 8;

/// Header written by the kernel in front of every ring buffer record
///
/// **Memory Layout**: matches `struct perf_event_header`
/// **Size**: always 8 bytes, `size` counts the header itself
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    /// Record type (see `PERF_RECORD_*` constants)
    pub kind: u32,

    /// Miscellaneous flags (cpu mode, exact-ip...)
    pub misc: u16,

    /// Total record length in bytes, header included
    pub size: u16,
}

impl RecordHeader {
    /// Decode a header from its native-endian wire bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; HEADER_SIZE]) -> Self {
        Self {
            kind: u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            misc: u16::from_ne_bytes([bytes[4], bytes[5]]),
            size: u16::from_ne_bytes([bytes[6], bytes[7]]),
        }
    }

    /// Encode the header the way the kernel lays it out
    #[must_use]
    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.kind.to_ne_bytes());
        out[4..6].copy_from_slice(&self.misc.to_ne_bytes());
        out[6..8].copy_from_slice(&self.size.to_ne_bytes());
        out
    }

    /// Number of payload bytes following the header
    #[must_use]
    pub fn payload_len(self) -> usize {
        usize::from(self.size).saturating_sub(HEADER_SIZE)
    }
}

/// Size in bytes of [`TraceEntry`]
pub const TRACE_ENTRY_SIZE: usize = 8;

/// Common fields at the start of every tracepoint RAW payload
///
/// **Memory Layout**: matches `struct trace_entry` in the kernel
/// `common_type` carries the numeric event id, which is how a decoder finds
/// the field layout of the rest of the payload.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(clippy::struct_field_names)] // named after `struct trace_entry`
pub struct TraceEntry {
    /// Numeric tracepoint id (`events/<subsystem>/<event>/id`)
    pub common_type: u16,

    /// irqs-off / need-resched / hardirq / softirq flags
    pub common_flags: u8,

    /// Preemption depth when the event fired
    pub common_preempt_count: u8,

    /// Thread that triggered the event
    pub common_pid: i32,
}

impl TraceEntry {
    /// Read the common fields from the head of a RAW payload
    ///
    /// Returns `None` when the payload is shorter than the common header.
    #[must_use]
    pub fn from_raw(raw: &[u8]) -> Option<Self> {
        if raw.len() < TRACE_ENTRY_SIZE {
            return None;
        }
        Some(Self {
            common_type: u16::from_ne_bytes([raw[0], raw[1]]),
            common_flags: raw[2],
            common_preempt_count: raw[3],
            common_pid: i32::from_ne_bytes([raw[4], raw[5], raw[6], raw[7]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_wire_layout() {
        let header = RecordHeader {
            kind: PERF_RECORD_SAMPLE,
            misc: 2,
            size: 64,
        };
        let bytes = header.to_bytes();
        assert_eq!(RecordHeader::from_bytes(bytes), header);
        assert_eq!(header.payload_len(), 56);
        assert_eq!(core::mem::size_of::<RecordHeader>(), HEADER_SIZE);
    }

    #[test]
    fn test_trace_entry_too_short() {
        assert!(TraceEntry::from_raw(&[0u8; 4]).is_none());
    }

    #[test]
    fn test_trace_entry_fields() {
        let mut raw = [0u8; 12];
        raw[0..2].copy_from_slice(&316u16.to_ne_bytes());
        raw[2] = 1;
        raw[3] = 2;
        raw[4..8].copy_from_slice(&4242i32.to_ne_bytes());

        let entry = TraceEntry::from_raw(&raw).unwrap();
        assert_eq!(entry.common_type, 316);
        assert_eq!(entry.common_flags, 1);
        assert_eq!(entry.common_preempt_count, 2);
        assert_eq!(entry.common_pid, 4242);
        assert_eq!(core::mem::size_of::<TraceEntry>(), TRACE_ENTRY_SIZE);
    }
}
