//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers prevent common bugs like passing a CPU number where
//! a tracepoint id is expected, and make function signatures more expressive.

use serde::Serialize;
use std::fmt;

/// CPU ID
///
/// Represents a logical CPU (0, 1, 2, ...). Every event source is bound to
/// exactly one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CpuId(pub u32);

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CPU:{}", self.0)
    }
}

/// Tracepoint ID
///
/// The numeric identifier tracefs assigns to a tracepoint. It is what
/// `perf_event_open(2)` takes as `config` and what the kernel writes into the
/// `common_type` field of every sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EventId(pub u32);

impl EventId {
    /// Whether a payload's `common_type` refers to this tracepoint
    #[must_use]
    pub fn matches_common_type(self, common_type: u16) -> bool {
        self.0 == u32::from(common_type)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID:{}", self.0)
    }
}

/// Timestamp in nanoseconds
///
/// Represents an absolute point in time as reported by the perf clock
/// (`PERF_SAMPLE_TIME`, monotonic since boot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Timestamp(pub u64);

#[allow(clippy::cast_precision_loss)]
impl Timestamp {
    /// Convert to seconds (f64)
    #[must_use]
    pub fn as_seconds(self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    /// Convert to microseconds (u64)
    #[must_use]
    pub fn as_micros(self) -> u64 {
        self.0 / 1_000
    }
}

/// Lifecycle of an event source
///
/// ```text
/// Created ──open──▶ Mapped ──start──▶ Enabled ⇄ Disabled ──close──▶ Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Configured but no kernel handle yet
    Created,
    /// Kernel handle and ring buffer mapped, delivery disabled
    Mapped,
    /// Kernel is writing records
    Enabled,
    /// Delivery paused, mapping still alive
    Disabled,
    /// Unmapped and released
    Closed,
}

impl SourceState {
    /// Whether the source holds a live mapping that can be drained
    #[must_use]
    pub fn is_mapped(self) -> bool {
        matches!(self, Self::Mapped | Self::Enabled | Self::Disabled)
    }
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Mapped => "mapped",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_id_matches_common_type() {
        assert!(EventId(316).matches_common_type(316));
        assert!(!EventId(70_000).matches_common_type(4464));
    }

    #[test]
    fn test_timestamp_conversions() {
        let ts = Timestamp(1_500_000_000);
        assert!((ts.as_seconds() - 1.5).abs() < f64::EPSILON);
        assert_eq!(ts.as_micros(), 1_500_000);
    }

    #[test]
    fn test_mapped_states() {
        assert!(!SourceState::Created.is_mapped());
        assert!(SourceState::Mapped.is_mapped());
        assert!(SourceState::Enabled.is_mapped());
        assert!(SourceState::Disabled.is_mapped());
        assert!(!SourceState::Closed.is_mapped());
    }
}
