//! Structured error types for perftrace
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::{CpuId, SourceState};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Permission denied accessing {event}: {reason}")]
    PermissionDenied { event: String, reason: String },

    #[error("Tracepoint {0} not found")]
    EventNotFound(String),

    #[error("Format of {event} unavailable: {reason}")]
    FormatUnavailable { event: String, reason: String },

    #[error("Failed to map ring buffer of {event} on {cpu}: {reason}")]
    MappingFailed {
        event: String,
        cpu: CpuId,
        reason: String,
    },

    #[error("{operation} is not allowed while the event source is {state}")]
    InvalidState {
        operation: &'static str,
        state: SourceState,
    },

    #[error("Corrupt record at ring offset {offset}: {reason}")]
    RecordCorrupt { offset: u64, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TraceError {
    /// Whether the error only affects one source and collection can go on
    /// with the others
    #[must_use]
    pub fn is_source_local(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied { .. }
                | Self::EventNotFound(_)
                | Self::MappingFailed { .. }
                | Self::Io(_)
        )
    }
}
