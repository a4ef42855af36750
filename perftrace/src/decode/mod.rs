//! Record decoding
//!
//! Turns the `(header, payload)` pairs handed out by the ring consumer into
//! typed [`Record`]s:
//!
//! ```text
//!   header.kind
//!     ├─ PERF_RECORD_SAMPLE ──► sample body (by sample_type)
//!     │                           └─ RAW ──► common_type ──► RecordLayout ──► fields
//!     ├─ PERF_RECORD_LOST / LOST_SAMPLES ──► Lost
//!     └─ anything else ──► Raw
//! ```
//!
//! Decoding never fails: whatever cannot be interpreted is passed through as
//! bytes so the handler still sees every record.

pub mod fields;
pub mod sample;

use std::sync::Arc;

use log::debug;
use perftrace_common::{
    RecordHeader, TraceEntry, PERF_RECORD_LOST, PERF_RECORD_LOST_SAMPLES, PERF_RECORD_SAMPLE,
};
use serde::Serialize;

pub use fields::{decode_field, decode_fields, DecodedRecord, FieldValue, OwnedFieldValue};
pub use sample::{parse_sample, SampleInfo};

use crate::domain::EventId;
use crate::format::{FormatDictionary, RecordLayout};
use sample::Reader;

/// One record, borrowing from the consumer's scratch buffer
#[derive(Debug, Clone)]
pub enum Record<'a> {
    Tracepoint(TracepointSample<'a>),
    Lost(LostRecord),
    /// Record the decoder does not interpret; the payload after the header
    Raw(&'a [u8]),
}

/// A tracepoint sample
#[derive(Debug, Clone)]
pub struct TracepointSample<'a> {
    pub info: SampleInfo,
    /// RAW payload, starting with the common tracepoint fields
    pub raw: &'a [u8],
    /// `None` when no layout is known for the payload's `common_type`
    pub decoded: Option<DecodedRecord<'a>>,
}

impl TracepointSample<'_> {
    /// Common fields at the start of the RAW payload
    #[must_use]
    pub fn entry(&self) -> Option<TraceEntry> {
        TraceEntry::from_raw(self.raw)
    }
}

/// Kernel notice that records were dropped because the buffer was full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LostRecord {
    /// Sample id of the affected event, absent for `PERF_RECORD_LOST_SAMPLES`
    pub id: Option<u64>,
    pub lost: u64,
}

/// Per-source decoder
///
/// Holds the layout of the source's own event so the common case skips the
/// dictionary lock; other `common_type`s are looked up in the dictionary.
#[derive(Debug, Clone)]
pub struct RecordDecoder {
    dictionary: Arc<FormatDictionary>,
    sample_type: u64,
    layout: Option<Arc<RecordLayout>>,
}

impl RecordDecoder {
    #[must_use]
    pub fn new(
        dictionary: Arc<FormatDictionary>,
        sample_type: u64,
        layout: Option<Arc<RecordLayout>>,
    ) -> Self {
        Self {
            dictionary,
            sample_type,
            layout,
        }
    }

    #[must_use]
    pub fn decode<'a>(&self, header: &RecordHeader, payload: &'a [u8]) -> Record<'a> {
        match header.kind {
            PERF_RECORD_SAMPLE => self.decode_sample(payload),
            PERF_RECORD_LOST => decode_lost(payload, true),
            PERF_RECORD_LOST_SAMPLES => decode_lost(payload, false),
            _ => Record::Raw(payload),
        }
    }

    fn decode_sample<'a>(&self, payload: &'a [u8]) -> Record<'a> {
        let Some((info, raw)) = parse_sample(self.sample_type, payload) else {
            debug!(
                "sample of {} bytes does not match sample_type {:#x}; passing through",
                payload.len(),
                self.sample_type
            );
            return Record::Raw(payload);
        };
        let raw = raw.unwrap_or_default();

        let decoded = TraceEntry::from_raw(raw)
            .and_then(|entry| self.layout_for_common_type(entry.common_type))
            .map(|layout| decode_fields(layout, raw));

        Record::Tracepoint(TracepointSample { info, raw, decoded })
    }

    fn layout_for_common_type(&self, common_type: u16) -> Option<Arc<RecordLayout>> {
        if let Some(layout) = &self.layout {
            if layout.identity.id.matches_common_type(common_type) {
                return Some(Arc::clone(layout));
            }
        }
        let id = EventId(u32::from(common_type));
        self.dictionary.layout_by_id(id)
    }
}

fn decode_lost(payload: &[u8], with_id: bool) -> Record<'_> {
    let mut reader = Reader::new(payload);
    let lost = if with_id {
        reader
            .u64()
            .zip(reader.u64())
            .map(|(id, lost)| LostRecord { id: Some(id), lost })
    } else {
        reader.u64().map(|lost| LostRecord { id: None, lost })
    };
    lost.map_or(Record::Raw(payload), Record::Lost)
}
