//! `PERF_RECORD_SAMPLE` body parsing
//!
//! The body of a sample is the concatenation of the items selected by the
//! event's `sample_type`, in a fixed kernel-defined order.

use perftrace_common::{
    PERF_SAMPLE_ADDR, PERF_SAMPLE_CPU, PERF_SAMPLE_ID, PERF_SAMPLE_IDENTIFIER, PERF_SAMPLE_IP,
    PERF_SAMPLE_PERIOD, PERF_SAMPLE_RAW, PERF_SAMPLE_STREAM_ID, PERF_SAMPLE_TID, PERF_SAMPLE_TIME,
    SUPPORTED_SAMPLE_TYPE,
};
use serde::Serialize;

use crate::domain::{CpuId, Timestamp};

/// Fixed-size items of a sample; `None` when not selected by `sample_type`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SampleInfo {
    pub identifier: Option<u64>,
    pub ip: Option<u64>,
    pub pid: Option<u32>,
    pub tid: Option<u32>,
    pub time: Option<Timestamp>,
    pub addr: Option<u64>,
    pub id: Option<u64>,
    pub stream_id: Option<u64>,
    pub cpu: Option<CpuId>,
    pub period: Option<u64>,
}

/// Whether samples of this format can be decoded
#[must_use]
pub fn is_supported(sample_type: u64) -> bool {
    sample_type & !SUPPORTED_SAMPLE_TYPE == 0
}

/// Parse a sample body
///
/// Returns the fixed items and the RAW payload (when `PERF_SAMPLE_RAW` is
/// set), or `None` if the body is shorter than `sample_type` requires or the
/// format carries items this parser does not know how to skip.
#[must_use]
pub fn parse_sample(sample_type: u64, body: &[u8]) -> Option<(SampleInfo, Option<&[u8]>)> {
    if !is_supported(sample_type) {
        return None;
    }

    let mut reader = Reader::new(body);
    let mut info = SampleInfo::default();
    let has = |flag: u64| sample_type & flag != 0;

    if has(PERF_SAMPLE_IDENTIFIER) {
        info.identifier = Some(reader.u64()?);
    }
    if has(PERF_SAMPLE_IP) {
        info.ip = Some(reader.u64()?);
    }
    if has(PERF_SAMPLE_TID) {
        info.pid = Some(reader.u32()?);
        info.tid = Some(reader.u32()?);
    }
    if has(PERF_SAMPLE_TIME) {
        info.time = Some(Timestamp(reader.u64()?));
    }
    if has(PERF_SAMPLE_ADDR) {
        info.addr = Some(reader.u64()?);
    }
    if has(PERF_SAMPLE_ID) {
        info.id = Some(reader.u64()?);
    }
    if has(PERF_SAMPLE_STREAM_ID) {
        info.stream_id = Some(reader.u64()?);
    }
    if has(PERF_SAMPLE_CPU) {
        info.cpu = Some(CpuId(reader.u32()?));
        let _reserved = reader.u32()?;
    }
    if has(PERF_SAMPLE_PERIOD) {
        info.period = Some(reader.u64()?);
    }

    let raw = if has(PERF_SAMPLE_RAW) {
        let size = reader.u32()? as usize;
        Some(reader.take(size)?)
    } else {
        None
    };

    Some((info, raw))
}

/// Bounds-checked native-endian reader
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.bytes.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    pub(crate) fn u32(&mut self) -> Option<u32> {
        self.take(4)
            .and_then(|b| b.try_into().ok())
            .map(u32::from_ne_bytes)
    }

    pub(crate) fn u64(&mut self) -> Option<u64> {
        self.take(8)
            .and_then(|b| b.try_into().ok())
            .map(u64::from_ne_bytes)
    }
}
