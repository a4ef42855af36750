//! # Record Dispatch
//!
//! Every record an [`EventSource`](crate::source::EventSource) drains is
//! handed, in ring order and exactly once, to its [`Handler`] together with
//! the caller's cookie.
//!
//! ## Handlers
//!
//! - [`NoopHandler`]: discards everything (the default behaviour of the trait)
//! - closures `FnMut(&RecordHeader, &Record, &mut C)`
//! - [`ChannelHandler`]: detaches records into [`OwnedRecord`]s and funnels
//!   them to another thread

use std::collections::BTreeMap;

use crossbeam_channel::{Sender, TrySendError};
use log::warn;
use perftrace_common::RecordHeader;
use serde::Serialize;

use crate::decode::{DecodedRecord, OwnedFieldValue, Record};
use crate::domain::{CpuId, Timestamp};

/// Consumer of decoded records
///
/// `record` borrows the ring buffer's scratch memory and is only valid for
/// the duration of the call. The default implementation ignores the record.
pub trait Handler<C: ?Sized = ()> {
    fn handle(&mut self, header: &RecordHeader, record: &Record<'_>, cookie: &mut C) {
        let _ = (header, record, cookie);
    }
}

/// Handler that drops every record
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl<C: ?Sized> Handler<C> for NoopHandler {}

impl<C, F> Handler<C> for F
where
    C: ?Sized,
    F: FnMut(&RecordHeader, &Record<'_>, &mut C),
{
    fn handle(&mut self, header: &RecordHeader, record: &Record<'_>, cookie: &mut C) {
        self(header, record, cookie);
    }
}

/// A record detached from the ring buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnedRecord {
    /// CPU the record was read on
    pub cpu: CpuId,
    #[serde(flatten)]
    pub body: OwnedBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OwnedBody {
    Tracepoint {
        /// `subsystem:event`, absent when no layout was known
        event: Option<String>,
        common_type: Option<u16>,
        pid: Option<u32>,
        tid: Option<u32>,
        time: Option<Timestamp>,
        fields: BTreeMap<String, OwnedFieldValue>,
    },
    Lost {
        lost: u64,
    },
    Other {
        record_type: u32,
        size: u16,
    },
}

impl OwnedRecord {
    #[must_use]
    pub fn from_record(cpu: CpuId, header: &RecordHeader, record: &Record<'_>) -> Self {
        let body = match record {
            Record::Tracepoint(sample) => {
                let decoded = sample.decoded.as_ref();
                OwnedBody::Tracepoint {
                    event: decoded.map(|d| d.identity().qualified_name()),
                    common_type: sample.entry().map(|e| e.common_type),
                    pid: sample.info.pid,
                    tid: sample.info.tid,
                    time: sample.info.time,
                    fields: decoded.map_or_else(BTreeMap::new, DecodedRecord::to_owned_fields),
                }
            }
            Record::Lost(lost) => OwnedBody::Lost { lost: lost.lost },
            Record::Raw(_) => OwnedBody::Other {
                record_type: header.kind,
                size: header.size,
            },
        };

        let cpu = match record {
            Record::Tracepoint(sample) => sample.info.cpu.unwrap_or(cpu),
            _ => cpu,
        };

        Self { cpu, body }
    }
}

/// Forwards [`OwnedRecord`]s over a crossbeam channel
///
/// Sending never blocks the drain loop: records are dropped and counted
/// while the channel is full. A disconnected receiver is reported once and
/// every later record is discarded.
#[derive(Debug)]
pub struct ChannelHandler {
    cpu: CpuId,
    tx: Sender<OwnedRecord>,
    sent: u64,
    dropped: u64,
    disconnected: bool,
}

impl ChannelHandler {
    #[must_use]
    pub fn new(cpu: CpuId, tx: Sender<OwnedRecord>) -> Self {
        Self {
            cpu,
            tx,
            sent: 0,
            dropped: 0,
            disconnected: false,
        }
    }

    /// Records delivered to the channel
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Records discarded because the channel was full or closed
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl<C: ?Sized> Handler<C> for ChannelHandler {
    fn handle(&mut self, header: &RecordHeader, record: &Record<'_>, _cookie: &mut C) {
        if self.disconnected {
            self.dropped += 1;
            return;
        }

        let owned = OwnedRecord::from_record(self.cpu, header, record);
        match self.tx.try_send(owned) {
            Ok(()) => self.sent += 1,
            Err(TrySendError::Full(_)) => self.dropped += 1,
            Err(TrySendError::Disconnected(_)) => {
                warn!(
                    "{}: record receiver went away, discarding further records",
                    self.cpu
                );
                self.disconnected = true;
                self.dropped += 1;
            }
        }
    }
}
