//! Single-consumer drain loop over a perf ring buffer

#![allow(unsafe_code)] // placement of the control page and data region

use std::io;
use std::ptr::NonNull;

use log::warn;
use perftrace_common::{RecordHeader, HEADER_SIZE};

use super::control::ControlPage;
use super::mapping::Mapping;
use super::region::DataRegion;
use super::ProcessStats;
use crate::domain::TraceError;

/// Consumer half of a kernel ring buffer
///
/// Owns the mapping, a local read cursor mirrored into the control page, and
/// a scratch buffer that every record is reassembled into before delivery.
#[derive(Debug)]
pub struct RingBuffer {
    control: ControlPage,
    data: DataRegion,
    tail: u64,
    scratch: Vec<u8>,
    // Dropped last: `control` and `data` point into it
    _mapping: Mapping,
}

// SAFETY: the raw pointers only reference `_mapping`, which moves with the
// value; one thread drives a ring buffer at a time
unsafe impl Send for RingBuffer {}

impl RingBuffer {
    /// Wrap a mapping laid out as one control page followed by a
    /// power-of-two data region
    ///
    /// # Errors
    /// Returns `InvalidInput` if the mapping is too small or the data region
    /// is not a power of two.
    pub fn new(mapping: Mapping, page_size: usize) -> io::Result<Self> {
        let invalid = |msg: String| io::Error::new(io::ErrorKind::InvalidInput, msg);

        if mapping.len() < 2 * page_size {
            return Err(invalid(format!(
                "mapping of {} bytes cannot hold a control page and a data page",
                mapping.len()
            )));
        }

        let base = NonNull::new(mapping.as_ptr())
            .ok_or_else(|| invalid("null mapping".to_string()))?;
        // SAFETY: the mapping is at least two pages and is kept alive in
        // `_mapping` for as long as `control` exists
        let control = unsafe { ControlPage::from_base(base) };

        let (offset, size) = data_bounds(&control, mapping.len(), page_size);
        if !size.is_power_of_two() {
            let msg = format!("data region of {size} bytes is not a power of two");
            return Err(invalid(msg));
        }

        // SAFETY: `data_bounds` keeps offset + size within the mapping
        let data = unsafe {
            let start = NonNull::new_unchecked(base.as_ptr().add(offset));
            DataRegion::new(start, size)
        };
        let tail = control.tail();

        Ok(Self {
            control,
            data,
            tail,
            scratch: Vec::with_capacity(256),
            _mapping: mapping,
        })
    }

    /// Drain every complete record currently published by the producer
    ///
    /// `deliver` is called once per record, in ring order, with the header
    /// and the reassembled payload (header bytes excluded). An implausible
    /// record or an overrun abandons the pass, moves the cursor to the
    /// producer's head and is counted in [`ProcessStats::corrupt`].
    pub fn process<F>(&mut self, mut deliver: F) -> ProcessStats
    where
        F: FnMut(RecordHeader, &[u8]),
    {
        let mut stats = ProcessStats::default();
        let head = self.control.head();

        let backlog = head.wrapping_sub(self.tail);
        if backlog == 0 {
            return stats;
        }
        if backlog > self.data.size() as u64 {
            let reason = format!("backlog of {backlog} bytes overran the buffer");
            self.resync(head, &mut stats, reason);
            return stats;
        }

        while self.tail != head {
            let available = head.wrapping_sub(self.tail);
            if available < HEADER_SIZE as u64 {
                let reason = format!("{available} trailing bytes cannot hold a header");
                self.resync(head, &mut stats, reason);
                break;
            }

            let mut raw_header = [0u8; HEADER_SIZE];
            self.data.copy_out(self.tail, &mut raw_header);
            let header = RecordHeader::from_bytes(raw_header);

            let size = usize::from(header.size);
            if size < HEADER_SIZE || size as u64 > available || size > self.data.size() {
                let reason = format!(
                    "record type {} declares {size} bytes with {available} available",
                    header.kind
                );
                self.resync(head, &mut stats, reason);
                break;
            }

            self.scratch.resize(size, 0);
            self.data.copy_out(self.tail, &mut self.scratch);
            deliver(header, &self.scratch[HEADER_SIZE..]);

            self.tail = self.tail.wrapping_add(size as u64);
            self.control.set_tail(self.tail);
            stats.records += 1;
            stats.bytes += size as u64;
        }

        stats
    }

    /// Discard the unconsumed backlog
    pub fn clear(&mut self) {
        self.tail = self.control.head();
        self.control.set_tail(self.tail);
    }

    /// Local read cursor
    #[must_use]
    pub fn tail(&self) -> u64 {
        self.tail
    }

    /// Producer write cursor
    #[must_use]
    pub fn head(&self) -> u64 {
        self.control.head()
    }

    /// Bytes published but not yet consumed
    #[must_use]
    pub fn backlog(&self) -> u64 {
        self.control.head().wrapping_sub(self.tail)
    }

    /// Capacity of the data region
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.size()
    }

    #[must_use]
    pub fn control(&self) -> &ControlPage {
        &self.control
    }

    fn resync(&mut self, head: u64, stats: &mut ProcessStats, reason: String) {
        let err = TraceError::RecordCorrupt {
            offset: self.tail,
            reason,
        };
        warn!("{err}; resynchronizing to head");
        self.tail = head;
        self.control.set_tail(head);
        stats.corrupt += 1;
    }

    /// Stand-in for the kernel: append `bytes` at the head and publish it
    #[cfg(test)]
    pub(crate) fn produce(&self, bytes: &[u8]) {
        let head = self.control.head();
        self.data.copy_in(head, bytes);
        self.control.publish_head(head + bytes.len() as u64);
    }

    /// Move the producer head without writing, to fake an overrun
    #[cfg(test)]
    pub(crate) fn advance_head(&self, by: u64) {
        self.control.publish_head(self.control.head() + by);
    }
}

/// Data region placement: published by the kernel since 4.1, otherwise one
/// page in up to the end of the mapping
fn data_bounds(control: &ControlPage, mapping_len: usize, page_size: usize) -> (usize, usize) {
    let published = usize::try_from(control.data_offset())
        .ok()
        .zip(usize::try_from(control.data_size()).ok())
        .filter(|&(offset, size)| {
            offset >= page_size && size > 0 && offset + size <= mapping_len
        });

    published.unwrap_or((page_size, mapping_len - page_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::mapping::page_size;
    use perftrace_common::{PERF_RECORD_LOST, PERF_RECORD_SAMPLE};

    fn ring(data_pages: usize) -> RingBuffer {
        let page = page_size();
        let mapping = Mapping::anonymous((1 + data_pages) * page).unwrap();
        RingBuffer::new(mapping, page).unwrap()
    }

    /// A record of `total` bytes whose payload bytes all equal `fill`
    fn record(kind: u32, total: usize, fill: u8) -> Vec<u8> {
        let header = RecordHeader {
            kind,
            misc: 0,
            size: u16::try_from(total).unwrap(),
        };
        let mut bytes = header.to_bytes().to_vec();
        bytes.resize(total, fill);
        bytes
    }

    fn drain(ring: &mut RingBuffer) -> (Vec<(RecordHeader, Vec<u8>)>, ProcessStats) {
        let mut seen = Vec::new();
        let stats = ring.process(|header, payload| seen.push((header, payload.to_vec())));
        (seen, stats)
    }

    #[test]
    fn test_empty_ring_delivers_nothing() {
        let mut ring = ring(1);
        let (seen, stats) = drain(&mut ring);
        assert!(seen.is_empty());
        assert_eq!(stats, ProcessStats::default());
    }

    #[test]
    fn test_two_records_in_four_pages() {
        let mut ring = ring(4);
        ring.produce(&record(PERF_RECORD_SAMPLE, 64, 0xAA));
        ring.produce(&record(PERF_RECORD_SAMPLE, 128, 0xBB));

        let before = ring.control().tail();
        let (seen, stats) = drain(&mut ring);

        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].1.len(), 56);
        assert_eq!(seen[1].1.len(), 120);
        assert!(seen[0].1.iter().all(|&b| b == 0xAA));
        assert!(seen[1].1.iter().all(|&b| b == 0xBB));
        assert_eq!(ring.control().tail() - before, 192);
        assert_eq!(stats.records, 2);
        assert_eq!(stats.bytes, 192);
        assert_eq!(stats.corrupt, 0);
    }

    #[test]
    fn test_order_and_exactly_once_over_many_passes() {
        let mut ring = ring(1);
        let capacity = ring.capacity();
        let mut delivered = Vec::new();
        let mut next = 0u32;

        // Many more bytes than the buffer holds, drained in batches that
        // never exceed capacity; sizes vary so records straddle the end
        for round in 0..200usize {
            let mut written = 0;
            for i in 0..5usize {
                let total = 16 + 8 * ((round + i) % 7);
                if written + total > capacity / 2 {
                    break;
                }
                let mut rec = record(PERF_RECORD_SAMPLE, total, 0);
                rec[8..12].copy_from_slice(&next.to_ne_bytes());
                ring.produce(&rec);
                written += total;
                next += 1;
            }
            ring.process(|_, payload| {
                delivered.push(u32::from_ne_bytes(payload[0..4].try_into().unwrap()));
            });
            assert_eq!(ring.tail(), ring.head());
        }

        let expected: Vec<u32> = (0..next).collect();
        assert_eq!(delivered, expected);
    }

    #[test]
    fn test_wrapped_record_matches_contiguous_one() {
        let payload: Vec<u8> = (0..120u8).collect();
        let header = RecordHeader {
            kind: PERF_RECORD_SAMPLE,
            misc: 3,
            size: 128,
        };
        let mut rec = header.to_bytes().to_vec();
        rec.extend_from_slice(&payload);

        let mut straight = ring(1);
        straight.produce(&rec);
        let (plain, _) = drain(&mut straight);

        let mut wrapped = ring(1);
        // Leave 40 bytes before the physical end so the record splits
        let filler = wrapped.capacity() - 40;
        wrapped.produce(&record(PERF_RECORD_LOST, filler, 0));
        drain(&mut wrapped);
        wrapped.produce(&rec);
        let (split, stats) = drain(&mut wrapped);

        assert_eq!(stats.records, 1);
        assert_eq!(split, plain);
        assert_eq!(split[0].0.misc, 3);
        assert_eq!(split[0].1, payload);
    }

    #[test]
    fn test_header_split_across_end() {
        let mut ring = ring(1);
        let filler = ring.capacity() - 4;
        ring.produce(&record(PERF_RECORD_LOST, filler, 0));
        drain(&mut ring);

        ring.produce(&record(PERF_RECORD_SAMPLE, 24, 0x5A));
        let (seen, stats) = drain(&mut ring);
        assert_eq!(stats.corrupt, 0);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.kind, PERF_RECORD_SAMPLE);
        assert_eq!(seen[0].1, vec![0x5A; 16]);
    }

    #[test]
    fn test_tail_matches_head_after_drain() {
        let mut ring = ring(2);
        for _ in 0..10 {
            ring.produce(&record(PERF_RECORD_SAMPLE, 40, 1));
        }
        drain(&mut ring);
        assert_eq!(ring.tail(), ring.head());
        assert_eq!(ring.control().tail(), ring.head());
        assert_eq!(ring.backlog(), 0);
    }

    #[test]
    fn test_clear_discards_backlog() {
        let mut ring = ring(1);
        ring.produce(&record(PERF_RECORD_SAMPLE, 32, 1));
        ring.produce(&record(PERF_RECORD_SAMPLE, 32, 2));

        ring.clear();
        let (seen, stats) = drain(&mut ring);
        assert!(seen.is_empty());
        assert_eq!(stats, ProcessStats::default());
        assert_eq!(ring.control().tail(), ring.head());
    }

    #[test]
    fn test_zero_size_record_is_corrupt() {
        let mut ring = ring(1);
        ring.produce(&record(PERF_RECORD_SAMPLE, 32, 1));
        let mut bad = record(PERF_RECORD_SAMPLE, 32, 2);
        bad[6..8].copy_from_slice(&0u16.to_ne_bytes());
        ring.produce(&bad);
        ring.produce(&record(PERF_RECORD_SAMPLE, 32, 3));

        let (seen, stats) = drain(&mut ring);
        assert_eq!(stats.corrupt, 1);
        assert_eq!(stats.records, 1);
        assert_eq!(seen.len(), 1);
        assert!(seen[0].1.iter().all(|&b| b == 1));
        assert_eq!(ring.tail(), ring.head());
        assert_eq!(ring.control().tail(), ring.head());
    }

    #[test]
    fn test_oversized_record_is_corrupt() {
        let mut ring = ring(1);
        let mut bad = record(PERF_RECORD_SAMPLE, 32, 0);
        // Claims more bytes than were published
        bad[6..8].copy_from_slice(&4000u16.to_ne_bytes());
        ring.produce(&bad);

        let (seen, stats) = drain(&mut ring);
        assert!(seen.is_empty());
        assert_eq!(stats.corrupt, 1);
        assert_eq!(ring.tail(), ring.head());

        // The next pass starts clean
        ring.produce(&record(PERF_RECORD_SAMPLE, 16, 9));
        let (seen, stats) = drain(&mut ring);
        assert_eq!(seen.len(), 1);
        assert_eq!(stats.corrupt, 0);
    }

    #[test]
    fn test_overrun_is_corrupt() {
        let mut ring = ring(1);
        let capacity = ring.capacity() as u64;
        ring.advance_head(capacity + 64);

        let (seen, stats) = drain(&mut ring);
        assert!(seen.is_empty());
        assert_eq!(stats.corrupt, 1);
        assert_eq!(ring.tail(), capacity + 64);
    }

    #[test]
    fn test_rejects_non_power_of_two_region() {
        let page = page_size();
        let mapping = Mapping::anonymous(4 * page).unwrap();
        assert!(RingBuffer::new(mapping, page).is_err());
    }

    #[test]
    fn test_rejects_single_page() {
        let page = page_size();
        let mapping = Mapping::anonymous(page).unwrap();
        assert!(RingBuffer::new(mapping, page).is_err());
    }
}
