//! # perftrace - Kernel Tracepoint Sampling Engine
//!
//! perftrace opens kernel tracepoints through `perf_event_open(2)`, maps the
//! ring buffer the kernel shares for each of them, and turns the binary
//! records it finds there into typed values delivered to consumer code.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Linux Kernel                            │
//! │   tracefs: events/<subsystem>/<event>/{id,format}               │
//! │   perf: one ring buffer per (tracepoint, CPU)                   │
//! └──────────────┬───────────────────────────────┬──────────────────┘
//!                │ id + field layout             │ mmap'd records
//!                ▼                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     perftrace (This Crate)                      │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │    Format    │──▶│    Event     │──▶│     Ring     │         │
//! │  │  Dictionary  │   │    Source    │   │   Consumer   │         │
//! │  └──────────────┘   └──────────────┘   └──────┬───────┘         │
//! │         │                                     │ (header, bytes) │
//! │         │ layouts   ┌──────────────┐          ▼                 │
//! │         └──────────▶│    Record    │◀─────────┘                 │
//! │                     │   Decoder    │                            │
//! │                     └──────┬───────┘                            │
//! │                            ▼                                    │
//! │                     ┌──────────────┐   ┌──────────────┐         │
//! │                     │   Handler    │──▶│  Collector   │         │
//! │                     │  (dispatch)  │   │  (per-CPU)   │         │
//! │                     └──────────────┘   └──────────────┘         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! ### Engine
//!
//! - [`format`]: tracefs discovery and `format` file parsing into
//!   [`format::RecordLayout`]s, cached for the process lifetime
//! - [`source`]: [`source::EventSource`] lifecycle (open, start, stop,
//!   clear, process, close) and the raw syscalls behind it
//! - [`ring`]: lock-free consumer side of the perf ring buffer, including
//!   reassembly of records that wrap around its end
//! - [`decode`]: sample bodies and tracepoint fields
//! - [`handler`]: the [`handler::Handler`] trait records are dispatched to
//!
//! ### Around the engine
//!
//! - [`collector`]: one polling thread per source, funnelling records into a
//!   single channel
//! - [`preflight`]: privilege and tracefs checks with actionable messages
//! - [`cli`]: command-line argument parsing
//! - [`domain`]: newtypes (`CpuId`, `EventId`, `Timestamp`) and
//!   [`domain::TraceError`]
//!
//! ## Typical Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use perftrace::decode::Record;
//! use perftrace::format::FormatDictionary;
//! use perftrace::source::{EventSource, SourceConfig};
//! use perftrace_common::RecordHeader;
//!
//! fn count(_: &RecordHeader, record: &Record<'_>, total: &mut u64) {
//!     if matches!(record, Record::Tracepoint(_)) {
//!         *total += 1;
//!     }
//! }
//!
//! # fn main() -> Result<(), perftrace::domain::TraceError> {
//! let dictionary = Arc::new(FormatDictionary::from_system()?);
//! let mut idle_entries = 0u64;
//!
//! let config = SourceConfig::default();
//! let mut source =
//!     EventSource::open_tracepoint(dictionary, "power", "cpu_idle", config, count)?;
//! source.start()?;
//! source.process(&mut idle_entries)?;
//! source.close();
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod collector;
pub mod decode;
pub mod domain;
pub mod format;
pub mod handler;
pub mod preflight;
pub mod ring;
pub mod source;
