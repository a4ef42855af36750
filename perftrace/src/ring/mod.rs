//! # Ring Buffer Consumer
//!
//! Drains the shared memory ring a `perf_event_open(2)` file descriptor
//! exposes through `mmap(2)`.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────┬─────────────────────────────────────────────┐
//! │ control page │ data region (2^n pages, circular)           │
//! │ data_head ◀──┼── kernel writes records, advances head      │
//! │ data_tail ───┼─▶ consumer reads records, advances tail     │
//! └──────────────┴─────────────────────────────────────────────┘
//! ```
//!
//! The ring is single-producer/single-consumer and lock-free: correctness
//! rests on an acquire load of `data_head` and a release store of
//! `data_tail` (see [`control`]). Records that cross the physical end of the
//! region are reassembled with at most two copies (see [`region::segments`]).

pub mod consumer;
pub mod control;
pub mod mapping;
pub mod region;

use serde::Serialize;

pub use consumer::RingBuffer;
pub use control::ControlPage;
pub use mapping::{page_size, Mapping};
pub use region::{segments, DataRegion};

/// Outcome of one drain pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessStats {
    /// Records delivered
    pub records: u64,
    /// Bytes consumed by delivered records, headers included
    pub bytes: u64,
    /// Corruption events (each one abandoned the rest of its pass)
    pub corrupt: u64,
}
