//! # Collector
//!
//! Runs one [`EventSource`] per (tracepoint, CPU) pair, each on its own
//! thread, and funnels their records into a single channel.
//!
//! ```text
//!  CPU 0 ── EventSource ── poll ─ process ─▶ ChannelHandler ─┐
//!  CPU 1 ── EventSource ── poll ─ process ─▶ ChannelHandler ─┼─▶ Receiver<OwnedRecord>
//!  CPU n ── EventSource ── poll ─ process ─▶ ChannelHandler ─┘
//! ```
//!
//! Sources that fail to open with a per-source error are reported and
//! skipped; collection goes on with the rest.

pub mod cpu_utils;
pub mod display;
mod pump;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use crossbeam_channel::{bounded, Receiver};
use log::{info, warn};
use serde::Serialize;

pub use cpu_utils::{online_cpus, parse_cpu_list};
pub use display::{display_statistics, format_record};
pub use pump::SourceReport;

use crate::domain::{CpuId, TraceError};
use crate::format::FormatDictionary;
use crate::handler::{ChannelHandler, OwnedRecord};
use crate::source::{EventSource, SourceConfig, SourceStats};

/// Records buffered between the pumps and the aggregator
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// A tracepoint named as `subsystem:event`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventSpec {
    pub subsystem: String,
    pub event: String,
}

impl FromStr for EventSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((subsystem, event))
                if !subsystem.is_empty() && !event.is_empty() && !event.contains(':') =>
            {
                Ok(Self {
                    subsystem: subsystem.to_string(),
                    event: event.to_string(),
                })
            }
            _ => Err(format!("expected SUBSYSTEM:EVENT, got \"{s}\"")),
        }
    }
}

impl fmt::Display for EventSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subsystem, self.event)
    }
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub events: Vec<EventSpec>,
    pub cpus: Vec<CpuId>,
    /// Template for every source; its CPU is overridden per source
    pub source: SourceConfig,
    /// Upper bound on how long a pump waits before checking for shutdown
    pub poll_timeout: Duration,
    pub channel_capacity: usize,
}

impl CollectorConfig {
    #[must_use]
    pub fn new(events: Vec<EventSpec>, cpus: Vec<CpuId>) -> Self {
        Self {
            events,
            cpus,
            source: SourceConfig::default(),
            poll_timeout: Duration::from_millis(100),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// A source that could not be opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedSource {
    pub event: String,
    pub cpu: CpuId,
    pub reason: String,
}

/// Outcome of a collection run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectorStats {
    pub sources: Vec<SourceReport>,
    pub failed: Vec<FailedSource>,
}

impl CollectorStats {
    /// Sum of every source's lifetime totals
    #[must_use]
    pub fn totals(&self) -> SourceStats {
        self.sources.iter().fold(SourceStats::default(), |mut acc, source| {
            acc.records += source.stats.records;
            acc.bytes += source.stats.bytes;
            acc.corrupt += source.stats.corrupt;
            acc.lost += source.stats.lost;
            acc
        })
    }

    /// Records dropped because the aggregator fell behind
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.sources.iter().map(|s| s.dropped).sum()
    }
}

/// Running set of per-CPU pumps
pub struct Collector {
    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<SourceReport>>,
    records: Receiver<OwnedRecord>,
    failed: Vec<FailedSource>,
}

impl Collector {
    /// Open, enable and start pumping every (event, CPU) pair
    ///
    /// # Errors
    /// Fails on errors that are not specific to one source, or when no
    /// source could be opened at all (the first failure is returned).
    pub fn start(dictionary: &Arc<FormatDictionary>, config: &CollectorConfig) -> Result<Self> {
        if config.events.is_empty() || config.cpus.is_empty() {
            bail!("Nothing to trace: at least one event and one CPU are required");
        }

        let (tx, records) = bounded(config.channel_capacity);
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::new();
        let mut failed = Vec::new();
        let mut first_error: Option<TraceError> = None;

        for spec in &config.events {
            for &cpu in &config.cpus {
                let source_config = config.source.with_cpu(cpu);
                let handler = ChannelHandler::new(cpu, tx.clone());

                let opened = EventSource::open_tracepoint(
                    Arc::clone(dictionary),
                    &spec.subsystem,
                    &spec.event,
                    source_config,
                    handler,
                )
                .and_then(|mut source| source.start().map(|()| source));

                let source = match opened {
                    Ok(source) => source,
                    Err(err) if err.is_source_local() => {
                        warn!("Skipping {spec} on {cpu}: {err}");
                        failed.push(FailedSource {
                            event: spec.to_string(),
                            cpu,
                            reason: err.to_string(),
                        });
                        first_error.get_or_insert(err);
                        continue;
                    }
                    Err(err) => {
                        let reason = format!("Failed to open {spec} on {cpu}");
                        halt(&shutdown, workers);
                        return Err(err).context(reason);
                    }
                };

                match pump::spawn(source, Arc::clone(&shutdown), config.poll_timeout) {
                    Ok(worker) => workers.push(worker),
                    Err(err) => {
                        let reason = format!("Failed to spawn pump for {spec} on {cpu}");
                        halt(&shutdown, workers);
                        return Err(err).context(reason);
                    }
                }
            }
        }

        if workers.is_empty() {
            if let Some(err) = first_error {
                return Err(err).context("No event source could be opened");
            }
            bail!("No event source could be opened");
        }

        info!(
            "Collecting from {} sources ({} skipped)",
            workers.len(),
            failed.len()
        );
        Ok(Self {
            shutdown,
            workers,
            records,
            failed,
        })
    }

    /// Records funnelled from every source
    #[must_use]
    pub fn records(&self) -> &Receiver<OwnedRecord> {
        &self.records
    }

    /// Number of sources being pumped
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn failed(&self) -> &[FailedSource] {
        &self.failed
    }

    /// Stop every pump and collect their reports
    ///
    /// Records still queued in the channel stay readable through the
    /// returned receiver.
    #[must_use]
    pub fn shutdown(self) -> (CollectorStats, Receiver<OwnedRecord>) {
        let mut sources = halt(&self.shutdown, self.workers);
        sources.sort_by(|a, b| (&a.event, a.cpu).cmp(&(&b.event, b.cpu)));

        let stats = CollectorStats {
            sources,
            failed: self.failed,
        };
        (stats, self.records)
    }
}

/// Raise `shutdown` and join every pump started so far
fn halt(shutdown: &AtomicBool, workers: Vec<JoinHandle<SourceReport>>) -> Vec<SourceReport> {
    shutdown.store(true, Ordering::Relaxed);

    let mut reports = Vec::with_capacity(workers.len());
    for worker in workers {
        match worker.join() {
            Ok(report) => reports.push(report),
            Err(_) => warn!("A pump thread panicked; its statistics are lost"),
        }
    }
    reports
}

impl fmt::Debug for Collector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector")
            .field("sources", &self.workers.len())
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}
