//! # Event Source
//!
//! One kernel tracepoint bound to one CPU, its ring buffer and the handler
//! its records are dispatched to.
//!
//! ```text
//!            open            start
//! Created ─────────▶ Mapped ───────▶ Enabled ◀──┐
//!    │                 │               │ stop   │ start
//!    │                 │               ▼        │
//!    │                 │            Disabled ───┘
//!    └─────────────────┴───────────────┴──── close ──▶ Closed
//! ```
//!
//! A source is driven by a single thread: it is `Send` but not `Sync`, and
//! `process()` never blocks. Waiting for data is left to the caller, which
//! can poll the descriptor returned by [`EventSource::fd`].

pub mod config;
mod sys;

use std::io;
use std::ops::AddAssign;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;

pub use config::{SourceConfig, DEFAULT_BUFFER_PAGES};

use crate::decode::{Record, RecordDecoder};
use crate::domain::{CpuId, SourceState, TraceError};
use crate::format::{EventIdentity, FormatDictionary};
use crate::handler::Handler;
use crate::ring::{page_size, Mapping, ProcessStats, RingBuffer};

/// Lifetime totals of a source
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub records: u64,
    pub bytes: u64,
    pub corrupt: u64,
    /// Records the kernel reported as dropped (`PERF_RECORD_LOST`)
    pub lost: u64,
}

impl AddAssign<ProcessStats> for SourceStats {
    fn add_assign(&mut self, pass: ProcessStats) {
        self.records += pass.records;
        self.bytes += pass.bytes;
        self.corrupt += pass.corrupt;
    }
}

/// Resources that exist between `open` and `close`
struct Live {
    // Unmapped before the descriptor is closed
    ring: RingBuffer,
    decoder: RecordDecoder,
    /// `None` for rings that are not backed by a perf event
    fd: Option<OwnedFd>,
}

pub struct EventSource<H> {
    dictionary: Arc<FormatDictionary>,
    config: SourceConfig,
    name: Option<(String, String)>,
    handler: H,
    state: SourceState,
    identity: Option<Arc<EventIdentity>>,
    live: Option<Live>,
    stats: SourceStats,
}

impl<H> EventSource<H> {
    /// Configured but unopened source
    #[must_use]
    pub fn new(dictionary: Arc<FormatDictionary>, config: SourceConfig, handler: H) -> Self {
        Self {
            dictionary,
            config,
            name: None,
            handler,
            state: SourceState::Created,
            identity: None,
            live: None,
            stats: SourceStats::default(),
        }
    }

    /// Create and open a source for `subsystem:event` on `cpu`
    ///
    /// # Errors
    /// See [`EventSource::open`]
    pub fn open_tracepoint(
        dictionary: Arc<FormatDictionary>,
        subsystem: &str,
        event: &str,
        config: SourceConfig,
        handler: H,
    ) -> Result<Self, TraceError> {
        let mut source = Self::new(dictionary, config, handler);
        source.set_event_name(subsystem, event)?;
        source.open()?;
        Ok(source)
    }

    /// Bind the source to another CPU
    ///
    /// # Errors
    /// Returns `InvalidState` once the source has been opened
    pub fn set_cpu(&mut self, cpu: CpuId) -> Result<(), TraceError> {
        self.require_created("set_cpu")?;
        self.config.cpu = cpu;
        Ok(())
    }

    /// Select the tracepoint to open
    ///
    /// # Errors
    /// Returns `InvalidState` once the source has been opened
    pub fn set_event_name(&mut self, subsystem: &str, event: &str) -> Result<(), TraceError> {
        self.require_created("set_event_name")?;
        self.name = Some((subsystem.to_string(), event.to_string()));
        Ok(())
    }

    /// Resolve the tracepoint, open it on the configured CPU and map its
    /// ring buffer
    ///
    /// On failure the source stays in `Created` and can be reconfigured.
    ///
    /// # Errors
    /// - `InvalidState` if the source was already opened
    /// - `EventNotFound` if no event name is set or the kernel does not know it
    /// - `PermissionDenied` if the caller may not trace system-wide
    /// - `MappingFailed` if the buffer size is invalid or `mmap` fails
    pub fn open(&mut self) -> Result<(), TraceError> {
        self.require_created("open")?;
        let (subsystem, event) = self
            .name
            .clone()
            .ok_or_else(|| TraceError::EventNotFound("<unnamed>".to_string()))?;
        let qualified = format!("{subsystem}:{event}");
        let cpu = self.config.cpu;

        self.config.validate(&qualified)?;
        let identity = self.dictionary.resolve(&subsystem, &event)?;

        let layout = match self.dictionary.layout_for(&identity) {
            Ok(layout) => Some(layout),
            Err(err) => {
                warn!("{err}; samples of {qualified} will not be decoded");
                None
            }
        };

        let fd = sys::open_tracepoint(identity.id, cpu, self.config.sample_type)
            .map_err(|err| open_error(&err, &qualified, cpu))?;

        let page = page_size();
        let data_pages = self.config.buffer_pages;
        let mapping_failed = |reason: String| TraceError::MappingFailed {
            event: qualified.clone(),
            cpu,
            reason,
        };
        let len = self
            .config
            .mapping_len(page)
            .ok_or_else(|| mapping_failed(format!("{data_pages} pages overflow")))?;
        let io_failed = |err: io::Error| mapping_failed(err.to_string());
        let mapping = Mapping::shared(fd.as_fd(), len).map_err(io_failed)?;
        let ring = RingBuffer::new(mapping, page).map_err(io_failed)?;

        debug!(
            "{qualified}: control page version {} (compat {}), {} byte data region",
            ring.control().version(),
            ring.control().compat_version(),
            ring.capacity()
        );
        info!("Opened {identity} on {cpu} with {data_pages} data pages");

        let dictionary = Arc::clone(&self.dictionary);
        let decoder = RecordDecoder::new(dictionary, self.config.sample_type, layout);
        self.live = Some(Live {
            ring,
            decoder,
            fd: Some(fd),
        });
        self.identity = Some(identity);
        self.state = SourceState::Mapped;
        Ok(())
    }

    /// Enable event delivery; a no-op if already enabled
    ///
    /// # Errors
    /// Returns `InvalidState` before `open` or after `close`, or the ioctl
    /// failure
    pub fn start(&mut self) -> Result<(), TraceError> {
        match self.state {
            SourceState::Enabled => Ok(()),
            SourceState::Mapped | SourceState::Disabled => {
                if let Some(fd) = self.live.as_ref().and_then(|live| live.fd.as_ref()) {
                    sys::enable(fd.as_fd())?;
                }
                debug!("{}: enabled on {}", self.label(), self.config.cpu);
                self.state = SourceState::Enabled;
                Ok(())
            }
            SourceState::Created | SourceState::Closed => Err(self.invalid("start")),
        }
    }

    /// Disable event delivery, keeping the mapping; a no-op unless enabled
    ///
    /// # Errors
    /// Returns the ioctl failure
    pub fn stop(&mut self) -> Result<(), TraceError> {
        if self.state != SourceState::Enabled {
            return Ok(());
        }
        if let Some(fd) = self.live.as_ref().and_then(|live| live.fd.as_ref()) {
            sys::disable(fd.as_fd())?;
        }
        debug!("{}: disabled on {}", self.label(), self.config.cpu);
        self.state = SourceState::Disabled;
        Ok(())
    }

    /// Discard the unconsumed backlog
    ///
    /// # Errors
    /// Returns `InvalidState` unless the source is mapped
    pub fn clear(&mut self) -> Result<(), TraceError> {
        let state = self.state;
        match self.live.as_mut() {
            Some(live) if state.is_mapped() => {
                live.ring.clear();
                Ok(())
            }
            _ => Err(self.invalid("clear")),
        }
    }

    /// Drain every available record into the handler
    ///
    /// Returns immediately when nothing is pending. Corruption is recovered
    /// inside the pass and reported in [`ProcessStats::corrupt`].
    ///
    /// # Errors
    /// Returns `InvalidState` unless the source is mapped
    pub fn process<C: ?Sized>(&mut self, cookie: &mut C) -> Result<ProcessStats, TraceError>
    where
        H: Handler<C>,
    {
        let mapped = self.state.is_mapped();
        let Some(live) = self.live.as_mut().filter(|_| mapped) else {
            return Err(self.invalid("process"));
        };

        let handler = &mut self.handler;
        let decoder = &live.decoder;
        let mut lost = 0u64;

        let stats = live.ring.process(|header, payload| {
            let record = decoder.decode(&header, payload);
            if let Record::Lost(notice) = &record {
                lost += notice.lost;
            }
            handler.handle(&header, &record, cookie);
        });

        if lost > 0 {
            warn!(
                "{}: kernel dropped {lost} records on {}",
                self.label(),
                self.config.cpu
            );
        }

        self.stats += stats;
        self.stats.lost += lost;
        Ok(stats)
    }

    /// Disable, unmap and release the kernel handle; safe to repeat
    pub fn close(&mut self) {
        if self.state == SourceState::Closed {
            return;
        }
        if let Err(err) = self.stop() {
            warn!("{}: failed to disable before close: {err}", self.label());
        }
        if self.live.take().is_some() {
            debug!("{}: closed on {}", self.label(), self.config.cpu);
        }
        self.state = SourceState::Closed;
    }

    #[must_use]
    pub fn state(&self) -> SourceState {
        self.state
    }

    /// Resolved tracepoint, once opened
    #[must_use]
    pub fn identity(&self) -> Option<&EventIdentity> {
        self.identity.as_deref()
    }

    #[must_use]
    pub fn cpu(&self) -> CpuId {
        self.config.cpu
    }

    #[must_use]
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Lifetime totals across every `process()` call
    #[must_use]
    pub fn stats(&self) -> SourceStats {
        self.stats
    }

    /// Bytes published by the kernel and not yet processed
    #[must_use]
    pub fn backlog(&self) -> u64 {
        self.live.as_ref().map_or(0, |live| live.ring.backlog())
    }

    /// Perf event descriptor for readiness waiting, while mapped
    #[must_use]
    pub fn fd(&self) -> Option<BorrowedFd<'_>> {
        self.live.as_ref()?.fd.as_ref().map(AsFd::as_fd)
    }

    #[must_use]
    pub fn handler(&self) -> &H {
        &self.handler
    }

    fn require_created(&self, operation: &'static str) -> Result<(), TraceError> {
        if self.state == SourceState::Created {
            Ok(())
        } else {
            Err(self.invalid(operation))
        }
    }

    fn invalid(&self, operation: &'static str) -> TraceError {
        TraceError::InvalidState {
            operation,
            state: self.state,
        }
    }

    fn label(&self) -> String {
        match (&self.identity, &self.name) {
            (Some(identity), _) => identity.qualified_name(),
            (None, Some((subsystem, event))) => format!("{subsystem}:{event}"),
            (None, None) => "<unnamed>".to_string(),
        }
    }

    /// Source over a ring that no perf event feeds, for driving the
    /// lifecycle with a fake producer
    #[cfg(test)]
    pub(crate) fn detached(
        dictionary: Arc<FormatDictionary>,
        identity: EventIdentity,
        config: SourceConfig,
        handler: H,
    ) -> io::Result<Self> {
        let page = page_size();
        let Some(len) = config.mapping_len(page) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "buffer too large",
            ));
        };
        let ring = RingBuffer::new(Mapping::anonymous(len)?, page)?;
        let identity = Arc::new(identity);
        let layout = dictionary.layout_by_id(identity.id);
        let sample_type = config.sample_type;
        let decoder = RecordDecoder::new(Arc::clone(&dictionary), sample_type, layout);

        let mut source = Self::new(dictionary, config, handler);
        source.name = Some((identity.subsystem.clone(), identity.event.clone()));
        source.identity = Some(identity);
        source.live = Some(Live {
            ring,
            decoder,
            fd: None,
        });
        source.state = SourceState::Mapped;
        Ok(source)
    }

    #[cfg(test)]
    pub(crate) fn ring(&self) -> Option<&RingBuffer> {
        self.live.as_ref().map(|live| &live.ring)
    }
}

impl<H> Drop for EventSource<H> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<H> std::fmt::Debug for EventSource<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSource")
            .field("event", &self.label())
            .field("cpu", &self.config.cpu)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// Classify a `perf_event_open` failure
fn open_error(err: &io::Error, event: &str, cpu: CpuId) -> TraceError {
    match err.raw_os_error() {
        Some(libc::EACCES | libc::EPERM) => TraceError::PermissionDenied {
            event: event.to_string(),
            reason: format!("perf_event_open on {cpu}: {err}"),
        },
        Some(libc::ENOENT | libc::ENODEV | libc::EINVAL) => {
            debug!("perf_event_open({event}) on {cpu}: {err}");
            TraceError::EventNotFound(event.to_string())
        }
        _ => {
            let message = format!("perf_event_open({event}) on {cpu}: {err}");
            TraceError::Io(io::Error::new(err.kind(), message))
        }
    }
}
