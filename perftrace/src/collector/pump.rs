//! Per-source polling thread

#![allow(unsafe_code)] // poll(2)

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde::Serialize;

use crate::domain::CpuId;
use crate::format::EventIdentity;
use crate::handler::ChannelHandler;
use crate::source::{EventSource, SourceStats};

/// What one source did over its lifetime
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub event: String,
    pub cpu: CpuId,
    #[serde(flatten)]
    pub stats: SourceStats,
    /// Records handed to the aggregator
    pub sent: u64,
    /// Records dropped because the aggregator fell behind
    pub dropped: u64,
}

/// Wait for `fd` to become readable
///
/// Returns `Ok(false)` on timeout or when interrupted by a signal.
pub(crate) fn wait_readable(fd: BorrowedFd<'_>, timeout: Duration) -> io::Result<bool> {
    let mut pollfd = libc::pollfd {
        fd: fd.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);

    // SAFETY: `pollfd` is a single valid entry that outlives the call
    let ret = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        return if err.kind() == io::ErrorKind::Interrupted {
            Ok(false)
        } else {
            Err(err)
        };
    }
    Ok(ret > 0 && pollfd.revents & libc::POLLIN != 0)
}

/// Drive `source` until `shutdown` is raised, then drain and close it
pub(crate) fn run(
    mut source: EventSource<ChannelHandler>,
    shutdown: &AtomicBool,
    poll_timeout: Duration,
) -> SourceReport {
    let label = source.identity().map_or_else(
        || "<unnamed>".to_string(),
        EventIdentity::qualified_name,
    );
    let cpu = source.cpu();

    while !shutdown.load(Ordering::Relaxed) {
        if let Some(fd) = source.fd() {
            if let Err(err) = wait_readable(fd, poll_timeout) {
                warn!("{label} on {cpu}: poll failed: {err}");
                break;
            }
        } else {
            std::thread::sleep(poll_timeout);
        }

        if let Err(err) = source.process(&mut ()) {
            warn!("{label} on {cpu}: {err}");
            break;
        }
    }

    // Whatever the kernel wrote before the disable still gets delivered
    if let Err(err) = source.stop() {
        warn!("{label} on {cpu}: failed to disable: {err}");
    }
    if let Err(err) = source.process(&mut ()) {
        debug!("{label} on {cpu}: final drain skipped: {err}");
    }

    let report = SourceReport {
        event: label,
        cpu,
        stats: source.stats(),
        sent: source.handler().sent(),
        dropped: source.handler().dropped(),
    };
    source.close();
    report
}

/// Spawn [`run`] on its own thread
pub(crate) fn spawn(
    source: EventSource<ChannelHandler>,
    shutdown: Arc<AtomicBool>,
    poll_timeout: Duration,
) -> io::Result<std::thread::JoinHandle<SourceReport>> {
    let name = format!("perftrace-cpu{}", source.cpu().0);
    std::thread::Builder::new()
        .name(name)
        .spawn(move || run(source, &shutdown, poll_timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventId;
    use crate::format::FormatDictionary;
    use crate::source::SourceConfig;
    use crossbeam_channel::bounded;
    use perftrace_common::{RecordHeader, PERF_RECORD_COMM};
    use std::io::Write;
    use std::os::fd::AsFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_wait_readable_times_out_when_idle() {
        let (reader, _writer) = UnixStream::pair().unwrap();
        let ready = wait_readable(reader.as_fd(), Duration::from_millis(10)).unwrap();
        assert!(!ready);
    }

    #[test]
    fn test_wait_readable_sees_data() {
        let (reader, mut writer) = UnixStream::pair().unwrap();
        writer.write_all(b"x").unwrap();
        let ready = wait_readable(reader.as_fd(), Duration::from_millis(1000)).unwrap();
        assert!(ready);
    }

    #[test]
    fn test_run_drains_before_closing() {
        let (tx, rx) = bounded(16);
        let config = SourceConfig::default()
            .with_buffer_pages(1)
            .with_cpu(CpuId(2));
        let source = EventSource::detached(
            Arc::new(FormatDictionary::with_root("/nonexistent")),
            EventIdentity::new("sched", "sched_process_exec", EventId(300)),
            config,
            ChannelHandler::new(CpuId(2), tx),
        )
        .unwrap();

        let header = RecordHeader {
            kind: PERF_RECORD_COMM,
            misc: 0,
            size: 24,
        };
        let mut record = header.to_bytes().to_vec();
        record.resize(24, 0);
        let ring = source.ring().unwrap();
        ring.produce(&record);
        ring.produce(&record);

        let shutdown = AtomicBool::new(true);
        let report = run(source, &shutdown, Duration::from_millis(1));

        assert_eq!(report.event, "sched:sched_process_exec");
        assert_eq!(report.cpu, CpuId(2));
        assert_eq!(report.stats.records, 2);
        assert_eq!(report.sent, 2);
        assert_eq!(report.dropped, 0);
        assert_eq!(rx.try_iter().count(), 2);
    }
}
