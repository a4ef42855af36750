//! tracefs discovery
//!
//! Tracepoint descriptions live under `<tracefs>/events/<subsystem>/<event>/`.
//! tracefs is usually mounted at `/sys/kernel/tracing`; older systems only
//! expose it through debugfs.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

/// Well-known tracefs mount points, most specific first
const TRACEFS_CANDIDATES: [&str; 2] = ["/sys/kernel/tracing", "/sys/kernel/debug/tracing"];

/// Locate the `events` directory of the running kernel's tracefs
///
/// # Errors
/// Returns `NotFound` if tracefs is neither at a well-known location nor
/// listed in `/proc/mounts`
pub fn locate_events_dir() -> std::io::Result<PathBuf> {
    for candidate in TRACEFS_CANDIDATES {
        let events = Path::new(candidate).join("events");
        if events.is_dir() {
            debug!("Using tracefs events at {}", events.display());
            return Ok(events);
        }
    }

    let table = fs::read_to_string("/proc/mounts")?;
    if let Some(root) = tracefs_from_mounts(&table) {
        let events = root.join("events");
        if events.is_dir() {
            debug!(
                "Using tracefs events at {} (from /proc/mounts)",
                events.display()
            );
            return Ok(events);
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "tracefs is not mounted (try: mount -t tracefs nodev /sys/kernel/tracing)",
    ))
}

/// Find the first tracefs mount point in `/proc/mounts` content
///
/// Lines look like `tracefs /sys/kernel/tracing tracefs rw,nosuid 0 0`.
#[must_use]
pub fn tracefs_from_mounts(mounts: &str) -> Option<PathBuf> {
    mounts.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let _device = parts.next()?;
        let mount_point = parts.next()?;
        let fs_type = parts.next()?;
        (fs_type == "tracefs").then(|| PathBuf::from(mount_point))
    })
}
