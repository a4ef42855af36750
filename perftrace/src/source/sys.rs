//! `perf_event_open(2)` and the enable/disable ioctls

#![allow(unsafe_code)] // raw syscalls

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

use perf_event_open_sys as sys;
use perf_event_open_sys::bindings::perf_event_attr;

use crate::domain::{CpuId, EventId};

/// Attributes for sampling every hit of tracepoint `id` on one CPU
///
/// The event starts disabled and wakes pollers after each record.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn tracepoint_attr(id: EventId, sample_type: u64) -> perf_event_attr {
    let mut attrs = perf_event_attr {
        // Older kernels accept a larger size as long as the tail is zeroed
        size: std::mem::size_of::<perf_event_attr>() as u32,
        type_: sys::bindings::PERF_TYPE_TRACEPOINT,
        config: u64::from(id.0),
        sample_type,
        ..perf_event_attr::default()
    };
    attrs.__bindgen_anon_1.sample_period = 1;
    attrs.__bindgen_anon_2.wakeup_events = 1;
    attrs.set_disabled(1);
    attrs
}

/// Open tracepoint `id` for every task on `cpu`
pub(crate) fn open_tracepoint(id: EventId, cpu: CpuId, sample_type: u64) -> io::Result<OwnedFd> {
    let mut attrs = tracepoint_attr(id, sample_type);
    let Ok(cpu) = i32::try_from(cpu.0) else {
        return Err(io::Error::from_raw_os_error(libc::EINVAL));
    };
    let flags = libc::c_ulong::from(sys::bindings::PERF_FLAG_FD_CLOEXEC);

    // SAFETY: `attrs` is a fully initialised perf_event_attr that outlives
    // the call
    let fd = unsafe { sys::perf_event_open(&mut attrs, -1, cpu, -1, flags) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: the kernel just handed us this descriptor and nothing else owns it
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// `PERF_EVENT_IOC_ENABLE`
pub(crate) fn enable(fd: BorrowedFd<'_>) -> io::Result<()> {
    // SAFETY: `fd` is a live perf event descriptor
    check(unsafe { sys::ioctls::ENABLE(fd.as_raw_fd(), 0) })
}

/// `PERF_EVENT_IOC_DISABLE`
pub(crate) fn disable(fd: BorrowedFd<'_>) -> io::Result<()> {
    // SAFETY: `fd` is a live perf event descriptor
    check(unsafe { sys::ioctls::DISABLE(fd.as_raw_fd(), 0) })
}

fn check(ret: libc::c_int) -> io::Result<()> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perftrace_common::DEFAULT_SAMPLE_TYPE;

    #[test]
    fn test_tracepoint_attr() {
        let attrs = tracepoint_attr(EventId(321), DEFAULT_SAMPLE_TYPE);
        assert_eq!(attrs.type_, sys::bindings::PERF_TYPE_TRACEPOINT);
        assert_eq!(attrs.config, 321);
        assert_eq!(attrs.sample_type, DEFAULT_SAMPLE_TYPE);
        assert_eq!(attrs.disabled(), 1);
        // SAFETY: both unions were written as their period/event variants
        unsafe {
            assert_eq!(attrs.__bindgen_anon_1.sample_period, 1);
            assert_eq!(attrs.__bindgen_anon_2.wakeup_events, 1);
        }
    }
}
