//! CPU utility functions
//!
//! Utilities for querying CPU information from /sys filesystem.

use anyhow::{bail, Context, Result};
use std::fs;

use crate::domain::CpuId;

/// Get list of online CPU IDs from /sys/devices/system/cpu/online
///
/// # Errors
/// Fails if the file cannot be read or does not hold a CPU list
pub fn online_cpus() -> Result<Vec<CpuId>> {
    let content = fs::read_to_string("/sys/devices/system/cpu/online")
        .context("Failed to read /sys/devices/system/cpu/online")?;
    parse_cpu_list(&content)
}

/// Parse a kernel CPU list such as "0-3" or "0-3,8-11,13"
///
/// The result is sorted and free of duplicates.
///
/// # Errors
/// Fails on an empty list, a non-numeric entry or a descending range
pub fn parse_cpu_list(list: &str) -> Result<Vec<CpuId>> {
    let mut cpus = Vec::new();

    for range in list
        .trim()
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
    {
        if let Some((start, end)) = range.split_once('-') {
            // Range like "0-3"
            let invalid = || format!("Invalid CPU range: {range}");
            let start: u32 = start.trim().parse().with_context(invalid)?;
            let end: u32 = end.trim().parse().with_context(invalid)?;
            if end < start {
                bail!("Invalid CPU range: {range}");
            }
            cpus.extend((start..=end).map(CpuId));
        } else {
            // Single CPU like "5"
            let id: u32 = range
                .parse()
                .with_context(|| format!("Invalid CPU: {range}"))?;
            cpus.push(CpuId(id));
        }
    }

    if cpus.is_empty() {
        bail!("Empty CPU list");
    }

    cpus.sort_unstable();
    cpus.dedup();
    Ok(cpus)
}
