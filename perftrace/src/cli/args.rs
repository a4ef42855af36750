//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

use crate::collector::EventSpec;
use crate::source::DEFAULT_BUFFER_PAGES;

#[derive(Parser, Debug)]
#[command(
    name = "perftrace",
    about = "Stream kernel tracepoints through per-CPU perf ring buffers",
    after_help = "\
EXAMPLES:
    sudo perftrace power:cpu_idle                      All online CPUs until Ctrl+C
    sudo perftrace sched:sched_switch --cpus 0-3       First four CPUs
    sudo perftrace power:cpu_idle --duration 10 --json Ten seconds of JSON lines"
)]
pub struct Args {
    /// Tracepoints to record
    #[arg(value_name = "SUBSYSTEM:EVENT", required = true)]
    pub events: Vec<EventSpec>,

    /// CPUs to trace, e.g. "0-3,8" (default: all online CPUs)
    #[arg(long, value_name = "LIST")]
    pub cpus: Option<String>,

    /// Ring buffer size per CPU in pages (power of two)
    #[arg(long, default_value_t = DEFAULT_BUFFER_PAGES)]
    pub buffer_pages: usize,

    /// Stop after N seconds (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Maximum time a CPU thread waits for data before rechecking for shutdown
    #[arg(long, default_value = "100", value_name = "MS")]
    pub poll_ms: u64,

    /// tracefs mount point or events directory (default: auto-detect)
    #[arg(long, value_name = "DIR")]
    pub tracefs: Option<PathBuf>,

    /// Print records and the final summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Suppress per-record output
    #[arg(short, long)]
    pub quiet: bool,
}
