//! # perftrace - Main Entry Point
//!
//! Opens the requested tracepoints on every selected CPU, prints records as
//! they arrive (plain text or JSON lines) and a summary when stopped by
//! Ctrl+C or `--duration`.

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::Receiver;
use log::info;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use perftrace::cli::Args;
use perftrace::collector::{
    display_statistics, format_record, online_cpus, parse_cpu_list, Collector, CollectorConfig,
};
use perftrace::domain::TraceError;
use perftrace::format::FormatDictionary;
use perftrace::handler::OwnedRecord;
use perftrace::preflight::run_preflight_checks;
use perftrace::source::SourceConfig;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_NOPERM: i32 = 77;

const PERMISSION_HINT: &str = "Run with: sudo perftrace ...\n\
     or lower the restriction: sudo sysctl kernel.perf_event_paranoid=-1";

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            if code == EXIT_NOPERM {
                eprintln!("\n{PERMISSION_HINT}");
            }
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.chain().any(is_permission_error) {
        EXIT_NOPERM
    } else {
        EXIT_ERROR
    }
}

fn is_permission_error(cause: &(dyn std::error::Error + 'static)) -> bool {
    let denied = matches!(
        cause.downcast_ref::<TraceError>(),
        Some(TraceError::PermissionDenied { .. })
    );
    denied
        || cause
            .downcast_ref::<io::Error>()
            .is_some_and(|err| err.kind() == io::ErrorKind::PermissionDenied)
}

/// Print everything currently queued; returns how many records were drained
fn drain_records(records: &Receiver<OwnedRecord>, json: bool, quiet: bool) -> Result<u64> {
    let mut count = 0;
    for record in records.try_iter() {
        count += 1;
        if quiet {
            continue;
        }
        if json {
            let line = serde_json::to_string(&record).context("Failed to serialize record")?;
            println!("{line}");
        } else {
            println!("{}", format_record(&record));
        }
    }
    Ok(count)
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();

    // Run pre-flight checks before anything else
    let events_dir = run_preflight_checks(args.tracefs.as_deref(), args.quiet)?;

    let cpus = match args.cpus.as_deref() {
        Some(list) => parse_cpu_list(list).context("Invalid --cpus")?,
        None => online_cpus()?,
    };

    let pages = args.buffer_pages;
    if !pages.is_power_of_two() {
        bail!("--buffer-pages must be a power of two, got {pages}");
    }

    let mut config = CollectorConfig::new(args.events.clone(), cpus);
    config.source = SourceConfig::default().with_buffer_pages(pages);
    config.poll_timeout = Duration::from_millis(args.poll_ms.max(1));

    if !args.quiet && !args.json {
        eprintln!("perftrace v{}", env!("CARGO_PKG_VERSION"));
        eprintln!("tracefs: {}", events_dir.display());
        let names: Vec<String> = config.events.iter().map(ToString::to_string).collect();
        eprintln!("events: {}", names.join(", "));
        eprintln!("cpus: {}", config.cpus.len());
    }

    let dictionary = Arc::new(FormatDictionary::with_root(events_dir));
    let collector = Collector::start(&dictionary, &config)?;
    info!("{} sources running", collector.source_count());

    // Setup Ctrl+C handler
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    // Track start time for duration limit
    let start = Instant::now();
    let duration_limit = (args.duration > 0).then(|| Duration::from_secs(args.duration));

    let mut received = 0u64;
    let mut last_status_time = Instant::now();

    // Track why we exited the loop
    let mut exit_reason = "interrupted";

    loop {
        // Check for duration timeout
        if let Some(limit) = duration_limit {
            if start.elapsed() >= limit {
                exit_reason = "duration limit reached";
                break;
            }
        }

        received += drain_records(collector.records(), args.json, args.quiet)?;

        // Print status every 10 seconds if no records
        if received == 0 && last_status_time.elapsed() > Duration::from_secs(10) {
            info!("Still waiting for records... (none received yet)");
            last_status_time = Instant::now();
        }

        // Use select to handle both sleep and Ctrl+C
        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(100)) => {
                // Continue loop
            }
            _ = &mut ctrl_c => {
                break;
            }
        }
    }

    let (stats, records) = collector.shutdown();
    received += drain_records(&records, args.json, args.quiet)?;

    if args.json {
        let summary = serde_json::json!({
            "reason": exit_reason,
            "elapsed_secs": start.elapsed().as_secs_f64(),
            "totals": stats.totals(),
            "dropped": stats.dropped(),
            "sources": &stats.sources,
            "failed": &stats.failed,
        });
        let line = serde_json::to_string(&summary).context("Failed to serialize summary")?;
        println!("{line}");
    } else {
        let elapsed = start.elapsed().as_secs_f64();
        eprintln!("\n{exit_reason}: {elapsed:.1}s, {received} records");
        display_statistics(&stats);
    }

    Ok(())
}
