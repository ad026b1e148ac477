//! Drives a read/write workload through one kaio context and reports what
//! the context observed.

use clap::Parser;
use kaio::config::{Config, DEFAULT_CONFIG, WorkloadConfig};
use kaio::{Context, Notifier, Request, RequestId, Status, attach_notifier, logging, metrics};
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempPath;

#[derive(Parser)]
#[command(name = "kaio-bench")]
#[command(about = "Asynchronous file I/O benchmark")]
struct Args {
    /// Path to configuration file; defaults apply when omitted
    config: Option<PathBuf>,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() {
    let args = Args::parse();

    if args.print_config {
        print!("{}", DEFAULT_CONFIG);
        return;
    }

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    if let Err(e) = logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(&config) {
        tracing::error!(error = %e, "benchmark failed");
        std::process::exit(1);
    }
}

fn run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    print_config(config);

    let workload = &config.workload;
    // A scratch file is unlinked when `_scratch` drops, on every exit path.
    let (file, _scratch) = open_file(workload)?;
    let file = Arc::new(file);

    let ctx = Context::builder()
        .engine(config.context.engine)
        .max_events(config.context.max_events)
        .workers(config.context.workers)
        .build()?;
    let notifier = Arc::new(Notifier::new()?);
    tracing::info!(context = ctx.id(), engine = %ctx.engine(), "context ready");

    let blocks = config.blocks();
    let pattern = vec![0xa5u8; workload.block_size];
    let mut issued: u64 = 0;
    let mut resolved: u64 = 0;
    let mut bytes: u64 = 0;
    let mut swept = !workload.cancel;

    let start = Instant::now();
    while resolved < workload.requests {
        let mut submitted: Vec<RequestId> = Vec::new();
        while issued < workload.requests && ctx.in_flight() < workload.queue_depth {
            let room = workload.queue_depth - ctx.in_flight();
            let remaining = (workload.requests - issued) as usize;
            let n = workload.batch.min(room).min(remaining);

            let mut batch: Vec<Request> = (0..n as u64)
                .map(|i| build_request(&file, workload, blocks, issued + i, &pattern))
                .collect();
            attach_notifier(&mut batch, &notifier);

            match ctx.submit(&mut batch) {
                Ok(ids) => {
                    issued += ids.len() as u64;
                    submitted.extend(ids);
                }
                Err(e) if e.is_retryable() => break,
                Err(e) => return Err(e.into()),
            }
            if !batch.is_empty() {
                break;
            }
        }

        if !swept {
            swept = true;
            resolved += cancel_all(&ctx, &submitted)?;
            if resolved >= workload.requests {
                break;
            }
        }

        let events = ctx.get_events_millis(1, workload.queue_depth, workload.timeout_ms)?;
        if events.is_empty() {
            tracing::warn!(in_flight = ctx.in_flight(), "no completions before timeout");
            continue;
        }
        for event in &events {
            if let Some(n) = event.bytes() {
                bytes += n as u64;
            } else if let Some(e) = event.error() {
                tracing::debug!(id = %event.id(), tag = event.tag(), error = %e, "request failed");
            }
        }
        resolved += events.len() as u64;
    }
    let elapsed = start.elapsed();

    let signals = notifier.drain()?;
    if let Err(e) = ctx.destroy() {
        tracing::warn!(error = %e, "context destroy failed");
    }

    print_summary(resolved, bytes, signals, elapsed.as_secs_f64());
    Ok(())
}

/// Open the configured file, or create a scratch file sized for the workload.
/// The scratch file's path guard is returned alongside it.
fn open_file(workload: &WorkloadConfig) -> std::io::Result<(File, Option<TempPath>)> {
    let (file, scratch) = match &workload.file {
        Some(path) => {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?;
            (file, None)
        }
        None => {
            let (file, path) = tempfile::Builder::new()
                .prefix("kaio-bench-")
                .tempfile()?
                .into_parts();
            (file, Some(path))
        }
    };
    if file.metadata()?.len() < workload.file_size as u64 {
        file.set_len(workload.file_size as u64)?;
    }
    Ok((file, scratch))
}

/// Request `n` of the workload: blocks are visited in order, and writes are
/// spread evenly at the configured ratio.
fn build_request(
    file: &Arc<File>,
    workload: &WorkloadConfig,
    blocks: u64,
    n: u64,
    pattern: &[u8],
) -> Request {
    let offset = (n % blocks) * workload.block_size as u64;
    let ratio = workload.write_ratio;
    let is_write = ((n + 1) as f64 * ratio).floor() > (n as f64 * ratio).floor();

    let request = if is_write {
        Request::write(file.clone(), offset, pattern.to_vec())
    } else {
        Request::read(file.clone(), offset, workload.block_size)
    };
    request.with_tag(n)
}

/// Try to cancel every id; returns how many were resolved on the spot.
fn cancel_all(ctx: &Context, ids: &[RequestId]) -> Result<u64, kaio::Error> {
    let mut resolved = 0;
    for id in ids {
        let event = ctx.cancel(*id)?;
        match event.status() {
            Status::Cancelled => resolved += 1,
            Status::CancelPending | Status::TooLate | Status::Completed => {}
        }
    }
    tracing::info!(attempted = ids.len(), resolved, "cancel sweep");
    Ok(resolved)
}

fn print_config(config: &Config) {
    let w = &config.workload;
    eprintln!("kaio-bench configuration:");
    eprintln!("  engine:      {}", config.context.engine);
    eprintln!("  max_events:  {}", config.context.max_events);
    eprintln!("  file_size:   {} bytes", w.file_size);
    eprintln!("  block_size:  {} bytes", w.block_size);
    eprintln!("  requests:    {}", w.requests);
    eprintln!("  batch:       {}", w.batch);
    eprintln!("  queue_depth: {}", w.queue_depth);
    eprintln!("  write_ratio: {}", w.write_ratio);
    eprintln!("  cancel:      {}", w.cancel);
    eprintln!();
}

fn print_summary(resolved: u64, bytes: u64, signals: u64, secs: f64) {
    let secs = secs.max(f64::EPSILON);
    println!("{:<16} {:>14}", "resolved", resolved);
    println!("{:<16} {:>14}", "submitted", metrics::SUBMITTED.value());
    println!("{:<16} {:>14}", "rejected", metrics::REJECTED.value());
    println!("{:<16} {:>14}", "completed", metrics::COMPLETED.value());
    println!("{:<16} {:>14}", "failed", metrics::FAILED.value());
    println!("{:<16} {:>14}", "cancelled", metrics::CANCELLED.value());
    println!("{:<16} {:>14}", "cancel_too_late", metrics::CANCEL_TOO_LATE.value());
    println!("{:<16} {:>14}", "engine_errors", metrics::ENGINE_ERRORS.value());
    println!("{:<16} {:>14}", "notifier", signals);
    println!("{:<16} {:>14.0}", "ops/sec", resolved as f64 / secs);
    println!("{:<16} {:>14.1}", "MB/sec", bytes as f64 / secs / (1024.0 * 1024.0));
}
