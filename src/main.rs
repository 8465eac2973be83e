use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use portpulse::request::{ScanConfig, DEFAULT_CONCURRENCY, DEFAULT_POOL_SIZE};
use portpulse::scanner;
use portpulse::types::{ScanRequest, ScanResults};

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// portpulse: scan a TCP port range on one IPv4 host and print the open ports.
#[derive(Debug, Clone, Parser)]
#[command(name = "portpulse", version, long_about = None)]
struct Cli {
    /// Target IPv4 address (dotted quad, e.g. 192.168.1.10).
    target: String,

    /// First port of the range (inclusive).
    start: String,

    /// Last port of the range (inclusive).
    end: String,

    /// Worker threads; each scans one contiguous slice of the range.
    #[arg(short, long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Connection attempts each worker keeps in flight.
    #[arg(short = 'k', long = "pool-size", default_value_t = DEFAULT_POOL_SIZE)]
    pool_size: usize,

    /// Per-probe timeout in milliseconds.
    #[arg(long = "timeout-ms", default_value_t = 5_000)]
    timeout_ms: u64,

    /// Print open ports in discovery order instead of sorted.
    #[arg(long, default_value_t = false)]
    unsorted: bool,

    /// Write results as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,

    /// More logging on stderr (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let request = match ScanRequest::parse(&cli.target, &cli.start, &cli.end) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };
    let config = ScanConfig {
        concurrency: cli.concurrency,
        pool_size: cli.pool_size,
        timeout: Duration::from_millis(cli.timeout_ms),
        sorted: !cli.unsorted,
    };
    if let Err(e) = config.validate() {
        eprintln!("Error: {e}");
        return Ok(ExitCode::FAILURE);
    }

    // Ctrl-C cancels the scan; workers notice between pool cycles.
    let cancel = CancellationToken::new();
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_ctrlc.cancel();
        }
    });

    let results = tokio::task::spawn_blocking(move || {
        scanner::scan_with_cancel(&request, &config, cancel)
    })
    .await
    .context("scan task failed")??;

    for port in &results.open_ports {
        println!("{port}");
    }

    if let Some(path) = cli.output.as_deref() {
        write_results_json(path, &results)
            .with_context(|| format!("failed to write JSON to {}", path.display()))?;
    }

    if results.cancelled {
        eprintln!(
            "Interrupted: {} of {} ports scanned",
            results.scanned_done, results.scanned_total
        );
        return Ok(ExitCode::from(130));
    }
    Ok(ExitCode::SUCCESS)
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn write_results_json(path: &Path, results: &ScanResults) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, results)?;
    Ok(())
}
