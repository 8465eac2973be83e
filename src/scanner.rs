use crate::error::RequestError;
use crate::request::ScanConfig;
use crate::types::{OutcomeTally, ScanRequest, ScanResults};
use crate::worker::{Worker, WorkerReport};
use time::{format_description::well_known, OffsetDateTime};
use std::ops::RangeInclusive;
use std::thread;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Upper bound on worker threads regardless of the requested concurrency.
pub const MAX_WORKERS: usize = 1_024;

/// Scan every port of `request` using one thread per subrange.
///
/// - Splits the range into `config.concurrency` contiguous pieces (see [`partition`]).
/// - Each worker keeps up to `config.pool_size` non-blocking connects in flight.
/// - Blocks until every worker has drained its pool, then merges their results.
pub fn scan(request: &ScanRequest, config: &ScanConfig) -> Result<ScanResults, RequestError> {
    scan_with_cancel(request, config, CancellationToken::new())
}

/// Variant that accepts a `CancellationToken` checked by every worker between pool cycles.
pub fn scan_with_cancel(
    request: &ScanRequest,
    config: &ScanConfig,
    cancel: CancellationToken,
) -> Result<ScanResults, RequestError> {
    config.validate()?;

    let started_at = now_iso_like();
    let clock = Instant::now();
    let concurrency = config.concurrency.clamp(1, MAX_WORKERS);
    let ranges = partition(request.start(), request.end(), concurrency);
    info!(
        host = %request.target(),
        start = request.start(),
        end = request.end(),
        workers = ranges.len(),
        pool_size = config.pool_size,
        timeout_ms = config.timeout.as_millis() as u64,
        "scan started"
    );

    let workers: Vec<Worker> = ranges
        .into_iter()
        .enumerate()
        .map(|(i, range)| {
            Worker::new(
                i,
                request.target(),
                range,
                config.pool_size,
                config.timeout,
                cancel.clone(),
            )
        })
        .collect();

    // Scoped threads: nothing spawned here can outlive this call.
    let reports: Vec<WorkerReport> = thread::scope(|s| {
        let handles: Vec<_> = workers
            .iter()
            .map(|w| {
                let spawned = thread::Builder::new()
                    .name(format!("portpulse-worker-{}", w.index()))
                    .spawn_scoped(s, move || w.run());
                (w, spawned)
            })
            .collect();

        handles
            .into_iter()
            .map(|(w, spawned)| match spawned {
                Ok(handle) => handle.join().unwrap_or_else(|_| {
                    warn!(worker = w.index(), "worker panicked; its subrange reports nothing");
                    WorkerReport::failed(w.index(), w.range())
                }),
                Err(e) => {
                    warn!(worker = w.index(), error = %e, "could not spawn worker thread");
                    WorkerReport::failed(w.index(), w.range())
                }
            })
            .collect()
    });

    let results = merge(request, config, reports, started_at, clock);
    info!(
        open = results.open_count,
        scanned = results.scanned_done,
        elapsed_ms = results.elapsed_ms,
        cancelled = results.cancelled,
        "scan finished"
    );
    Ok(results)
}

/// Split `[start, end]` into contiguous, non-overlapping subranges.
///
/// The worker count is clamped to the number of ports, so no subrange is ever
/// empty. Every subrange but the last holds `len / workers` ports; the last
/// one also absorbs the remainder.
pub fn partition(start: u16, end: u16, concurrency: usize) -> Vec<RangeInclusive<u16>> {
    if start > end {
        return Vec::new();
    }
    let len = u32::from(end) - u32::from(start) + 1;
    let workers = (concurrency.max(1) as u64).min(u64::from(len)) as u32;
    let per_worker = len / workers;

    (0..workers)
        .map(|i| {
            let lo = u32::from(start) + i * per_worker;
            let hi = if i == workers - 1 {
                u32::from(end)
            } else {
                lo + per_worker - 1
            };
            // Both bounds lie within [start, end], so they fit in u16.
            (lo as u16)..=(hi as u16)
        })
        .collect()
}

/// Single-threaded merge, run after every worker has joined.
fn merge(
    request: &ScanRequest,
    config: &ScanConfig,
    reports: Vec<WorkerReport>,
    started_at: String,
    clock: Instant,
) -> ScanResults {
    let mut tally = OutcomeTally::default();
    let mut open_ports = Vec::new();
    let mut peak_in_flight = 0;
    let mut cancelled = false;

    for report in reports {
        tally.merge(&report.tally);
        open_ports.extend(report.open);
        peak_in_flight = peak_in_flight.max(report.peak_in_flight);
        cancelled |= report.cancelled;
    }
    if config.sorted {
        open_ports.sort_unstable();
    }

    ScanResults {
        target: request.target().to_string(),
        start: request.start(),
        end: request.end(),
        scanned_total: request.port_count() as u64,
        scanned_done: tally.total(),
        open_count: tally.open,
        refused: tally.refused,
        timed_out: tally.timed_out,
        errors: tally.errors,
        peak_in_flight,
        cancelled,
        open_ports,
        started_at,
        elapsed_ms: clock.elapsed().as_millis() as u64,
    }
}

fn now_iso_like() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_exact_cover(start: u16, end: u16, concurrency: usize) {
        let ranges = partition(start, end, concurrency);
        assert!(!ranges.is_empty());
        assert!(ranges.len() <= concurrency.max(1));
        let mut expected = start;
        for r in &ranges {
            assert!(r.start() <= r.end(), "empty subrange {r:?}");
            assert_eq!(*r.start(), expected, "gap or overlap at {r:?}");
            expected = r.end().wrapping_add(1);
        }
        assert_eq!(*ranges.last().unwrap().end(), end);
        let covered: usize = ranges.iter().map(|r| r.clone().count()).sum();
        assert_eq!(covered, usize::from(end - start) + 1);
    }

    #[test]
    fn even_split() {
        let ranges = partition(1, 100, 4);
        assert_eq!(ranges, vec![1..=25, 26..=50, 51..=75, 76..=100]);
    }

    #[test]
    fn last_worker_takes_remainder() {
        let ranges = partition(8000, 8090, 4);
        assert_eq!(ranges, vec![8000..=8021, 8022..=8043, 8044..=8065, 8066..=8090]);
    }

    #[test]
    fn more_workers_than_ports_is_clamped() {
        let ranges = partition(10, 12, 10);
        assert_eq!(ranges, vec![10..=10, 11..=11, 12..=12]);
        assert_eq!(partition(443, 443, 100), vec![443..=443]);
    }

    #[test]
    fn zero_concurrency_means_one_worker() {
        assert_eq!(partition(1, 10, 0), vec![1..=10]);
    }

    #[test]
    fn inverted_range_yields_nothing() {
        assert!(partition(20, 10, 4).is_empty());
    }

    #[test]
    fn covers_without_gaps_or_overlaps() {
        let cases: &[(u16, u16)] = &[
            (1, 1),
            (1, 2),
            (1, 1024),
            (1000, 1999),
            (1, 65535),
            (65535, 65535),
            (60000, 65535),
        ];
        for &(start, end) in cases {
            for concurrency in [1, 2, 3, 7, 10, 64, 100, 1000, 70_000] {
                assert_exact_cover(start, end, concurrency);
            }
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let req = ScanRequest::new(std::net::Ipv4Addr::LOCALHOST, 1, 2).unwrap();
        let cfg = ScanConfig {
            pool_size: 0,
            ..ScanConfig::default()
        };
        assert_eq!(scan(&req, &cfg).unwrap_err(), RequestError::ZeroPoolSize);
    }
}
