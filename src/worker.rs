use crate::mux::{self, ReadyBook, Registrar, Waiter};
use crate::pool::SlotPool;
use crate::probe::{self, Probe};
use crate::types::{OutcomeTally, PortOutcome};
use std::net::Ipv4Addr;
use std::ops::RangeInclusive;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// What one worker found in its subrange.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub index: usize,
    pub range: RangeInclusive<u16>,
    pub open: Vec<u16>,
    pub tally: OutcomeTally,
    /// Most probes this worker had open at the same time.
    pub peak_in_flight: usize,
    pub cancelled: bool,
}

impl WorkerReport {
    fn new(index: usize, range: RangeInclusive<u16>) -> Self {
        Self {
            index,
            range,
            open: Vec::new(),
            tally: OutcomeTally::default(),
            peak_in_flight: 0,
            cancelled: false,
        }
    }

    /// Empty report for a worker that never got going.
    pub fn failed(index: usize, range: RangeInclusive<u16>) -> Self {
        Self::new(index, range)
    }
}

/// Scans one contiguous subrange with at most `pool_size` connects in flight.
#[derive(Debug, Clone)]
pub struct Worker {
    index: usize,
    target: Ipv4Addr,
    range: RangeInclusive<u16>,
    pool_size: usize,
    timeout: Duration,
    cancel: CancellationToken,
}

impl Worker {
    pub fn new(
        index: usize,
        target: Ipv4Addr,
        range: RangeInclusive<u16>,
        pool_size: usize,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            index,
            target,
            range,
            pool_size: pool_size.max(1),
            timeout,
            cancel,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn range(&self) -> RangeInclusive<u16> {
        self.range.clone()
    }

    /// Open a multiplexer and scan. A worker that cannot get one reports
    /// nothing for its subrange instead of failing the scan.
    pub fn run(&self) -> WorkerReport {
        match mux::open(self.pool_size) {
            Ok((registrar, mut waiter)) => self.scan_subrange(&registrar, &mut waiter),
            Err(e) => {
                warn!(
                    worker = self.index,
                    start = *self.range.start(),
                    end = *self.range.end(),
                    error = %e,
                    "could not open readiness multiplexer; skipping subrange"
                );
                WorkerReport::failed(self.index, self.range.clone())
            }
        }
    }

    /// Cycle every port of the subrange through the slot pool.
    ///
    /// The pool is topped up with fresh probes, then its oldest probe is
    /// resolved, until both the port range and the pool are exhausted. A port
    /// whose probe cannot even be created is classified on the spot.
    pub fn scan_subrange<R: Registrar, W: Waiter>(
        &self,
        registrar: &R,
        waiter: &mut W,
    ) -> WorkerReport {
        let mut report = WorkerReport::new(self.index, self.range.clone());
        let mut pending = self.range.clone();
        let mut pool: SlotPool<Probe<'_, R>> = SlotPool::new(self.pool_size);
        let mut book = ReadyBook::new();
        let mut scratch = Vec::with_capacity(self.pool_size);

        debug!(
            worker = self.index,
            start = *self.range.start(),
            end = *self.range.end(),
            "worker started"
        );

        loop {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            while !pool.is_full() {
                let Some(port) = pending.next() else { break };
                match Probe::connect(self.target, port, registrar) {
                    Ok(probe) => {
                        let pushed = pool.push(probe).is_ok();
                        debug_assert!(pushed, "fill loop stops at capacity");
                    }
                    Err(e) => {
                        let outcome = probe::outcome_of_failure(&e);
                        self.record(&mut report, port, outcome);
                    }
                }
            }

            let Some(probe) = pool.pop_oldest() else { break };
            let port = probe.port();
            let outcome = probe::resolve(probe, self.timeout, waiter, &mut book, &mut scratch);
            self.record(&mut report, port, outcome);
        }

        // Only non-empty after cancellation; dropping closes every socket.
        pool.clear();
        report.peak_in_flight = pool.peak();

        debug!(
            worker = self.index,
            open = report.tally.open,
            scanned = report.tally.total(),
            cancelled = report.cancelled,
            "worker finished"
        );
        report
    }

    fn record(&self, report: &mut WorkerReport, port: u16, outcome: PortOutcome) {
        match &outcome {
            PortOutcome::Open => {
                debug!(worker = self.index, port, "open");
                report.open.push(port);
            }
            PortOutcome::ClosedOrRefused => trace!(worker = self.index, port, "refused"),
            PortOutcome::TimedOut => trace!(worker = self.index, port, "timed out"),
            PortOutcome::Error(reason) => {
                warn!(worker = self.index, port, %reason, "probe error")
            }
        }
        report.tally.record(&outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn worker(range: RangeInclusive<u16>, pool_size: usize) -> Worker {
        Worker::new(
            0,
            Ipv4Addr::LOCALHOST,
            range,
            pool_size,
            Duration::from_secs(2),
            CancellationToken::new(),
        )
    }

    #[test]
    fn finds_listeners_and_classifies_every_port() {
        let listeners: Vec<TcpListener> = (0..3)
            .map(|_| TcpListener::bind("127.0.0.1:0").unwrap())
            .collect();
        let mut ports: Vec<u16> = listeners
            .iter()
            .map(|l| l.local_addr().unwrap().port())
            .collect();
        ports.sort_unstable();
        let lo = ports[0].saturating_sub(5).max(1);
        let hi = ports[2].saturating_add(5);
        if usize::from(hi - lo) > 2_000 {
            // Ephemeral ports landed far apart; a window covering all of them is too wide.
            return;
        }

        let report = worker(lo..=hi, 4).run();
        let mut open = report.open.clone();
        open.sort_unstable();
        for p in &ports {
            assert!(open.contains(p), "listener on {p} missed");
        }
        assert_eq!(report.tally.total(), u64::from(hi - lo) + 1);
        assert!(report.peak_in_flight <= 4);
        assert!(!report.cancelled);
    }

    #[test]
    fn pool_larger_than_range_is_fine() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let report = worker(port..=port, 10).run();
        assert_eq!(report.open, vec![port]);
        assert_eq!(report.tally.total(), 1);
        assert_eq!(report.peak_in_flight, 1);
    }

    #[test]
    fn small_pool_cycles_through_a_wide_range() {
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let hi = port.saturating_add(14).max(30);
        let lo = hi - 29;

        let report = worker(lo..=hi, 3).run();
        assert_eq!(report.tally.total(), 30);
        assert_eq!(report.tally.errors, 0);
        assert!(report.peak_in_flight <= 3);
    }

    #[test]
    fn cancelled_worker_stops_early() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let w = Worker::new(
            3,
            Ipv4Addr::LOCALHOST,
            1000..=1100,
            5,
            Duration::from_secs(2),
            cancel,
        );
        let report = w.run();
        assert!(report.cancelled);
        assert_eq!(report.tally.total(), 0);
        assert_eq!(report.index, 3);
    }
}
