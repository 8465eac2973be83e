use crate::error::RequestError;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::ops::RangeInclusive;

/// One validated scan: a single IPv4 host and an inclusive port range.
///
/// Built through [`ScanRequest::new`](crate::request), which enforces
/// `1 <= start <= end <= 65535`. Deserializing goes through the same check.
/// Immutable once built.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "RawScanRequest")]
pub struct ScanRequest {
    pub(crate) target: Ipv4Addr,
    pub(crate) start: u16,
    pub(crate) end: u16,
}

impl ScanRequest {
    pub fn target(&self) -> Ipv4Addr {
        self.target
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn ports(&self) -> RangeInclusive<u16> {
        self.start..=self.end
    }

    /// Number of ports in the range; always at least 1.
    pub fn port_count(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }
}

/// Unchecked wire form of [`ScanRequest`]; only reachable through `TryFrom`.
#[derive(Deserialize, Debug)]
pub struct RawScanRequest {
    target: Ipv4Addr,
    start: u16,
    end: u16,
}

impl TryFrom<RawScanRequest> for ScanRequest {
    type Error = RequestError;

    fn try_from(raw: RawScanRequest) -> Result<Self, Self::Error> {
        ScanRequest::new(raw.target, raw.start, raw.end)
    }
}

/// Classification of a single connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortOutcome {
    /// The TCP handshake completed.
    Open,
    /// RST received; nothing listening.
    ClosedOrRefused,
    /// No answer within the probe timeout (filtered or dropped).
    TimedOut,
    /// Anything else the OS reported for this port.
    Error(String),
}

impl PortOutcome {
    pub fn is_open(&self) -> bool {
        matches!(self, PortOutcome::Open)
    }
}

/// Per-outcome counters accumulated by one worker and summed by the orchestrator.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeTally {
    pub open: u64,
    pub refused: u64,
    pub timed_out: u64,
    pub errors: u64,
}

impl OutcomeTally {
    pub fn record(&mut self, outcome: &PortOutcome) {
        match outcome {
            PortOutcome::Open => self.open += 1,
            PortOutcome::ClosedOrRefused => self.refused += 1,
            PortOutcome::TimedOut => self.timed_out += 1,
            PortOutcome::Error(_) => self.errors += 1,
        }
    }

    pub fn merge(&mut self, other: &OutcomeTally) {
        self.open += other.open;
        self.refused += other.refused;
        self.timed_out += other.timed_out;
        self.errors += other.errors;
    }

    /// Ports that received a classification.
    pub fn total(&self) -> u64 {
        self.open + self.refused + self.timed_out + self.errors
    }
}

/// Aggregate results and counters for one finished (or cancelled) scan.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ScanResults {
    pub target: String,
    pub start: u16,
    pub end: u16,
    pub scanned_total: u64,
    pub scanned_done: u64,
    pub open_count: u64,
    pub refused: u64,
    pub timed_out: u64,
    pub errors: u64,
    /// Highest number of probes any single worker had in flight at once.
    pub peak_in_flight: usize,
    pub cancelled: bool,
    pub open_ports: Vec<u16>,
    pub started_at: String,
    pub elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_counts_every_outcome() {
        let mut t = OutcomeTally::default();
        t.record(&PortOutcome::Open);
        t.record(&PortOutcome::ClosedOrRefused);
        t.record(&PortOutcome::ClosedOrRefused);
        t.record(&PortOutcome::TimedOut);
        t.record(&PortOutcome::Error("boom".into()));
        assert_eq!(t.open, 1);
        assert_eq!(t.refused, 2);
        assert_eq!(t.total(), 5);

        let mut sum = OutcomeTally::default();
        sum.merge(&t);
        sum.merge(&t);
        assert_eq!(sum.total(), 10);
        assert_eq!(sum.errors, 2);
    }

    #[test]
    fn deserialize_validates_the_range() {
        let ok: ScanRequest =
            serde_json::from_str(r#"{"target":"127.0.0.1","start":8000,"end":8090}"#).unwrap();
        assert_eq!(ok.ports(), 8000..=8090);

        let inverted =
            serde_json::from_str::<ScanRequest>(r#"{"target":"127.0.0.1","start":9,"end":3}"#);
        let err = inverted.unwrap_err().to_string();
        assert!(err.contains("start > end"), "{err}");

        let zero =
            serde_json::from_str::<ScanRequest>(r#"{"target":"127.0.0.1","start":0,"end":0}"#);
        assert!(zero.is_err());
    }

    #[test]
    fn port_count_is_inclusive() {
        let r = ScanRequest {
            target: Ipv4Addr::LOCALHOST,
            start: 1,
            end: 65535,
        };
        assert_eq!(r.port_count(), 65535);
        assert_eq!(r.ports().count(), 65535);
    }
}
