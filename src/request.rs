use crate::error::RequestError;
use crate::types::ScanRequest;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Default number of worker threads.
pub const DEFAULT_CONCURRENCY: usize = 10;
/// Default number of probes a single worker keeps in flight.
pub const DEFAULT_POOL_SIZE: usize = 10;
/// Default bound on how long one probe may stay unresolved.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

impl ScanRequest {
    /// Build a request from already-typed values.
    ///
    /// Port 0 is rejected, as is any range whose start lies after its end.
    pub fn new(target: Ipv4Addr, start: u16, end: u16) -> Result<Self, RequestError> {
        if start == 0 {
            return Err(RequestError::PortOutOfRange(0));
        }
        if end == 0 {
            return Err(RequestError::PortOutOfRange(0));
        }
        if start > end {
            return Err(RequestError::InvertedRange { start, end });
        }
        Ok(Self { target, start, end })
    }

    /// Build a request from raw user input: a dotted-quad literal and two port strings.
    pub fn parse(target: &str, start: &str, end: &str) -> Result<Self, RequestError> {
        let target = parse_target(target)?;
        let start = parse_port_str(start)?;
        let end = parse_port_str(end)?;
        Self::new(target, start, end)
    }
}

/// Tunables for one scan run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Worker threads; clamped to the range size at scan time.
    pub concurrency: usize,
    /// Probes in flight per worker.
    pub pool_size: usize,
    /// Per-probe resolution bound.
    pub timeout: Duration,
    /// Sort the merged open-port list.
    pub sorted: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            pool_size: DEFAULT_POOL_SIZE,
            timeout: DEFAULT_TIMEOUT,
            sorted: true,
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.concurrency == 0 {
            return Err(RequestError::ZeroConcurrency);
        }
        if self.pool_size == 0 {
            return Err(RequestError::ZeroPoolSize);
        }
        if self.timeout.is_zero() {
            return Err(RequestError::ZeroTimeout);
        }
        Ok(())
    }
}

/// Parse a strict IPv4 dotted-quad literal (`a.b.c.d`, each octet 0-255).
pub fn parse_target(s: &str) -> Result<Ipv4Addr, RequestError> {
    s.trim()
        .parse::<Ipv4Addr>()
        .map_err(|_| RequestError::InvalidAddress(s.to_string()))
}

/// Parse one TCP port (1..=65535).
pub fn parse_port_str(s: &str) -> Result<u16, RequestError> {
    let val: u32 = s
        .trim()
        .parse::<u32>()
        .map_err(|_| RequestError::InvalidPort(s.to_string()))?;
    if val == 0 || val > 65535 {
        return Err(RequestError::PortOutOfRange(val));
    }
    Ok(val as u16)
}
