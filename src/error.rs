//! Error types for request validation and per-port probing.
use std::io;
use thiserror::Error;

/// Rejected input. Raised before the scanning engine ever runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("invalid IPv4 address: {0}")]
    InvalidAddress(String),

    #[error("invalid port value: {0}")]
    InvalidPort(String),

    #[error("port out of range: {0} (expected 1-65535)")]
    PortOutOfRange(u32),

    #[error("invalid range {start}-{end} (start > end)")]
    InvertedRange { start: u16, end: u16 },

    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("pool size must be at least 1")]
    ZeroPoolSize,

    #[error("probe timeout must be greater than zero")]
    ZeroTimeout,
}

/// Failure to get a probe in flight for one port. Always recovered by the worker.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// Socket creation or option setup failed (typically descriptor exhaustion).
    #[error("socket setup failed: {0}")]
    Socket(#[source] io::Error),

    /// `connect` failed immediately with something other than "in progress".
    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),

    /// The multiplexer refused the registration.
    #[error("readiness registration failed: {0}")]
    Register(#[source] io::Error),
}

impl ProbeError {
    pub fn io(&self) -> &io::Error {
        match self {
            ProbeError::Socket(e) | ProbeError::Connect(e) | ProbeError::Register(e) => e,
        }
    }

    /// An immediate refusal is a legitimate closed-port answer, not a failure.
    pub fn is_refused(&self) -> bool {
        matches!(self, ProbeError::Connect(e) if e.kind() == io::ErrorKind::ConnectionRefused)
    }
}
