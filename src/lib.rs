//! Library crate for portpulse: a threaded TCP connect scanner for one IPv4 host.
pub mod error;
pub mod mux;
pub mod pool;
pub mod probe;
pub mod request;
pub mod scanner;
pub mod types;
pub mod worker;
