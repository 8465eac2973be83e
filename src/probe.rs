//! A single non-blocking connection attempt and its classification.
use crate::error::ProbeError;
use crate::mux::{ReadyBook, ReadyEvent, Registrar, Waiter};
use crate::types::PortOutcome;
use mio::net::TcpStream;
use mio::{Interest, Token};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registered,
    Resolved,
}

/// One outstanding connect to one port.
///
/// Owns both the socket and its multiplexer registration. Dropping a probe,
/// resolved or not, deregisters and closes the socket.
#[derive(Debug)]
pub struct Probe<'r, R: Registrar> {
    port: u16,
    stream: TcpStream,
    token: Token,
    state: RegistrationState,
    started: Instant,
    registrar: &'r R,
}

impl<'r, R: Registrar> Probe<'r, R> {
    /// Open a non-blocking socket, start connecting to `target:port` and
    /// register it for write readiness.
    pub fn connect(target: Ipv4Addr, port: u16, registrar: &'r R) -> Result<Self, ProbeError> {
        let addr = SocketAddr::from((target, port));
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
            .map_err(ProbeError::Socket)?;
        socket.set_nonblocking(true).map_err(ProbeError::Socket)?;
        // Abort with RST on close so recycled slots don't pile up TIME_WAIT.
        socket
            .set_linger(Some(Duration::ZERO))
            .map_err(ProbeError::Socket)?;

        let started = Instant::now();
        match socket.connect(&SockAddr::from(addr)) {
            Ok(()) => {}
            Err(e) if connect_in_progress(&e) => {}
            Err(e) => return Err(ProbeError::Connect(e)),
        }

        let mut probe = Probe {
            port,
            stream: TcpStream::from_std(socket.into()),
            token: Token(usize::MAX),
            state: RegistrationState::Unregistered,
            started,
            registrar,
        };
        probe.token = registrar
            .register(&mut probe.stream, Interest::WRITABLE)
            .map_err(ProbeError::Register)?;
        probe.state = RegistrationState::Registered;
        Ok(probe)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn state(&self) -> RegistrationState {
        self.state
    }

    /// Time at which this probe stops waiting for an answer.
    pub fn deadline(&self, timeout: Duration) -> Instant {
        self.started + timeout
    }

    /// Inspect the socket after a readiness event.
    ///
    /// Returns `None` for a spurious wakeup: no pending error, not yet
    /// connected, and no error/hangup flag. The caller keeps waiting.
    pub fn classify(&self, ev: &ReadyEvent) -> Option<PortOutcome> {
        match self.stream.take_error() {
            Ok(Some(e)) | Err(e) => return Some(classify_error(&e)),
            Ok(None) => {}
        }
        match self.stream.peer_addr() {
            Ok(_) => Some(PortOutcome::Open),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                if ev.error || ev.hangup {
                    Some(PortOutcome::Error(
                        "connection closed before handshake completed".into(),
                    ))
                } else {
                    None
                }
            }
            Err(e) => Some(classify_error(&e)),
        }
    }

    fn release(&mut self) {
        if self.state == RegistrationState::Registered {
            // The descriptor is closed right after; a failed deregister leaves
            // nothing behind once it is.
            let _ = self.registrar.deregister(&mut self.stream);
        }
        self.state = RegistrationState::Resolved;
    }
}

impl<R: Registrar> Drop for Probe<'_, R> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Wait (bounded by `timeout` measured from when the connect was issued) for
/// `probe` to settle, then release it.
///
/// Events for other tokens observed along the way are parked in `book`.
pub fn resolve<R: Registrar, W: Waiter>(
    mut probe: Probe<'_, R>,
    timeout: Duration,
    waiter: &mut W,
    book: &mut ReadyBook,
    scratch: &mut Vec<ReadyEvent>,
) -> PortOutcome {
    let deadline = probe.deadline(timeout);
    let outcome = loop {
        if let Some(ev) = book.take(probe.token) {
            if let Some(outcome) = probe.classify(&ev) {
                break outcome;
            }
        }
        let now = Instant::now();
        if now >= deadline {
            break PortOutcome::TimedOut;
        }

        scratch.clear();
        if let Err(e) = waiter.wait(deadline - now, scratch) {
            break PortOutcome::Error(format!("readiness wait failed: {e}"));
        }
        for ev in scratch.drain(..) {
            book.record(ev);
        }
    };
    book.forget(probe.token);
    probe.release();
    outcome
}

/// Map an immediate probe failure onto a scan classification.
pub fn outcome_of_failure(err: &ProbeError) -> PortOutcome {
    if err.is_refused() {
        PortOutcome::ClosedOrRefused
    } else {
        PortOutcome::Error(err.to_string())
    }
}

fn classify_error(e: &io::Error) -> PortOutcome {
    if e.kind() == io::ErrorKind::ConnectionRefused {
        PortOutcome::ClosedOrRefused
    } else {
        PortOutcome::Error(e.to_string())
    }
}

#[cfg(unix)]
fn connect_in_progress(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EINPROGRESS) || e.kind() == io::ErrorKind::WouldBlock
}

#[cfg(not(unix))]
fn connect_in_progress(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
}
