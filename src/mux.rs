//! Readiness multiplexing behind a small capability interface.
//!
//! The engine only needs two things from the OS event facility: attach a
//! socket and get a token back, and block (bounded) until some tokens become
//! ready. [`Registrar`] and [`Waiter`] are those two halves. They are split so
//! in-flight probes can hold the registration side while the worker owns the
//! waiting side mutably.
//!
//! [`open`] returns the mio-backed pair, which maps onto epoll, kqueue or
//! IOCP depending on the platform.
use mio::event::Source;
use mio::{Events, Interest, Poll, Registry, Token};
use std::cell::Cell;
use std::collections::HashMap;
use std::io;
use std::time::Duration;

/// Attach and detach event sources.
pub trait Registrar {
    fn register<S: Source + ?Sized>(&self, source: &mut S, interest: Interest)
        -> io::Result<Token>;
    fn deregister<S: Source + ?Sized>(&self, source: &mut S) -> io::Result<()>;
}

/// Block until registered sources report readiness or the timeout expires.
pub trait Waiter {
    /// Appends every event observed during this wait to `ready`. An empty
    /// append means the timeout elapsed.
    fn wait(&mut self, timeout: Duration, ready: &mut Vec<ReadyEvent>) -> io::Result<()>;
}

/// One readiness notification, flattened out of the platform event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyEvent {
    pub token: Token,
    pub writable: bool,
    pub error: bool,
    pub hangup: bool,
}

impl ReadyEvent {
    pub fn merge(&mut self, other: &ReadyEvent) {
        self.writable |= other.writable;
        self.error |= other.error;
        self.hangup |= other.hangup;
    }
}

/// Events that arrived for tokens other than the one currently being resolved.
///
/// A worker waits on one probe at a time, but every wait can also report
/// readiness for younger probes in the same pool. Those are parked here until
/// their turn comes.
#[derive(Debug, Default)]
pub struct ReadyBook {
    pending: HashMap<Token, ReadyEvent>,
}

impl ReadyBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, ev: ReadyEvent) {
        self.pending
            .entry(ev.token)
            .and_modify(|e| e.merge(&ev))
            .or_insert(ev);
    }

    pub fn take(&mut self, token: Token) -> Option<ReadyEvent> {
        self.pending.remove(&token)
    }

    pub fn forget(&mut self, token: Token) {
        self.pending.remove(&token);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Registration half backed by a cloned [`mio::Registry`].
#[derive(Debug)]
pub struct MioRegistrar {
    registry: Registry,
    next_token: Cell<usize>,
}

impl Registrar for MioRegistrar {
    fn register<S: Source + ?Sized>(
        &self,
        source: &mut S,
        interest: Interest,
    ) -> io::Result<Token> {
        let token = Token(self.next_token.get());
        self.registry.register(source, token, interest)?;
        // Tokens are never reused within one worker, so a late event can't be
        // mistaken for a newer probe in the same slot.
        self.next_token.set(token.0.wrapping_add(1));
        Ok(token)
    }

    fn deregister<S: Source + ?Sized>(&self, source: &mut S) -> io::Result<()> {
        self.registry.deregister(source)
    }
}

/// Waiting half backed by [`mio::Poll`].
#[derive(Debug)]
pub struct MioWaiter {
    poll: Poll,
    events: Events,
}

impl Waiter for MioWaiter {
    fn wait(&mut self, timeout: Duration, ready: &mut Vec<ReadyEvent>) -> io::Result<()> {
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            // A signal cut the wait short; the caller re-checks its deadline.
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }
        ready.extend(self.events.iter().map(|ev| ReadyEvent {
            token: ev.token(),
            writable: ev.is_writable(),
            error: ev.is_error(),
            hangup: ev.is_write_closed() || ev.is_read_closed(),
        }));
        Ok(())
    }
}

/// Open a fresh multiplexer sized for `capacity` concurrent sources.
pub fn open(capacity: usize) -> io::Result<(MioRegistrar, MioWaiter)> {
    let poll = Poll::new()?;
    let registry = poll.registry().try_clone()?;
    Ok((
        MioRegistrar {
            registry,
            next_token: Cell::new(0),
        },
        MioWaiter {
            poll,
            events: Events::with_capacity(capacity.max(1)),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn ev(token: usize, writable: bool, error: bool) -> ReadyEvent {
        ReadyEvent {
            token: Token(token),
            writable,
            error,
            hangup: false,
        }
    }

    #[test]
    fn book_merges_flags_per_token() {
        let mut book = ReadyBook::new();
        book.record(ev(3, true, false));
        book.record(ev(3, false, true));
        book.record(ev(4, true, false));
        assert_eq!(book.len(), 2);

        let merged = book.take(Token(3)).unwrap();
        assert!(merged.writable && merged.error);
        assert!(book.take(Token(3)).is_none());

        book.forget(Token(4));
        assert!(book.is_empty());
    }

    #[test]
    fn wait_with_nothing_registered_times_out() {
        let (_registrar, mut waiter) = open(4).unwrap();
        let mut ready = Vec::new();
        let started = Instant::now();
        waiter.wait(Duration::from_millis(50), &mut ready).unwrap();
        assert!(ready.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn tokens_are_unique_per_registrar() {
        let (registrar, _waiter) = open(4).unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut a = mio::net::TcpStream::connect(addr).unwrap();
        let mut b = mio::net::TcpStream::connect(addr).unwrap();
        let ta = registrar.register(&mut a, Interest::WRITABLE).unwrap();
        let tb = registrar.register(&mut b, Interest::WRITABLE).unwrap();
        assert_ne!(ta, tb);
        registrar.deregister(&mut a).unwrap();
        registrar.deregister(&mut b).unwrap();
    }
}
