// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Single-threaded I/O reactor.
//!
//! The reactor multiplexes every registered [`Handler`] (listeners and
//! connections) over one `mio::Poll`. One iteration of [`Reactor::wait`]:
//!
//! ```text
//! poll(timeout)
//!   |
//!   +-- error event ------------> deregister + disconnect
//!   +-- readable / read closed -> handle_input()  (false -> deregister)
//!   |
//! register handlers added during input
//!   |
//! for every handler: handle_output()
//!   +-- WouldBlock -> add WRITABLE interest
//!   +-- otherwise  -> drop WRITABLE interest
//!   +-- not connected -> deregister + disconnect
//! ```
//!
//! All application callbacks run inside `wait`, on the calling thread. A
//! slow callback delays delivery on every connection.
//!
//! Other threads that enqueue output wake the reactor through the shared
//! [`Waker`] returned by [`Reactor::waker`].

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};

use crate::transport::FlushResult;

// ============================================================================
// Constants
// ============================================================================

/// Token for the waker
const WAKER_TOKEN: Token = Token(0);

/// Starting token for handlers
const HANDLER_TOKEN_START: usize = 1;

/// Maximum events to process per poll
const MAX_EVENTS: usize = 128;

/// Poll timeout cap while some handler still has unwritten output
const PENDING_WRITE_TIMEOUT: Duration = Duration::from_millis(1);

// ============================================================================
// Handler
// ============================================================================

/// A file-descriptor-bearing participant of the reactor.
///
/// Methods take `&self`: handlers are shared with application threads and
/// guard their own state.
pub trait Handler: Send + Sync {
    /// Descriptor to poll. Must stay open while registered.
    fn raw_fd(&self) -> RawFd;

    /// Consume everything readable right now.
    ///
    /// Return `false` to be deregistered and disconnected.
    fn handle_input(&self, ctx: &mut Context) -> bool;

    /// Write queued output.
    fn handle_output(&self) -> FlushResult {
        FlushResult::Empty
    }

    /// Whether the handler is still usable.
    fn is_connected(&self) -> bool {
        true
    }

    /// Release the handler's resources. Called once, after deregistration.
    fn disconnect(&self);

    /// Short description for logs.
    fn describe(&self) -> String {
        format!("fd {}", self.raw_fd())
    }
}

/// Per-iteration context passed to [`Handler::handle_input`].
#[derive(Default)]
pub struct Context {
    added: Vec<Arc<dyn Handler>>,
}

impl Context {
    /// Register `handler` once the current input phase ends.
    pub fn add_handler(&mut self, handler: Arc<dyn Handler>) {
        self.added.push(handler);
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("added", &self.added.len())
            .finish()
    }
}

// ============================================================================
// Reactor
// ============================================================================

struct Registration {
    handler: Arc<dyn Handler>,
    fd: RawFd,
    /// WRITABLE interest currently registered
    writable: bool,
}

/// Readiness captured from one poll, copied out before dispatch.
#[derive(Debug, Clone, Copy)]
struct Readiness {
    token: Token,
    error: bool,
    readable: bool,
}

/// Event loop driving registered handlers.
pub struct Reactor {
    poll: Poll,
    events: Events,
    handlers: HashMap<Token, Registration>,
    next_token: usize,
    waker: Arc<Waker>,
}

impl Reactor {
    /// Create an empty reactor.
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        Ok(Self {
            poll,
            events: Events::with_capacity(MAX_EVENTS),
            handlers: HashMap::new(),
            next_token: HANDLER_TOKEN_START,
            waker,
        })
    }

    /// Waker that interrupts a blocked [`wait`](Self::wait).
    pub fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Register a handler for read readiness.
    pub fn add_handler(&mut self, handler: Arc<dyn Handler>) -> io::Result<Token> {
        let token = Token(self.next_token);
        self.next_token += 1;

        let fd = handler.raw_fd();
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), token, Interest::READABLE)?;
        log::debug!("[reactor] registered {} as {:?}", handler.describe(), token);

        self.handlers.insert(
            token,
            Registration {
                handler,
                fd,
                writable: false,
            },
        );
        Ok(token)
    }

    /// Deregister and disconnect a handler.
    pub fn remove_handler(&mut self, token: Token) -> bool {
        match self.handlers.remove(&token) {
            Some(registration) => {
                let _ = self
                    .poll
                    .registry()
                    .deregister(&mut SourceFd(&registration.fd));
                log::debug!("[reactor] removing {}", registration.handler.describe());
                registration.handler.disconnect();
                true
            }
            None => false,
        }
    }

    /// Run the event loop.
    ///
    /// Returns once `timeout` has elapsed (`None` = until no handlers remain)
    /// or the handler set becomes empty. The result tells whether handlers
    /// remain. `Some(Duration::ZERO)` runs exactly one non-blocking iteration.
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut pending_writes = false;

        loop {
            if self.handlers.is_empty() {
                return Ok(false);
            }

            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let poll_timeout = if pending_writes {
                Some(remaining.map_or(PENDING_WRITE_TIMEOUT, |r| r.min(PENDING_WRITE_TIMEOUT)))
            } else {
                remaining
            };

            match self.poll.poll(&mut self.events, poll_timeout) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }

            let ready: Vec<Readiness> = self
                .events
                .iter()
                .filter(|event| event.token() != WAKER_TOKEN)
                .map(|event| Readiness {
                    token: event.token(),
                    error: event.is_error(),
                    readable: event.is_readable() || event.is_read_closed(),
                })
                .collect();

            self.dispatch_input(&ready);
            pending_writes = self.dispatch_output();

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Ok(!self.handlers.is_empty());
                }
            }
        }
    }

    fn dispatch_input(&mut self, ready: &[Readiness]) {
        let mut ctx = Context::default();

        for readiness in ready {
            let handler = match self.handlers.get(&readiness.token) {
                Some(registration) => Arc::clone(&registration.handler),
                None => continue,
            };

            if readiness.error {
                log::debug!("[reactor] error event on {}", handler.describe());
                self.remove_handler(readiness.token);
                continue;
            }
            if readiness.readable && !handler.handle_input(&mut ctx) {
                self.remove_handler(readiness.token);
            }
        }

        for handler in ctx.added {
            if let Err(e) = self.add_handler(Arc::clone(&handler)) {
                log::warn!(
                    "[reactor] failed to register {}: {}",
                    handler.describe(),
                    e
                );
                handler.disconnect();
            }
        }
    }

    /// Output phase. Returns whether any handler still has unwritten data.
    ///
    /// A handler whose interest cannot be updated is removed; the others
    /// keep running.
    fn dispatch_output(&mut self) -> bool {
        let tokens: Vec<Token> = self.handlers.keys().copied().collect();
        let mut pending_writes = false;

        for token in tokens {
            let handler = match self.handlers.get(&token) {
                Some(registration) => Arc::clone(&registration.handler),
                None => continue,
            };

            let result = handler.handle_output();
            if !handler.is_connected() {
                self.remove_handler(token);
                continue;
            }

            let want_writable = result == FlushResult::WouldBlock;
            if let Err(e) = self.set_writable(token, want_writable) {
                log::warn!(
                    "[reactor] failed to update interest of {}: {}",
                    handler.describe(),
                    e
                );
                self.remove_handler(token);
                continue;
            }
            pending_writes |= want_writable;
        }
        pending_writes
    }

    fn set_writable(&mut self, token: Token, writable: bool) -> io::Result<()> {
        let Some(registration) = self.handlers.get_mut(&token) else {
            return Ok(());
        };
        if registration.writable == writable {
            return Ok(());
        }
        let interest = if writable {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        self.poll
            .registry()
            .reregister(&mut SourceFd(&registration.fd), token, interest)?;
        registration.writable = writable;
        Ok(())
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        let tokens: Vec<Token> = self.handlers.keys().copied().collect();
        for token in tokens {
            self.remove_handler(token);
        }
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("handlers", &self.handlers.len())
            .field("next_token", &self.next_token)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EchoConfig;
    use crate::message::Message;
    use crate::transport::{Connection, FrameCodec};
    use parking_lot::Mutex;
    use std::io::{Read, Write};
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Echoes every message back on channel + 1.
    struct EchoHandler {
        fd: RawFd,
        conn: Mutex<Connection>,
        disconnected: AtomicBool,
    }

    impl EchoHandler {
        fn new(stream: UnixStream) -> Arc<Self> {
            stream.set_nonblocking(true).unwrap();
            let fd = stream.as_raw_fd();
            let stream = mio::net::UnixStream::from_std(stream);
            Arc::new(Self {
                fd,
                conn: Mutex::new(Connection::new(Box::new(stream), &EchoConfig::default(), 0)),
                disconnected: AtomicBool::new(false),
            })
        }
    }

    impl Handler for EchoHandler {
        fn raw_fd(&self) -> RawFd {
            self.fd
        }

        fn handle_input(&self, _ctx: &mut Context) -> bool {
            let mut conn = self.conn.lock();
            let mut notices = Vec::new();
            for message in conn.recv_all() {
                let reply = message.with_channel(message.channel() + 1);
                conn.send(reply, 0, None, &mut notices);
            }
            conn.is_connected()
        }

        fn handle_output(&self) -> FlushResult {
            let mut notices = Vec::new();
            self.conn
                .lock()
                .flush(&mut notices)
                .unwrap_or(FlushResult::Empty)
        }

        fn is_connected(&self) -> bool {
            self.conn.lock().is_connected()
        }

        fn disconnect(&self) {
            self.conn.lock().close();
            self.disconnected.store(true, Ordering::SeqCst);
        }
    }

    fn read_frame(stream: &mut UnixStream) -> Message {
        let mut codec = FrameCodec::new(1024);
        loop {
            if let Some(message) = codec.decode(stream).unwrap() {
                return message;
            }
        }
    }

    #[test]
    fn test_echo_round_trip() {
        let (local, mut remote) = UnixStream::pair().unwrap();
        let mut reactor = Reactor::new().unwrap();
        reactor.add_handler(EchoHandler::new(local)).unwrap();

        remote
            .write_all(&FrameCodec::encode(&Message::from_bytes(7, b"ping".to_vec())))
            .unwrap();
        assert!(reactor.wait(Some(Duration::from_millis(50))).unwrap());

        let reply = read_frame(&mut remote);
        assert_eq!(reply.channel(), 8);
        assert_eq!(reply.to_vec(), b"ping");
    }

    #[test]
    fn test_hangup_removes_handler() {
        let (local, remote) = UnixStream::pair().unwrap();
        let handler = EchoHandler::new(local);
        let mut reactor = Reactor::new().unwrap();
        reactor.add_handler(handler.clone()).unwrap();

        drop(remote);
        let remaining = reactor.wait(Some(Duration::from_secs(2))).unwrap();
        assert!(!remaining);
        assert!(reactor.is_empty());
        assert!(handler.disconnected.load(Ordering::SeqCst));
    }

    #[test]
    fn test_empty_reactor_returns_immediately() {
        let mut reactor = Reactor::new().unwrap();
        assert!(!reactor.wait(None).unwrap());
    }

    #[test]
    fn test_zero_timeout_single_iteration() {
        let (local, _remote) = UnixStream::pair().unwrap();
        let mut reactor = Reactor::new().unwrap();
        reactor.add_handler(EchoHandler::new(local)).unwrap();
        let start = Instant::now();
        assert!(reactor.wait(Some(Duration::ZERO)).unwrap());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    /// Counts output phases.
    struct CountingHandler {
        stream: UnixStream,
        outputs: AtomicUsize,
    }

    impl Handler for CountingHandler {
        fn raw_fd(&self) -> RawFd {
            self.stream.as_raw_fd()
        }

        fn handle_input(&self, _ctx: &mut Context) -> bool {
            true
        }

        fn handle_output(&self) -> FlushResult {
            self.outputs.fetch_add(1, Ordering::SeqCst);
            FlushResult::Empty
        }

        fn disconnect(&self) {}
    }

    #[test]
    fn test_waker_interrupts_poll() {
        let (local, _remote) = UnixStream::pair().unwrap();
        let handler = Arc::new(CountingHandler {
            stream: local,
            outputs: AtomicUsize::new(0),
        });
        let mut reactor = Reactor::new().unwrap();
        reactor.add_handler(handler.clone()).unwrap();

        reactor.waker().wake().unwrap();
        reactor.wait(Some(Duration::from_millis(100))).unwrap();
        assert!(handler.outputs.load(Ordering::SeqCst) >= 2);
    }

    /// Closes its descriptor during the first output phase and asks for
    /// write interest, so the interest update fails.
    struct ClosingHandler {
        fd: RawFd,
        stream: Mutex<Option<UnixStream>>,
        disconnected: AtomicBool,
    }

    impl Handler for ClosingHandler {
        fn raw_fd(&self) -> RawFd {
            self.fd
        }

        fn handle_input(&self, _ctx: &mut Context) -> bool {
            true
        }

        fn handle_output(&self) -> FlushResult {
            self.stream.lock().take();
            FlushResult::WouldBlock
        }

        fn is_connected(&self) -> bool {
            !self.disconnected.load(Ordering::SeqCst)
        }

        fn disconnect(&self) {
            self.disconnected.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_interest_failure_removes_only_that_handler() {
        let (local, _remote) = UnixStream::pair().unwrap();
        let closing = Arc::new(ClosingHandler {
            fd: local.as_raw_fd(),
            stream: Mutex::new(Some(local)),
            disconnected: AtomicBool::new(false),
        });
        let (healthy_local, mut healthy_remote) = UnixStream::pair().unwrap();
        let healthy = EchoHandler::new(healthy_local);

        let mut reactor = Reactor::new().unwrap();
        reactor.add_handler(closing.clone()).unwrap();
        reactor.add_handler(healthy.clone()).unwrap();

        assert!(reactor.wait(Some(Duration::ZERO)).unwrap());
        assert!(closing.disconnected.load(Ordering::SeqCst));
        assert_eq!(reactor.len(), 1);

        healthy_remote
            .write_all(&FrameCodec::encode(&Message::from_bytes(3, b"still here".to_vec())))
            .unwrap();
        assert!(reactor.wait(Some(Duration::from_millis(50))).unwrap());
        let reply = read_frame(&mut healthy_remote);
        assert_eq!(reply.channel(), 4);
        assert!(!healthy.disconnected.load(Ordering::SeqCst));
    }

    #[test]
    fn test_large_output_uses_write_interest() {
        let (local, mut remote) = UnixStream::pair().unwrap();
        let mut reactor = Reactor::new().unwrap();
        reactor.add_handler(EchoHandler::new(local)).unwrap();

        let count = 200;
        let mut wire = Vec::new();
        for i in 0..count {
            FrameCodec::encode_into(&Message::from_bytes(i, vec![i as u8; 40_000]), &mut wire);
        }

        let writer = {
            let mut remote = remote.try_clone().unwrap();
            std::thread::spawn(move || remote.write_all(&wire).unwrap())
        };

        remote
            .set_read_timeout(Some(Duration::from_millis(1)))
            .unwrap();
        let mut codec = FrameCodec::new(64 * 1024);
        let mut got = 0;
        let mut buf = vec![0u8; 64 * 1024];
        let start = Instant::now();
        while got < count && start.elapsed() < Duration::from_secs(20) {
            reactor.wait(Some(Duration::from_millis(5))).unwrap();
            loop {
                match remote.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let messages = codec.feed(&buf[..n]).unwrap();
                        for m in messages {
                            assert_eq!(m.channel(), got + 1);
                            got += 1;
                        }
                    }
                    Err(e)
                        if e.kind() == io::ErrorKind::WouldBlock
                            || e.kind() == io::ErrorKind::TimedOut =>
                    {
                        break
                    }
                    Err(e) => panic!("{}", e),
                }
            }
        }
        writer.join().unwrap();
        assert_eq!(got, count);
    }
}
