// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ByteStream trait over Unix-domain and TCP sockets.
//!
//! Connections hold a `Box<dyn ByteStream>` so the same framing and queueing
//! code drives both socket families, and tests can substitute
//! [`mock::MockStream`].
//!
//! Implementations are expected to be non-blocking: reads and writes return
//! `io::ErrorKind::WouldBlock` instead of waiting.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::Shutdown;

#[cfg(unix)]
use std::os::unix::io::{AsRawFd, RawFd};

/// Process credentials of the peer of a Unix-domain socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeerCredentials {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
}

impl fmt::Display for PeerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid={} uid={} gid={}", self.pid, self.uid, self.gid)
    }
}

/// Abstraction over non-blocking byte-oriented sockets.
pub trait ByteStream: Read + Write + Send {
    /// Shutdown one or both halves of the stream.
    fn shutdown(&self, how: Shutdown) -> io::Result<()>;

    /// Take the pending socket error, if any.
    fn take_error(&self) -> io::Result<Option<io::Error>>;

    /// Human-readable peer description for logs.
    fn peer_description(&self) -> String;

    /// Peer process credentials (Unix-domain sockets on Linux only).
    fn peer_credentials(&self) -> Option<PeerCredentials> {
        None
    }

    /// Apply SO_SNDBUF / SO_RCVBUF.
    fn set_buffer_sizes(&self, _size: usize) -> io::Result<()> {
        Ok(())
    }

    /// Raw file descriptor, used for reactor registration.
    #[cfg(unix)]
    fn as_raw_fd(&self) -> RawFd;
}

/// Type alias for a boxed ByteStream.
pub type BoxedByteStream = Box<dyn ByteStream>;

#[cfg(target_os = "linux")]
fn read_peer_credentials(fd: RawFd) -> Option<PeerCredentials> {
    let mut cred = libc::ucred {
        pid: 0,
        uid: 0,
        gid: 0,
    };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

    // SAFETY:
    // - fd is a connected Unix-domain socket owned by the caller
    // - SOL_SOCKET / SO_PEERCRED are valid option constants on Linux
    // - cred is a properly aligned, stack-allocated ucred
    // - len is initialized to size_of::<ucred>() so getsockopt cannot overrun it
    let result = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            &mut cred as *mut libc::ucred as *mut libc::c_void,
            &mut len,
        )
    };

    if result == 0 {
        Some(PeerCredentials {
            pid: cred.pid,
            uid: cred.uid,
            gid: cred.gid,
        })
    } else {
        None
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
fn read_peer_credentials(_fd: RawFd) -> Option<PeerCredentials> {
    None
}

// ============================================================================
// mio implementations
// ============================================================================

#[cfg(unix)]
impl ByteStream for mio::net::UnixStream {
    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        mio::net::UnixStream::shutdown(self, how)
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        mio::net::UnixStream::take_error(self)
    }

    fn peer_description(&self) -> String {
        match self.peer_addr() {
            Ok(addr) => match addr.as_pathname() {
                Some(path) => format!("unix:{}", path.display()),
                None => "unix:<unnamed>".to_string(),
            },
            Err(_) => "unix:<unknown>".to_string(),
        }
    }

    fn peer_credentials(&self) -> Option<PeerCredentials> {
        read_peer_credentials(AsRawFd::as_raw_fd(self))
    }

    fn set_buffer_sizes(&self, size: usize) -> io::Result<()> {
        let sock_ref = socket2::SockRef::from(self);
        sock_ref.set_send_buffer_size(size)?;
        sock_ref.set_recv_buffer_size(size)
    }

    fn as_raw_fd(&self) -> RawFd {
        AsRawFd::as_raw_fd(self)
    }
}

impl ByteStream for mio::net::TcpStream {
    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        mio::net::TcpStream::shutdown(self, how)
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        mio::net::TcpStream::take_error(self)
    }

    fn peer_description(&self) -> String {
        match self.peer_addr() {
            Ok(addr) => format!("tcp:{}", addr),
            Err(_) => "tcp:<unknown>".to_string(),
        }
    }

    fn set_buffer_sizes(&self, size: usize) -> io::Result<()> {
        let sock_ref = socket2::SockRef::from(self);
        sock_ref.set_send_buffer_size(size)?;
        sock_ref.set_recv_buffer_size(size)
    }

    #[cfg(unix)]
    fn as_raw_fd(&self) -> RawFd {
        AsRawFd::as_raw_fd(self)
    }
}

// ============================================================================
// Test mock stream
// ============================================================================


// ============================================================================
// Tests
// ============================================================================
