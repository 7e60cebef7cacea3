// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport addresses.
//!
//! A single address string selects the socket family:
//!
//! - contains `:` -> TCP `host:port` (an empty host binds every interface);
//! - anything else -> Unix-domain socket path.
//!
//! An empty string falls back to the `ECHOLIB_SOCKET` environment variable
//! and then to [`DEFAULT_SOCKET_PATH`].

use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::{AsRawFd, RawFd};

use super::byte_stream::BoxedByteStream;

/// Environment variable consulted when no address is given.
pub const SOCKET_ENV: &str = "ECHOLIB_SOCKET";

/// Address used when neither an explicit address nor the environment gives one.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/echo.sock";

/// A resolved transport endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Unix-domain socket path
    Unix(PathBuf),
    /// TCP `host:port`
    Tcp(String),
}

impl Endpoint {
    /// Classify a non-empty address string.
    pub fn parse(address: &str) -> Self {
        if address.contains(':') {
            Endpoint::Tcp(address.to_string())
        } else {
            Endpoint::Unix(PathBuf::from(address))
        }
    }

    /// Resolve an address, consulting `ECHOLIB_SOCKET` when it is empty.
    pub fn resolve(address: &str) -> Self {
        Self::resolve_with(address, std::env::var(SOCKET_ENV).ok())
    }

    /// Resolve an address against an explicit fallback value.
    pub fn resolve_with(address: &str, fallback: Option<String>) -> Self {
        if !address.is_empty() {
            return Self::parse(address);
        }
        match fallback {
            Some(value) if !value.is_empty() => Self::parse(&value),
            _ => Self::parse(DEFAULT_SOCKET_PATH),
        }
    }

    fn socket_addr(address: &str) -> io::Result<SocketAddr> {
        let candidate = if address.starts_with(':') {
            format!("0.0.0.0{}", address)
        } else {
            address.to_string()
        };
        candidate.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot resolve address {}", address),
            )
        })
    }

    /// Bind a non-blocking listener.
    ///
    /// A stale Unix socket file at the target path is removed first.
    pub fn bind(&self) -> io::Result<Listener> {
        match self {
            Endpoint::Unix(path) => {
                if path.exists() {
                    log::debug!("[transport] removing stale socket {}", path.display());
                    std::fs::remove_file(path)?;
                }
                let listener = mio::net::UnixListener::bind(path)?;
                Ok(Listener::Unix {
                    listener,
                    path: path.clone(),
                })
            }
            Endpoint::Tcp(address) => {
                let addr = Self::socket_addr(address)?;
                Ok(Listener::Tcp(mio::net::TcpListener::bind(addr)?))
            }
        }
    }

    /// Open a non-blocking client stream.
    ///
    /// The connect itself is blocking so errors such as "no such file" or
    /// "connection refused" are reported here rather than on first use.
    pub fn connect(&self) -> io::Result<BoxedByteStream> {
        match self {
            Endpoint::Unix(path) => {
                let stream = std::os::unix::net::UnixStream::connect(path)?;
                stream.set_nonblocking(true)?;
                Ok(Box::new(mio::net::UnixStream::from_std(stream)))
            }
            Endpoint::Tcp(address) => {
                let stream = std::net::TcpStream::connect(Self::socket_addr(address)?)?;
                stream.set_nodelay(true)?;
                stream.set_nonblocking(true)?;
                Ok(Box::new(mio::net::TcpStream::from_std(stream)))
            }
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            Endpoint::Tcp(address) => write!(f, "tcp:{}", address),
        }
    }
}

/// Non-blocking listening socket.
#[derive(Debug)]
pub enum Listener {
    Unix {
        listener: mio::net::UnixListener,
        path: PathBuf,
    },
    Tcp(mio::net::TcpListener),
}

impl Listener {
    /// Accept one pending connection.
    ///
    /// Returns `WouldBlock` when the backlog is empty.
    pub fn accept(&self) -> io::Result<BoxedByteStream> {
        match self {
            Listener::Unix { listener, .. } => {
                let (stream, _) = listener.accept()?;
                Ok(Box::new(stream))
            }
            Listener::Tcp(listener) => {
                let (stream, _) = listener.accept()?;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
        }
    }

    /// Socket path of a Unix listener.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Listener::Unix { path, .. } => Some(path),
            Listener::Tcp(_) => None,
        }
    }

    /// Bound TCP address.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Listener::Unix { .. } => None,
            Listener::Tcp(listener) => listener.local_addr().ok(),
        }
    }

    #[cfg(unix)]
    pub fn as_raw_fd(&self) -> RawFd {
        match self {
            Listener::Unix { listener, .. } => listener.as_raw_fd(),
            Listener::Tcp(listener) => listener.as_raw_fd(),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Listener::Unix { path, .. } = self {
            let _ = std::fs::remove_file(path);
        }
    }
}
