// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types shared by the message, client and router layers.
//!
//! Socket-level code keeps returning `std::io::Result` (framing errors are
//! `io::ErrorKind::InvalidData`); this enum is used where a failure carries
//! more meaning than an I/O error kind.

use std::fmt;
use std::io;

/// Result alias for echobus operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by echobus operations.
#[derive(Debug)]
pub enum Error {
    /// I/O error with underlying cause.
    Io(io::Error),
    /// A reader ran past the end of a message.
    EndOfBuffer {
        /// Bytes the read operation needed.
        requested: usize,
        /// Bytes left in the message.
        remaining: usize,
    },
    /// Payload bytes could not be interpreted (bad UTF-8, negative length...).
    InvalidData(String),
    /// The router rejected a control command.
    Command(CommandError),
    /// The session is no longer connected.
    NotConnected,
    /// Configuration value rejected by validation.
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::EndOfBuffer {
                requested,
                remaining,
            } => write!(
                f,
                "End of buffer: needed {} bytes, {} remaining",
                requested, remaining
            ),
            Error::InvalidData(msg) => write!(f, "Invalid data: {}", msg),
            Error::Command(e) => write!(f, "Command failed: {}", e),
            Error::NotConnected => write!(f, "Not connected"),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Command(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<CommandError> for Error {
    fn from(e: CommandError) -> Self {
        Error::Command(e)
    }
}

/// Error response returned by the router for a control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError {
    /// Code of the request that failed.
    pub request: i32,
    /// Human-readable reason sent by the router.
    pub message: String,
}

impl CommandError {
    /// Create a command error.
    pub fn new(request: i32, message: impl Into<String>) -> Self {
        Self {
            request,
            message: message.into(),
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (command {})", self.message, self.request)
    }
}

impl std::error::Error for CommandError {}
