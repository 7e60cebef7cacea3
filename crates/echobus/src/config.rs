// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tunables shared by clients and the router.
//!
//! # Example
//!
//! ```
//! use echobus::config::EchoConfig;
//!
//! let config = EchoConfig {
//!     queue_capacity: 100,
//!     chunk_size: 4096,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::chunk::FIRST_CHUNK_HEADER_SIZE;
use crate::transport::frame_codec::{DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_READ_BUFFER_SIZE};
use crate::transport::queue::DEFAULT_QUEUE_CAPACITY;

/// Default outgoing queue capacity of router-side connections.
pub const DEFAULT_ROUTER_QUEUE_CAPACITY: usize = 10_000;

/// Default chunk size for publishers (10 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 10 * 1024;

/// Default number of reassemblies a subscriber keeps in flight.
pub const DEFAULT_PENDING_REASSEMBLY_CAPACITY: usize = 10;

/// Default SO_SNDBUF / SO_RCVBUF for accepted sockets (1 MiB).
pub const DEFAULT_SOCKET_BUFFER_SIZE: usize = 1024 * 1024;

/// Default early-flush threshold of the router (50 MB).
pub const DEFAULT_FLUSH_THRESHOLD: usize = 50 * 1000 * 1000;

/// Transport, queueing and chunking parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EchoConfig {
    // === Framing ===
    /// Largest frame payload accepted by the decoder
    pub max_message_size: usize,

    /// Socket read / write staging buffer size
    pub read_buffer_size: usize,

    // === Queueing ===
    /// Outgoing queue capacity of client connections (0 = unbounded)
    pub queue_capacity: usize,

    /// Outgoing queue capacity of router-side connections (0 = unbounded)
    pub router_queue_capacity: usize,

    // === Chunking ===
    /// Payloads larger than this are split by publishers
    pub chunk_size: usize,

    /// Concurrent reassemblies per subscriber (0 = unbounded)
    pub pending_reassembly_capacity: usize,

    // === Router ===
    /// SO_SNDBUF / SO_RCVBUF applied to accepted sockets (0 = OS default)
    pub socket_buffer_size: usize,

    /// Bytes read in one input pass after which the router flushes early
    pub flush_threshold: usize,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            router_queue_capacity: DEFAULT_ROUTER_QUEUE_CAPACITY,
            chunk_size: DEFAULT_CHUNK_SIZE,
            pending_reassembly_capacity: DEFAULT_PENDING_REASSEMBLY_CAPACITY,
            socket_buffer_size: DEFAULT_SOCKET_BUFFER_SIZE,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }
}

impl EchoConfig {
    /// Largest chunk size whose first chunk, header included, still fits in one frame.
    pub fn max_chunk_size(&self) -> usize {
        self.max_message_size.saturating_sub(FIRST_CHUNK_HEADER_SIZE)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max_message_size == 0 {
            return Err("max_message_size must be > 0");
        }
        if self.max_message_size > u32::MAX as usize {
            return Err("max_message_size does not fit the 32-bit frame length");
        }
        if self.read_buffer_size == 0 {
            return Err("read_buffer_size must be > 0");
        }
        if self.chunk_size == 0 {
            return Err("chunk_size must be > 0");
        }
        if self.chunk_size > self.max_chunk_size() {
            return Err("chunk_size plus the first-chunk header must not exceed max_message_size");
        }
        if self.flush_threshold == 0 {
            return Err("flush_threshold must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EchoConfig::default();
        assert_eq!(config.max_message_size, 51_200);
        assert_eq!(config.read_buffer_size, 102_400);
        assert_eq!(config.queue_capacity, 5000);
        assert_eq!(config.router_queue_capacity, 10_000);
        assert_eq!(config.chunk_size, 10_240);
        assert_eq!(config.pending_reassembly_capacity, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects() {
        let bad = EchoConfig {
            max_message_size: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = EchoConfig {
            chunk_size: 50 * 1024,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let ok = EchoConfig {
            queue_capacity: 0,
            pending_reassembly_capacity: 0,
            ..Default::default()
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_chunk_size_limit_tracks_header() {
        let mut config = EchoConfig {
            max_message_size: 1000,
            ..Default::default()
        };
        assert_eq!(config.max_chunk_size(), 1000 - FIRST_CHUNK_HEADER_SIZE);

        config.chunk_size = config.max_chunk_size();
        assert!(config.validate().is_ok());
        config.chunk_size += 1;
        assert!(config.validate().is_err());
    }
}
