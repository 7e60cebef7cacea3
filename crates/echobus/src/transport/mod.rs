// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stream transport: framing, outgoing queues and connections.
//!
//! # Architecture
//!
//! ```text
//! +-------------------------------------------------------------+
//! |                        Connection                           |
//! |  +-------------+  +-------------+  +---------------------+  |
//! |  | ByteStream  |  | FrameCodec  |  |   OutgoingQueue     |  |
//! |  | (Unix/TCP)  |  | (inbound)   |  |   (min-max heap)    |  |
//! |  +-------------+  +-------------+  +---------------------+  |
//! +-------------------------------------------------------------+
//!        ^                                      |
//!        | Endpoint::connect / Listener::accept | flush()
//!        |                                      v
//!   address string ("/tmp/echo.sock", "host:port")
//! ```
//!
//! # Wire Format
//!
//! ```text
//! +-----------+------------------+-----------------+----------------+
//! | 0x0F (1B) | Channel (4B BE)  | Length (4B BE)  | Payload        |
//! +-----------+------------------+-----------------+----------------+
//! ```
//!
//! # Modules
//!
//! - `frame_codec` - Channel-tagged framing codec
//! - `queue` - Priority outgoing queue with overflow shedding
//! - `byte_stream` - Stream abstraction over Unix and TCP sockets
//! - `address` - Address parsing, listeners and client connects
//! - `connection` - Framed connection with queued output

pub mod address;
pub mod byte_stream;
pub mod connection;
pub mod frame_codec;
pub mod queue;

// ============================================================================
// Re-exports
// ============================================================================

pub use address::{Endpoint, Listener, DEFAULT_SOCKET_PATH, SOCKET_ENV};
pub use byte_stream::{BoxedByteStream, ByteStream, PeerCredentials};
pub use connection::{Connection, ConnectionState, ConnectionStats, FlushResult};
pub use frame_codec::{FrameCodec, FRAME_DELIMITER, FRAME_HEADER_SIZE};
pub use queue::{
    Delivery, DeliveryNotice, DropReason, MessageCallback, MinMaxHeap, OutgoingQueue,
    PushOutcome, QueueStats,
};
