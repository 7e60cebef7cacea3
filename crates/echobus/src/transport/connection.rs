// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Framed, queued connection over a [`ByteStream`].
//!
//! A [`Connection`] owns:
//! - the stream and its inbound [`FrameCodec`] state;
//! - an [`OutgoingQueue`] plus the cursor of the frame currently being written;
//! - statistics and peer metadata (description, credentials, optional name).
//!
//! Outbound frames are never serialized as a whole. The header is built once
//! and the payload is copied out of its [`Buffer`](crate::message::Buffer)
//! through a staging buffer, so partial writes resume at the exact byte.
//!
//! ```text
//! send() --> OutgoingQueue --pop--> PendingWrite{header, payload, position}
//!                                          |
//!                                 staging  v
//!                               write() ---> socket
//! ```

use std::fmt;
use std::io::{self, Write};
use std::net::Shutdown;

use super::byte_stream::{BoxedByteStream, ByteStream, PeerCredentials};
use super::frame_codec::{FrameCodec, FRAME_HEADER_SIZE};
use super::queue::{
    Delivery, DeliveryNotice, DropReason, MessageCallback, OutgoingQueue, PushOutcome,
    QueuedMessage,
};
use crate::config::EchoConfig;
use crate::message::Message;

// ============================================================================
// Connection State
// ============================================================================

/// Connection state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Connection established and operational
    #[default]
    Connected,

    /// Connection terminated (EOF, error or local close)
    Closed,
}

impl ConnectionState {
    /// Check if the connection can send/receive data.
    pub fn is_operational(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

// ============================================================================
// Flush Result
// ============================================================================

/// Result of a flush operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushResult {
    /// All queued data was sent
    Complete,

    /// Some data remains in the queue (would block)
    WouldBlock,

    /// Queue is empty, nothing to flush
    Empty,
}

// ============================================================================
// Connection Statistics
// ============================================================================

/// Statistics for a connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Messages fully written
    pub messages_sent: u64,

    /// Messages decoded
    pub messages_received: u64,

    /// Bytes written (including framing)
    pub bytes_sent: u64,

    /// Bytes read (including framing)
    pub bytes_received: u64,

    /// Messages shed by the outgoing queue
    pub messages_dropped: u64,

    /// Payload bytes shed by the outgoing queue
    pub bytes_dropped: u64,

    /// Writes that did not take the whole staging buffer
    pub partial_sends: u64,
}

// ============================================================================
// Pending write
// ============================================================================

/// Frame being written: header, payload source and byte cursor.
struct PendingWrite {
    entry: QueuedMessage,
    header: [u8; FRAME_HEADER_SIZE],
    /// Position within header + payload
    position: usize,
}

impl PendingWrite {
    fn new(entry: QueuedMessage) -> Self {
        let message = entry.message();
        let header = FrameCodec::encode_header(message.channel(), message.len());
        Self {
            entry,
            header,
            position: 0,
        }
    }

    fn total_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.entry.message().len()
    }

    /// Copy the next unwritten bytes into `staging`.
    fn fill(&self, staging: &mut [u8]) -> usize {
        let mut filled = 0;
        let mut position = self.position;
        if position < FRAME_HEADER_SIZE {
            let n = (FRAME_HEADER_SIZE - position).min(staging.len());
            staging[..n].copy_from_slice(&self.header[position..position + n]);
            filled = n;
            position += n;
        }
        if position >= FRAME_HEADER_SIZE && filled < staging.len() {
            filled += self
                .entry
                .message()
                .copy_to(position - FRAME_HEADER_SIZE, &mut staging[filled..]);
        }
        filled
    }
}

/// Write `pending` until it completes (`Ok(true)`) or the socket is full (`Ok(false)`).
fn write_pending(
    stream: &mut dyn ByteStream,
    staging: &mut [u8],
    pending: &mut PendingWrite,
    stats: &mut ConnectionStats,
) -> io::Result<bool> {
    while pending.position < pending.total_len() {
        let filled = pending.fill(staging);
        match stream.write(&staging[..filled]) {
            Ok(0) => {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "connection closed"));
            }
            Ok(n) => {
                if n < filled {
                    stats.partial_sends += 1;
                }
                stats.bytes_sent += n as u64;
                pending.position += n;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

// ============================================================================
// Connection
// ============================================================================

/// A framed connection with a prioritized outgoing queue.
pub struct Connection {
    /// Underlying byte stream
    stream: BoxedByteStream,

    /// Inbound frame decoder
    codec: FrameCodec,

    /// Outbound messages waiting for the socket
    queue: OutgoingQueue,

    /// Frame partially written to the socket
    pending: Option<PendingWrite>,

    /// Write staging buffer
    staging: Vec<u8>,

    /// Current connection state
    state: ConnectionState,

    /// Connection statistics
    stats: ConnectionStats,

    /// Peer description for logs
    peer: String,

    /// Peer process credentials, when the socket family provides them
    credentials: Option<PeerCredentials>,

    /// Name announced by the peer
    name: String,
}

impl Connection {
    /// Wrap an established, non-blocking stream.
    pub fn new(stream: BoxedByteStream, config: &EchoConfig, queue_capacity: usize) -> Self {
        let peer = stream.peer_description();
        let credentials = stream.peer_credentials();
        Self {
            stream,
            codec: FrameCodec::with_buffer_size(config.max_message_size, config.read_buffer_size),
            queue: OutgoingQueue::new(queue_capacity),
            pending: None,
            staging: vec![0u8; config.read_buffer_size.max(FRAME_HEADER_SIZE)],
            state: ConnectionState::Connected,
            stats: ConnectionStats::default(),
            peer,
            credentials,
            name: String::new(),
        }
    }

    // ========================================================================
    // Getters
    // ========================================================================

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_operational()
    }

    pub fn stats(&self) -> ConnectionStats {
        let mut stats = self.stats;
        stats.bytes_received = self.codec.bytes_read();
        stats
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn credentials(&self) -> Option<PeerCredentials> {
        self.credentials
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Messages waiting in the outgoing queue (not counting a partial write).
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Check if anything is waiting to be written.
    pub fn has_pending_output(&self) -> bool {
        self.pending.is_some() || !self.queue.is_empty()
    }

    /// Raw bytes read from the socket so far.
    pub fn bytes_read(&self) -> u64 {
        self.codec.bytes_read()
    }

    pub fn stream(&self) -> &dyn ByteStream {
        &*self.stream
    }

    // ========================================================================
    // Send operations
    // ========================================================================

    /// Queue a message.
    ///
    /// Returns whether the message was accepted. Notifications for shed
    /// messages (this one or an evicted one) are appended to `notices`.
    /// Messages above the frame size limit are refused as
    /// `Dropped(TooLarge)`; the peer would treat them as a framing error.
    pub fn send(
        &mut self,
        message: Message,
        priority: i32,
        callback: Option<MessageCallback>,
        notices: &mut Vec<DeliveryNotice>,
    ) -> bool {
        if !self.state.is_operational() {
            if let Some(callback) = callback {
                notices.push(DeliveryNotice::new(
                    message,
                    Delivery::Dropped(DropReason::Disconnected),
                    callback,
                ));
            }
            return false;
        }

        if message.len() > self.codec.max_size() {
            log::warn!(
                "[connection] {}: refusing {} byte message on channel {} (limit {})",
                self.peer,
                message.len(),
                message.channel(),
                self.codec.max_size()
            );
            self.stats.messages_dropped += 1;
            self.stats.bytes_dropped += message.len() as u64;
            if let Some(callback) = callback {
                notices.push(DeliveryNotice::new(
                    message,
                    Delivery::Dropped(DropReason::TooLarge),
                    callback,
                ));
            }
            return false;
        }

        let outcome = self.queue.push(message, priority, callback);
        let accepted = outcome.is_accepted();
        if let PushOutcome::Replaced(entry) | PushOutcome::Rejected(entry) = &outcome {
            self.stats.messages_dropped += 1;
            self.stats.bytes_dropped += entry.message().len() as u64;
        }
        notices.extend(outcome.into_notice());
        accepted
    }

    /// Write queued messages until the socket would block.
    ///
    /// Returns:
    /// - `Complete` - All data was sent
    /// - `WouldBlock` - Socket buffer full, call again when writable
    /// - `Empty` - No data to send
    ///
    /// Notifications for messages fully written are appended to `notices`.
    pub fn flush(&mut self, notices: &mut Vec<DeliveryNotice>) -> io::Result<FlushResult> {
        if !self.state.is_operational() || !self.has_pending_output() {
            return Ok(FlushResult::Empty);
        }

        loop {
            if self.pending.is_none() {
                match self.queue.pop() {
                    Some(entry) => self.pending = Some(PendingWrite::new(entry)),
                    None => break,
                }
            }
            let Some(pending) = self.pending.as_mut() else {
                break;
            };

            match write_pending(&mut *self.stream, &mut self.staging, pending, &mut self.stats) {
                Ok(true) => {
                    if let Some(done) = self.pending.take() {
                        self.stats.messages_sent += 1;
                        notices.extend(done.entry.finish(Delivery::Sent));
                    }
                }
                Ok(false) => return Ok(FlushResult::WouldBlock),
                Err(e) => {
                    log::debug!("[connection] write to {} failed: {}", self.peer, e);
                    self.state = ConnectionState::Closed;
                    return Err(e);
                }
            }
        }

        let _ = self.stream.flush();
        Ok(FlushResult::Complete)
    }

    // ========================================================================
    // Receive operations
    // ========================================================================

    /// Try to receive a message.
    ///
    /// Returns:
    /// - `Ok(Some(message))` - A complete message was received
    /// - `Ok(None)` - Nothing complete yet, or the peer closed (see `state()`)
    /// - `Err(e)` - I/O or framing error; the connection is unusable
    pub fn recv(&mut self) -> io::Result<Option<Message>> {
        if !self.state.is_operational() {
            return Ok(None);
        }

        match self.codec.decode(&mut *self.stream) {
            Ok(Some(message)) => {
                self.stats.messages_received += 1;
                Ok(Some(message))
            }
            Ok(None) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                log::debug!("[connection] {} closed by peer", self.peer);
                self.state = ConnectionState::Closed;
                Ok(None)
            }
            Err(e) => {
                if e.kind() == io::ErrorKind::InvalidData {
                    log::warn!("[connection] framing error from {}: {}", self.peer, e);
                }
                self.state = ConnectionState::Closed;
                Err(e)
            }
        }
    }

    /// Receive all available messages (non-blocking).
    ///
    /// Stops at WouldBlock, EOF or the first error; messages decoded before
    /// an error are still returned and the error is reported through `state()`.
    pub fn recv_all(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Ok(Some(message)) = self.recv() {
            messages.push(message);
        }
        messages
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Shut the socket down and drop everything still queued.
    ///
    /// The file descriptor itself is released when the connection is dropped.
    pub fn close(&mut self) -> Vec<DeliveryNotice> {
        self.state = ConnectionState::Closed;
        let _ = self.stream.shutdown(Shutdown::Both);

        let delivery = Delivery::Dropped(DropReason::Disconnected);
        let mut notices: Vec<DeliveryNotice> = self
            .pending
            .take()
            .and_then(|pending| pending.entry.finish(delivery))
            .into_iter()
            .collect();
        notices.extend(self.queue.drain_all(delivery));
        notices
    }

    /// Take a socket error if any.
    pub fn take_error(&self) -> io::Result<Option<io::Error>> {
        self.stream.take_error()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("queue", &self.queue.len())
            .field("pending", &self.pending.is_some())
            .field("stats", &self.stats)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
