// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Chunking of large payloads and in-order reassembly.
//!
//! Every data message produced by a publisher starts with an `i32` sequence.
//! A sequence of `-1` marks an unchunked payload; otherwise the message is one
//! chunk of a stream identified by a random `i64`.
//!
//! ## Chunk Header Format
//!
//! ```text
//! unchunked:  | seq = -1 (i32) | payload ...
//! chunk 0:    | seq = 0 (i32) | stream id (i64) | total len (i64) | chunk size (i32) | data
//! chunk i>0:  | seq = i (i32) | stream id (i64) | data
//! ```
//!
//! All header integers are little-endian. Chunk data are zero-copy windows
//! over the original payload.
//!
//! Reassembly is strictly in order: chunk `i` is accepted only after chunk
//! `i - 1`. Anything else discards the stream.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::error::Result;
use crate::message::{Message, MessageReader, MessageWriter, SharedBuffer};

/// Sequence value of an unchunked payload
pub const UNCHUNKED_SEQUENCE: i32 = -1;

/// Header bytes of an unchunked payload
pub const UNCHUNKED_HEADER_SIZE: usize = 4;

/// Header bytes of chunks after the first (sequence + stream id)
pub const CHUNK_HEADER_SIZE: usize = 12;

/// Header bytes of the first chunk (adds total length + chunk size)
pub const FIRST_CHUNK_HEADER_SIZE: usize = 24;

// ============================================================================
// Chunker
// ============================================================================

/// Number of chunks `len` bytes split into.
pub fn chunk_count(len: usize, chunk_size: usize) -> usize {
    if chunk_size == 0 {
        return 1;
    }
    len.div_ceil(chunk_size).max(1)
}

fn header_buffer(writer: MessageWriter) -> SharedBuffer {
    Arc::new(crate::message::MemoryBuffer::new(writer.into_bytes()))
}

/// Prefix `message` with the unchunked marker.
pub fn wrap_unchunked(message: &Message) -> Message {
    let mut header = MessageWriter::with_capacity(UNCHUNKED_HEADER_SIZE);
    header.write_i32(UNCHUNKED_SEQUENCE);
    Message::from_buffers(
        message.channel(),
        [header_buffer(header), Arc::new(message.clone()) as SharedBuffer],
    )
}

/// Split `message` into chunks of at most `chunk_size` data bytes.
pub fn split(message: &Message, chunk_size: usize, stream_id: i64) -> Vec<Message> {
    let chunk_size = chunk_size.max(1);
    let total = message.len();
    let count = chunk_count(total, chunk_size);

    (0..count)
        .map(|index| {
            let start = index * chunk_size;
            let len = chunk_size.min(total - start);

            let mut header = MessageWriter::with_capacity(FIRST_CHUNK_HEADER_SIZE);
            header.write_i32(index as i32);
            header.write_i64(stream_id);
            if index == 0 {
                header.write_i64(total as i64);
                header.write_i32(chunk_size as i32);
            }

            Message::from_buffers(
                message.channel(),
                [
                    header_buffer(header),
                    Arc::new(message.slice(start, len)) as SharedBuffer,
                ],
            )
        })
        .collect()
}

/// Wire messages for one logical publish.
///
/// Payloads up to `chunk_size` bytes go out as a single unchunked message.
pub fn encode(message: &Message, chunk_size: usize, stream_id: i64) -> Vec<Message> {
    if message.len() <= chunk_size {
        vec![wrap_unchunked(message)]
    } else {
        split(message, chunk_size, stream_id)
    }
}

// ============================================================================
// Reassembler
// ============================================================================

/// Reassembly counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReassemblyStats {
    /// Streams fully reassembled
    pub completed: u64,
    /// Streams discarded after an out-of-order or inconsistent chunk
    pub abandoned: u64,
    /// Streams evicted by the pending-table capacity
    pub evicted: u64,
    /// Chunks that matched no pending stream
    pub ignored: u64,
    /// Messages whose header could not be read
    pub malformed: u64,
}

/// A chunked stream being reassembled.
struct PendingChunkedMessage {
    total_len: usize,
    slots: usize,
    parts: Vec<SharedBuffer>,
}

impl PendingChunkedMessage {
    fn is_complete(&self) -> bool {
        self.parts.len() == self.slots
    }
}

/// Result of feeding one message to the [`Reassembler`].
#[derive(Debug)]
pub enum ChunkOutcome {
    /// A whole payload is available
    Complete(Message),
    /// Chunk stored, stream still incomplete
    Pending,
    /// Chunk ignored or stream discarded
    Discarded,
}

/// Per-subscriber reassembly table.
pub struct Reassembler {
    pending: LruCache<i64, PendingChunkedMessage>,
    stats: ReassemblyStats,
}

impl Reassembler {
    /// Create a table holding at most `capacity` streams (0 = unbounded).
    pub fn new(capacity: usize) -> Self {
        let pending = match NonZeroUsize::new(capacity) {
            Some(capacity) => LruCache::new(capacity),
            None => LruCache::unbounded(),
        };
        Self {
            pending,
            stats: ReassemblyStats::default(),
        }
    }

    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }

    /// Streams currently in flight.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Feed one wire message.
    pub fn accept(&mut self, message: &Message) -> ChunkOutcome {
        match self.try_accept(message) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::debug!(
                    "[chunk] malformed message on channel {}: {}",
                    message.channel(),
                    e
                );
                self.stats.malformed += 1;
                ChunkOutcome::Discarded
            }
        }
    }

    fn try_accept(&mut self, message: &Message) -> Result<ChunkOutcome> {
        let mut reader = MessageReader::new(message);
        let sequence = reader.read_i32()?;
        if sequence < 0 {
            return Ok(ChunkOutcome::Complete(message.offset(UNCHUNKED_HEADER_SIZE)));
        }

        let stream_id = reader.read_i64()?;
        if sequence == 0 {
            let total_len = reader.read_i64()?;
            let chunk_size = reader.read_i32()?;
            if total_len < 0 || chunk_size <= 0 {
                self.stats.malformed += 1;
                return Ok(ChunkOutcome::Discarded);
            }
            let total_len = total_len as usize;
            let stream = PendingChunkedMessage {
                total_len,
                slots: chunk_count(total_len, chunk_size as usize),
                parts: vec![message.offset(FIRST_CHUNK_HEADER_SIZE).buffer()],
            };
            if let Some((evicted_id, _)) = self.pending.push(stream_id, stream) {
                if evicted_id == stream_id {
                    self.stats.abandoned += 1;
                } else {
                    log::debug!("[chunk] evicting pending stream {:#x}", evicted_id);
                    self.stats.evicted += 1;
                }
            }
            return Ok(self.complete_if_ready(stream_id, message));
        }

        // Recency is set by the first chunk only: eviction drops the stream
        // that started earliest.
        let Some(stream) = self.pending.peek_mut(&stream_id) else {
            self.stats.ignored += 1;
            return Ok(ChunkOutcome::Discarded);
        };

        if sequence as usize != stream.parts.len() || stream.is_complete() {
            log::debug!(
                "[chunk] stream {:#x}: chunk {} after {}, discarding",
                stream_id,
                sequence,
                stream.parts.len()
            );
            self.pending.pop(&stream_id);
            self.stats.abandoned += 1;
            return Ok(ChunkOutcome::Discarded);
        }

        stream.parts.push(message.offset(CHUNK_HEADER_SIZE).buffer());
        Ok(self.complete_if_ready(stream_id, message))
    }

    fn complete_if_ready(&mut self, stream_id: i64, last: &Message) -> ChunkOutcome {
        let ready = self
            .pending
            .peek(&stream_id)
            .is_some_and(PendingChunkedMessage::is_complete);
        if !ready {
            return ChunkOutcome::Pending;
        }
        let Some(stream) = self.pending.pop(&stream_id) else {
            return ChunkOutcome::Pending;
        };

        let assembled = Message::from_buffers(last.channel(), stream.parts);
        if assembled.len() != stream.total_len {
            log::debug!(
                "[chunk] stream {:#x}: assembled {} bytes, expected {}",
                stream_id,
                assembled.len(),
                stream.total_len
            );
            self.stats.abandoned += 1;
            return ChunkOutcome::Discarded;
        }
        self.stats.completed += 1;
        ChunkOutcome::Complete(assembled)
    }
}

impl fmt::Debug for Reassembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reassembler")
            .field("pending", &self.pending.len())
            .field("stats", &self.stats)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
