// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message model: immutable, reference-counted byte spans tagged with a channel.
//!
//! A [`Message`] never owns its bytes directly. It points at a [`Buffer`]
//! which may be contiguous memory, a composite of other buffers, or a view
//! into another message. Cloning a message is a reference-count bump, so the
//! same payload can sit in many outgoing queues at once.
//!
//! # Example
//!
//! ```
//! use echobus::message::{Message, MessageReader, MessageWriter};
//!
//! let mut writer = MessageWriter::new();
//! writer.write_i32(42);
//! writer.write_string("hello");
//! let message = writer.into_message(7);
//!
//! let mut reader = MessageReader::new(&message);
//! assert_eq!(reader.read_i32().unwrap(), 42);
//! assert_eq!(reader.read_string().unwrap(), "hello");
//! ```

pub mod buffer;
pub mod dictionary;
pub mod reader;
pub mod writer;

use std::fmt;
use std::sync::Arc;

pub use buffer::{Buffer, MemoryBuffer, MultiBuffer, OffsetBuffer, SharedBuffer, SliceBuffer};
pub use dictionary::Dictionary;
pub use reader::{MessageReader, Unpack};
pub use writer::{MessageWriter, Pack};

use crate::error::Result;

/// Numeric channel identifier. Channel 0 is the control channel.
pub type ChannelId = u32;

/// Reserved channel carrying control commands.
pub const CONTROL_CHANNEL: ChannelId = 0;

/// Immutable logical unit of data with a channel tag.
#[derive(Clone)]
pub struct Message {
    channel: ChannelId,
    body: SharedBuffer,
}

impl Message {
    /// Create a message over an existing buffer.
    pub fn new(channel: ChannelId, body: SharedBuffer) -> Self {
        Self { channel, body }
    }

    /// Create a message owning `data`.
    pub fn from_bytes(channel: ChannelId, data: Vec<u8>) -> Self {
        Self::new(channel, Arc::new(MemoryBuffer::new(data)))
    }

    /// Create a message concatenating `parts` without copying them.
    pub fn from_buffers<I>(channel: ChannelId, parts: I) -> Self
    where
        I: IntoIterator<Item = SharedBuffer>,
    {
        Self::new(channel, Arc::new(MultiBuffer::new(parts)))
    }

    /// Serialize `value` into a new message.
    pub fn pack<T: Pack + ?Sized>(channel: ChannelId, value: &T) -> Self {
        let mut writer = MessageWriter::new();
        value.pack(&mut writer);
        writer.into_message(channel)
    }

    /// Deserialize the whole message as `T`.
    pub fn unpack<T: Unpack>(&self) -> Result<T> {
        let mut reader = MessageReader::new(self);
        T::unpack(&mut reader)
    }

    /// Channel tag.
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Same payload, different channel tag.
    pub fn with_channel(&self, channel: ChannelId) -> Self {
        Self {
            channel,
            body: Arc::clone(&self.body),
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Check if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Copy payload bytes starting at `position` into `out`.
    pub fn copy_to(&self, position: usize, out: &mut [u8]) -> usize {
        self.body.copy_to(position, out)
    }

    /// View of the payload with the first `skip` bytes removed.
    pub fn offset(&self, skip: usize) -> Self {
        Self::new(
            self.channel,
            Arc::new(OffsetBuffer::new(Arc::clone(&self.body), skip)),
        )
    }

    /// View of `len` payload bytes starting at `start`.
    pub fn slice(&self, start: usize, len: usize) -> Self {
        Self::new(
            self.channel,
            Arc::new(SliceBuffer::new(Arc::clone(&self.body), start, len)),
        )
    }

    /// Shared handle to the underlying buffer.
    pub fn buffer(&self) -> SharedBuffer {
        Arc::clone(&self.body)
    }

    /// Copy the whole payload into a `Vec`.
    pub fn to_vec(&self) -> Vec<u8> {
        buffer::to_vec(self.body.as_ref())
    }
}

impl Buffer for Message {
    fn len(&self) -> usize {
        self.body.len()
    }

    fn copy_to(&self, position: usize, out: &mut [u8]) -> usize {
        self.body.copy_to(position, out)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("channel", &self.channel)
            .field("len", &self.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
