// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Growable little-endian writer for building message payloads.

use super::{ChannelId, Message};

/// Builds a payload from primitives, strings and length-prefixed vectors.
///
/// Layout rules (shared with [`MessageReader`](super::MessageReader)):
/// integers and floats are little-endian, `bool` is one byte, strings and
/// vectors carry an `i32` length prefix.
#[derive(Debug, Default, Clone)]
pub struct MessageWriter {
    data: Vec<u8>,
}

impl MessageWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with preallocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if nothing was written.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow the written bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn write_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.data.push(u8::from(value));
    }

    pub fn write_i32(&mut self, value: i32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Write raw bytes without a length prefix.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Write an `i32` length followed by the UTF-8 bytes.
    pub fn write_string(&mut self, value: &str) {
        self.write_i32(value.len() as i32);
        self.data.extend_from_slice(value.as_bytes());
    }

    /// Write an `i32` element count followed by each element.
    pub fn write_vec<T: Pack>(&mut self, values: &[T]) {
        self.write_i32(values.len() as i32);
        for value in values {
            value.pack(self);
        }
    }

    /// Finish into a message on `channel`.
    pub fn into_message(self, channel: ChannelId) -> Message {
        Message::from_bytes(channel, self.data)
    }

    /// Finish into the raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Types that know how to serialize themselves into a message payload.
///
/// This is the extension point typed codecs hook into; see
/// [`Message::pack`](super::Message::pack).
pub trait Pack {
    fn pack(&self, writer: &mut MessageWriter);
}

macro_rules! impl_pack {
    ($($ty:ty => $method:ident),* $(,)?) => {
        $(
            impl Pack for $ty {
                fn pack(&self, writer: &mut MessageWriter) {
                    writer.$method(*self);
                }
            }
        )*
    };
}

impl_pack! {
    u8 => write_u8,
    bool => write_bool,
    i32 => write_i32,
    i64 => write_i64,
    f32 => write_f32,
    f64 => write_f64,
}

impl Pack for str {
    fn pack(&self, writer: &mut MessageWriter) {
        writer.write_string(self);
    }
}

impl Pack for String {
    fn pack(&self, writer: &mut MessageWriter) {
        writer.write_string(self);
    }
}

impl<T: Pack> Pack for Vec<T> {
    fn pack(&self, writer: &mut MessageWriter) {
        writer.write_vec(self);
    }
}
