// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cursor for parsing message payloads written by [`MessageWriter`](super::MessageWriter).

use super::Buffer;
use crate::error::{Error, Result};

/// Sequential reader over any [`Buffer`].
///
/// Reads copy out of the buffer on demand, so parsing a composite message
/// never flattens it.
pub struct MessageReader<'a> {
    buffer: &'a dyn Buffer,
    position: usize,
}

impl<'a> MessageReader<'a> {
    /// Start reading at the beginning of `buffer`.
    pub fn new(buffer: &'a dyn Buffer) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Current read position.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        self.read_into(&mut out)?;
        Ok(out)
    }

    /// Fill `out` completely or fail without advancing.
    pub fn read_into(&mut self, out: &mut [u8]) -> Result<()> {
        if out.len() > self.remaining() {
            return Err(Error::EndOfBuffer {
                requested: out.len(),
                remaining: self.remaining(),
            });
        }
        let n = self.buffer.copy_to(self.position, out);
        self.position += n;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.read_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.read_array()?))
    }

    /// Read `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        if len > self.remaining() {
            return Err(Error::EndOfBuffer {
                requested: len,
                remaining: self.remaining(),
            });
        }
        let mut out = vec![0u8; len];
        self.read_into(&mut out)?;
        Ok(out)
    }

    fn read_length(&mut self) -> Result<usize> {
        let len = self.read_i32()?;
        usize::try_from(len).map_err(|_| Error::InvalidData(format!("negative length {}", len)))
    }

    /// Read an `i32`-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_length()?;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|e| Error::InvalidData(e.to_string()))
    }

    /// Read an `i32`-prefixed vector of `T`.
    pub fn read_vec<T: Unpack>(&mut self) -> Result<Vec<T>> {
        let count = self.read_length()?;
        // Every element takes at least one byte; guards huge bogus counts.
        if count > self.remaining() {
            return Err(Error::EndOfBuffer {
                requested: count,
                remaining: self.remaining(),
            });
        }
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(T::unpack(self)?);
        }
        Ok(out)
    }
}

/// Types that can be parsed back out of a message payload.
pub trait Unpack: Sized {
    fn unpack(reader: &mut MessageReader<'_>) -> Result<Self>;
}

macro_rules! impl_unpack {
    ($($ty:ty => $method:ident),* $(,)?) => {
        $(
            impl Unpack for $ty {
                fn unpack(reader: &mut MessageReader<'_>) -> Result<Self> {
                    reader.$method()
                }
            }
        )*
    };
}

impl_unpack! {
    u8 => read_u8,
    bool => read_bool,
    i32 => read_i32,
    i64 => read_i64,
    f32 => read_f32,
    f64 => read_f64,
    String => read_string,
}

impl<T: Unpack> Unpack for Vec<T> {
    fn unpack(reader: &mut MessageReader<'_>) -> Result<Self> {
        reader.read_vec()
    }
}

// ============================================================================
// Tests
// ============================================================================
