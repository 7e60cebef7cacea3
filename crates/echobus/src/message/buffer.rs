// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Buffer variants backing [`Message`](super::Message).
//!
//! Every variant only promises two things: a length and the ability to copy
//! an arbitrary range out of itself. Composition never copies payload bytes.
//!
//! ```text
//! MultiBuffer                offsets: [0, 12, 10252]
//! +-------------+---------------------+-----------------+
//! | header (12) | SliceBuffer (10240) | MemoryBuffer(N) |
//! +-------------+---------------------+-----------------+
//!               ^ locate(13) -> part 1, local position 1
//! ```

use std::fmt;
use std::sync::Arc;

/// Random-access, lazily copyable span of bytes.
pub trait Buffer: Send + Sync {
    /// Total number of bytes.
    fn len(&self) -> usize;

    /// Copy up to `out.len()` bytes starting at `position` into `out`.
    ///
    /// Returns the number of bytes copied, which is smaller than `out.len()`
    /// only when the end of the buffer is reached.
    fn copy_to(&self, position: usize, out: &mut [u8]) -> usize;

    /// Check if the buffer holds no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared, immutable buffer handle.
pub type SharedBuffer = Arc<dyn Buffer>;

// ============================================================================
// MemoryBuffer
// ============================================================================

/// Owned contiguous bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct MemoryBuffer {
    data: Box<[u8]>,
}

impl MemoryBuffer {
    /// Wrap owned bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: data.into_boxed_slice(),
        }
    }

    /// Borrow the bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for MemoryBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBuffer")
            .field("len", &self.data.len())
            .finish()
    }
}

impl Buffer for MemoryBuffer {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn copy_to(&self, position: usize, out: &mut [u8]) -> usize {
        if position >= self.data.len() {
            return 0;
        }
        let n = out.len().min(self.data.len() - position);
        out[..n].copy_from_slice(&self.data[position..position + n]);
        n
    }
}

// ============================================================================
// MultiBuffer
// ============================================================================

/// Ordered concatenation of independently owned buffers.
///
/// Empty parts are skipped at construction so that every stored part covers
/// at least one byte and `offsets` is strictly increasing.
pub struct MultiBuffer {
    parts: Vec<SharedBuffer>,
    /// Start position of each part (prefix sums of part lengths).
    offsets: Vec<usize>,
    len: usize,
}

impl MultiBuffer {
    /// Concatenate `parts` in order.
    pub fn new<I>(parts: I) -> Self
    where
        I: IntoIterator<Item = SharedBuffer>,
    {
        let mut kept = Vec::new();
        let mut offsets = Vec::new();
        let mut len = 0;
        for part in parts {
            if part.is_empty() {
                continue;
            }
            offsets.push(len);
            len += part.len();
            kept.push(part);
        }
        Self {
            parts: kept,
            offsets,
            len,
        }
    }

    /// Number of non-empty parts.
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Index of the part containing `position` (binary search over offsets).
    fn locate(&self, position: usize) -> usize {
        self.offsets.partition_point(|&start| start <= position) - 1
    }
}

impl fmt::Debug for MultiBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiBuffer")
            .field("parts", &self.parts.len())
            .field("offsets", &self.offsets)
            .field("len", &self.len)
            .finish()
    }
}

impl Buffer for MultiBuffer {
    fn len(&self) -> usize {
        self.len
    }

    fn copy_to(&self, position: usize, out: &mut [u8]) -> usize {
        if position >= self.len || out.is_empty() {
            return 0;
        }

        let mut copied = 0;
        let mut index = self.locate(position);
        while copied < out.len() && index < self.parts.len() {
            let local = position + copied - self.offsets[index];
            let n = self.parts[index].copy_to(local, &mut out[copied..]);
            if n == 0 {
                break;
            }
            copied += n;
            if local + n >= self.parts[index].len() {
                index += 1;
            }
        }
        copied
    }
}

// ============================================================================
// OffsetBuffer / SliceBuffer
// ============================================================================

/// View of a parent buffer with the first `offset` bytes skipped.
#[derive(Clone)]
pub struct OffsetBuffer {
    parent: SharedBuffer,
    offset: usize,
}

impl OffsetBuffer {
    /// Create a view skipping `offset` bytes of `parent` (clamped to its length).
    pub fn new(parent: SharedBuffer, offset: usize) -> Self {
        let offset = offset.min(parent.len());
        Self { parent, offset }
    }
}

impl Buffer for OffsetBuffer {
    fn len(&self) -> usize {
        self.parent.len() - self.offset
    }

    fn copy_to(&self, position: usize, out: &mut [u8]) -> usize {
        if position >= self.len() {
            return 0;
        }
        self.parent.copy_to(self.offset + position, out)
    }
}

/// Window `[start, start + len)` of a parent buffer.
#[derive(Clone)]
pub struct SliceBuffer {
    parent: SharedBuffer,
    start: usize,
    len: usize,
}

impl SliceBuffer {
    /// Create a window, clamped to the parent's bounds.
    pub fn new(parent: SharedBuffer, start: usize, len: usize) -> Self {
        let start = start.min(parent.len());
        let len = len.min(parent.len() - start);
        Self { parent, start, len }
    }
}

impl Buffer for SliceBuffer {
    fn len(&self) -> usize {
        self.len
    }

    fn copy_to(&self, position: usize, out: &mut [u8]) -> usize {
        if position >= self.len {
            return 0;
        }
        let n = out.len().min(self.len - position);
        self.parent.copy_to(self.start + position, &mut out[..n])
    }
}

/// Copy a whole buffer into a fresh `Vec`.
pub fn to_vec(buffer: &dyn Buffer) -> Vec<u8> {
    let mut out = vec![0u8; buffer.len()];
    let n = buffer.copy_to(0, &mut out);
    out.truncate(n);
    out
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn mem(data: &[u8]) -> SharedBuffer {
        Arc::new(MemoryBuffer::new(data.to_vec()))
    }

    #[test]
    fn test_memory_copy_clamps_to_end() {
        let b = MemoryBuffer::new(b"hello".to_vec());
        let mut out = [0u8; 8];
        assert_eq!(b.copy_to(3, &mut out), 2);
        assert_eq!(&out[..2], b"lo");
        assert_eq!(b.copy_to(5, &mut out), 0);
    }

    #[test]
    fn test_multi_skips_empty_parts() {
        let m = MultiBuffer::new(vec![mem(b""), mem(b"ab"), mem(b""), mem(b"cde")]);
        assert_eq!(m.part_count(), 2);
        assert_eq!(m.len(), 5);
        assert_eq!(to_vec(&m), b"abcde");
    }

    #[test]
    fn test_multi_copy_across_parts() {
        let m = MultiBuffer::new(vec![mem(b"abc"), mem(b"defg"), mem(b"h")]);
        let mut out = [0u8; 5];
        assert_eq!(m.copy_to(2, &mut out), 5);
        assert_eq!(&out, b"cdefg");

        let mut out = [0u8; 10];
        assert_eq!(m.copy_to(6, &mut out), 2);
        assert_eq!(&out[..2], b"gh");
    }

    #[test]
    fn test_multi_every_position() {
        let data: Vec<u8> = (0..50u8).collect();
        let parts: Vec<SharedBuffer> = data.chunks(7).map(mem).collect();
        let m = MultiBuffer::new(parts);
        for pos in 0..data.len() {
            let mut out = vec![0u8; data.len()];
            let n = m.copy_to(pos, &mut out);
            assert_eq!(&out[..n], &data[pos..], "position {}", pos);
        }
    }

    #[test]
    fn test_nested_multi() {
        let inner: SharedBuffer = Arc::new(MultiBuffer::new(vec![mem(b"12"), mem(b"34")]));
        let outer = MultiBuffer::new(vec![mem(b"x"), inner, mem(b"y")]);
        assert_eq!(to_vec(&outer), b"x1234y");
    }

    #[test]
    fn test_offset_view() {
        let view = OffsetBuffer::new(mem(b"headerpayload"), 6);
        assert_eq!(view.len(), 7);
        assert_eq!(to_vec(&view), b"payload");

        let past_end = OffsetBuffer::new(mem(b"abc"), 10);
        assert!(past_end.is_empty());
    }

    #[test]
    fn test_slice_window() {
        let s = SliceBuffer::new(mem(b"0123456789"), 3, 4);
        assert_eq!(to_vec(&s), b"3456");

        let mut out = [0u8; 3];
        assert_eq!(s.copy_to(2, &mut out), 2);
        assert_eq!(&out[..2], b"56");

        let clamped = SliceBuffer::new(mem(b"0123"), 2, 100);
        assert_eq!(to_vec(&clamped), b"23");
    }
}
