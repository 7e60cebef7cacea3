// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Channel-tagged framing codec.
//!
//! Stream sockets have no message boundaries. Every message travels as one
//! frame:
//!
//! ```text
//! +-----------+------------------+-----------------+----------------+
//! | 0x0F (1B) | Channel (4B BE)  | Length (4B BE)  | Payload        |
//! +-----------+------------------+-----------------+----------------+
//! ```
//!
//! The decoder is a byte-level state machine (delimiter -> channel ->
//! length -> payload). It keeps its position across reads, so a frame may
//! arrive split at any byte boundary. A wrong delimiter or a length above
//! the configured maximum cannot be resynchronized and is reported as
//! `io::ErrorKind::InvalidData`; the owner must drop the connection.
//!
//! # Example
//!
//! ```
//! use echobus::message::Message;
//! use echobus::transport::FrameCodec;
//!
//! let frame = FrameCodec::encode(&Message::from_bytes(3, b"hi".to_vec()));
//! assert_eq!(frame[0], 0x0F);
//!
//! let mut codec = FrameCodec::new(1024);
//! let messages = codec.feed(&frame).unwrap();
//! assert_eq!(messages[0].channel(), 3);
//! assert_eq!(messages[0].to_vec(), b"hi");
//! ```

use std::io::{self, Read};

use crate::message::{ChannelId, Message};

/// First byte of every frame.
pub const FRAME_DELIMITER: u8 = 0x0F;

/// Frame header size (delimiter + channel + length).
pub const FRAME_HEADER_SIZE: usize = 9;

/// Default maximum payload size (50 KiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 50 * 1024;

/// Default socket read buffer (100 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 100 * 1024;

/// Internal state for incremental reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    /// Waiting for the delimiter byte
    Delimiter,

    /// Reading the 4-byte channel
    Channel { bytes_read: usize },

    /// Reading the 4-byte length
    Length { bytes_read: usize },

    /// Reading the payload
    Body {
        expected_len: usize,
        bytes_read: usize,
    },
}

/// Incremental frame decoder plus static frame encoders.
#[derive(Debug)]
pub struct FrameCodec {
    /// Current read state
    state: ReadState,

    /// Channel bytes, then length bytes
    header: [u8; 4],

    /// Channel of the frame being read
    channel: ChannelId,

    /// Payload accumulator
    body: Vec<u8>,

    /// Maximum allowed payload size (anti-OOM protection)
    max_size: usize,

    /// Socket read staging buffer
    read_buf: Vec<u8>,

    /// Unconsumed range of `read_buf`
    read_pos: usize,
    read_len: usize,

    /// Statistics: frames decoded
    frames_decoded: u64,

    /// Statistics: payload bytes decoded
    bytes_decoded: u64,

    /// Statistics: raw bytes pulled from the reader
    bytes_read: u64,

    /// Statistics: frames rejected (bad delimiter or too large)
    frames_rejected: u64,
}

impl FrameCodec {
    /// Create a codec with the given payload limit and the default read buffer.
    pub fn new(max_size: usize) -> Self {
        Self::with_buffer_size(max_size, DEFAULT_READ_BUFFER_SIZE)
    }

    /// Create a codec with an explicit read buffer size.
    pub fn with_buffer_size(max_size: usize, read_buffer_size: usize) -> Self {
        Self {
            state: ReadState::Delimiter,
            header: [0u8; 4],
            channel: 0,
            body: Vec::new(),
            max_size,
            read_buf: vec![0u8; read_buffer_size.max(FRAME_HEADER_SIZE)],
            read_pos: 0,
            read_len: 0,
            frames_decoded: 0,
            bytes_decoded: 0,
            bytes_read: 0,
            frames_rejected: 0,
        }
    }

    /// Get maximum allowed payload size.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Get number of frames successfully decoded.
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Get total payload bytes decoded.
    pub fn bytes_decoded(&self) -> u64 {
        self.bytes_decoded
    }

    /// Get total bytes read from the underlying reader.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Get number of frames rejected.
    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected
    }

    /// Check if the codec is in the middle of a frame.
    pub fn is_partial(&self) -> bool {
        self.state != ReadState::Delimiter
    }

    /// Reset the decoder (e.g., after a framing error).
    pub fn reset(&mut self) {
        self.state = ReadState::Delimiter;
        self.body = Vec::new();
    }

    // ========================================================================
    // Encoding
    // ========================================================================

    /// Serialize a frame header.
    pub fn encode_header(channel: ChannelId, len: usize) -> [u8; FRAME_HEADER_SIZE] {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        header[0] = FRAME_DELIMITER;
        header[1..5].copy_from_slice(&channel.to_be_bytes());
        header[5..9].copy_from_slice(&(len as u32).to_be_bytes());
        header
    }

    /// Encode a message into a new framed buffer.
    pub fn encode(message: &Message) -> Vec<u8> {
        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + message.len());
        Self::encode_into(message, &mut frame);
        frame
    }

    /// Append a framed message to `buf`.
    pub fn encode_into(message: &Message, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&Self::encode_header(message.channel(), message.len()));
        let start = buf.len();
        buf.resize(start + message.len(), 0);
        message.copy_to(0, &mut buf[start..]);
    }

    // ========================================================================
    // Decoding
    // ========================================================================

    fn reject(&mut self, reason: String) -> io::Error {
        self.frames_rejected += 1;
        self.reset();
        io::Error::new(io::ErrorKind::InvalidData, reason)
    }

    fn complete(&mut self) -> Message {
        let body = std::mem::take(&mut self.body);
        self.frames_decoded += 1;
        self.bytes_decoded += body.len() as u64;
        self.state = ReadState::Delimiter;
        Message::from_bytes(self.channel, body)
    }

    /// Consume bytes from `data` until one frame completes or `data` runs out.
    ///
    /// Returns the number of bytes consumed and the completed message, if any.
    pub fn advance(&mut self, data: &[u8]) -> io::Result<(usize, Option<Message>)> {
        let mut pos = 0;
        while pos < data.len() {
            match self.state {
                ReadState::Delimiter => {
                    let byte = data[pos];
                    pos += 1;
                    if byte != FRAME_DELIMITER {
                        return Err(self.reject(format!("illegal frame delimiter 0x{:02X}", byte)));
                    }
                    self.state = ReadState::Channel { bytes_read: 0 };
                }

                ReadState::Channel { bytes_read } => {
                    self.header[bytes_read] = data[pos];
                    pos += 1;
                    if bytes_read + 1 < 4 {
                        self.state = ReadState::Channel {
                            bytes_read: bytes_read + 1,
                        };
                    } else {
                        self.channel = u32::from_be_bytes(self.header);
                        self.state = ReadState::Length { bytes_read: 0 };
                    }
                }

                ReadState::Length { bytes_read } => {
                    self.header[bytes_read] = data[pos];
                    pos += 1;
                    if bytes_read + 1 < 4 {
                        self.state = ReadState::Length {
                            bytes_read: bytes_read + 1,
                        };
                        continue;
                    }

                    let len = u32::from_be_bytes(self.header) as usize;
                    if len > self.max_size {
                        return Err(self.reject(format!(
                            "frame too large: {} bytes (max {})",
                            len, self.max_size
                        )));
                    }
                    if len == 0 {
                        return Ok((pos, Some(self.complete())));
                    }
                    self.body = Vec::with_capacity(len);
                    self.state = ReadState::Body {
                        expected_len: len,
                        bytes_read: 0,
                    };
                }

                ReadState::Body {
                    expected_len,
                    bytes_read,
                } => {
                    let n = (expected_len - bytes_read).min(data.len() - pos);
                    self.body.extend_from_slice(&data[pos..pos + n]);
                    pos += n;
                    if bytes_read + n == expected_len {
                        return Ok((pos, Some(self.complete())));
                    }
                    self.state = ReadState::Body {
                        expected_len,
                        bytes_read: bytes_read + n,
                    };
                }
            }
        }
        Ok((pos, None))
    }

    /// Decode every complete frame contained in `data`.
    ///
    /// A trailing partial frame is kept for the next call.
    pub fn feed(&mut self, mut data: &[u8]) -> io::Result<Vec<Message>> {
        let mut out = Vec::new();
        while !data.is_empty() {
            let (consumed, message) = self.advance(data)?;
            data = &data[consumed..];
            if let Some(message) = message {
                out.push(message);
            }
        }
        Ok(out)
    }

    /// Try to decode one complete message from the reader.
    ///
    /// Returns:
    /// - `Ok(Some(message))` - A complete message was decoded
    /// - `Ok(None)` - Need more data (WouldBlock)
    /// - `Err(e)` - I/O error, EOF or framing error
    ///
    /// Designed for non-blocking sockets: call repeatedly until it returns
    /// `Ok(None)`. Bytes read past the end of a frame are kept internally.
    pub fn decode<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<Option<Message>> {
        loop {
            if self.read_pos < self.read_len {
                let buf = std::mem::take(&mut self.read_buf);
                let result = self.advance(&buf[self.read_pos..self.read_len]);
                self.read_buf = buf;
                let (consumed, message) = match result {
                    Ok(r) => r,
                    Err(e) => {
                        self.read_pos = 0;
                        self.read_len = 0;
                        return Err(e);
                    }
                };
                self.read_pos += consumed;
                if message.is_some() {
                    return Ok(message);
                }
                continue;
            }

            match reader.read(&mut self.read_buf) {
                Ok(0) => {
                    let reason = if self.is_partial() {
                        "incomplete frame"
                    } else {
                        "connection closed"
                    };
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, reason));
                }
                Ok(n) => {
                    self.bytes_read += n as u64;
                    self.read_pos = 0;
                    self.read_len = n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn msg(channel: ChannelId, payload: &[u8]) -> Message {
        Message::from_bytes(channel, payload.to_vec())
    }

    #[test]
    fn test_encode_layout() {
        let frame = FrameCodec::encode(&msg(0x0102_0304, b"hello"));
        assert_eq!(frame.len(), FRAME_HEADER_SIZE + 5);
        assert_eq!(frame[0], FRAME_DELIMITER);
        assert_eq!(&frame[1..5], &[1, 2, 3, 4]);
        assert_eq!(&frame[5..9], &5u32.to_be_bytes());
        assert_eq!(&frame[9..], b"hello");
    }

    #[test]
    fn test_decode_multiple() {
        let mut buf = Vec::new();
        FrameCodec::encode_into(&msg(1, b"first"), &mut buf);
        FrameCodec::encode_into(&msg(2, b""), &mut buf);
        FrameCodec::encode_into(&msg(3, b"third"), &mut buf);

        let mut codec = FrameCodec::new(1024);
        let mut cursor = Cursor::new(buf);

        let a = codec.decode(&mut cursor).unwrap().unwrap();
        let b = codec.decode(&mut cursor).unwrap().unwrap();
        let c = codec.decode(&mut cursor).unwrap().unwrap();
        assert_eq!((a.channel(), a.to_vec()), (1, b"first".to_vec()));
        assert_eq!((b.channel(), b.len()), (2, 0));
        assert_eq!((c.channel(), c.to_vec()), (3, b"third".to_vec()));
        assert_eq!(codec.frames_decoded(), 3);

        let eof = codec.decode(&mut cursor).unwrap_err();
        assert_eq!(eof.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_split_at_every_boundary() {
        let original = msg(42, &(0..200u8).collect::<Vec<_>>());
        let frame = FrameCodec::encode(&original);

        for split in 0..=frame.len() {
            let mut codec = FrameCodec::new(1024);
            let mut got = codec.feed(&frame[..split]).unwrap();
            got.extend(codec.feed(&frame[split..]).unwrap());
            assert_eq!(got.len(), 1, "split at {}", split);
            assert_eq!(got[0].channel(), 42);
            assert_eq!(got[0].to_vec(), original.to_vec());
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut stream = Vec::new();
        FrameCodec::encode_into(&msg(7, b"abc"), &mut stream);
        FrameCodec::encode_into(&msg(8, b"defgh"), &mut stream);

        let mut codec = FrameCodec::new(1024);
        let mut got = Vec::new();
        for byte in &stream {
            got.extend(codec.feed(std::slice::from_ref(byte)).unwrap());
        }
        assert_eq!(got.len(), 2);
        assert_eq!(got[1].channel(), 8);
        assert_eq!(got[1].to_vec(), b"defgh");
    }

    #[test]
    fn test_bad_delimiter_rejected() {
        let mut frame = FrameCodec::encode(&msg(1, b"x"));
        frame[0] = 0x10;
        let mut codec = FrameCodec::new(1024);
        let err = codec.feed(&frame).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(codec.frames_rejected(), 1);
        assert!(!codec.is_partial());
    }

    #[test]
    fn test_too_large_rejected() {
        let mut codec = FrameCodec::new(10);
        let frame = FrameCodec::encode(&msg(1, b"this payload is too long"));
        let mut cursor = Cursor::new(frame);
        let err = codec.decode(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(codec.frames_rejected(), 1);
    }

    #[test]
    fn test_partial_then_eof() {
        let frame = FrameCodec::encode(&msg(1, b"hello"));
        let mut codec = FrameCodec::new(1024);
        let mut cursor = Cursor::new(&frame[..6]);
        let err = codec.decode(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert!(codec.is_partial());
        codec.reset();
        assert!(!codec.is_partial());
    }

    #[test]
    fn test_small_read_buffer() {
        let mut stream = Vec::new();
        for i in 0..10u32 {
            FrameCodec::encode_into(&msg(i, &vec![i as u8; 40]), &mut stream);
        }
        let mut codec = FrameCodec::with_buffer_size(1024, 16);
        let mut cursor = Cursor::new(stream);
        for i in 0..10u32 {
            let m = codec.decode(&mut cursor).unwrap().unwrap();
            assert_eq!(m.channel(), i);
            assert_eq!(m.to_vec(), vec![i as u8; 40]);
        }
        assert_eq!(codec.bytes_decoded(), 400);
    }
}
