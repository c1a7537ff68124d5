//! Buffer transfers spread over multiple datagrams.
//!
//! A node answers a buffer request with one or more chunks, each carrying a
//! slice of the logical buffer:
//!
//! ```text
//! +-------------+------------+--------------+---------------+
//! | u32 command | u16 len=16 | u16 nargs=4  | u32 buffer_id |
//! +-------------+------------+--------------+---------------+
//! | u32 flags   | u32 start_byte            | u32 size      |
//! +-------------+---------------------------+---------------+
//! | payload (size bytes)                                    |
//! +---------------------------------------------------------+
//! ```
//!
//! [`Buffer`] collects chunks in any order into one contiguous region.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::cmp::min;
use tracing::{debug, warn};

use crate::FrameError;

/// Size of the fixed part of a buffer chunk
pub const CHUNK_HEADER_SIZE: usize = 24;

/// Default chunk payload size (fits a standard 1500 byte MTU with headers)
pub const DEFAULT_CHUNK_SIZE: usize = 1400;

/// Largest size an unsized [`Buffer`] adopts from an incoming chunk.
///
/// Chunks that would grow an unsized buffer past this are ignored, so a
/// single datagram cannot force a large allocation.
pub const MAX_ADOPTED_SIZE: u32 = 16 * 1024 * 1024;

const CHUNK_ARGS_LENGTH: u16 = 16;
const CHUNK_NUM_ARGS: u16 = 4;

/// One datagram-sized piece of a buffer transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferChunk {
    /// Command code (unused by nodes, normally 0)
    pub command: u32,
    /// Buffer this chunk belongs to
    pub buffer_id: u32,
    /// Chunk flags
    pub flags: u32,
    /// Offset of the payload within the buffer
    pub start_byte: u32,
    /// Chunk payload
    pub payload: Bytes,
}

impl BufferChunk {
    /// Encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        CHUNK_HEADER_SIZE + self.payload.len()
    }

    /// Encode the chunk to bytes (big-endian)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_u32(self.command);
        buf.put_u16(CHUNK_ARGS_LENGTH);
        buf.put_u16(CHUNK_NUM_ARGS);
        buf.put_u32(self.buffer_id);
        buf.put_u32(self.flags);
        buf.put_u32(self.start_byte);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }

    /// Decode a chunk that must occupy all of `buf`
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < CHUNK_HEADER_SIZE {
            return Err(FrameError::Incomplete {
                needed: CHUNK_HEADER_SIZE,
                available: buf.len(),
            });
        }

        let mut cursor = buf;
        let command = cursor.get_u32();
        let _length = cursor.get_u16();
        let _num_args = cursor.get_u16();
        let buffer_id = cursor.get_u32();
        let flags = cursor.get_u32();
        let start_byte = cursor.get_u32();
        let size = cursor.get_u32() as usize;

        let declared = CHUNK_HEADER_SIZE + size;
        if declared != buf.len() {
            return Err(FrameError::LengthMismatch {
                declared,
                actual: buf.len(),
            });
        }

        Ok(Self {
            command,
            buffer_id,
            flags,
            start_byte,
            payload: Bytes::copy_from_slice(&buf[CHUNK_HEADER_SIZE..]),
        })
    }
}

/// Progress of a buffer transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferState {
    /// Nothing received yet
    Empty,
    /// Some bytes received
    Partial,
    /// All declared bytes received
    Complete,
}

/// Reassembly target for a buffer transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer {
    buffer_id: u32,
    flags: u32,
    size: u32,
    received: u32,
    complete: bool,
    storage: Vec<u8>,
}

impl Buffer {
    /// Create an empty buffer; a `size` of 0 adopts the size of the first chunk
    pub fn new(buffer_id: u32, flags: u32, size: u32) -> Self {
        Self {
            buffer_id,
            flags,
            size,
            received: 0,
            complete: false,
            storage: vec![0; size as usize],
        }
    }

    /// Create a complete buffer holding `bytes`
    pub fn from_bytes(buffer_id: u32, flags: u32, bytes: &[u8]) -> Self {
        let mut buffer = Self::new(buffer_id, flags, 0);
        buffer.set_bytes(bytes);
        buffer
    }

    /// Buffer id
    pub fn buffer_id(&self) -> u32 {
        self.buffer_id
    }

    /// Accumulated flags
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Declared total size in bytes
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Bytes written so far
    pub fn received(&self) -> u32 {
        self.received
    }

    /// Whether all declared bytes have arrived
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Current transfer state
    pub fn state(&self) -> BufferState {
        if self.complete {
            BufferState::Complete
        } else if self.received == 0 {
            BufferState::Empty
        } else {
            BufferState::Partial
        }
    }

    /// Buffer contents
    pub fn bytes(&self) -> &[u8] {
        &self.storage
    }

    /// Consume the buffer, returning its contents
    pub fn into_bytes(self) -> Vec<u8> {
        self.storage
    }

    /// Set bits in the flags
    pub fn set_flags(&mut self, flags: u32) {
        self.flags |= flags;
    }

    /// Clear bits in the flags
    pub fn clear_flags(&mut self, flags: u32) {
        self.flags &= !flags;
    }

    /// Merge a decoded chunk.
    ///
    /// Chunks for another buffer id are logged and ignored. Returns whether
    /// the chunk was merged.
    pub fn merge_chunk(&mut self, chunk: &BufferChunk) -> bool {
        if chunk.buffer_id != self.buffer_id {
            warn!(
                "Ignoring chunk for buffer {} (expected buffer {})",
                chunk.buffer_id, self.buffer_id
            );
            return false;
        }

        let end = chunk.start_byte as u64 + chunk.payload.len() as u64;
        if self.size == 0 {
            if end > MAX_ADOPTED_SIZE as u64 {
                warn!(
                    "Ignoring chunk for unsized buffer {}: end {} exceeds {} bytes",
                    self.buffer_id, end, MAX_ADOPTED_SIZE
                );
                return false;
            }
            self.update_size(end as u32, false);
        }
        self.add_buffer_data(chunk.start_byte, &chunk.payload);
        self.set_flags(chunk.flags);

        debug!(
            "Merged chunk: buffer={} start={} len={} received={}/{}",
            self.buffer_id,
            chunk.start_byte,
            chunk.payload.len(),
            self.received,
            self.size
        );
        true
    }

    /// Decode raw chunk bytes and merge them; undecodable data is logged and ignored
    pub fn add_data(&mut self, raw: &[u8]) -> bool {
        match BufferChunk::decode(raw) {
            Ok(chunk) => self.merge_chunk(&chunk),
            Err(e) => {
                warn!("Error decoding buffer chunk, ignoring data: {}", e);
                false
            }
        }
    }

    /// Append the contents of `other` after the current end of this buffer
    pub fn append(&mut self, other: &Buffer) {
        let offset = self.size;
        self.update_size(offset.saturating_add(other.size), true);
        self.add_buffer_data(offset, other.bytes());
    }

    /// Replace the contents with `bytes`
    pub fn set_bytes(&mut self, bytes: &[u8]) {
        self.received = 0;
        self.update_size(bytes.len() as u32, true);
        self.add_buffer_data(0, bytes);
    }

    /// Return to the empty state with no declared size
    pub fn reset(&mut self) {
        self.buffer_id = 0;
        self.flags = 0;
        self.size = 0;
        self.received = 0;
        self.complete = false;
        self.storage.clear();
    }

    /// Serialize the whole buffer as a single chunk
    pub fn encode_chunk(&self, command: u32, start_byte: u32) -> Bytes {
        let chunk = BufferChunk {
            command,
            buffer_id: self.buffer_id,
            flags: self.flags,
            start_byte,
            payload: Bytes::copy_from_slice(&self.storage),
        };
        let mut buf = BytesMut::with_capacity(chunk.encoded_len());
        chunk.encode(&mut buf);
        buf.freeze()
    }

    /// Split the buffer into encoded chunks of at most `chunk_size` payload bytes
    pub fn encode_chunks(&self, command: u32, chunk_size: usize) -> Vec<Bytes> {
        if self.storage.is_empty() || chunk_size == 0 {
            return vec![];
        }

        let total_chunks = self.storage.len().div_ceil(chunk_size);
        let mut frames = Vec::with_capacity(total_chunks);
        let mut offset = 0;

        for _ in 0..total_chunks {
            let chunk_end = min(offset + chunk_size, self.storage.len());
            let chunk = BufferChunk {
                command,
                buffer_id: self.buffer_id,
                flags: self.flags,
                start_byte: offset as u32,
                payload: Bytes::copy_from_slice(&self.storage[offset..chunk_end]),
            };
            let mut buf = BytesMut::with_capacity(chunk.encoded_len());
            chunk.encode(&mut buf);
            frames.push(buf.freeze());
            offset = chunk_end;
        }

        frames
    }

    fn update_size(&mut self, size: u32, force: bool) {
        if self.size == 0 || force {
            self.size = size;
            self.storage.resize(size as usize, 0);
            self.received = min(self.received, size);
        }
    }

    // Payload past the declared size is truncated, never an error
    fn add_buffer_data(&mut self, start_byte: u32, data: &[u8]) {
        let room = (self.size - self.received) as usize;
        let in_bounds = (self.size as usize).saturating_sub(start_byte as usize);
        let num_bytes = min(data.len(), min(room, in_bounds));

        if num_bytes > 0 {
            let start = start_byte as usize;
            self.storage[start..start + num_bytes].copy_from_slice(&data[..num_bytes]);
        }

        self.received += num_bytes as u32;
        self.complete = self.received == self.size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(buffer_id: u32, start_byte: u32, payload: &[u8]) -> BufferChunk {
        BufferChunk {
            command: 0,
            buffer_id,
            flags: 0,
            start_byte,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    fn encoded(chunk: &BufferChunk) -> Bytes {
        let mut buf = BytesMut::new();
        chunk.encode(&mut buf);
        buf.freeze()
    }

    #[test]
    fn test_chunk_layout() {
        let bytes = encoded(&chunk(9, 4, b"ab"));
        assert_eq!(bytes.len(), 26);
        assert_eq!(&bytes[4..8], &[0, 16, 0, 4]);
        assert_eq!(&bytes[8..12], &9u32.to_be_bytes());
        assert_eq!(&bytes[16..20], &4u32.to_be_bytes());
        assert_eq!(&bytes[20..24], &2u32.to_be_bytes());
        assert_eq!(BufferChunk::decode(&bytes).unwrap(), chunk(9, 4, b"ab"));
    }

    #[test]
    fn test_chunk_decode_length_mismatch() {
        let bytes = encoded(&chunk(1, 0, b"abcd"));
        assert!(matches!(
            BufferChunk::decode(&bytes[..26]),
            Err(FrameError::LengthMismatch {
                declared: 28,
                actual: 26
            })
        ));
        assert!(matches!(
            BufferChunk::decode(&bytes[..10]),
            Err(FrameError::Incomplete { .. })
        ));
    }

    #[test]
    fn test_two_chunk_transfer() {
        let mut buffer = Buffer::new(1, 0, 10);
        assert_eq!(buffer.state(), BufferState::Empty);

        assert!(buffer.add_data(&encoded(&chunk(1, 0, b"012345"))));
        assert_eq!(buffer.state(), BufferState::Partial);
        assert_eq!(buffer.received(), 6);

        assert!(buffer.add_data(&encoded(&chunk(1, 6, b"6789"))));
        assert!(buffer.is_complete());
        assert_eq!(buffer.bytes(), b"0123456789");
    }

    #[test]
    fn test_out_of_order_chunks() {
        let pieces = [(0u32, b"abc"), (3, b"def"), (6, b"ghi")];
        let orders = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];

        for order in orders {
            let mut buffer = Buffer::new(2, 0, 9);
            let mut last = 0;
            for i in order {
                let (start, data) = pieces[i];
                assert!(buffer.merge_chunk(&chunk(2, start, data)));
                assert!(buffer.received() > last, "order {:?}", order);
                last = buffer.received();
                assert_eq!(buffer.is_complete(), buffer.received() == buffer.size());
            }
            assert!(buffer.is_complete(), "order {:?}", order);
            assert_eq!(buffer.bytes(), b"abcdefghi", "order {:?}", order);
        }
    }

    #[test]
    fn test_overrun_is_truncated() {
        let mut buffer = Buffer::new(1, 0, 8);
        buffer.merge_chunk(&chunk(1, 0, b"abcde"));
        buffer.merge_chunk(&chunk(1, 5, b"fghijk"));
        assert_eq!(buffer.received(), 8);
        assert!(buffer.is_complete());
        assert_eq!(buffer.bytes(), b"abcdefgh");
    }

    #[test]
    fn test_chunk_past_end_writes_nothing() {
        let mut buffer = Buffer::new(1, 0, 4);
        buffer.merge_chunk(&chunk(1, 10, b"zz"));
        assert_eq!(buffer.received(), 0);
        assert_eq!(buffer.bytes(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_mismatched_buffer_id_ignored() {
        let mut buffer = Buffer::new(1, 0, 4);
        buffer.merge_chunk(&chunk(1, 0, b"ab"));
        let before = buffer.clone();

        assert!(!buffer.merge_chunk(&chunk(2, 2, b"cd")));
        assert_eq!(buffer, before);
    }

    #[test]
    fn test_undecodable_data_ignored() {
        let mut buffer = Buffer::new(1, 0, 4);
        assert!(!buffer.add_data(&[0u8; 7]));
        assert_eq!(buffer.state(), BufferState::Empty);
    }

    #[test]
    fn test_unknown_size_adopts_first_chunk() {
        let mut buffer = Buffer::new(5, 0, 0);
        buffer.merge_chunk(&chunk(5, 0, b"hello"));
        assert_eq!(buffer.size(), 5);
        assert!(buffer.is_complete());
    }

    #[test]
    fn test_unsized_buffer_ignores_far_offset() {
        let mut buffer = Buffer::new(5, 0, 0);
        assert!(!buffer.add_data(&encoded(&chunk(5, 0xFFFF_FFF0, b"zzzz"))));
        assert!(!buffer.merge_chunk(&chunk(5, 0x1000_0000, b"zzzz")));
        assert_eq!(buffer.size(), 0);
        assert!(buffer.bytes().is_empty());
        assert_eq!(buffer.state(), BufferState::Empty);

        // A chunk ending exactly at the limit is still adopted
        assert!(buffer.merge_chunk(&chunk(5, MAX_ADOPTED_SIZE - 2, b"ok")));
        assert_eq!(buffer.size(), MAX_ADOPTED_SIZE);
        assert_eq!(buffer.received(), 2);
    }

    #[test]
    fn test_sized_buffer_ignores_size_limit() {
        let mut buffer = Buffer::new(5, 0, 4);
        assert!(buffer.merge_chunk(&chunk(5, 0x1000_0000, b"zz")));
        assert_eq!(buffer.size(), 4);
        assert_eq!(buffer.received(), 0);
    }

    #[test]
    fn test_chunk_flags_accumulate() {
        let mut buffer = Buffer::new(1, 0x1, 4);
        let mut first = chunk(1, 0, b"ab");
        first.flags = 0x4;
        buffer.merge_chunk(&first);
        assert_eq!(buffer.flags(), 0x5);
        buffer.clear_flags(0x1);
        assert_eq!(buffer.flags(), 0x4);
    }

    #[test]
    fn test_append() {
        let mut buffer = Buffer::from_bytes(1, 0, b"abc");
        let tail = Buffer::from_bytes(7, 0, b"defg");
        buffer.append(&tail);

        assert_eq!(buffer.size(), 7);
        assert!(buffer.is_complete());
        assert_eq!(buffer.bytes(), b"abcdefg");
    }

    #[test]
    fn test_reset() {
        let mut buffer = Buffer::from_bytes(3, 0x2, b"data");
        buffer.reset();
        assert_eq!(buffer.size(), 0);
        assert_eq!(buffer.buffer_id(), 0);
        assert_eq!(buffer.state(), BufferState::Empty);
        assert!(buffer.bytes().is_empty());
    }

    #[test]
    fn test_encode_chunks_reassemble() {
        let source = Buffer::from_bytes(4, 0, &[0x42; 3000]);
        let frames = source.encode_chunks(0, DEFAULT_CHUNK_SIZE);
        assert_eq!(frames.len(), 3);

        let mut target = Buffer::new(4, 0, 3000);
        for frame in frames.iter().rev() {
            target.add_data(frame);
        }
        assert!(target.is_complete());
        assert_eq!(target.bytes(), source.bytes());

        let single = source.encode_chunk(0, 0);
        assert_eq!(single.len(), CHUNK_HEADER_SIZE + 3000);
    }
}
