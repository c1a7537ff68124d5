//! Wire protocol framing, encoding/decoding and buffer reassembly for WARPNet.
//!
//! This crate provides the low-level message model used to talk to WARPNet
//! nodes over UDP: the transport header, command / response frames, buffer
//! requests, and reassembly of buffer transfers that span many datagrams.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+-----------------------------------+
//! | Transport Header 12B | dest, src, type, length, seq, flags|
//! +----------------------+-----------------------------------+
//! | Command / Response   | u32 cmd, u16 len, u16 n, u32 x n  |
//! |   or Buffer Chunk    | 24B chunk header + payload        |
//! +----------------------+-----------------------------------+
//! ```
//!
//! All multi-byte fields are big-endian.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod error;
pub mod frame;
pub mod header;

// Re-export main types
pub use chunk::{
    Buffer, BufferChunk, BufferState, CHUNK_HEADER_SIZE, DEFAULT_CHUNK_SIZE, MAX_ADOPTED_SIZE,
};
pub use error::FrameError;
pub use frame::{BufferCmd, Cmd, CmdMessage, Response, ResponseType, CMD_HEADER_SIZE, MAX_ARGS};
pub use header::{
    HeaderFlags, PacketType, TransportHeader, SEQ_NUM_MODULUS, TRANSPORT_HEADER_SIZE,
};
