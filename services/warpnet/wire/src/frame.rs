//! Command and response framing for the wire protocol.
//!
//! Commands and responses share one layout: a fixed 8-byte part followed by
//! `num_args` big-endian 32-bit words.
//!
//! ```text
//! +----------------+---------------+-----------------+------------------+
//! | u32 command    | u16 length    | u16 num_args    | u32 args[n]      |
//! +----------------+---------------+-----------------+------------------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

use crate::FrameError;

/// Size of the fixed part of a command / response frame
pub const CMD_HEADER_SIZE: usize = 8;

/// Largest argument count whose byte length still fits the `u16` length field
pub const MAX_ARGS: usize = u16::MAX as usize / 4;

/// How the issuer of a command expects the node to answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseType {
    /// Fire and forget
    NoResponse,
    /// Exactly one response frame
    SingleResponse,
    /// A buffer transfer spread over one or more chunks
    BufferResponse,
}

/// Shared command / response message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdMessage {
    /// Command or response code
    pub command: u32,
    /// Byte length of the args
    pub length: u16,
    /// Number of u32 args
    pub num_args: u16,
    /// Argument words
    pub args: Vec<u32>,
}

impl CmdMessage {
    /// Create a message without arguments
    pub fn new(command: u32) -> Self {
        Self {
            command,
            ..Self::default()
        }
    }

    /// Create a message with the given arguments
    pub fn with_args(command: u32, args: &[u32]) -> Result<Self, FrameError> {
        let mut message = Self::new(command);
        message.set_args(args)?;
        Ok(message)
    }

    /// Replace the arguments, keeping `length == 4 * num_args`.
    ///
    /// More than [`MAX_ARGS`] arguments is rejected and the message is left
    /// unchanged.
    pub fn set_args(&mut self, args: &[u32]) -> Result<(), FrameError> {
        let num_args = arg_count(args.len())?;
        self.args = args.to_vec();
        self.num_args = num_args;
        self.length = num_args * 4;
        Ok(())
    }

    /// Append arguments, keeping `length == 4 * num_args`
    pub fn add_args(&mut self, args: &[u32]) -> Result<(), FrameError> {
        let num_args = arg_count(self.args.len() + args.len())?;
        self.args.extend_from_slice(args);
        self.num_args = num_args;
        self.length = num_args * 4;
        Ok(())
    }

    /// Encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        CMD_HEADER_SIZE + 4 * self.num_args as usize
    }

    /// Encode to `buf`; exactly `num_args` words are written
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_u32(self.command);
        buf.put_u16(self.length);
        buf.put_u16(self.num_args);
        for i in 0..self.num_args as usize {
            buf.put_u32(self.args.get(i).copied().unwrap_or(0));
        }
    }

    /// Encode to a standalone buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode one message from the front of `buf`, returning it and the bytes consumed.
    ///
    /// Trailing bytes after the message are left alone.
    pub fn decode_prefix(buf: &[u8]) -> Result<(Self, usize), FrameError> {
        if buf.len() < CMD_HEADER_SIZE {
            return Err(FrameError::Incomplete {
                needed: CMD_HEADER_SIZE,
                available: buf.len(),
            });
        }

        let mut cursor = buf;
        let command = cursor.get_u32();
        let length = cursor.get_u16();
        let num_args = cursor.get_u16();

        let total = CMD_HEADER_SIZE + 4 * num_args as usize;
        if buf.len() < total {
            return Err(FrameError::LengthMismatch {
                declared: total,
                actual: buf.len(),
            });
        }

        let args = (0..num_args).map(|_| cursor.get_u32()).collect();

        Ok((
            Self {
                command,
                length,
                num_args,
                args,
            },
            total,
        ))
    }

    /// Decode a message that must occupy all of `buf`
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        let (message, consumed) = Self::decode_prefix(buf)?;
        if consumed != buf.len() {
            return Err(FrameError::LengthMismatch {
                declared: consumed,
                actual: buf.len(),
            });
        }
        Ok(message)
    }

    /// Decode into an existing message, leaving it zeroed on failure
    pub fn decode_into(&mut self, buf: &[u8]) -> Result<(), FrameError> {
        match Self::decode(buf) {
            Ok(message) => {
                *self = message;
                Ok(())
            }
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    /// Return to the zero state
    pub fn reset(&mut self) {
        self.command = 0;
        self.length = 0;
        self.num_args = 0;
        self.args.clear();
    }
}

fn arg_count(count: usize) -> Result<u16, FrameError> {
    if count > MAX_ARGS {
        return Err(FrameError::TooManyArgs { count });
    }
    Ok(count as u16)
}

/// A command together with the response shape it expects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    message: CmdMessage,
    resp_type: ResponseType,
}

impl Cmd {
    /// Create a command without arguments
    pub fn new(command: u32, resp_type: ResponseType) -> Self {
        Self {
            message: CmdMessage::new(command),
            resp_type,
        }
    }

    /// Create a command with arguments
    pub fn with_args(
        command: u32,
        resp_type: ResponseType,
        args: &[u32],
    ) -> Result<Self, FrameError> {
        Ok(Self {
            message: CmdMessage::with_args(command, args)?,
            resp_type,
        })
    }

    /// Replace the arguments
    pub fn set_args(&mut self, args: &[u32]) -> Result<(), FrameError> {
        self.message.set_args(args)
    }

    /// Append arguments
    pub fn add_args(&mut self, args: &[u32]) -> Result<(), FrameError> {
        self.message.add_args(args)
    }

    /// Expected response shape
    pub fn resp_type(&self) -> ResponseType {
        self.resp_type
    }

    /// Underlying message
    pub fn message(&self) -> &CmdMessage {
        &self.message
    }

    /// Serialize the command
    pub fn to_bytes(&self) -> Bytes {
        self.message.to_bytes()
    }
}

/// Request for `size` bytes of buffer `buffer_id` starting at `start_byte`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferCmd {
    message: CmdMessage,
    /// Buffer being requested
    pub buffer_id: u32,
    /// Buffer flags
    pub flags: u32,
    /// First byte requested
    pub start_byte: u32,
    /// Number of bytes requested (0 when unknown)
    pub size: u32,
}

impl BufferCmd {
    /// Create a buffer request; args are always `[buffer_id, flags, start_byte, size]`
    pub fn new(command: u32, buffer_id: u32, flags: u32, start_byte: u32, size: u32) -> Self {
        Self {
            message: CmdMessage {
                command,
                length: 16,
                num_args: 4,
                args: vec![buffer_id, flags, start_byte, size],
            },
            buffer_id,
            flags,
            start_byte,
            size,
        }
    }

    /// Buffer requests are always answered with a buffer transfer
    pub fn resp_type(&self) -> ResponseType {
        ResponseType::BufferResponse
    }

    /// Underlying message
    pub fn message(&self) -> &CmdMessage {
        &self.message
    }

    /// Serialize the command
    pub fn to_bytes(&self) -> Bytes {
        self.message.to_bytes()
    }
}

/// Single-frame response from a node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response(CmdMessage);

impl Response {
    /// Wrap a decoded message
    pub fn new(message: CmdMessage) -> Self {
        Self(message)
    }

    /// Decode a response occupying all of `buf`
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        CmdMessage::decode(buf).map(Self)
    }

    /// Decode a response from the front of `buf`
    pub fn decode_prefix(buf: &[u8]) -> Result<(Self, usize), FrameError> {
        CmdMessage::decode_prefix(buf).map(|(message, used)| (Self(message), used))
    }

    /// Response payload words
    pub fn args(&self) -> &[u32] {
        &self.0.args
    }

    /// Consume the response, returning the message
    pub fn into_inner(self) -> CmdMessage {
        self.0
    }
}

impl Deref for Response {
    type Target = CmdMessage;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<CmdMessage> for Response {
    fn from(message: CmdMessage) -> Self {
        Self(message)
    }
}
