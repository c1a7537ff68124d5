//! WARPNet commands.
//!
//! Every command pairs a wire message with the way its reply is turned
//! into a typed result. Command codes carry the command group in bits 31:24
//! and the command id in bits 23:0.

use std::net::Ipv4Addr;
use wn_wire::{
    Buffer, BufferCmd, Cmd, CmdMessage, FrameError, Response, ResponseType, CMD_HEADER_SIZE,
};

use crate::error::NodeError;

/// WARPNet-wide commands
pub const GRPID_WARPNET: u32 = 0xFF;
/// Node commands
pub const GRPID_NODE: u32 = 0x00;
/// Transport commands
pub const GRPID_TRANS: u32 = 0x10;

/// Query the node type code
pub const CMDID_WARPNET_TYPE: u32 = 0xFF_FFFF;

/// Query the hardware-info parameter stream
pub const CMDID_NODE_INFO: u32 = 0x00_0001;
/// Blink the node's identification LEDs
pub const CMDID_NODE_IDENTIFY: u32 = 0x00_0002;
/// Assign node id and network settings by serial number
pub const CMDID_NODE_CONFIG_SETUP: u32 = 0x00_0003;
/// Read a node-side buffer
pub const CMDID_NODE_READ_BUFFER: u32 = 0x00_0006;

/// Round-trip probe
pub const CMDID_TRANS_PING: u32 = 0x00_0001;
/// Largest accepted payload probe
pub const CMDID_TRANS_PAYLOAD_SIZE_TEST: u32 = 0x00_0002;

/// Build a command code from a group and an id
pub const fn build_command(group: u32, id: u32) -> u32 {
    ((group & 0xFF) << 24) | (id & 0x00FF_FFFF)
}

/// Reply collected by the dispatcher for one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Command expects no reply
    None,
    /// Single response frame
    Response(Response),
    /// Fully reassembled buffer
    Buffer(Buffer),
}

/// A command the dispatcher can send
pub trait Command: Send + Sync {
    /// Typed result of the command
    type Output;

    /// How the node answers this command
    fn resp_type(&self) -> ResponseType;

    /// Wire message
    fn message(&self) -> &CmdMessage;

    /// `(buffer_id, flags, size)` of the buffer a BufferResponse command fills
    fn buffer_request(&self) -> Option<(u32, u32, u32)> {
        None
    }

    /// Turn the collected reply into the command's result
    fn process_response(&self, reply: Reply) -> Result<Self::Output, NodeError>;
}

fn expect_response(command: u32, reply: Reply) -> Result<Response, NodeError> {
    match reply {
        Reply::Response(resp) => Ok(resp),
        other => Err(NodeError::UnexpectedReply {
            command,
            reason: format!("expected a single response, got {:?}", other),
        }),
    }
}

fn first_arg(command: u32, resp: &Response) -> Result<u32, NodeError> {
    resp.args()
        .first()
        .copied()
        .ok_or_else(|| NodeError::UnexpectedReply {
            command,
            reason: "response has no arguments".to_string(),
        })
}

/// Query the node's WARPNet type code
#[derive(Debug, Clone)]
pub struct GetNodeType {
    cmd: Cmd,
}

impl GetNodeType {
    /// Create the command
    pub fn new() -> Self {
        Self {
            cmd: Cmd::new(
                build_command(GRPID_WARPNET, CMDID_WARPNET_TYPE),
                ResponseType::SingleResponse,
            ),
        }
    }
}

impl Default for GetNodeType {
    fn default() -> Self {
        Self::new()
    }
}

impl Command for GetNodeType {
    type Output = u32;

    fn resp_type(&self) -> ResponseType {
        self.cmd.resp_type()
    }

    fn message(&self) -> &CmdMessage {
        self.cmd.message()
    }

    fn process_response(&self, reply: Reply) -> Result<u32, NodeError> {
        let command = self.cmd.message().command;
        let resp = expect_response(command, reply)?;
        first_arg(command, &resp)
    }
}

/// Query the hardware-info parameter stream
#[derive(Debug, Clone)]
pub struct GetHwInfo {
    cmd: Cmd,
}

impl GetHwInfo {
    /// Create the command
    pub fn new() -> Self {
        Self {
            cmd: Cmd::new(
                build_command(GRPID_NODE, CMDID_NODE_INFO),
                ResponseType::SingleResponse,
            ),
        }
    }
}

impl Default for GetHwInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl Command for GetHwInfo {
    type Output = Vec<u32>;

    fn resp_type(&self) -> ResponseType {
        self.cmd.resp_type()
    }

    fn message(&self) -> &CmdMessage {
        self.cmd.message()
    }

    fn process_response(&self, reply: Reply) -> Result<Vec<u32>, NodeError> {
        let resp = expect_response(self.cmd.message().command, reply)?;
        Ok(resp.into_inner().args)
    }
}

/// Make the node with the given serial number identify itself
#[derive(Debug, Clone)]
pub struct Identify {
    cmd: Cmd,
}

impl Identify {
    /// Create the command for `serial_number`
    pub fn new(serial_number: u32) -> Result<Self, FrameError> {
        Ok(Self {
            cmd: Cmd::with_args(
                build_command(GRPID_NODE, CMDID_NODE_IDENTIFY),
                ResponseType::NoResponse,
                &[serial_number],
            )?,
        })
    }
}

impl Command for Identify {
    type Output = ();

    fn resp_type(&self) -> ResponseType {
        self.cmd.resp_type()
    }

    fn message(&self) -> &CmdMessage {
        self.cmd.message()
    }

    fn process_response(&self, _reply: Reply) -> Result<(), NodeError> {
        Ok(())
    }
}

/// Broadcast network setup: the node with `serial_number` adopts the id,
/// address and ports carried in the arguments
#[derive(Debug, Clone)]
pub struct NetworkSetup {
    cmd: Cmd,
}

impl NetworkSetup {
    /// Create the command
    pub fn new(
        serial_number: u32,
        node_id: u16,
        ip_address: Ipv4Addr,
        unicast_port: u16,
        bcast_port: u16,
    ) -> Result<Self, FrameError> {
        Ok(Self {
            cmd: Cmd::with_args(
                build_command(GRPID_NODE, CMDID_NODE_CONFIG_SETUP),
                ResponseType::NoResponse,
                &[
                    serial_number,
                    node_id as u32,
                    u32::from(ip_address),
                    unicast_port as u32,
                    bcast_port as u32,
                ],
            )?,
        })
    }
}

impl Command for NetworkSetup {
    type Output = ();

    fn resp_type(&self) -> ResponseType {
        self.cmd.resp_type()
    }

    fn message(&self) -> &CmdMessage {
        self.cmd.message()
    }

    fn process_response(&self, _reply: Reply) -> Result<(), NodeError> {
        Ok(())
    }
}

/// Round-trip probe
#[derive(Debug, Clone)]
pub struct Ping {
    cmd: Cmd,
}

impl Ping {
    /// Create the command
    pub fn new() -> Self {
        Self {
            cmd: Cmd::new(
                build_command(GRPID_TRANS, CMDID_TRANS_PING),
                ResponseType::SingleResponse,
            ),
        }
    }
}

impl Default for Ping {
    fn default() -> Self {
        Self::new()
    }
}

impl Command for Ping {
    type Output = ();

    fn resp_type(&self) -> ResponseType {
        self.cmd.resp_type()
    }

    fn message(&self) -> &CmdMessage {
        self.cmd.message()
    }

    fn process_response(&self, reply: Reply) -> Result<(), NodeError> {
        expect_response(self.cmd.message().command, reply).map(|_| ())
    }
}

/// Send a frame of `size` bytes; the node answers with the number of
/// payload bytes it received
#[derive(Debug, Clone)]
pub struct TestPayloadSize {
    cmd: Cmd,
}

impl TestPayloadSize {
    /// Create a probe whose encoded frame is at most `size` bytes.
    ///
    /// Fails when `size` needs more arguments than a frame can carry.
    pub fn new(size: usize) -> Result<Self, FrameError> {
        let num_args = size.saturating_sub(CMD_HEADER_SIZE) / 4;
        Ok(Self {
            cmd: Cmd::with_args(
                build_command(GRPID_TRANS, CMDID_TRANS_PAYLOAD_SIZE_TEST),
                ResponseType::SingleResponse,
                &vec![0; num_args],
            )?,
        })
    }

    /// Encoded size of the probe frame
    pub fn frame_len(&self) -> usize {
        self.cmd.message().encoded_len()
    }
}

impl Command for TestPayloadSize {
    type Output = usize;

    fn resp_type(&self) -> ResponseType {
        self.cmd.resp_type()
    }

    fn message(&self) -> &CmdMessage {
        self.cmd.message()
    }

    fn process_response(&self, reply: Reply) -> Result<usize, NodeError> {
        let command = self.cmd.message().command;
        let resp = expect_response(command, reply)?;
        Ok(first_arg(command, &resp)? as usize)
    }
}

/// Read a node-side buffer
#[derive(Debug, Clone)]
pub struct ReadBuffer {
    cmd: BufferCmd,
}

impl ReadBuffer {
    /// Request `size` bytes of `buffer_id` starting at `start_byte`
    pub fn new(buffer_id: u32, flags: u32, start_byte: u32, size: u32) -> Self {
        Self {
            cmd: BufferCmd::new(
                build_command(GRPID_NODE, CMDID_NODE_READ_BUFFER),
                buffer_id,
                flags,
                start_byte,
                size,
            ),
        }
    }
}

impl Command for ReadBuffer {
    type Output = Buffer;

    fn resp_type(&self) -> ResponseType {
        self.cmd.resp_type()
    }

    fn message(&self) -> &CmdMessage {
        self.cmd.message()
    }

    fn buffer_request(&self) -> Option<(u32, u32, u32)> {
        Some((self.cmd.buffer_id, self.cmd.flags, self.cmd.size))
    }

    fn process_response(&self, reply: Reply) -> Result<Buffer, NodeError> {
        match reply {
            Reply::Buffer(buffer) => Ok(buffer),
            other => Err(NodeError::UnexpectedReply {
                command: self.cmd.message().command,
                reason: format!("expected a buffer, got {:?}", other),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_command() {
        assert_eq!(build_command(GRPID_WARPNET, CMDID_WARPNET_TYPE), 0xFFFF_FFFF);
        assert_eq!(build_command(GRPID_NODE, CMDID_NODE_INFO), 0x0000_0001);
        assert_eq!(build_command(GRPID_TRANS, CMDID_TRANS_PING), 0x1000_0001);
        assert_eq!(build_command(0x1FF, 0x0100_0002), 0xFF00_0002);
    }

    #[test]
    fn test_get_node_type_response() {
        let cmd = GetNodeType::new();
        assert_eq!(cmd.resp_type(), ResponseType::SingleResponse);

        let resp = Response::new(CmdMessage::with_args(0xFFFF_FFFF, &[0x0001_0000]).unwrap());
        assert_eq!(cmd.process_response(Reply::Response(resp)).unwrap(), 0x0001_0000);

        let empty = Response::new(CmdMessage::new(0xFFFF_FFFF));
        assert!(matches!(
            cmd.process_response(Reply::Response(empty)),
            Err(NodeError::UnexpectedReply { .. })
        ));
        assert!(cmd.process_response(Reply::None).is_err());
    }

    #[test]
    fn test_network_setup_args() {
        let cmd = NetworkSetup::new(1234, 3, Ipv4Addr::new(10, 0, 0, 3), 9500, 10000).unwrap();
        assert_eq!(cmd.resp_type(), ResponseType::NoResponse);
        assert_eq!(
            cmd.message().args,
            vec![1234, 3, 0x0A00_0003, 9500, 10000]
        );
        assert_eq!(cmd.message().length, 20);
    }

    #[test]
    fn test_payload_probe_size() {
        let probe = TestPayloadSize::new(1460).unwrap();
        assert_eq!(probe.frame_len(), 1460);
        assert_eq!(probe.message().num_args as usize, (1460 - 8) / 4);

        let odd = TestPayloadSize::new(1463).unwrap();
        assert!(odd.frame_len() <= 1463);

        let oversized = TestPayloadSize::new(CMD_HEADER_SIZE + 4 * (wn_wire::MAX_ARGS + 1));
        assert!(matches!(oversized, Err(FrameError::TooManyArgs { .. })));
    }

    #[test]
    fn test_read_buffer() {
        let cmd = ReadBuffer::new(4, 0, 0, 3000);
        assert_eq!(cmd.resp_type(), ResponseType::BufferResponse);
        assert_eq!(cmd.buffer_request(), Some((4, 0, 3000)));
        assert_eq!(cmd.message().args, vec![4, 0, 0, 3000]);

        let buffer = Buffer::from_bytes(4, 0, &[1, 2, 3]);
        let out = cmd.process_response(Reply::Buffer(buffer.clone())).unwrap();
        assert_eq!(out, buffer);
    }
}
