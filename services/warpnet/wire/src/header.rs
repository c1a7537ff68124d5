//! Transport header processing for the wire protocol.
//!
//! Every datagram exchanged with a node starts with the 12-byte transport
//! header defined here. The header carries the addressing ids, the packet
//! type and the sequence number used to correlate replies with requests.

use bitflags::bitflags;
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::FrameError;

/// Transport header size in bytes
pub const TRANSPORT_HEADER_SIZE: usize = 12;

/// Sequence numbers wrap modulo this value (not 0x10000).
///
/// Nodes in the field expect this exact wrap point, so `0xFFFF` itself is
/// never emitted by [`TransportHeader::increment`].
pub const SEQ_NUM_MODULUS: u32 = 0xFFFF;

/// Packet types carried in the transport header
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketType {
    /// Trigger packet
    Trigger = 0,
    /// Host-to-node message
    HtonMsg = 1,
    /// Node-to-host message
    NtohMsg = 2,
    /// Unsolicited node-to-host message
    NtohMsgAsync = 3,
}

impl TryFrom<u8> for PacketType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PacketType::Trigger),
            1 => Ok(PacketType::HtonMsg),
            2 => Ok(PacketType::NtohMsg),
            3 => Ok(PacketType::NtohMsgAsync),
            _ => Err(FrameError::PacketType(value)),
        }
    }
}

bitflags! {
    /// Transport header flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct HeaderFlags: u16 {
        /// The receiver must answer this packet
        const RESPONSE_REQUIRED = 1 << 0;
    }
}

/// Transport header (12 bytes, big-endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportHeader {
    /// Destination node id
    pub dest_id: u16,
    /// Source (host) id
    pub src_id: u16,
    /// Reserved byte
    pub reserved: u8,
    /// Packet type
    pub pkt_type: PacketType,
    /// Payload length in bytes
    pub length: u16,
    /// Sequence number of the last outgoing packet
    pub seq_num: u16,
    /// Header flags; reserved bits are carried through untouched
    pub flags: HeaderFlags,
}

impl Default for TransportHeader {
    fn default() -> Self {
        Self {
            dest_id: 0,
            src_id: 0,
            reserved: 0,
            pkt_type: PacketType::HtonMsg,
            length: 0,
            seq_num: 0,
            flags: HeaderFlags::empty(),
        }
    }
}

impl TransportHeader {
    /// Create a host-to-node header between the given ids
    pub fn new(src_id: u16, dest_id: u16) -> Self {
        Self {
            src_id,
            dest_id,
            ..Self::default()
        }
    }

    /// Encode the header to bytes (big-endian)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.dest_id);
        buf.put_u16(self.src_id);
        buf.put_u8(self.reserved);
        buf.put_u8(self.pkt_type as u8);
        buf.put_u16(self.length);
        buf.put_u16(self.seq_num);
        buf.put_u16(self.flags.bits());
    }

    /// Decode a header from the first 12 bytes of `buf`
    pub fn decode(mut buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < TRANSPORT_HEADER_SIZE {
            return Err(FrameError::Incomplete {
                needed: TRANSPORT_HEADER_SIZE,
                available: buf.len(),
            });
        }

        let dest_id = buf.get_u16();
        let src_id = buf.get_u16();
        let reserved = buf.get_u8();
        let pkt_type = PacketType::try_from(buf.get_u8())?;
        let length = buf.get_u16();
        let seq_num = buf.get_u16();
        let flags = HeaderFlags::from_bits_retain(buf.get_u16());

        Ok(Self {
            dest_id,
            src_id,
            reserved,
            pkt_type,
            length,
            seq_num,
            flags,
        })
    }

    /// Advance the sequence number by `step`, wrapping modulo [`SEQ_NUM_MODULUS`]
    pub fn increment(&mut self, step: u16) {
        self.seq_num = ((self.seq_num as u32 + step as u32) % SEQ_NUM_MODULUS) as u16;
    }

    /// Restart the sequence at 1 (channel reconnect)
    pub fn reset(&mut self) {
        self.seq_num = 1;
    }

    /// Mark outgoing packets as requiring a response
    pub fn response_required(&mut self) {
        self.flags.insert(HeaderFlags::RESPONSE_REQUIRED);
    }

    /// Mark outgoing packets as not requiring a response
    pub fn response_not_required(&mut self) {
        self.flags.remove(HeaderFlags::RESPONSE_REQUIRED);
    }

    /// Check whether `input` holds the header of a reply to the last outgoing packet.
    ///
    /// A reply swaps the source and destination ids and echoes the sequence
    /// number. Mismatches are logged and reported as `false`.
    pub fn is_reply(&self, input: &[u8]) -> Result<bool, FrameError> {
        let reply = Self::decode(input)?;

        if self.dest_id != reply.src_id
            || self.src_id != reply.dest_id
            || self.seq_num != reply.seq_num
        {
            warn!(
                "Transport header mismatch: ids [{} {}] [{} {}] seq [{} {}]",
                self.dest_id, reply.src_id, self.src_id, reply.dest_id, self.seq_num, reply.seq_num
            );
            return Ok(false);
        }

        Ok(true)
    }
}
