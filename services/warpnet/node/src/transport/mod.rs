//! Datagram transports used by nodes.
//!
//! A [`Transport`] owns one socket plus the [`TransportHeader`] that is
//! stamped on every outgoing datagram. Each node owns two of them: a unicast
//! channel for request/response traffic and a broadcast channel for
//! network setup.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use wn_wire::TransportHeader;

use crate::error::{ParameterError, TransportError};

pub mod udp;

#[cfg(test)]
pub mod mock;

pub use udp::{UdpConfig, UdpConnector, UdpMode, UdpTransport};

/// Destination id used on the broadcast channel
pub const BROADCAST_DEST_ID: u16 = 0xFFFF;

/// Largest command frame that fits a standard 1500 byte MTU
pub const STANDARD_MAX_PAYLOAD: usize = 1500 - 20 - 8 - wn_wire::TRANSPORT_HEADER_SIZE;

/// Largest command frame that fits a 9000 byte jumbo MTU
pub const JUMBO_MAX_PAYLOAD: usize = 9000 - 20 - 8 - wn_wire::TRANSPORT_HEADER_SIZE;

// Transport parameter identifiers (GRPID_TRANS records)
/// Transport type
pub const TRANSPORT_TYPE: u32 = 0;
/// Ethernet hardware address (2 words)
pub const TRANSPORT_HW_ADDR: u32 = 1;
/// IPv4 address
pub const TRANSPORT_IP_ADDR: u32 = 2;
/// Unicast port
pub const TRANSPORT_UNICAST_PORT: u32 = 3;
/// Broadcast port
pub const TRANSPORT_BCAST_PORT: u32 = 4;
/// Node group id
pub const TRANSPORT_GRP_ID: u32 = 5;

/// Datagram channel to one node
#[async_trait]
pub trait Transport: Send {
    /// Open the channel towards `ip:port` and restart the sequence number
    async fn open(&mut self, ip: IpAddr, port: u16) -> Result<(), TransportError>;

    /// Release the socket; later I/O fails with [`TransportError::Closed`]
    fn close(&mut self);

    /// Whether the channel is open
    fn is_open(&self) -> bool;

    /// Send `payload` behind a fresh transport header.
    ///
    /// `robust` sets the response-required flag.
    async fn send(&mut self, payload: &[u8], robust: bool) -> Result<(), TransportError>;

    /// Wait up to the transport timeout for a reply to the last packet sent
    async fn receive(&mut self) -> Result<Bytes, TransportError>;

    /// Take one already-queued datagram without waiting
    fn try_receive(&mut self) -> Result<Option<Bytes>, TransportError>;

    /// Header stamped on outgoing packets
    fn header(&self) -> &TransportHeader;

    /// Mutable access to the outgoing header (ids, packet type)
    fn header_mut(&mut self) -> &mut TransportHeader;

    /// Remote endpoint, when open
    fn remote_addr(&self) -> Option<SocketAddr>;

    /// Largest payload the node accepts on this channel
    fn max_payload(&self) -> usize;

    /// Record the largest payload the node accepts
    fn set_max_payload(&mut self, max_payload: usize);

    /// Transport parameters reported by the node
    fn params(&self) -> &TransportParams;

    /// Adopt transport parameters reported by the node
    fn set_params(&mut self, params: TransportParams);
}

/// Creates transports for a node's unicast and broadcast channels
pub trait TransportConnector: Send + Sync {
    /// New, unopened unicast transport
    fn unicast(&self) -> Result<Box<dyn Transport>, TransportError>;

    /// New, unopened broadcast transport
    fn broadcast(&self) -> Result<Box<dyn Transport>, TransportError>;
}

/// Transport-level values decoded from a hardware-info query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportParams {
    /// Transport type code
    pub transport_type: Option<u32>,
    /// 48-bit Ethernet address
    pub hw_addr: Option<u64>,
    /// Node IPv4 address
    pub ip_addr: Option<Ipv4Addr>,
    /// Node unicast port
    pub unicast_port: Option<u16>,
    /// Node broadcast port
    pub bcast_port: Option<u16>,
    /// Node group id
    pub group_id: Option<u32>,
}

impl TransportParams {
    /// Apply one transport-group record
    pub fn apply(&mut self, identifier: u32, values: &[u32]) -> Result<(), ParameterError> {
        match identifier {
            TRANSPORT_TYPE => self.transport_type = Some(single("TRANSPORT_TYPE", values)?),
            TRANSPORT_HW_ADDR => {
                if values.len() != 2 {
                    return Err(ParameterError::new("TRANSPORT_HW_ADDR", "Incorrect length"));
                }
                self.hw_addr = Some(((values[0] as u64 & 0xFFFF) << 32) | values[1] as u64);
            }
            TRANSPORT_IP_ADDR => {
                self.ip_addr = Some(Ipv4Addr::from(single("TRANSPORT_IP_ADDR", values)?))
            }
            TRANSPORT_UNICAST_PORT => {
                self.unicast_port = Some(single("TRANSPORT_UNICAST_PORT", values)? as u16)
            }
            TRANSPORT_BCAST_PORT => {
                self.bcast_port = Some(single("TRANSPORT_BCAST_PORT", values)? as u16)
            }
            TRANSPORT_GRP_ID => self.group_id = Some(single("TRANSPORT_GRP_ID", values)?),
            _ => {
                return Err(ParameterError::new(
                    identifier.to_string(),
                    "Unknown transport parameter",
                ))
            }
        }
        Ok(())
    }
}

fn single(name: &str, values: &[u32]) -> Result<u32, ParameterError> {
    match values {
        [value] => Ok(*value),
        _ => Err(ParameterError::new(name, "Incorrect length")),
    }
}

/// Format a 48-bit hardware address as `xx:xx:xx:xx:xx:xx`
pub fn format_hw_addr(hw_addr: u64) -> String {
    (0..6)
        .rev()
        .map(|i| format!("{:02x}", (hw_addr >> (i * 8)) & 0xFF))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_limits() {
        assert_eq!(STANDARD_MAX_PAYLOAD, 1460);
        assert_eq!(JUMBO_MAX_PAYLOAD, 8960);
    }

    #[test]
    fn test_apply_transport_params() {
        let mut params = TransportParams::default();
        params.apply(TRANSPORT_HW_ADDR, &[0x0040, 0x5400_0102]).unwrap();
        params.apply(TRANSPORT_IP_ADDR, &[0x0A00_0001]).unwrap();
        params.apply(TRANSPORT_UNICAST_PORT, &[9500]).unwrap();
        params.apply(TRANSPORT_BCAST_PORT, &[10000]).unwrap();

        assert_eq!(params.hw_addr, Some(0x0040_5400_0102));
        assert_eq!(format_hw_addr(0x0040_5400_0102), "00:40:54:00:01:02");
        assert_eq!(params.ip_addr, Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(params.unicast_port, Some(9500));
        assert_eq!(params.bcast_port, Some(10000));
    }

    #[test]
    fn test_transport_param_errors() {
        let mut params = TransportParams::default();
        assert!(params.apply(TRANSPORT_HW_ADDR, &[1]).is_err());
        assert!(params.apply(TRANSPORT_GRP_ID, &[]).is_err());
        assert!(params.apply(42, &[1]).is_err());
    }
}
