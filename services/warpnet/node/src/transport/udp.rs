//! UDP transport for WARPNet nodes.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::cmp::min;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use wn_wire::{TransportHeader, TRANSPORT_HEADER_SIZE};

use super::{Transport, TransportConnector, TransportParams, STANDARD_MAX_PAYLOAD};
use crate::config::{Configuration, DEFAULT_BCAST_ADDRESS, DEFAULT_TIMEOUT_MS};
use crate::error::TransportError;

/// Receive buffer size; large enough for a jumbo datagram
const RX_BUFFER_SIZE: usize = 9000;

/// Which kind of channel a [`UdpTransport`] is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdpMode {
    /// Point-to-point channel to one node
    Unicast,
    /// Broadcast channel to the given subnet broadcast address
    Broadcast(Ipv4Addr),
}

/// UDP transport settings
#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// How long `receive` waits for a reply
    pub timeout: Duration,
    /// Subnet broadcast address for the broadcast channel
    pub bcast_address: Ipv4Addr,
    /// Local address sockets bind to
    pub bind_address: Ipv4Addr,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            bcast_address: DEFAULT_BCAST_ADDRESS,
            bind_address: Ipv4Addr::UNSPECIFIED,
        }
    }
}

impl UdpConfig {
    /// Read the `network` section, falling back to defaults for missing keys
    pub fn from_config(config: &dyn Configuration) -> Result<Self, TransportError> {
        let transport_type = config
            .get("network", "transport_type")
            .unwrap_or_else(|| "udp".to_string());
        if !matches!(transport_type.as_str(), "udp" | "python") {
            return Err(TransportError::Unsupported(transport_type));
        }

        let mut udp = Self::default();
        if let Some(ms) = config
            .get("network", "timeout_ms")
            .and_then(|v| v.parse::<u64>().ok())
        {
            udp.timeout = Duration::from_millis(ms);
        }
        if let Some(addr) = config
            .get("network", "bcast_address")
            .and_then(|v| v.parse::<Ipv4Addr>().ok())
        {
            udp.bcast_address = addr;
        }
        if let Some(addr) = config
            .get("network", "host_address")
            .and_then(|v| v.parse::<Ipv4Addr>().ok())
        {
            udp.bind_address = addr;
        }
        Ok(udp)
    }
}

/// UDP socket plus its outgoing transport header
#[derive(Debug)]
pub struct UdpTransport {
    mode: UdpMode,
    timeout: Duration,
    bind_address: Ipv4Addr,
    socket: Option<UdpSocket>,
    remote: Option<SocketAddr>,
    closed: bool,
    header: TransportHeader,
    max_payload: usize,
    params: TransportParams,
    rx_buf: Vec<u8>,
}

impl UdpTransport {
    /// Create an unopened transport
    pub fn new(mode: UdpMode, timeout: Duration) -> Self {
        Self {
            mode,
            timeout,
            bind_address: Ipv4Addr::UNSPECIFIED,
            socket: None,
            remote: None,
            closed: false,
            header: TransportHeader::default(),
            max_payload: STANDARD_MAX_PAYLOAD,
            params: TransportParams::default(),
            rx_buf: vec![0; RX_BUFFER_SIZE],
        }
    }

    /// Bind to `addr` instead of all interfaces
    pub fn with_bind_address(mut self, addr: Ipv4Addr) -> Self {
        self.bind_address = addr;
        self
    }

    /// Local address of the socket, when open
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    fn socket(&self) -> Result<&UdpSocket, TransportError> {
        match (&self.socket, self.closed) {
            (Some(socket), _) => Ok(socket),
            (None, true) => Err(TransportError::Closed),
            (None, false) => Err(TransportError::NotOpen),
        }
    }

    /// Strip the transport header, trimming the payload to the header's length
    fn split_payload(data: &[u8]) -> Option<Bytes> {
        let header = TransportHeader::decode(data).ok()?;
        let available = data.len() - TRANSPORT_HEADER_SIZE;
        let len = min(header.length as usize, available);
        Some(Bytes::copy_from_slice(
            &data[TRANSPORT_HEADER_SIZE..TRANSPORT_HEADER_SIZE + len],
        ))
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn open(&mut self, ip: IpAddr, port: u16) -> Result<(), TransportError> {
        let socket = UdpSocket::bind(SocketAddr::new(IpAddr::V4(self.bind_address), 0)).await?;

        let remote = match self.mode {
            UdpMode::Unicast => SocketAddr::new(ip, port),
            UdpMode::Broadcast(bcast) => {
                socket.set_broadcast(true)?;
                SocketAddr::new(IpAddr::V4(bcast), port)
            }
        };

        self.socket = Some(socket);
        self.remote = Some(remote);
        self.closed = false;
        self.header.reset();

        info!("Opened {:?} transport to {}", self.mode, remote);
        Ok(())
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            debug!("Closed transport to {:?}", self.remote);
        }
        self.closed = true;
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    async fn send(&mut self, payload: &[u8], robust: bool) -> Result<(), TransportError> {
        let remote = self.remote.ok_or(TransportError::NotOpen)?;

        if robust {
            self.header.response_required();
        } else {
            self.header.response_not_required();
        }
        self.header.length = payload.len() as u16;
        self.header.increment(1);

        let mut buf = BytesMut::with_capacity(TRANSPORT_HEADER_SIZE + payload.len());
        self.header.encode(&mut buf);
        buf.extend_from_slice(payload);

        self.socket()?.send_to(&buf, remote).await?;
        trace!(
            "Sent {} bytes to {} (seq={})",
            buf.len(),
            remote,
            self.header.seq_num
        );
        Ok(())
    }

    async fn receive(&mut self) -> Result<Bytes, TransportError> {
        let deadline = Instant::now() + self.timeout;

        loop {
            let socket = match (&self.socket, self.closed) {
                (Some(socket), _) => socket,
                (None, true) => return Err(TransportError::Closed),
                (None, false) => return Err(TransportError::NotOpen),
            };

            let (len, from) =
                match tokio::time::timeout_at(deadline, socket.recv_from(&mut self.rx_buf)).await {
                    Err(_) => return Err(TransportError::Timeout),
                    Ok(result) => result?,
                };

            let data = &self.rx_buf[..len];
            match self.header.is_reply(data) {
                Ok(true) => {
                    if let Some(payload) = Self::split_payload(data) {
                        trace!("Received {} byte reply from {}", payload.len(), from);
                        return Ok(payload);
                    }
                }
                Ok(false) => {}
                Err(e) => warn!("Dropping datagram from {}: {}", from, e),
            }
        }
    }

    fn try_receive(&mut self) -> Result<Option<Bytes>, TransportError> {
        let socket = match (&self.socket, self.closed) {
            (Some(socket), _) => socket,
            (None, true) => return Err(TransportError::Closed),
            (None, false) => return Err(TransportError::NotOpen),
        };

        match socket.try_recv_from(&mut self.rx_buf) {
            Ok((len, from)) => match Self::split_payload(&self.rx_buf[..len]) {
                Some(payload) => Ok(Some(payload)),
                None => {
                    warn!("Dropping short datagram ({} bytes) from {}", len, from);
                    Ok(None)
                }
            },
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn header(&self) -> &TransportHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut TransportHeader {
        &mut self.header
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    fn max_payload(&self) -> usize {
        self.max_payload
    }

    fn set_max_payload(&mut self, max_payload: usize) {
        self.max_payload = max_payload;
    }

    fn params(&self) -> &TransportParams {
        &self.params
    }

    fn set_params(&mut self, params: TransportParams) {
        self.params = params;
    }
}

/// Creates [`UdpTransport`]s from a shared [`UdpConfig`]
#[derive(Debug, Clone, Default)]
pub struct UdpConnector {
    config: UdpConfig,
}

impl UdpConnector {
    /// Create a connector
    pub fn new(config: UdpConfig) -> Self {
        Self { config }
    }
}

impl TransportConnector for UdpConnector {
    fn unicast(&self) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(
            UdpTransport::new(UdpMode::Unicast, self.config.timeout)
                .with_bind_address(self.config.bind_address),
        ))
    }

    fn broadcast(&self) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(
            UdpTransport::new(
                UdpMode::Broadcast(self.config.bcast_address),
                self.config.timeout,
            )
            .with_bind_address(self.config.bind_address),
        ))
    }
}
