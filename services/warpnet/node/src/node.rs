//! WARPNet node: identity, lifecycle and the commands every node supports.
//!
//! A [`Node`] owns its transports through a [`Dispatcher`] and moves through
//! [`NodeState`] as it is addressed, configured and used. Node kinds plug in
//! through the [`NodeKind`] trait.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use wn_wire::Response;

use crate::cmds::{
    Command, GetHwInfo, GetNodeType, Identify, NetworkSetup, Ping, TestPayloadSize,
};
use crate::config::{NetworkSettings, DEFAULT_BCAST_PORT, DEFAULT_UNICAST_PORT};
use crate::dispatch::Dispatcher;
use crate::error::NodeError;
use crate::params::{HardwareInfo, ParameterDecoder};
use crate::transport::{
    Transport, TransportConnector, BROADCAST_DEST_ID, JUMBO_MAX_PAYLOAD, STANDARD_MAX_PAYLOAD,
};
use crate::version::{ProtocolVersion, WARPNET_VERSION};

/// Lifecycle of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    /// Just constructed
    Unconfigured,
    /// Identity and ports assigned, transports open
    Addressed,
    /// Hardware info fetched, decoded and version-checked
    Configured,
    /// Commands have been issued since configuration
    Active,
    /// Transports released
    Closed,
}

/// Identity a node is brought up with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInit {
    /// Serial number printed on the board
    pub serial_number: u32,
    /// Node id to assign
    pub node_id: u16,
    /// Human-readable name
    #[serde(default)]
    pub name: String,
    /// Address to assign
    pub ip_address: Ipv4Addr,
    /// Unicast port
    #[serde(default = "default_unicast_port")]
    pub unicast_port: u16,
    /// Broadcast port
    #[serde(default = "default_bcast_port")]
    pub bcast_port: u16,
}

fn default_unicast_port() -> u16 {
    DEFAULT_UNICAST_PORT
}

fn default_bcast_port() -> u16 {
    DEFAULT_BCAST_PORT
}

impl NodeInit {
    /// Identity with default ports
    pub fn new(
        serial_number: u32,
        node_id: u16,
        name: impl Into<String>,
        ip_address: Ipv4Addr,
    ) -> Self {
        Self {
            serial_number,
            node_id,
            name: name.into(),
            ip_address,
            unicast_port: DEFAULT_UNICAST_PORT,
            bcast_port: DEFAULT_BCAST_PORT,
        }
    }
}

/// Everything known about a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// WARPNet type code
    pub node_type: Option<u32>,
    /// Node id
    pub node_id: u16,
    /// Name
    pub name: String,
    /// Description, set once configured
    pub description: Option<String>,
    /// Serial number
    pub serial_number: u32,
    /// FPGA DNA
    pub fpga_dna: Option<u64>,
    /// Hardware generation
    pub hw_ver: Option<u8>,
    /// WARPNet design version running on the node
    pub version: Option<ProtocolVersion>,
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "W3-a-{:05}: ID {} ({})",
            self.serial_number, self.node_id, self.name
        )
    }
}

/// Behaviour that differs between node types
pub trait NodeKind: Send + Sync + fmt::Debug {
    /// Kind name used in configuration
    fn name(&self) -> &str;

    /// Description shown once the node is configured
    fn description(&self, info: &NodeInfo) -> String {
        format!(
            "WARP v{} Node - ID {}",
            info.hw_ver.unwrap_or_default(),
            info.node_id
        )
    }
}

/// Node kind with no type-specific behaviour
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericNode;

impl GenericNode {
    /// Name under which the generic kind is registered
    pub const NAME: &'static str = "WnNode";

    /// Boxed constructor
    pub fn boxed() -> Box<dyn NodeKind> {
        Box::new(GenericNode)
    }
}

impl NodeKind for GenericNode {
    fn name(&self) -> &str {
        Self::NAME
    }
}

/// Creates a boxed node kind
pub type NodeConstructor = fn() -> Box<dyn NodeKind>;

/// One remote WARPNet node
#[derive(Debug)]
pub struct Node {
    kind: Box<dyn NodeKind>,
    info: NodeInfo,
    state: NodeState,
    ip_address: Option<Ipv4Addr>,
    dispatcher: Option<Dispatcher>,
    decoder: ParameterDecoder,
}

impl Node {
    /// Create an unconfigured node of the given kind
    pub fn new(kind: Box<dyn NodeKind>) -> Self {
        Self {
            kind,
            info: NodeInfo::default(),
            state: NodeState::Unconfigured,
            ip_address: None,
            dispatcher: None,
            decoder: ParameterDecoder::new(WARPNET_VERSION),
        }
    }

    /// Check design versions against `version` instead of [`WARPNET_VERSION`]
    pub fn with_client_version(mut self, version: ProtocolVersion) -> Self {
        self.decoder = ParameterDecoder::new(version);
        self
    }

    /// Assign identity and open both transports
    pub async fn set_init_configuration(
        &mut self,
        init: NodeInit,
        settings: &NetworkSettings,
        connector: &dyn TransportConnector,
    ) -> Result<(), NodeError> {
        if self.state == NodeState::Closed {
            return Err(NodeError::InvalidState {
                state: self.state,
                operation: "set_init_configuration",
            });
        }

        let ip = IpAddr::V4(init.ip_address);

        let mut unicast = connector.unicast()?;
        unicast.open(ip, init.unicast_port).await?;
        unicast.header_mut().src_id = settings.host_id;
        unicast.header_mut().dest_id = init.node_id;

        let mut broadcast = connector.broadcast()?;
        broadcast.open(ip, init.bcast_port).await?;
        broadcast.header_mut().src_id = settings.host_id;
        broadcast.header_mut().dest_id = BROADCAST_DEST_ID;

        if let Some(mut old) = self.dispatcher.take() {
            old.close();
        }
        self.dispatcher =
            Some(Dispatcher::new(unicast, broadcast).with_max_attempts(settings.max_attempts));

        self.info.serial_number = init.serial_number;
        self.info.node_id = init.node_id;
        self.info.name = init.name;
        self.ip_address = Some(init.ip_address);
        self.state = NodeState::Addressed;

        info!(
            "Node {} addressed at {}:{} (bcast port {})",
            self.info, init.ip_address, init.unicast_port, init.bcast_port
        );
        Ok(())
    }

    /// Probe the link and fetch, decode and adopt the node's hardware info
    pub async fn configure_node(&mut self, jumbo_frames: bool) -> Result<(), NodeError> {
        self.ping().await?;
        self.probe_payload_size(jumbo_frames).await?;

        let words = self.get_node_info().await?;
        let hw_info = self.decoder.decode(&words)?;
        self.apply_hw_info(hw_info);

        self.info.description = Some(self.kind.description(&self.info));
        self.state = NodeState::Configured;
        info!(
            "Node {} configured: {}",
            self.info,
            self.info.description.as_deref().unwrap_or_default()
        );
        Ok(())
    }

    fn apply_hw_info(&mut self, hw_info: HardwareInfo) {
        let node = hw_info.node;
        if let Some(node_type) = node.node_type {
            self.info.node_type = Some(node_type);
        }
        if let Some(node_id) = node.node_id {
            if node_id != self.info.node_id {
                warn!("Node {} reports node id {}", self.info, node_id);
            }
            self.info.node_id = node_id;
        }
        if let Some(hw_ver) = node.hw_ver {
            self.info.hw_ver = Some(hw_ver);
        }
        if let Some(version) = node.version {
            self.info.version = Some(version);
        }
        if let Some(serial_number) = node.serial_number {
            self.info.serial_number = serial_number;
        }
        if let Some(fpga_dna) = node.fpga_dna {
            self.info.fpga_dna = Some(fpga_dna);
        }

        if let Some(dispatcher) = self.dispatcher.as_mut() {
            dispatcher.unicast_mut().set_params(hw_info.transport);
        }
    }

    async fn probe_payload_size(&mut self, jumbo_frames: bool) -> Result<(), NodeError> {
        if jumbo_frames {
            match self.test_payload_size(JUMBO_MAX_PAYLOAD).await {
                Ok(size) => return self.adopt_payload_size(size, JUMBO_MAX_PAYLOAD),
                Err(NodeError::Transport(e)) => {
                    warn!(
                        "Node {} did not accept jumbo frames ({}); using standard frames",
                        self.info, e
                    )
                }
                Err(e) => return Err(e),
            }
        }

        let size = self.test_payload_size(STANDARD_MAX_PAYLOAD).await?;
        self.adopt_payload_size(size, STANDARD_MAX_PAYLOAD)
    }

    fn adopt_payload_size(&mut self, reported: usize, tested: usize) -> Result<(), NodeError> {
        let max_payload = reported.min(tested);
        if max_payload < tested {
            warn!(
                "Node {} received {} of {} payload bytes",
                self.info, reported, tested
            );
        }
        self.dispatcher_mut("probe_payload_size")?
            .unicast_mut()
            .set_max_payload(max_payload);
        debug!("Node {} max payload {} bytes", self.info, max_payload);
        Ok(())
    }

    /// Make the node identify itself
    pub async fn identify(&mut self) -> Result<(), NodeError> {
        let serial_number = self.info.serial_number;
        self.send(&Identify::new(serial_number)?).await
    }

    /// Measure one ping round trip
    pub async fn ping(&mut self) -> Result<Duration, NodeError> {
        let start = Instant::now();
        self.send(&Ping::new()).await?;
        let elapsed = start.elapsed();
        debug!("Ping {}: {:?}", self.info, elapsed);
        Ok(elapsed)
    }

    /// Raw hardware-info parameter words
    pub async fn get_node_info(&mut self) -> Result<Vec<u32>, NodeError> {
        self.send(&GetHwInfo::new()).await
    }

    /// Broadcast this node's id, address and ports
    pub async fn setup_node_network_inf(&mut self) -> Result<(), NodeError> {
        let ip_address = self.ip_address.ok_or(NodeError::InvalidState {
            state: self.state,
            operation: "setup_node_network_inf",
        })?;
        let dispatcher = self.dispatcher_mut("setup_node_network_inf")?;
        let unicast_port = dispatcher
            .unicast()
            .remote_addr()
            .map(|a| a.port())
            .unwrap_or(DEFAULT_UNICAST_PORT);
        let bcast_port = dispatcher
            .broadcast()
            .remote_addr()
            .map(|a| a.port())
            .unwrap_or(DEFAULT_BCAST_PORT);

        let setup = NetworkSetup::new(
            self.info.serial_number,
            self.info.node_id,
            ip_address,
            unicast_port,
            bcast_port,
        )?;
        self.send_broadcast(&setup).await
    }

    /// WARPNet type code; queried once, then cached
    pub async fn get_node_type(&mut self) -> Result<u32, NodeError> {
        if let Some(node_type) = self.info.node_type {
            return Ok(node_type);
        }
        let node_type = self.send(&GetNodeType::new()).await?;
        self.info.node_type = Some(node_type);
        Ok(node_type)
    }

    /// Number of payload bytes the node received from a frame of `size` bytes
    pub async fn test_payload_size(&mut self, size: usize) -> Result<usize, NodeError> {
        self.send(&TestPayloadSize::new(size)?).await
    }

    /// Send a command over the unicast transport
    pub async fn send<C: Command>(&mut self, command: &C) -> Result<C::Output, NodeError> {
        let state = self.state;
        let output = self.dispatcher_mut("send")?.send(command).await?;
        if state == NodeState::Configured {
            self.state = NodeState::Active;
        }
        Ok(output)
    }

    /// Send a command over the broadcast transport
    pub async fn send_broadcast<C: Command>(&mut self, command: &C) -> Result<(), NodeError> {
        self.dispatcher_mut("send_broadcast")?
            .send_broadcast(command)
            .await
    }

    /// Responses already queued on the unicast transport
    pub fn drain_responses(&mut self) -> Result<Vec<Response>, NodeError> {
        self.dispatcher_mut("drain_responses")?.drain_responses()
    }

    /// Release both transports
    pub fn close(&mut self) {
        if let Some(dispatcher) = self.dispatcher.as_mut() {
            dispatcher.close();
        }
        if self.state != NodeState::Closed {
            info!("Node {} closed", self.info);
        }
        self.state = NodeState::Closed;
    }

    /// Same identity and transports under another kind
    pub fn into_kind(self, kind: Box<dyn NodeKind>) -> Node {
        debug!(
            "Node {} becomes {} (was {})",
            self.info,
            kind.name(),
            self.kind.name()
        );
        Node { kind, ..self }
    }

    fn dispatcher_mut(&mut self, operation: &'static str) -> Result<&mut Dispatcher, NodeError> {
        match (self.state, self.dispatcher.as_mut()) {
            (NodeState::Unconfigured | NodeState::Closed, _) | (_, None) => {
                Err(NodeError::InvalidState {
                    state: self.state,
                    operation,
                })
            }
            (_, Some(dispatcher)) => Ok(dispatcher),
        }
    }

    /// Identity and hardware info
    pub fn info(&self) -> &NodeInfo {
        &self.info
    }

    /// Lifecycle state
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Kind name
    pub fn kind_name(&self) -> &str {
        self.kind.name()
    }

    /// Node kind
    pub fn kind(&self) -> &dyn NodeKind {
        self.kind.as_ref()
    }

    /// Unicast transport, once addressed
    pub fn transport(&self) -> Option<&dyn Transport> {
        self.dispatcher.as_ref().map(|d| d.unicast())
    }

    /// Transmissions per command
    pub fn max_attempts(&self) -> Option<u32> {
        self.dispatcher.as_ref().map(|d| d.max_attempts())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.info, f)
    }
}
