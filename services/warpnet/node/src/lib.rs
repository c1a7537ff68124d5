//! Node lifecycle, command dispatch and discovery for WARPNet.
//!
//! This crate drives remote WARPNet nodes over the frames defined in
//! `wn-wire`:
//!
//! - **Transports**: a [`Transport`] trait with a UDP implementation
//! - **Commands**: typed commands with their reply handling
//! - **Dispatch**: retransmission and buffer re-request per node
//! - **Parameters**: all-or-nothing decoding of hardware-info records
//! - **Discovery**: a [`NodeFactory`] that instantiates nodes by type code
//!
//! ## Bring-up
//!
//! ```text
//! NodeFactory::create_node  -> Addressed (broadcast setup, type query)
//! Node::configure_node      -> Configured (ping, payload probe, hw info)
//! Node::send                -> Active
//! Node::close               -> Closed
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cmds;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod factory;
pub mod node;
pub mod params;
pub mod transport;
pub mod version;

// Re-export main types
pub use cmds::{
    build_command, Command, GetHwInfo, GetNodeType, Identify, NetworkSetup, Ping, ReadBuffer,
    Reply, TestPayloadSize,
};
pub use config::{Configuration, NetworkSettings, StaticConfig};
pub use dispatch::{Dispatcher, DEFAULT_MAX_ATTEMPTS};
pub use error::{FactoryError, NodeError, ParameterError, TransportError, VersionError};
pub use factory::{NodeFactory, NodeKindRegistry};
pub use node::{GenericNode, Node, NodeConstructor, NodeInfo, NodeInit, NodeKind, NodeState};
pub use params::{HardwareInfo, NodeParams, ParameterDecoder};
pub use transport::{
    format_hw_addr, Transport, TransportConnector, TransportParams, UdpConfig, UdpConnector,
    UdpMode, UdpTransport,
};
pub use version::{ProtocolVersion, WARPNET_VERSION};
