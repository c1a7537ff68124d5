//! Configuration handling for the warpnet tool.
//!
//! Settings are read from a YAML file and environment variables. A missing
//! or unparsable file falls back to defaults.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::Path;
use tracing::{info, warn};
use wn_node::config::{
    DEFAULT_BCAST_ADDRESS, DEFAULT_BCAST_PORT, DEFAULT_HOST_ID, DEFAULT_TIMEOUT_MS,
    DEFAULT_UNICAST_PORT,
};
use wn_node::{Configuration, GenericNode, NodeInit, DEFAULT_MAX_ATTEMPTS};

/// Host-side network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local address the sockets bind to (any interface by default)
    pub host_address: Ipv4Addr,
    /// Host id stamped on outgoing packets
    pub host_id: u16,
    /// Subnet broadcast address
    pub bcast_address: Ipv4Addr,
    /// Default node unicast port
    pub unicast_port: u16,
    /// Default node broadcast port
    pub bcast_port: u16,
    /// Transport implementation
    pub transport_type: String,
    /// Receive timeout (milliseconds)
    pub timeout_ms: u64,
    /// Transmissions per command
    pub max_attempts: u32,
    /// Probe for jumbo frame support
    pub jumbo_frames: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host_address: Ipv4Addr::UNSPECIFIED,
            host_id: DEFAULT_HOST_ID,
            bcast_address: DEFAULT_BCAST_ADDRESS,
            unicast_port: DEFAULT_UNICAST_PORT,
            bcast_port: DEFAULT_BCAST_PORT,
            transport_type: "python".to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            jumbo_frames: false,
        }
    }
}

/// One configured node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEntry {
    /// Serial number
    pub serial_number: u32,
    /// Node id to assign
    pub node_id: u16,
    /// Name
    #[serde(default)]
    pub name: Option<String>,
    /// Address to assign
    pub ip_address: Ipv4Addr,
    /// Unicast port; the network default when unset
    #[serde(default)]
    pub unicast_port: Option<u16>,
    /// Broadcast port; the network default when unset
    #[serde(default)]
    pub bcast_port: Option<u16>,
}

/// warpnet tool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarpnetConfig {
    /// Network settings
    pub network: NetworkConfig,
    /// Node type code (hex or decimal) to node kind name
    pub node_types: BTreeMap<String, String>,
    /// Nodes to bring up
    pub nodes: Vec<NodeEntry>,
}

impl Default for WarpnetConfig {
    fn default() -> Self {
        let mut node_types = BTreeMap::new();
        node_types.insert("0x00000000".to_string(), GenericNode::NAME.to_string());
        Self {
            network: NetworkConfig::default(),
            node_types,
            nodes: Vec::new(),
        }
    }
}

impl WarpnetConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();

        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => match serde_yaml::from_str::<WarpnetConfig>(&content) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file {:?} ({}), using defaults", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
        };

        config.apply_environment_overrides();

        info!(
            "Final configuration: host_id={}, bcast={}, timeout={}ms, max_attempts={}, nodes={}",
            config.network.host_id,
            config.network.bcast_address,
            config.network.timeout_ms,
            config.network.max_attempts,
            config.nodes.len()
        );

        Ok(config)
    }

    fn apply_environment_overrides(&mut self) {
        if let Ok(value) = std::env::var("WARPNET_HOST_ID") {
            if let Ok(host_id) = value.parse::<u16>() {
                self.network.host_id = host_id;
                info!("Host ID overridden by environment: {}", host_id);
            }
        }

        if let Ok(value) = std::env::var("WARPNET_TIMEOUT_MS") {
            if let Ok(timeout_ms) = value.parse::<u64>() {
                self.network.timeout_ms = timeout_ms;
                info!("Timeout overridden by environment: {}ms", timeout_ms);
            }
        }

        if let Ok(value) = std::env::var("WARPNET_MAX_ATTEMPTS") {
            if let Ok(max_attempts) = value.parse::<u32>() {
                self.network.max_attempts = max_attempts;
                info!("Max attempts overridden by environment: {}", max_attempts);
            }
        }
    }

    /// Node identities with network defaults filled in
    pub fn node_inits(&self) -> Vec<NodeInit> {
        self.nodes
            .iter()
            .map(|entry| NodeInit {
                serial_number: entry.serial_number,
                node_id: entry.node_id,
                name: entry
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("Node {}", entry.node_id)),
                ip_address: entry.ip_address,
                unicast_port: entry.unicast_port.unwrap_or(self.network.unicast_port),
                bcast_port: entry.bcast_port.unwrap_or(self.network.bcast_port),
            })
            .collect()
    }
}

impl Configuration for WarpnetConfig {
    fn get(&self, section: &str, key: &str) -> Option<String> {
        if section != "network" {
            return None;
        }

        let net = &self.network;
        let value = match key {
            "host_address" => net.host_address.to_string(),
            "host_id" => net.host_id.to_string(),
            "bcast_address" => net.bcast_address.to_string(),
            "unicast_port" => net.unicast_port.to_string(),
            "bcast_port" => net.bcast_port.to_string(),
            "transport_type" => net.transport_type.clone(),
            "timeout_ms" => net.timeout_ms.to_string(),
            "max_attempts" => net.max_attempts.to_string(),
            "jumbo_frames" => net.jumbo_frames.to_string(),
            _ => return None,
        };
        Some(value)
    }

    fn registered_node_types(&self) -> BTreeMap<u32, String> {
        let mut types = BTreeMap::new();
        for (key, name) in &self.node_types {
            match parse_type_code(key) {
                Some(code) => {
                    types.insert(code, name.clone());
                }
                None => warn!("Ignoring node type with invalid code '{}'", key),
            }
        }
        types
    }
}

/// Parse a `0x`-prefixed hex or a decimal type code
fn parse_type_code(key: &str) -> Option<u32> {
    let key = key.trim();
    match key.strip_prefix("0x").or_else(|| key.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => key.parse().ok(),
    }
}
