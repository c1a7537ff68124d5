//! Configuration seam between the node library and its host application.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tracing::warn;

use crate::dispatch::DEFAULT_MAX_ATTEMPTS;

/// Default host id stamped as the source of every packet
pub const DEFAULT_HOST_ID: u16 = 250;
/// Default receive timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;
/// Default subnet broadcast address
pub const DEFAULT_BCAST_ADDRESS: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 255);
/// Default node unicast port
pub const DEFAULT_UNICAST_PORT: u16 = 9500;
/// Default node broadcast port
pub const DEFAULT_BCAST_PORT: u16 = 10000;

/// Read-only view of the host configuration
pub trait Configuration: Send + Sync {
    /// Value of `key` in `section`, if set
    fn get(&self, section: &str, key: &str) -> Option<String>;

    /// Node type codes mapped to node kind names
    fn registered_node_types(&self) -> BTreeMap<u32, String>;
}

/// Network settings shared by every node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkSettings {
    /// Host id used as the source id of outgoing packets
    pub host_id: u16,
    /// Transmissions per command
    pub max_attempts: u32,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            host_id: DEFAULT_HOST_ID,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl NetworkSettings {
    /// Read `network.host_id` and `network.max_attempts`
    pub fn from_config(config: &dyn Configuration) -> Self {
        let mut settings = Self::default();

        if let Some(value) = config.get("network", "host_id") {
            match value.parse() {
                Ok(host_id) => settings.host_id = host_id,
                Err(_) => warn!("Invalid host_id '{}', using {}", value, settings.host_id),
            }
        }

        if let Some(value) = config.get("network", "max_attempts") {
            match value.parse() {
                Ok(max_attempts) => settings.max_attempts = max_attempts,
                Err(_) => warn!(
                    "Invalid max_attempts '{}', using {}",
                    value, settings.max_attempts
                ),
            }
        }

        settings
    }
}

/// In-memory configuration
#[derive(Debug, Clone, Default)]
pub struct StaticConfig {
    values: BTreeMap<(String, String), String>,
    node_types: BTreeMap<u32, String>,
}

impl StaticConfig {
    /// Create an empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `section.key`
    pub fn set(mut self, section: &str, key: &str, value: impl Into<String>) -> Self {
        self.values
            .insert((section.to_string(), key.to_string()), value.into());
        self
    }

    /// Map `type_code` to a node kind name
    pub fn node_type(mut self, type_code: u32, name: impl Into<String>) -> Self {
        self.node_types.insert(type_code, name.into());
        self
    }
}

impl Configuration for StaticConfig {
    fn get(&self, section: &str, key: &str) -> Option<String> {
        self.values
            .get(&(section.to_string(), key.to_string()))
            .cloned()
    }

    fn registered_node_types(&self) -> BTreeMap<u32, String> {
        self.node_types.clone()
    }
}
