//! Node discovery and instantiation.
//!
//! The factory brings an identified node onto the network, asks it for its
//! WARPNet type code and hands back a [`Node`] of the matching kind. Type
//! codes map to kind names in configuration; kind names map to constructors
//! registered in code through [`NodeKindRegistry`].

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{Configuration, NetworkSettings};
use crate::error::{FactoryError, NodeError};
use crate::node::{GenericNode, Node, NodeConstructor, NodeInit};
use crate::transport::TransportConnector;

/// Node kinds known to the application, by name
#[derive(Debug, Clone, Default)]
pub struct NodeKindRegistry {
    kinds: BTreeMap<String, NodeConstructor>,
}

impl NodeKindRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in kinds
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(GenericNode::NAME, GenericNode::boxed);
        registry
    }

    /// Register `constructor` under `name`
    pub fn register(&mut self, name: impl Into<String>, constructor: NodeConstructor) {
        let name = name.into();
        if self.kinds.insert(name.clone(), constructor).is_some() {
            warn!("Replacing node kind {}", name);
        }
    }

    /// Constructor registered under `name`
    pub fn get(&self, name: &str) -> Option<NodeConstructor> {
        self.kinds.get(name).copied()
    }

    /// Registered kind names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }
}

/// Creates nodes of the kind they report
pub struct NodeFactory {
    types: BTreeMap<u32, (String, NodeConstructor)>,
    connector: Arc<dyn TransportConnector>,
    settings: NetworkSettings,
}

impl std::fmt::Debug for NodeFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeFactory")
            .field("types", &self.node_types().collect::<Vec<_>>())
            .field("settings", &self.settings)
            .finish()
    }
}

impl NodeFactory {
    /// Build the type-code table from `config`, resolving names in `registry`.
    ///
    /// Names with no registered constructor are skipped with a warning.
    pub fn new(
        config: &dyn Configuration,
        registry: &NodeKindRegistry,
        connector: Arc<dyn TransportConnector>,
        settings: NetworkSettings,
    ) -> Self {
        let mut factory = Self {
            types: BTreeMap::new(),
            connector,
            settings,
        };

        let node_types = config.registered_node_types();
        if node_types.is_empty() {
            warn!("No WARPNet node types configured");
        }

        for (type_code, name) in node_types {
            match registry.get(&name) {
                Some(constructor) => factory.add_node_type(type_code, name, constructor),
                None => warn!(
                    "Node type {:#010x} names unknown node kind '{}'; skipping",
                    type_code, name
                ),
            }
        }

        factory
    }

    /// Map `type_code` to a node kind; an existing mapping is replaced
    pub fn add_node_type(
        &mut self,
        type_code: u32,
        name: impl Into<String>,
        constructor: NodeConstructor,
    ) {
        let name = name.into();
        if let Some((old, _)) = self.types.get(&type_code) {
            warn!(
                "Changing definition of {:#010x} from {} to {}",
                type_code, old, name
            );
        }
        debug!("Registered node type {:#010x} => {}", type_code, name);
        self.types.insert(type_code, (name, constructor));
    }

    /// Kind name registered for `type_code`
    pub fn node_kind(&self, type_code: u32) -> Option<&str> {
        self.types.get(&type_code).map(|(name, _)| name.as_str())
    }

    /// Registered `(type_code, kind name)` pairs
    pub fn node_types(&self) -> impl Iterator<Item = (u32, &str)> {
        self.types
            .iter()
            .map(|(code, (name, _))| (*code, name.as_str()))
    }

    /// Network settings applied to every node
    pub fn settings(&self) -> &NetworkSettings {
        &self.settings
    }

    /// Bring up the node described by `init` and return it as its reported kind.
    ///
    /// Failure affects this node only.
    pub async fn create_node(&self, init: &NodeInit) -> Result<Node, FactoryError> {
        let serial_number = init.serial_number;
        let mut node = Node::new(GenericNode::boxed());

        node.set_init_configuration(init.clone(), &self.settings, self.connector.as_ref())
            .await
            .map_err(|e| not_responding(serial_number, e))?;

        let type_code = match self.discover_type(&mut node).await {
            Ok(type_code) => type_code,
            Err(e) => {
                node.close();
                return Err(not_responding(serial_number, e));
            }
        };

        let Some((name, constructor)) = self.types.get(&type_code) else {
            node.close();
            return Err(FactoryError::UnknownType {
                serial_number,
                type_code,
            });
        };

        info!(
            "Node W3-a-{:05} is type {:#010x} ({})",
            serial_number, type_code, name
        );
        Ok(node.into_kind(constructor()))
    }

    async fn discover_type(&self, node: &mut Node) -> Result<u32, NodeError> {
        node.setup_node_network_inf().await?;
        node.get_node_type().await
    }
}

fn not_responding(serial_number: u32, error: NodeError) -> FactoryError {
    match error {
        NodeError::Transport(source) => FactoryError::NotResponding {
            serial_number,
            source,
        },
        other => FactoryError::Node(other),
    }
}
