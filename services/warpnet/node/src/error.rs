//! Error types for node command dispatch and discovery.

use thiserror::Error;
use wn_wire::FrameError;

use crate::node::NodeState;
use crate::version::ProtocolVersion;

/// Transport errors (socket failures and timeouts)
#[derive(Error, Debug)]
pub enum TransportError {
    /// No reply within the transport timeout
    #[error("timed out waiting for reply")]
    Timeout,

    /// Transport has been closed
    #[error("transport closed")]
    Closed,

    /// Transport was never opened
    #[error("transport not open")]
    NotOpen,

    /// Every transmission of a command went unanswered
    #[error("max retransmissions without reply from node ({attempts} attempts)")]
    MaxRetransmissions {
        /// Number of transmissions made
        attempts: u32,
    },

    /// Configured transport type is not supported
    #[error("unsupported transport type: {0}")]
    Unsupported(String),

    /// Socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Unknown or mis-sized tagged record in a hardware-info parameter stream
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("parameter {name}: {reason}")]
pub struct ParameterError {
    /// Parameter (or record part) that failed
    pub name: String,
    /// What was wrong with it
    pub reason: String,
}

impl ParameterError {
    /// Create a parameter error
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Node runs an incompatible protocol version
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("node has version {node} which does not match WARPNet v{client}")]
pub struct VersionError {
    /// Version reported by the node
    pub node: ProtocolVersion,
    /// Version implemented by this client
    pub client: ProtocolVersion,
}

/// Errors raised while driving a node
#[derive(Error, Debug)]
pub enum NodeError {
    /// Malformed frame
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Bad hardware-info record
    #[error("parameter error: {0}")]
    Parameter(#[from] ParameterError),

    /// Transport failure or exhausted retransmissions
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Protocol version mismatch
    #[error("version error: {0}")]
    Version(#[from] VersionError),

    /// Reply does not have the shape the command expects
    #[error("unexpected reply to command {command:#010x}: {reason}")]
    UnexpectedReply {
        /// Command code
        command: u32,
        /// What was wrong with the reply
        reason: String,
    },

    /// Operation not allowed in the node's current lifecycle state
    #[error("node is {state:?}; {operation} is not allowed")]
    InvalidState {
        /// Current state
        state: NodeState,
        /// Attempted operation
        operation: &'static str,
    },
}

/// Errors raised while bringing up a node through the factory
#[derive(Error, Debug)]
pub enum FactoryError {
    /// Node reported a type code with no registered implementation
    #[error("unknown WARPNet type {type_code:#010x} for node W3-a-{serial_number:05}")]
    UnknownType {
        /// Serial number of the node
        serial_number: u32,
        /// Type code it reported
        type_code: u32,
    },

    /// Node did not answer during discovery
    #[error("node W3-a-{serial_number:05} is not responding: {source}")]
    NotResponding {
        /// Serial number of the node
        serial_number: u32,
        /// Underlying transport failure
        #[source]
        source: TransportError,
    },

    /// Any other node error during discovery
    #[error(transparent)]
    Node(#[from] NodeError),
}
