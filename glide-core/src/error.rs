//! Error types for the Glide client core

use crate::cluster::NodeAddress;
use crate::protocol::Redirect;
use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, GlideError>;

/// Client error types
#[derive(Error, Debug)]
pub enum GlideError {
    /// Transient connection-level failure (retried per reconnection policy)
    #[error("Connection error to {address}: {message}")]
    Connection {
        address: NodeAddress,
        message: String,
    },

    /// The operation's deadline elapsed; the connection is presumed tainted
    #[error("Operation timed out on {address}")]
    Timeout { address: NodeAddress },

    /// MOVED/ASK redirection. Handled inside the router, never surfaced.
    #[error("Redirected: {0}")]
    Redirected(Redirect),

    /// Keys of a multi-key command map to different hash slots
    #[error("CROSSSLOT keys of command {command} don't hash to the same slot")]
    CrossSlot { command: String },

    /// No node could be reached to resolve routing
    #[error("Topology unavailable: {0}")]
    TopologyUnavailable(String),

    /// Node could not be reached after exhausting the reconnection budget
    #[error("Node {address} unreachable after {attempts} attempts")]
    Unreachable { address: NodeAddress, attempts: u32 },

    /// The store returned a command-level error (passed through verbatim)
    #[error("{message}")]
    Server {
        address: NodeAddress,
        message: String,
    },

    /// No node in the current topology owns this slot
    #[error("Slot {0} is not covered by the current topology")]
    SlotNotCovered(u16),

    /// Redirection loop exceeded its step bound
    #[error("Too many redirections for {command} (slot {slot})")]
    TooManyRedirections { command: String, slot: u16 },

    /// Admission control rejected the request
    #[error("Reached maximum of {0} in-flight requests")]
    InflightLimitReached(usize),

    /// The client was closed
    #[error("Client is closed")]
    ClientClosed,

    /// A scan cursor string could not be decoded
    #[error("Invalid scan cursor: {0}")]
    InvalidCursor(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed or unexpected reply
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GlideError {
    /// Whether the error is a network-layer failure that may be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::Io(_)
        )
    }

    /// Server error replies that signal a temporary cluster condition
    pub fn is_retryable_server_error(&self) -> bool {
        match self {
            Self::Server { message, .. } => {
                message.starts_with("TRYAGAIN")
                    || message.starts_with("CLUSTERDOWN")
                    || message.starts_with("LOADING")
            }
            _ => false,
        }
    }

    pub(crate) fn connection(address: &NodeAddress, message: impl Into<String>) -> Self {
        Self::Connection {
            address: address.clone(),
            message: message.into(),
        }
    }
}
