use thiserror::Error;

/// Errors raised while loading or validating a [`ClusterConfig`](crate::ClusterConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid routing pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("No available node for operation '{operation}'")]
    NoAvailableNode { operation: String },

    #[error("Cluster unavailable: no routable nodes")]
    ClusterUnavailable,

    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Sticky routing requires a session id")]
    MissingSessionId,

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Execution on node {node_id} failed: {message}")]
    Execution { node_id: String, message: String },

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("State store error: {0}")]
    State(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
}

impl RouterError {
    /// Convenience constructor for executor failures.
    pub fn execution(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        RouterError::Execution {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// Whether the router refused the call before any node was contacted.
    pub fn is_selection_failure(&self) -> bool {
        matches!(
            self,
            RouterError::NoAvailableNode { .. }
                | RouterError::ClusterUnavailable
                | RouterError::MissingSessionId
        )
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;
