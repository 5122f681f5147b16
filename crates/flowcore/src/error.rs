use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Unknown node or sequence id: {0}")]
    NotFound(String),

    #[error("Node '{id}' failed after {attempts} attempt(s): {source}")]
    Node {
        id: String,
        attempts: u32,
        #[source]
        source: NodeError,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("No dispatcher attached to run context")]
    NoDispatcher,

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl FlowError {
    /// Id of the node whose failure this is, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            FlowError::Node { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// Failure reported by a work function, or imposed on it by its queue.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },
}

impl NodeError {
    pub fn failed(message: impl Into<String>) -> Self {
        NodeError::ExecutionFailed(message.into())
    }
}

/// Build-time problems found while assembling the system.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error(
        "Sequence '{sequence}' has cycles or unresolved dependencies (unresolved: {unresolved:?}, cycles: {cycles:?})"
    )]
    CyclicDependency {
        sequence: String,
        unresolved: Vec<String>,
        cycles: Vec<Vec<String>>,
    },

    #[error("Duplicate id '{0}' in node/sequence namespace")]
    DuplicateId(String),

    #[error("Invalid unit definition in {source_name}: {message}")]
    InvalidUnit { source_name: String, message: String },
}
