use thiserror::Error;

use crate::types::ExecutionStatus;

#[derive(Debug, Error)]
pub enum FlowError {
    // Graph structure errors
    #[error("Node '{0}' already exists")]
    DuplicateNode(String),

    #[error("Node '{0}' not found")]
    UnknownNode(String),

    #[error("Start node already set: {0}")]
    StartAlreadySet(String),

    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    // Execution errors
    #[error("Node '{node_id}' failed: {message}")]
    NodeExecution { node_id: String, message: String },

    #[error("Decision node '{node_id}' has no branch for label '{label}'")]
    UnresolvedBranch { node_id: String, label: String },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    /// Failure raised from inside a user function or tool.
    #[error("{0}")]
    Callable(String),

    // Tool errors
    #[error("Tool '{0}' not found")]
    ToolNotFound(String),

    #[error("Tool '{0}' already registered")]
    ToolAlreadyRegistered(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    /// Shorthand for a failure inside a user-supplied callable.
    pub fn callable(message: impl Into<String>) -> Self {
        Self::Callable(message.into())
    }

    /// Wrap any error raised while a node was transforming state.
    pub fn node_execution(node_id: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::NodeExecution {
            node_id: node_id.into(),
            message: cause.to_string(),
        }
    }

    /// True for errors raised while building or validating a graph.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::DuplicateNode(_)
                | Self::UnknownNode(_)
                | Self::StartAlreadySet(_)
                | Self::InvalidGraph(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
