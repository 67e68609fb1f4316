//! Error types for the fieldnode runtime

use thiserror::Error;

/// Errors raised by the node runtime and its platform services
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("All {capacity} {table} slots already used")]
    CapacityExhausted { table: &'static str, capacity: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl NodeError {
    pub fn communication(msg: impl Into<String>) -> Self {
        NodeError::Communication(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        NodeError::Storage(msg.into())
    }
}

/// Result alias used across the runtime
pub type NodeResult<T> = Result<T, NodeError>;
