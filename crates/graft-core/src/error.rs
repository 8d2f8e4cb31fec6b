//! Error types for Graft Core

use crate::limits::ValidationError;
use thiserror::Error;

/// Result type alias using Graft's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Graft error types
#[derive(Error, Debug)]
pub enum Error {
    /// Cardinality or type mismatch detected while planning a save
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Depth exceeded: {depth} is not a valid traversal depth")]
    DepthExceeded { depth: i32 },

    /// A relationship target could not be resolved to an identifier
    #[error("Unresolved reference: {node}.{field} points at a node that is neither persisted nor reachable")]
    UnresolvedReference { node: String, field: String },

    /// The transaction boundary rejected the write batch
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A backend failure, kept as the error source
    #[error("Transaction error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::SchemaViolation(msg.into())
    }

    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Whether the failure came from the transaction boundary rather than the mapping layer
    pub fn is_transaction(&self) -> bool {
        matches!(self, Self::Transaction(_) | Self::Storage(_))
    }
}
