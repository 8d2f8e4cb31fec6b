//! Storage error types

use thiserror::Error;

/// Result type alias for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Storage-specific error types
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A transaction committed after this one began changed the same nodes, edges, or tokens
    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Transaction {0} is read-only")]
    ReadOnly(u64),

    #[error("Unknown transaction: {0}")]
    UnknownTransaction(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[cfg(feature = "redb")]
    #[error("ReDB error: {0}")]
    Redb(#[from] ::redb::Error),

    #[cfg(feature = "redb")]
    #[error("ReDB database error: {0}")]
    RedbDatabase(#[from] ::redb::DatabaseError),

    #[cfg(feature = "redb")]
    #[error("ReDB table error: {0}")]
    RedbTable(#[from] ::redb::TableError),

    #[cfg(feature = "redb")]
    #[error("ReDB storage error: {0}")]
    RedbStorage(#[from] ::redb::StorageError),

    #[cfg(feature = "redb")]
    #[error("ReDB commit error: {0}")]
    RedbCommit(#[from] ::redb::CommitError),

    #[cfg(feature = "redb")]
    #[error("ReDB transaction error: {0}")]
    RedbTransaction(#[from] ::redb::TransactionError),
}

impl StorageError {
    pub(crate) fn lock(e: impl std::fmt::Display) -> Self {
        Self::Database(format!("Lock error: {}", e))
    }
}

/// Everything the store rejects surfaces to the mapping layer as a transaction error
impl From<StorageError> for graft_core::Error {
    fn from(e: StorageError) -> Self {
        graft_core::Error::Storage(Box::new(e))
    }
}
