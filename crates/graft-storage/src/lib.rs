//! Graft Storage - Transactions and storage backends
//!
//! This crate provides the collaborators the mapping layer talks to: a
//! transaction manager, a write batch executor, and a graph reader, plus
//! the [`Session`] that scopes saves and loads to transactions.

#![allow(clippy::result_large_err)]

pub mod error;
pub mod graph;
pub mod migration;
pub mod session;
pub mod traits;
mod txn;

#[cfg(feature = "redb")]
pub mod redb;

pub mod memory;

pub use error::{StorageError, StorageResult};
pub use graph::{IdAllocator, Mutation, StoreGraph};
pub use migration::{Migratable, SchemaVersion, CURRENT_VERSION};
pub use session::{Session, SessionConfig};
pub use traits::{
    AccessMode, GraphBackend, GraphReader, GraphSnapshot, Related, StoreStats, StoredEdge,
    StoredNode, TransactionManager, TxHandle, WriteBatchExecutor,
};

#[cfg(feature = "redb")]
pub use redb::RedbStorage;

pub use memory::MemoryStorage;
