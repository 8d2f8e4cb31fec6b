//! In-memory storage backend for testing

use crate::error::StorageResult;
use crate::graph::StoreGraph;
use crate::traits::{
    AccessMode, GraphReader, GraphSnapshot, Related, StoredNode, TransactionManager, TxHandle,
    WriteBatchExecutor,
};
use crate::txn::TransactionTable;
use async_trait::async_trait;
use graft_core::{AssignedIds, Direction, NodeId, OperationBatch, Token};

/// In-memory storage backend
///
/// Useful for testing and temporary storage. Nothing survives the process.
pub struct MemoryStorage {
    table: TransactionTable,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            table: TransactionTable::new(StoreGraph::new()),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionManager for MemoryStorage {
    async fn begin(&self, mode: AccessMode) -> StorageResult<TxHandle> {
        self.table.begin(mode)
    }

    async fn commit(&self, tx: TxHandle) -> StorageResult<()> {
        let open = self.table.take(tx)?;
        self.table.publish(tx, open, |_| Ok(()))
    }

    async fn rollback(&self, tx: TxHandle) -> StorageResult<()> {
        self.table.take(tx)?;
        tracing::debug!("Rolled back {}", tx);
        Ok(())
    }
}

#[async_trait]
impl WriteBatchExecutor for MemoryStorage {
    async fn apply(&self, tx: TxHandle, batch: &OperationBatch) -> StorageResult<AssignedIds> {
        self.table.apply(tx, batch)
    }

    async fn purge(&self, tx: TxHandle) -> StorageResult<()> {
        self.table.purge(tx)
    }
}

#[async_trait]
impl GraphReader for MemoryStorage {
    async fn fetch_node(&self, tx: TxHandle, id: NodeId) -> StorageResult<Option<StoredNode>> {
        self.table.fetch_node(tx, id)
    }

    async fn find_by_token(
        &self,
        tx: TxHandle,
        label: &str,
        token: &Token,
    ) -> StorageResult<Option<StoredNode>> {
        self.table.find_by_token(tx, label, token)
    }

    async fn fetch_related(
        &self,
        tx: TxHandle,
        id: NodeId,
        rel_type: &str,
        direction: Direction,
        target_label: &str,
    ) -> StorageResult<Vec<Related>> {
        self.table
            .fetch_related(tx, id, rel_type, direction, target_label)
    }

    async fn scan(&self, tx: TxHandle) -> StorageResult<GraphSnapshot> {
        self.table.scan(tx)
    }
}
