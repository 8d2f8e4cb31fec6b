//! Collaborator traits between the mapping layer and a store

use crate::error::StorageResult;
use async_trait::async_trait;
use graft_core::{AssignedIds, Direction, NodeId, OperationBatch, Properties, Token};
use serde::{Deserialize, Serialize};

/// Handle of an open transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHandle(pub u64);

impl std::fmt::Display for TxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

/// Whether a transaction may apply write batches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Read,
    #[default]
    Write,
}

/// A node as kept by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredNode {
    pub id: NodeId,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<Token>,
    #[serde(default)]
    pub properties: Properties,
}

/// An edge as kept by the store
///
/// Undirected edges always have `start <= end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEdge {
    #[serde(rename = "type")]
    pub rel_type: String,
    pub start: NodeId,
    pub end: NodeId,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub undirected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
}

impl StoredEdge {
    pub fn touches(&self, id: NodeId) -> bool {
        self.start == id || self.end == id
    }

    /// The endpoint opposite to `id`
    pub fn other(&self, id: NodeId) -> NodeId {
        if self.start == id {
            self.end
        } else {
            self.start
        }
    }
}

/// A neighbor returned by [`GraphReader::fetch_related`]
#[derive(Debug, Clone, PartialEq)]
pub struct Related {
    pub node: StoredNode,
    pub position: Option<u32>,
}

/// Full contents of a store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<StoredNode>,
    pub edges: Vec<StoredEdge>,
}

/// Counts reported by `graft stats`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub nodes: usize,
    pub relationships: usize,
    pub labels: Vec<(String, usize)>,
}

impl GraphSnapshot {
    pub fn stats(&self) -> StoreStats {
        let mut labels: Vec<(String, usize)> = Vec::new();
        for node in &self.nodes {
            match labels.iter_mut().find(|(l, _)| *l == node.label) {
                Some((_, count)) => *count += 1,
                None => labels.push((node.label.clone(), 1)),
            }
        }
        labels.sort();
        StoreStats {
            nodes: self.nodes.len(),
            relationships: self.edges.len(),
            labels,
        }
    }
}

/// Opens and closes transactions; enforces access mode
#[async_trait]
pub trait TransactionManager: Send + Sync {
    async fn begin(&self, mode: AccessMode) -> StorageResult<TxHandle>;

    /// Make the transaction's writes durable and visible
    async fn commit(&self, tx: TxHandle) -> StorageResult<()>;

    /// Discard the transaction's writes
    async fn rollback(&self, tx: TxHandle) -> StorageResult<()>;
}

/// Applies write batches inside a transaction, never committing on its own
#[async_trait]
pub trait WriteBatchExecutor: Send + Sync {
    /// Apply operations strictly in order and return the ids assigned to upserted nodes
    async fn apply(&self, tx: TxHandle, batch: &OperationBatch) -> StorageResult<AssignedIds>;

    /// Remove every node and relationship
    async fn purge(&self, tx: TxHandle) -> StorageResult<()>;
}

/// Read access used by load and by the CLI
#[async_trait]
pub trait GraphReader: Send + Sync {
    async fn fetch_node(&self, tx: TxHandle, id: NodeId) -> StorageResult<Option<StoredNode>>;

    async fn find_by_token(
        &self,
        tx: TxHandle,
        label: &str,
        token: &Token,
    ) -> StorageResult<Option<StoredNode>>;

    /// Neighbors of `id` over `rel_type` edges in `direction` whose label is
    /// `target_label`, sorted by stored position and then by id
    async fn fetch_related(
        &self,
        tx: TxHandle,
        id: NodeId,
        rel_type: &str,
        direction: Direction,
        target_label: &str,
    ) -> StorageResult<Vec<Related>>;

    async fn scan(&self, tx: TxHandle) -> StorageResult<GraphSnapshot>;
}

/// Everything a [`Session`](crate::Session) needs from a store
pub trait GraphBackend: TransactionManager + WriteBatchExecutor + GraphReader {}

impl<T: TransactionManager + WriteBatchExecutor + GraphReader> GraphBackend for T {}
