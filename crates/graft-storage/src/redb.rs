//! ReDB storage backend
//!
//! The committed graph is cached in memory on open. Transactions stage on a
//! copy of that cache; commit replays the transaction's journal into the
//! tables inside one redb write transaction and only then publishes the copy.

use crate::error::{StorageError, StorageResult};
use crate::graph::{Mutation, StoreGraph};
use crate::migration::Migratable;
use crate::traits::{
    AccessMode, GraphReader, GraphSnapshot, Related, StoredEdge, StoredNode, TransactionManager,
    TxHandle, WriteBatchExecutor,
};
use crate::txn::TransactionTable;
use async_trait::async_trait;
use graft_core::{AssignedIds, Direction, NodeId, OperationBatch, Token};
use redb::{Database, ReadableTable, Table, TableDefinition};
use std::path::Path;
use std::sync::Mutex;

// Table definitions
const NODES: TableDefinition<i64, &[u8]> = TableDefinition::new("nodes");
const EDGES: TableDefinition<&str, &[u8]> = TableDefinition::new("edges");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const NEXT_ID_KEY: &str = "next_id";
const SCHEMA_VERSION_KEY: &str = "schema_version";

/// ReDB storage backend
pub struct RedbStorage {
    db: Mutex<Database>,
    table: TransactionTable,
}

impl RedbStorage {
    /// Open or create a ReDB database at the given path
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let db = Database::create(path).map_err(|e| StorageError::Database(e.to_string()))?;

        let storage = Self {
            db: Mutex::new(db),
            table: TransactionTable::new(StoreGraph::new()),
        };
        storage.migrate_to_latest()?;

        let graph = storage.read_graph()?;
        tracing::info!(
            "Opened {} ({} nodes, {} relationships)",
            path.display(),
            graph.node_count(),
            graph.edge_count()
        );
        storage.table.replace_committed(graph)?;

        Ok(storage)
    }

    fn make_edge_key(edge: &StoredEdge) -> String {
        format!("{}:{}:{}", edge.rel_type, edge.start, edge.end)
    }

    fn read_graph(&self) -> StorageResult<StoreGraph> {
        let db = self.db.lock().map_err(StorageError::lock)?;
        let read_txn = db.begin_read()?;

        let mut nodes = Vec::new();
        for entry in read_txn.open_table(NODES)?.iter()? {
            let (_, value) = entry?;
            nodes.push(serde_json::from_slice::<StoredNode>(value.value())?);
        }

        let mut edges = Vec::new();
        for entry in read_txn.open_table(EDGES)?.iter()? {
            let (_, value) = entry?;
            edges.push(serde_json::from_slice::<StoredEdge>(value.value())?);
        }

        let next_id = read_txn
            .open_table(META)?
            .get(NEXT_ID_KEY)?
            .map(|v| v.value() as i64)
            .unwrap_or(0);

        Ok(StoreGraph::from_parts(nodes, edges, next_id))
    }

    /// Replay a committed transaction's journal into the tables
    fn write_journal(&self, journal: &[Mutation]) -> StorageResult<()> {
        let db = self.db.lock().map_err(StorageError::lock)?;
        let write_txn = db.begin_write()?;
        {
            let mut nodes = write_txn.open_table(NODES)?;
            let mut edges = write_txn.open_table(EDGES)?;
            let mut meta = write_txn.open_table(META)?;

            for mutation in journal {
                match mutation {
                    Mutation::PutNode(node) => {
                        let value = serde_json::to_vec(node)?;
                        nodes.insert(node.id.0, value.as_slice())?;
                    }
                    Mutation::RemoveNode(id) => {
                        nodes.remove(id.0)?;
                    }
                    Mutation::PutEdge(edge) => {
                        let value = serde_json::to_vec(edge)?;
                        edges.insert(Self::make_edge_key(edge).as_str(), value.as_slice())?;
                    }
                    Mutation::RemoveEdge(edge) => {
                        edges.remove(Self::make_edge_key(edge).as_str())?;
                    }
                    Mutation::Clear => {
                        clear_nodes(&mut nodes)?;
                        clear_edges(&mut edges)?;
                    }
                    Mutation::NextId(next) => {
                        // Commits can land out of allocation order
                        let stored = meta.get(NEXT_ID_KEY)?.map(|v| v.value()).unwrap_or(0);
                        if *next as u64 > stored {
                            meta.insert(NEXT_ID_KEY, *next as u64)?;
                        }
                    }
                }
            }
        }
        write_txn.commit()?;

        Ok(())
    }
}

fn clear_nodes(table: &mut Table<'_, i64, &'static [u8]>) -> StorageResult<()> {
    let keys = table
        .iter()?
        .map(|entry| entry.map(|(k, _)| k.value()))
        .collect::<Result<Vec<i64>, _>>()?;
    for key in keys {
        table.remove(key)?;
    }
    Ok(())
}

fn clear_edges(table: &mut Table<'_, &'static str, &'static [u8]>) -> StorageResult<()> {
    let keys = table
        .iter()?
        .map(|entry| entry.map(|(k, _)| k.value().to_string()))
        .collect::<Result<Vec<String>, _>>()?;
    for key in keys {
        table.remove(key.as_str())?;
    }
    Ok(())
}

impl Migratable for RedbStorage {
    fn get_schema_version(&self) -> StorageResult<u32> {
        let db = self.db.lock().map_err(StorageError::lock)?;
        let read_txn = db.begin_read()?;
        let meta = match read_txn.open_table(META) {
            Ok(meta) => meta,
            Err(::redb::TableError::TableDoesNotExist(_)) => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let version = meta
            .get(SCHEMA_VERSION_KEY)?
            .map(|v| v.value() as u32)
            .unwrap_or(0);
        Ok(version)
    }

    fn set_schema_version(&self, version: u32) -> StorageResult<()> {
        let db = self.db.lock().map_err(StorageError::lock)?;
        let write_txn = db.begin_write()?;
        {
            let mut meta = write_txn.open_table(META)?;
            meta.insert(SCHEMA_VERSION_KEY, version as u64)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn run_migration(&self, version: u32) -> StorageResult<()> {
        let db = self.db.lock().map_err(StorageError::lock)?;
        let write_txn = db.begin_write()?;
        match version {
            1 => {
                write_txn.open_table(NODES)?;
                write_txn.open_table(EDGES)?;
                write_txn.open_table(META)?;
            }
            // Stores written before the counter was persisted only have node keys
            2 => {
                let highest = write_txn
                    .open_table(NODES)?
                    .last()?
                    .map(|(k, _)| k.value())
                    .unwrap_or(0);
                let mut meta = write_txn.open_table(META)?;
                let stored = meta.get(NEXT_ID_KEY)?.map(|v| v.value()).unwrap_or(0);
                if highest > 0 && highest as u64 > stored {
                    meta.insert(NEXT_ID_KEY, highest as u64)?;
                }
            }
            other => {
                return Err(StorageError::Migration(format!(
                    "no migration to version {}",
                    other
                )))
            }
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[async_trait]
impl TransactionManager for RedbStorage {
    async fn begin(&self, mode: AccessMode) -> StorageResult<TxHandle> {
        self.table.begin(mode)
    }

    async fn commit(&self, tx: TxHandle) -> StorageResult<()> {
        let open = self.table.take(tx)?;
        self.table
            .publish(tx, open, |journal| self.write_journal(journal))
    }

    async fn rollback(&self, tx: TxHandle) -> StorageResult<()> {
        self.table.take(tx)?;
        tracing::debug!("Rolled back {}", tx);
        Ok(())
    }
}

#[async_trait]
impl WriteBatchExecutor for RedbStorage {
    async fn apply(&self, tx: TxHandle, batch: &OperationBatch) -> StorageResult<AssignedIds> {
        self.table.apply(tx, batch)
    }

    async fn purge(&self, tx: TxHandle) -> StorageResult<()> {
        self.table.purge(tx)
    }
}

#[async_trait]
impl GraphReader for RedbStorage {
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
