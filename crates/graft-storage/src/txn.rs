//! Open-transaction bookkeeping shared by the backends
//!
//! Each transaction works on its own copy of the committed graph and draws
//! node ids from one allocator shared by the whole store. Commit replays
//! the transaction's journal onto the latest committed graph unless a
//! transaction committed since this one began touched the same nodes,
//! edges, or tokens; rollback just drops the copy.

use crate::error::{StorageError, StorageResult};
use crate::graph::{IdAllocator, Mutation, StoreGraph};
use crate::traits::{AccessMode, GraphSnapshot, Related, StoredNode, TxHandle};
use graft_core::{AssignedIds, Direction, NodeId, OperationBatch, Token};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

pub(crate) struct OpenTransaction {
    pub mode: AccessMode,
    pub base_version: u64,
    pub working: StoreGraph,
    pub journal: Vec<Mutation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Key {
    Node(NodeId),
    Edge(String, NodeId, NodeId),
    Token(String, Token),
}

/// What a committed journal changed, and which nodes its new edges rely on
#[derive(Debug, Default)]
struct Footprint {
    writes: HashSet<Key>,
    removed: HashSet<NodeId>,
    endpoints: HashSet<NodeId>,
    cleared: bool,
}

impl Footprint {
    fn of(journal: &[Mutation]) -> Self {
        let mut footprint = Self::default();
        for mutation in journal {
            match mutation {
                Mutation::PutNode(node) => {
                    footprint.writes.insert(Key::Node(node.id));
                    if let Some(t) = &node.token {
                        footprint
                            .writes
                            .insert(Key::Token(node.label.clone(), t.clone()));
                    }
                }
                Mutation::RemoveNode(id) => {
                    footprint.writes.insert(Key::Node(*id));
                    footprint.removed.insert(*id);
                }
                Mutation::PutEdge(edge) => {
                    footprint.writes.insert(Key::Edge(
                        edge.rel_type.clone(),
                        edge.start,
                        edge.end,
                    ));
                    footprint.endpoints.extend([edge.start, edge.end]);
                }
                Mutation::RemoveEdge(edge) => {
                    footprint.writes.insert(Key::Edge(
                        edge.rel_type.clone(),
                        edge.start,
                        edge.end,
                    ));
                }
                Mutation::Clear => footprint.cleared = true,
                Mutation::NextId(_) => {}
            }
        }
        footprint
    }

    fn overlaps(&self, other: &Footprint) -> bool {
        self.cleared
            || other.cleared
            || !self.writes.is_disjoint(&other.writes)
            || !self.endpoints.is_disjoint(&other.removed)
            || !other.endpoints.is_disjoint(&self.removed)
    }
}

struct Committed {
    graph: StoreGraph,
    version: u64,
    /// Footprints of commits that a still-open transaction has not seen
    history: Vec<(u64, Footprint)>,
}

pub(crate) struct TransactionTable {
    committed: RwLock<Committed>,
    open: Mutex<HashMap<TxHandle, OpenTransaction>>,
    next_tx: AtomicU64,
    ids: IdAllocator,
}

impl TransactionTable {
    pub fn new(graph: StoreGraph) -> Self {
        Self {
            ids: IdAllocator::new(graph.next_id()),
            committed: RwLock::new(Committed {
                graph,
                version: 0,
                history: Vec::new(),
            }),
            open: Mutex::new(HashMap::new()),
            next_tx: AtomicU64::new(1),
        }
    }

    pub fn begin(&self, mode: AccessMode) -> StorageResult<TxHandle> {
        // Registered under the read lock so a concurrent commit cannot prune
        // history this transaction still needs
        let committed = self.committed.read().map_err(StorageError::lock)?;
        let base_version = committed.version;
        let tx = TxHandle(self.next_tx.fetch_add(1, Ordering::SeqCst));
        self.open.lock().map_err(StorageError::lock)?.insert(
            tx,
            OpenTransaction {
                mode,
                base_version,
                working: committed.graph.clone(),
                journal: Vec::new(),
            },
        );
        drop(committed);
        tracing::debug!("Began {} ({:?}) at version {}", tx, mode, base_version);
        Ok(tx)
    }

    /// Remove a transaction from the open set
    pub fn take(&self, tx: TxHandle) -> StorageResult<OpenTransaction> {
        self.open
            .lock()
            .map_err(StorageError::lock)?
            .remove(&tx)
            .ok_or(StorageError::UnknownTransaction(tx.0))
    }

    /// Publish a finished transaction
    ///
    /// `persist` receives the journal while the commit lock is held and may
    /// reject the commit, in which case nothing is published.
    pub fn publish(
        &self,
        tx: TxHandle,
        open: OpenTransaction,
        persist: impl FnOnce(&[Mutation]) -> StorageResult<()>,
    ) -> StorageResult<()> {
        if open.journal.is_empty() {
            tracing::debug!("Committed {} with no changes", tx);
            return Ok(());
        }

        let footprint = Footprint::of(&open.journal);
        let mut committed = self.committed.write().map_err(StorageError::lock)?;
        if let Some((version, _)) = committed
            .history
            .iter()
            .find(|(version, theirs)| *version > open.base_version && footprint.overlaps(theirs))
        {
            return Err(StorageError::Conflict(format!(
                "{} began at version {} and overlaps the changes committed at version {}",
                tx, open.base_version, version
            )));
        }

        persist(&open.journal)?;

        let rebased = committed.version != open.base_version;
        if rebased {
            committed.graph.replay(&open.journal);
        } else {
            committed.graph = open.working;
        }
        committed.version += 1;
        let version = committed.version;
        committed.history.push((version, footprint));

        // Only transactions still open can need older footprints
        let oldest = self
            .open
            .lock()
            .map_err(StorageError::lock)?
            .values()
            .map(|t| t.base_version)
            .min();
        match oldest {
            Some(base) => committed.history.retain(|(v, _)| *v > base),
            None => committed.history.clear(),
        }

        tracing::info!(
            "Committed {} ({} mutations, version {}{})",
            tx,
            open.journal.len(),
            version,
            if rebased { ", rebased" } else { "" }
        );
        Ok(())
    }

    pub fn replace_committed(&self, graph: StoreGraph) -> StorageResult<()> {
        let mut committed = self.committed.write().map_err(StorageError::lock)?;
        self.ids.observe(graph.next_id());
        committed.graph = graph;
        committed.version += 1;
        committed.history.clear();
        Ok(())
    }

    fn read<T>(&self, tx: TxHandle, f: impl FnOnce(&StoreGraph) -> T) -> StorageResult<T> {
        let open = self.open.lock().map_err(StorageError::lock)?;
        let txn = open.get(&tx).ok_or(StorageError::UnknownTransaction(tx.0))?;
        Ok(f(&txn.working))
    }

    fn write<T>(
        &self,
        tx: TxHandle,
        f: impl FnOnce(&mut StoreGraph, &mut Vec<Mutation>) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut open = self.open.lock().map_err(StorageError::lock)?;
        let txn = open
            .get_mut(&tx)
            .ok_or(StorageError::UnknownTransaction(tx.0))?;
        if txn.mode == AccessMode::Read {
            return Err(StorageError::ReadOnly(tx.0));
        }
        f(&mut txn.working, &mut txn.journal)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Operations backing the collaborator traits
    // ─────────────────────────────────────────────────────────────────────────

    pub fn apply(&self, tx: TxHandle, batch: &OperationBatch) -> StorageResult<AssignedIds> {
        self.write(tx, |graph, journal| graph.apply(batch, journal, &self.ids))
    }

    pub fn purge(&self, tx: TxHandle) -> StorageResult<()> {
        self.write(tx, |graph, journal| {
            graph.clear(journal);
            Ok(())
        })
    }

    pub fn fetch_node(&self, tx: TxHandle, id: NodeId) -> StorageResult<Option<StoredNode>> {
        self.read(tx, |g| g.node(id).cloned())
    }

    pub fn find_by_token(
        &self,
        tx: TxHandle,
        label: &str,
        token: &Token,
    ) -> StorageResult<Option<StoredNode>> {
        self.read(tx, |g| g.find_by_token(label, token).cloned())
    }

    pub fn fetch_related(
        &self,
        tx: TxHandle,
        id: NodeId,
        rel_type: &str,
        direction: Direction,
        target_label: &str,
    ) -> StorageResult<Vec<Related>> {
        self.read(tx, |g| g.related(id, rel_type, direction, target_label))
    }

    pub fn scan(&self, tx: TxHandle) -> StorageResult<GraphSnapshot> {
        self.read(tx, StoreGraph::snapshot)
    }
}
