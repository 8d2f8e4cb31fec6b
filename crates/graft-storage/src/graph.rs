//! In-memory graph state shared by the storage backends
//!
//! [`StoreGraph`] applies operation batches and answers reads. Every change
//! it makes is also appended to a journal of [`Mutation`]s, which durable
//! backends replay into their own tables on commit.

use crate::error::{StorageError, StorageResult};
use crate::traits::{GraphSnapshot, Related, StoredEdge, StoredNode};
use graft_core::{
    AssignedIds, Direction, EdgeKey, NodeId, Operation, OperationBatch, Target, Token, UpsertKey,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};

type EdgeId = (String, NodeId, NodeId);

fn edge_id(edge: &StoredEdge) -> EdgeId {
    (edge.rel_type.clone(), edge.start, edge.end)
}

/// A resolved change to the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    PutNode(StoredNode),
    RemoveNode(NodeId),
    PutEdge(StoredEdge),
    RemoveEdge(StoredEdge),
    Clear,
    NextId(i64),
}

/// Id source shared by every transaction of one store
///
/// Ids handed to a transaction that later rolls back are not reused.
#[derive(Debug, Default)]
pub struct IdAllocator {
    last: AtomicI64,
}

impl IdAllocator {
    pub fn new(last: i64) -> Self {
        Self {
            last: AtomicI64::new(last),
        }
    }

    pub fn allocate(&self) -> NodeId {
        NodeId(self.last.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Never hand out `id` or anything below it
    pub fn observe(&self, id: i64) {
        self.last.fetch_max(id, Ordering::SeqCst);
    }

    pub fn last(&self) -> i64 {
        self.last.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StoreGraph {
    nodes: BTreeMap<NodeId, StoredNode>,
    edges: BTreeMap<EdgeId, StoredEdge>,
    tokens: HashMap<(String, Token), NodeId>,
    next_id: i64,
}

impl StoreGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted rows
    pub fn from_parts(nodes: Vec<StoredNode>, edges: Vec<StoredEdge>, next_id: i64) -> Self {
        let mut graph = Self {
            next_id,
            ..Default::default()
        };
        for node in nodes {
            graph.next_id = graph.next_id.max(node.id.0);
            graph.put_node(node);
        }
        for edge in edges {
            graph.edges.insert(edge_id(&edge), edge);
        }
        graph
    }

    pub fn node(&self, id: NodeId) -> Option<&StoredNode> {
        self.nodes.get(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Highest id handed out so far
    pub fn next_id(&self) -> i64 {
        self.next_id
    }

    pub fn find_by_token(&self, label: &str, token: &Token) -> Option<&StoredNode> {
        self.tokens
            .get(&(label.to_string(), token.clone()))
            .and_then(|id| self.nodes.get(id))
    }

    /// Neighbors of `id`, ordered by stored position (unpositioned last) then id
    pub fn related(
        &self,
        id: NodeId,
        rel_type: &str,
        direction: Direction,
        target_label: &str,
    ) -> Vec<Related> {
        let mut found: Vec<Related> = self
            .edges
            .values()
            .filter(|e| e.rel_type == rel_type)
            .filter_map(|e| {
                let other = match direction {
                    Direction::Outgoing if e.start == id => e.end,
                    Direction::Incoming if e.end == id => e.start,
                    Direction::Both if e.touches(id) => e.other(id),
                    _ => return None,
                };
                let node = self.nodes.get(&other)?;
                (node.label == target_label).then(|| Related {
                    node: node.clone(),
                    position: e.position,
                })
            })
            .collect();

        found.sort_by_key(|r| (r.position.is_none(), r.position, r.node.id));
        found
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.nodes.values().cloned().collect(),
            edges: self.edges.values().cloned().collect(),
        }
    }

    /// Apply a batch in order, journaling every change as it is made
    ///
    /// All or nothing: if any operation fails, neither the graph nor the
    /// journal keeps anything from the batch.
    pub fn apply(
        &mut self,
        batch: &OperationBatch,
        journal: &mut Vec<Mutation>,
        ids: &IdAllocator,
    ) -> StorageResult<AssignedIds> {
        let mut staged = self.clone();
        let mut changes = Vec::new();
        let assigned = staged.apply_ops(batch, &mut changes, ids)?;
        *self = staged;
        journal.extend(changes);
        Ok(assigned)
    }

    fn apply_ops(
        &mut self,
        batch: &OperationBatch,
        journal: &mut Vec<Mutation>,
        ids: &IdAllocator,
    ) -> StorageResult<AssignedIds> {
        let mut assigned = AssignedIds::new();

        for op in batch {
            match op {
                Operation::UpsertNode {
                    temp,
                    label,
                    key,
                    token,
                    properties,
                } => {
                    let id = match key {
                        UpsertKey::Id(id) => {
                            if !self.nodes.contains_key(id) {
                                return Err(StorageError::NodeNotFound(id.to_string()));
                            }
                            *id
                        }
                        UpsertKey::Token(t) => {
                            let existing = self.tokens.get(&(label.clone(), t.clone())).copied();
                            match existing {
                                Some(id) => id,
                                None => self.allocate(ids, journal),
                            }
                        }
                        UpsertKey::Create => self.allocate(ids, journal),
                    };

                    if let Some(t) = token {
                        if let Some(owner) = self.tokens.get(&(label.clone(), t.clone())) {
                            if *owner != id {
                                return Err(StorageError::Conflict(format!(
                                    "token {} already belongs to {} node {}",
                                    t, label, owner
                                )));
                            }
                        }
                    }

                    let node = StoredNode {
                        id,
                        label: label.clone(),
                        token: token.clone(),
                        properties: properties.clone(),
                    };
                    self.put_node(node.clone());
                    journal.push(Mutation::PutNode(node));
                    assigned.insert(*temp, id);
                }
                Operation::CreateRelationship { key, position } => {
                    let edge = resolve_edge(key, &assigned, *position)?;
                    for endpoint in [edge.start, edge.end] {
                        if !self.nodes.contains_key(&endpoint) {
                            return Err(StorageError::NodeNotFound(endpoint.to_string()));
                        }
                    }
                    self.edges.insert(edge_id(&edge), edge.clone());
                    journal.push(Mutation::PutEdge(edge));
                }
                Operation::DeleteRelationship { key } => {
                    let edge = resolve_edge(key, &assigned, None)?;
                    if let Some(removed) = self.edges.remove(&edge_id(&edge)) {
                        journal.push(Mutation::RemoveEdge(removed));
                    }
                }
                Operation::DeleteNode { id } => {
                    self.remove_node(*id, journal)?;
                }
            }
        }

        Ok(assigned)
    }

    /// Drop every node and edge; ids keep counting up
    pub fn clear(&mut self, journal: &mut Vec<Mutation>) {
        self.nodes.clear();
        self.edges.clear();
        self.tokens.clear();
        journal.push(Mutation::Clear);
    }

    /// Re-apply another graph's resolved changes on top of this one
    pub fn replay(&mut self, journal: &[Mutation]) {
        for mutation in journal {
            match mutation {
                Mutation::PutNode(node) => self.put_node(node.clone()),
                Mutation::RemoveNode(id) => {
                    if let Some(node) = self.nodes.remove(id) {
                        if let Some(t) = &node.token {
                            self.tokens.remove(&(node.label.clone(), t.clone()));
                        }
                    }
                }
                Mutation::PutEdge(edge) => {
                    self.edges.insert(edge_id(edge), edge.clone());
                }
                Mutation::RemoveEdge(edge) => {
                    self.edges.remove(&edge_id(edge));
                }
                Mutation::Clear => {
                    self.nodes.clear();
                    self.edges.clear();
                    self.tokens.clear();
                }
                Mutation::NextId(next) => self.next_id = self.next_id.max(*next),
            }
        }
    }

    fn allocate(&mut self, ids: &IdAllocator, journal: &mut Vec<Mutation>) -> NodeId {
        let id = ids.allocate();
        self.next_id = self.next_id.max(id.0);
        journal.push(Mutation::NextId(id.0));
        id
    }

    fn put_node(&mut self, node: StoredNode) {
        if let Some(previous) = self.nodes.get(&node.id) {
            if let Some(t) = &previous.token {
                self.tokens.remove(&(previous.label.clone(), t.clone()));
            }
        }
        if let Some(t) = &node.token {
            self.tokens.insert((node.label.clone(), t.clone()), node.id);
        }
        self.nodes.insert(node.id, node);
    }

    /// Detach-delete
    fn remove_node(&mut self, id: NodeId, journal: &mut Vec<Mutation>) -> StorageResult<()> {
        let node = self
            .nodes
            .remove(&id)
            .ok_or_else(|| StorageError::NodeNotFound(id.to_string()))?;
        if let Some(t) = &node.token {
            self.tokens.remove(&(node.label.clone(), t.clone()));
        }

        let attached: Vec<EdgeId> = self
            .edges
            .iter()
            .filter(|(_, e)| e.touches(id))
            .map(|(k, _)| k.clone())
            .collect();
        for key in attached {
            if let Some(edge) = self.edges.remove(&key) {
                journal.push(Mutation::RemoveEdge(edge));
            }
        }
        journal.push(Mutation::RemoveNode(id));
        Ok(())
    }
}

fn resolve_edge(
    key: &EdgeKey,
    assigned: &AssignedIds,
    position: Option<u32>,
) -> StorageResult<StoredEdge> {
    let resolve = |target: Target| {
        target.resolve(assigned).ok_or_else(|| {
            StorageError::Transaction(format!("{} references unapplied node {}", key, target))
        })
    };
    let mut start = resolve(key.start)?;
    let mut end = resolve(key.end)?;
    if key.undirected && start > end {
        std::mem::swap(&mut start, &mut end);
    }
    Ok(StoredEdge {
        rel_type: key.rel_type.clone(),
        start,
        end,
        undirected: key.undirected,
        position,
    })
}
