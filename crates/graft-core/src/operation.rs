//! Write operations produced by a save and consumed by a batch executor

use crate::node::{NodeId, Properties, Token};
use crate::schema::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Handle of a node scheduled in the current batch, resolved to a [`NodeId`]
/// by the executor once its upsert has been applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TempRef(pub u32);

impl std::fmt::Display for TempRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Ids handed back by the executor for the batch's upserted nodes
pub type AssignedIds = HashMap<TempRef, NodeId>;

/// A relationship endpoint as seen while planning
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Already stored under this id
    Persisted(NodeId),
    /// Upserted earlier in the same batch
    Pending(TempRef),
}

impl Target {
    pub fn resolve(&self, assigned: &AssignedIds) -> Option<NodeId> {
        match self {
            Self::Persisted(id) => Some(*id),
            Self::Pending(temp) => assigned.get(temp).copied(),
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Persisted(id) => write!(f, "{}", id),
            Self::Pending(temp) => write!(f, "{}", temp),
        }
    }
}

/// Identity of a stored edge: type plus endpoints
///
/// Mirrored fields on both endpoints map to the same key, which is how the
/// planner collapses them into one operation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeKey {
    pub rel_type: String,
    pub start: Target,
    pub end: Target,
    /// Declared with [`Direction::Both`]; endpoints are stored in sorted order
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub undirected: bool,
}

impl EdgeKey {
    /// Key for the edge between `owner` (the node declaring the field) and `target`
    pub fn new(rel_type: &str, owner: Target, target: Target, direction: Direction) -> Self {
        let (start, end, undirected) = match direction {
            Direction::Outgoing => (owner, target, false),
            Direction::Incoming => (target, owner, false),
            Direction::Both => (owner.min(target), owner.max(target), true),
        };
        Self {
            rel_type: rel_type.to_string(),
            start,
            end,
            undirected,
        }
    }

    pub fn touches(&self, target: Target) -> bool {
        self.start == target || self.end == target
    }
}

impl std::fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let arrow = if self.undirected { "-" } else { "->" };
        write!(
            f,
            "({})-[:{}]{}({})",
            self.start, self.rel_type, arrow, self.end
        )
    }
}

/// How an upsert locates the stored node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertKey {
    /// Update the node with this internal id
    Id(NodeId),
    /// Update the node carrying this token, or create it
    Token(Token),
    /// Create a new node
    Create,
}

/// One write in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    UpsertNode {
        temp: TempRef,
        label: String,
        key: UpsertKey,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<Token>,
        properties: Properties,
    },
    CreateRelationship {
        key: EdgeKey,
        /// Position within an ordered field
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<u32>,
    },
    DeleteRelationship {
        key: EdgeKey,
    },
    /// Remove a node together with all its edges
    DeleteNode {
        id: NodeId,
    },
}

/// Ordered list of writes for one transaction
///
/// Producers keep node upserts ahead of any relationship operation that
/// references them; executors apply operations strictly in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationBatch {
    operations: Vec<Operation>,
}

/// Operation counts of a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub node_upserts: usize,
    pub relationship_creates: usize,
    pub relationship_deletes: usize,
    pub node_deletes: usize,
}

impl OperationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: Operation) {
        self.operations.push(op);
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.operations.iter()
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn summary(&self) -> BatchSummary {
        self.operations
            .iter()
            .fold(BatchSummary::default(), |mut acc, op| {
                match op {
                    Operation::UpsertNode { .. } => acc.node_upserts += 1,
                    Operation::CreateRelationship { .. } => acc.relationship_creates += 1,
                    Operation::DeleteRelationship { .. } => acc.relationship_deletes += 1,
                    Operation::DeleteNode { .. } => acc.node_deletes += 1,
                }
                acc
            })
    }
}

impl<'a> IntoIterator for &'a OperationBatch {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.iter()
    }
}
