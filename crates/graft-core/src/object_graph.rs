//! Caller-owned arena of in-memory nodes
//!
//! Nodes reference each other through [`NodeRef`] handles, so cyclic object
//! graphs (A -> C -> A) are plain data. The arena also keeps the identity
//! map from stored ids to handles and the relationship state tracker.

use crate::error::{Error, Result};
use crate::node::{Node, NodeId, NodeRef, Properties, Token};
use crate::schema::Cardinality;
use crate::tracker::{LoadMap, RelationshipTracker};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ObjectGraph {
    nodes: Vec<Node>,
    deleted: Vec<bool>,
    by_id: HashMap<NodeId, NodeRef>,
    tracker: RelationshipTracker,
}

impl ObjectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new, unpersisted node and return its handle
    pub fn add(&mut self, node: Node) -> NodeRef {
        let handle = NodeRef(self.nodes.len());
        self.nodes.push(node);
        self.deleted.push(false);
        handle
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, handle: NodeRef) -> Option<&Node> {
        self.nodes.get(handle.0)
    }

    pub fn node_mut(&mut self, handle: NodeRef) -> Option<&mut Node> {
        self.nodes.get_mut(handle.0)
    }

    /// Like [`node`](Self::node) but reports a missing handle as an error
    pub fn get(&self, handle: NodeRef) -> Result<&Node> {
        self.node(handle)
            .ok_or_else(|| Error::NodeNotFound(handle.to_string()))
    }

    pub fn get_mut(&mut self, handle: NodeRef) -> Result<&mut Node> {
        self.nodes
            .get_mut(handle.0)
            .ok_or_else(|| Error::NodeNotFound(handle.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeRef, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (NodeRef(i), node))
    }

    /// Handle of the in-memory node persisted as `id`, if any
    pub fn lookup(&self, id: NodeId) -> Option<NodeRef> {
        self.by_id.get(&id).copied()
    }

    /// Whether the node was deleted from the store through a session
    pub fn is_deleted(&self, handle: NodeRef) -> bool {
        self.deleted.get(handle.0).copied().unwrap_or(false)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Relationship fields
    // ─────────────────────────────────────────────────────────────────────────

    /// Append `to` to the relationship field `field` of `from`
    ///
    /// Adding a target that is already present is a no-op. Cardinality is not
    /// checked here; a single field holding two targets fails at save time.
    pub fn relate(&mut self, from: NodeRef, field: &str, to: NodeRef) -> Result<()> {
        self.check_target(to)?;
        let targets = self
            .get_mut(from)?
            .relations
            .entry(field.to_string())
            .or_default();
        if !targets.contains(&to) {
            targets.push(to);
        }
        Ok(())
    }

    /// Replace a field's targets with at most one node
    pub fn set_single(&mut self, from: NodeRef, field: &str, to: Option<NodeRef>) -> Result<()> {
        if let Some(to) = to {
            self.check_target(to)?;
        }
        let node = self.get_mut(from)?;
        node.relations
            .insert(field.to_string(), to.into_iter().collect());
        Ok(())
    }

    /// Replace a field's targets, keeping the given order
    pub fn set_targets(
        &mut self,
        from: NodeRef,
        field: &str,
        targets: Vec<NodeRef>,
    ) -> Result<()> {
        for to in &targets {
            self.check_target(*to)?;
        }
        let mut deduped = Vec::with_capacity(targets.len());
        for to in targets {
            if !deduped.contains(&to) {
                deduped.push(to);
            }
        }
        self.get_mut(from)?
            .relations
            .insert(field.to_string(), deduped);
        Ok(())
    }

    /// Remove `to` from a field; returns whether it was present
    pub fn unrelate(&mut self, from: NodeRef, field: &str, to: NodeRef) -> Result<bool> {
        let node = self.get_mut(from)?;
        Ok(match node.relations.get_mut(field) {
            Some(targets) => {
                let before = targets.len();
                targets.retain(|t| *t != to);
                targets.len() != before
            }
            None => false,
        })
    }

    pub fn clear_relation(&mut self, from: NodeRef, field: &str) -> Result<()> {
        self.get_mut(from)?.relations.remove(field);
        Ok(())
    }

    /// Current in-memory targets of a field, in field order
    pub fn targets(&self, from: NodeRef, field: &str) -> &[NodeRef] {
        self.node(from)
            .and_then(|n| n.relations.get(field))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn check_target(&self, to: NodeRef) -> Result<()> {
        if to.0 >= self.nodes.len() {
            return Err(Error::NodeNotFound(to.to_string()));
        }
        if self.is_deleted(to) {
            return Err(Error::NodeNotFound(format!("{} (deleted)", to)));
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Relationship state
    // ─────────────────────────────────────────────────────────────────────────

    pub fn tracker(&self) -> &RelationshipTracker {
        &self.tracker
    }

    pub(crate) fn tracker_mut(&mut self) -> &mut RelationshipTracker {
        &mut self.tracker
    }

    /// Last-known persisted relationship state of `handle`
    pub fn load_map(&self, handle: NodeRef) -> LoadMap {
        self.tracker.load(handle)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Persistence bookkeeping
    // ─────────────────────────────────────────────────────────────────────────

    /// Record that `handle` is now stored as `id` with its current scalars
    pub(crate) fn mark_persisted(&mut self, handle: NodeRef, id: NodeId) -> Result<()> {
        self.get_mut(handle)?.mark_persisted(id);
        self.by_id.insert(id, handle);
        Ok(())
    }

    /// Insert or refresh a node read from the store
    ///
    /// A node already present in the arena under the same id keeps its
    /// handle; its scalars are overwritten by the stored ones.
    pub fn merge_loaded(
        &mut self,
        label: &str,
        id: NodeId,
        token: Option<Token>,
        properties: Properties,
    ) -> NodeRef {
        let handle = match self.lookup(id) {
            Some(existing) => existing,
            None => self.add(Node::new(label)),
        };
        let node = &mut self.nodes[handle.0];
        node.label = label.to_string();
        node.token = token;
        node.properties = properties;
        node.mark_persisted(id);
        self.by_id.insert(id, handle);
        handle
    }

    /// Set a field from stored edges and record them as the field's snapshot
    ///
    /// Every target must already be persisted (carry an id).
    pub fn record_loaded_relation(
        &mut self,
        handle: NodeRef,
        field: &str,
        cardinality: Cardinality,
        targets: Vec<NodeRef>,
    ) -> Result<()> {
        let mut ids = Vec::with_capacity(targets.len());
        for target in &targets {
            self.check_target(*target)?;
            let id = self.nodes[target.0].id().ok_or_else(|| {
                Error::Internal(format!("loaded target {} has no id", target))
            })?;
            ids.push(id);
        }
        self.get_mut(handle)?
            .relations
            .insert(field.to_string(), targets);
        self.tracker.update(handle, field, cardinality, ids);
        Ok(())
    }

    /// Detach `handle` from the store after a delete
    ///
    /// Other nodes keep their in-memory links to it, so saving them fails
    /// until the links are removed; their recorded state no longer
    /// mentions the deleted id.
    pub fn mark_deleted(&mut self, handle: NodeRef) -> Result<()> {
        let node = self.get_mut(handle)?;
        let id = node.id();
        node.forget_persistence();
        if let Some(id) = id {
            self.by_id.remove(&id);
            self.tracker.forget_target(id);
        }
        self.deleted[handle.0] = true;
        self.tracker.forget(handle);
        Ok(())
    }
}
