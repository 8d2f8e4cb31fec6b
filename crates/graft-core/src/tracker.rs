//! Relationship state tracking (the "load map")
//!
//! For every node the tracker remembers which targets each relationship
//! field held the last time the node was loaded or saved. The diff
//! reconciler compares this snapshot against the in-memory fields to decide
//! which edges to create and which to delete. The snapshot is derived state:
//! it is never written to the store.

use crate::node::{NodeId, NodeRef};
use crate::schema::Cardinality;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Persisted targets of one relationship field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationConfig {
    /// Target ids in field order
    pub ids: Vec<NodeId>,
    pub cardinality: Cardinality,
}

impl RelationConfig {
    pub fn new(cardinality: Cardinality, ids: Vec<NodeId>) -> Self {
        Self { ids, cardinality }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.ids.contains(&id)
    }
}

/// Per-field snapshot for one node: field name -> persisted targets
pub type LoadMap = BTreeMap<String, RelationConfig>;

/// In-memory store of load maps keyed by node identity
#[derive(Debug, Clone, Default)]
pub struct RelationshipTracker {
    snapshots: HashMap<NodeRef, LoadMap>,
}

impl RelationshipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot for `node`; empty if the node was never loaded or saved
    pub fn load(&self, node: NodeRef) -> LoadMap {
        self.snapshots.get(&node).cloned().unwrap_or_default()
    }

    pub fn snapshot(&self, node: NodeRef) -> Option<&LoadMap> {
        self.snapshots.get(&node)
    }

    pub fn field(&self, node: NodeRef, field: &str) -> Option<&RelationConfig> {
        self.snapshots.get(&node).and_then(|map| map.get(field))
    }

    /// Record the persisted targets of `field`. An empty target list drops the entry.
    pub fn update(
        &mut self,
        node: NodeRef,
        field: &str,
        cardinality: Cardinality,
        ids: Vec<NodeId>,
    ) {
        if ids.is_empty() {
            if let Some(map) = self.snapshots.get_mut(&node) {
                map.remove(field);
            }
            return;
        }
        self.snapshots
            .entry(node)
            .or_default()
            .insert(field.to_string(), RelationConfig::new(cardinality, ids));
    }

    /// Drop everything known about `node`
    pub fn forget(&mut self, node: NodeRef) {
        self.snapshots.remove(&node);
    }

    /// Drop `id` from every recorded field, after the stored node is gone
    pub fn forget_target(&mut self, id: NodeId) {
        for map in self.snapshots.values_mut() {
            map.retain(|_, config| {
                config.ids.retain(|t| *t != id);
                !config.ids.is_empty()
            });
        }
    }

    /// Number of nodes with a non-empty snapshot
    pub fn len(&self) -> usize {
        self.snapshots.values().filter(|m| !m.is_empty()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_and_load() {
        let mut tracker = RelationshipTracker::new();
        let node = NodeRef(0);
        assert!(tracker.load(node).is_empty());

        tracker.update(node, "friends", Cardinality::Multi, vec![NodeId(2), NodeId(3)]);
        let map = tracker.load(node);
        assert_eq!(map["friends"].ids, vec![NodeId(2), NodeId(3)]);
        assert_eq!(map["friends"].cardinality, Cardinality::Multi);
        assert!(tracker.field(node, "friends").unwrap().contains(NodeId(3)));
    }

    #[test]
    fn test_empty_update_removes_field() {
        let mut tracker = RelationshipTracker::new();
        let node = NodeRef(4);
        tracker.update(node, "employer", Cardinality::Single, vec![NodeId(9)]);
        tracker.update(node, "employer", Cardinality::Single, vec![]);

        assert!(tracker.field(node, "employer").is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_forget() {
        let mut tracker = RelationshipTracker::new();
        tracker.update(NodeRef(1), "a", Cardinality::Multi, vec![NodeId(1)]);
        tracker.update(NodeRef(2), "a", Cardinality::Multi, vec![NodeId(1)]);
        tracker.forget(NodeRef(1));

        assert_eq!(tracker.len(), 1);
        assert!(tracker.snapshot(NodeRef(1)).is_none());
    }

    #[test]
    fn test_forget_target() {
        let mut tracker = RelationshipTracker::new();
        tracker.update(NodeRef(1), "a", Cardinality::Multi, vec![NodeId(1), NodeId(2)]);
        tracker.update(NodeRef(2), "b", Cardinality::Single, vec![NodeId(2)]);
        tracker.forget_target(NodeId(2));

        assert_eq!(tracker.field(NodeRef(1), "a").unwrap().ids, vec![NodeId(1)]);
        assert!(tracker.field(NodeRef(2), "b").is_none());
    }
}
