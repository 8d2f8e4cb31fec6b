//! Sessions: transaction scoping around save, load, and delete
//!
//! A [`Session`] ties an [`ObjectGraph`] owned by the caller to a storage
//! backend. Calls made while no transaction is open run in their own
//! implicit transaction, committed on success and rolled back on error.
//! Calls made inside [`Session::begin`] / [`Session::commit`] share the
//! caller's transaction; if one of them fails the transaction stays open
//! and the caller decides whether to roll back.

use crate::traits::{AccessMode, GraphBackend, GraphSnapshot, StoredNode, TxHandle};
use graft_core::{
    AssignedIds, Cardinality, EntityRegistry, Error, NodeId, NodeRef, ObjectGraph, Operation,
    OperationBatch, Result, SaveReport, Token, TraversalEngine, DEFAULT_DEPTH,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub access_mode: AccessMode,
    /// Depth used by [`Session::save`] and [`Session::load`]
    pub default_depth: i32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            access_mode: AccessMode::Write,
            default_depth: DEFAULT_DEPTH,
        }
    }
}

impl SessionConfig {
    pub fn read_only() -> Self {
        Self {
            access_mode: AccessMode::Read,
            ..Default::default()
        }
    }
}

pub struct Session<B: GraphBackend> {
    backend: Arc<B>,
    registry: Arc<EntityRegistry>,
    config: SessionConfig,
    tx: Option<TxHandle>,
}

impl<B: GraphBackend> Session<B> {
    pub fn new(backend: Arc<B>, registry: Arc<EntityRegistry>, config: SessionConfig) -> Self {
        Self {
            backend,
            registry,
            config,
            tx: None,
        }
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transaction control
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn begin(&mut self) -> Result<()> {
        if let Some(tx) = self.tx {
            return Err(Error::transaction(format!("{} is already open", tx)));
        }
        self.tx = Some(self.backend.begin(self.config.access_mode).await?);
        Ok(())
    }

    pub async fn commit(&mut self) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| Error::transaction("no open transaction to commit"))?;
        self.backend.commit(tx).await?;
        Ok(())
    }

    pub async fn rollback(&mut self) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| Error::transaction("no open transaction to roll back"))?;
        tracing::debug!("Rolling back {}", tx);
        self.backend.rollback(tx).await?;
        Ok(())
    }

    /// End the session, rolling back any transaction still open
    pub async fn close(mut self) -> Result<()> {
        if let Some(tx) = self.tx {
            tracing::warn!("Closing session with {} still open; rolling back", tx);
            self.rollback().await?;
        }
        Ok(())
    }

    async fn acquire(&self) -> Result<(TxHandle, bool)> {
        match self.tx {
            Some(tx) => Ok((tx, false)),
            None => Ok((self.backend.begin(self.config.access_mode).await?, true)),
        }
    }

    async fn release<T>(&self, tx: TxHandle, implicit: bool, result: Result<T>) -> Result<T> {
        if !implicit {
            return result;
        }
        match result {
            Ok(value) => {
                self.backend.commit(tx).await?;
                Ok(value)
            }
            Err(e) => {
                tracing::warn!("Rolling back {} after error: {}", tx, e);
                if let Err(rollback_err) = self.backend.rollback(tx).await {
                    tracing::warn!("Rollback of {} failed: {}", tx, rollback_err);
                }
                Err(e)
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Save
    // ─────────────────────────────────────────────────────────────────────────

    /// Save `root` at the configured default depth
    pub async fn save(&mut self, graph: &mut ObjectGraph, root: NodeRef) -> Result<SaveReport> {
        self.save_depth(graph, root, self.config.default_depth)
            .await
    }

    /// Persist `root` and everything reachable within `depth` hops
    ///
    /// The whole object graph is validated before any write is issued. Ids
    /// and relationship snapshots are written back only after the backend
    /// accepted the batch.
    pub async fn save_depth(
        &mut self,
        graph: &mut ObjectGraph,
        root: NodeRef,
        depth: i32,
    ) -> Result<SaveReport> {
        let plan = TraversalEngine::new(&self.registry).plan_save(graph, root, depth)?;
        if plan.is_empty() {
            tracing::debug!("Nothing to write for {}", root);
            return plan.commit(graph, &AssignedIds::new());
        }

        let (tx, implicit) = self.acquire().await?;
        let applied = self
            .backend
            .apply(tx, plan.batch())
            .await
            .map_err(Error::from);
        let assigned = self.release(tx, implicit, applied).await?;
        plan.commit(graph, &assigned)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Load
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn load(&mut self, graph: &mut ObjectGraph, id: NodeId) -> Result<Option<NodeRef>> {
        self.load_depth(graph, id, self.config.default_depth)
            .await
    }

    /// Read the stored node `id` and its neighborhood up to `depth` hops
    ///
    /// Nodes already in the graph keep their handle. Nodes on the depth
    /// boundary get their scalars refreshed but keep their relationship
    /// fields and snapshots.
    pub async fn load_depth(
        &mut self,
        graph: &mut ObjectGraph,
        id: NodeId,
        depth: i32,
    ) -> Result<Option<NodeRef>> {
        let max_depth = u32::try_from(depth).map_err(|_| Error::DepthExceeded { depth })?;
        let (tx, implicit) = self.acquire().await?;
        let loaded = self.load_in(tx, graph, id, max_depth).await;
        self.release(tx, implicit, loaded).await
    }

    pub async fn load_by_token(
        &mut self,
        graph: &mut ObjectGraph,
        label: &str,
        token: &Token,
        depth: i32,
    ) -> Result<Option<NodeRef>> {
        let max_depth = u32::try_from(depth).map_err(|_| Error::DepthExceeded { depth })?;
        let (tx, implicit) = self.acquire().await?;
        let loaded = match self.backend.find_by_token(tx, label, token).await {
            Ok(Some(node)) => self.load_in(tx, graph, node.id, max_depth).await,
            Ok(None) => Ok(None),
            Err(e) => Err(e.into()),
        };
        self.release(tx, implicit, loaded).await
    }

    async fn load_in(
        &self,
        tx: TxHandle,
        graph: &mut ObjectGraph,
        id: NodeId,
        max_depth: u32,
    ) -> Result<Option<NodeRef>> {
        let Some(stored) = self.backend.fetch_node(tx, id).await? else {
            return Ok(None);
        };
        let root = self.merge(graph, stored)?;

        let mut seen = HashSet::from([id]);
        let mut queue = VecDeque::from([(id, root, 0u32)]);
        let mut loaded = 1usize;

        while let Some((id, handle, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let label = graph.get(handle)?.label.clone();
            let schema = self
                .registry
                .entity(&label)
                .ok_or_else(|| Error::schema(format!("'{}' is not a registered entity", label)))?;

            for (field, info) in schema.relationships() {
                let related = self
                    .backend
                    .fetch_related(tx, id, &info.rel_type, info.direction, &info.target)
                    .await?;
                if info.cardinality == Cardinality::Single && related.len() > 1 {
                    return Err(Error::schema(format!(
                        "{}.{} is single but node {} has {} stored relationships",
                        label,
                        field,
                        id,
                        related.len()
                    )));
                }

                let mut targets = Vec::with_capacity(related.len());
                for r in related {
                    let target_id = r.node.id;
                    let target = self.merge(graph, r.node)?;
                    if seen.insert(target_id) {
                        loaded += 1;
                        queue.push_back((target_id, target, depth + 1));
                    }
                    targets.push(target);
                }
                graph.record_loaded_relation(handle, field, info.cardinality, targets)?;
            }
        }

        tracing::debug!("Loaded {} nodes from {} at depth {}", loaded, id, max_depth);
        Ok(Some(root))
    }

    fn merge(&self, graph: &mut ObjectGraph, node: StoredNode) -> Result<NodeRef> {
        if !self.registry.contains(&node.label) {
            return Err(Error::schema(format!(
                "stored node {} has unregistered label '{}'",
                node.id, node.label
            )));
        }
        Ok(graph.merge_loaded(&node.label, node.id, node.token, node.properties))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Delete and maintenance
    // ─────────────────────────────────────────────────────────────────────────

    /// Detach-delete the stored node behind `handle`
    ///
    /// Returns `false` without touching the store when the node was never
    /// persisted.
    pub async fn delete(&mut self, graph: &mut ObjectGraph, handle: NodeRef) -> Result<bool> {
        let Some(id) = graph.get(handle)?.id() else {
            return Ok(false);
        };

        let mut batch = OperationBatch::new();
        batch.push(Operation::DeleteNode { id });

        let (tx, implicit) = self.acquire().await?;
        let applied = self
            .backend
            .apply(tx, &batch)
            .await
            .map(|_| ())
            .map_err(Error::from);
        self.release(tx, implicit, applied).await?;

        graph.mark_deleted(handle)?;
        tracing::debug!("Deleted node {}", id);
        Ok(true)
    }

    /// Remove every node and relationship from the store
    ///
    /// Handles in existing object graphs keep their ids; discard those
    /// graphs afterwards.
    pub async fn purge_database(&mut self) -> Result<()> {
        let (tx, implicit) = self.acquire().await?;
        let purged = self.backend.purge(tx).await.map_err(Error::from);
        self.release(tx, implicit, purged).await?;
        tracing::info!("Purged database");
        Ok(())
    }

    /// Everything currently visible to this session
    pub async fn snapshot(&mut self) -> Result<GraphSnapshot> {
        let (tx, implicit) = self.acquire().await?;
        let scanned = self.backend.scan(tx).await.map_err(Error::from);
        self.release(tx, implicit, scanned).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorage;
    use graft_core::{Direction, EntitySchema, Node, RelationshipInfo, ScalarKind};
    use serde_json::json;

    /// A <-> B over two relationship types, plus a chain type for depth tests
    fn registry() -> Arc<EntityRegistry> {
        let registry = EntityRegistry::builder()
            .entity(
                EntitySchema::new("A")
                    .scalar("test_field", ScalarKind::String)
                    .relationship("partner", RelationshipInfo::single("PARTNER", "B"))
                    .relationship("many_a", RelationshipInfo::multi("TEST_REL", "B"))
                    .relationship("ordered_a", RelationshipInfo::multi("ORDERED", "B").ordered()),
            )
            .entity(
                EntitySchema::new("B")
                    .scalar("test_field", ScalarKind::String)
                    .relationship(
                        "partner_of",
                        RelationshipInfo::single("PARTNER", "A").with_direction(Direction::Incoming),
                    )
                    .relationship(
                        "many_b",
                        RelationshipInfo::multi("TEST_REL", "A").with_direction(Direction::Incoming),
                    ),
            )
            .entity(
                EntitySchema::new("Link")
                    .scalar("name", ScalarKind::String)
                    .relationship("next", RelationshipInfo::single("NEXT", "Link")),
            )
            .build()
            .unwrap();
        Arc::new(registry)
    }

    fn session(storage: &Arc<MemoryStorage>) -> Session<MemoryStorage> {
        Session::new(storage.clone(), registry(), SessionConfig::default())
    }

    async fn stored(storage: &Arc<MemoryStorage>) -> GraphSnapshot {
        session(storage).snapshot().await.unwrap()
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let storage = Arc::new(MemoryStorage::new());
        let mut s = session(&storage);
        let mut graph = ObjectGraph::new();
        let a = graph.add(Node::new("A").with_property("test_field", "test"));
        let b1 = graph.add(Node::new("B").with_property("test_field", "b1"));
        let b2 = graph.add(Node::new("B").with_property("test_field", "b2"));
        graph.relate(a, "many_a", b1).unwrap();
        graph.relate(a, "many_a", b2).unwrap();

        let report = s.save(&mut graph, a).await.unwrap();
        assert_eq!(report.nodes_written, 3);
        assert_eq!(report.relationships_created, 2);

        let a_id = graph.get(a).unwrap().id().unwrap();
        let mut fresh = ObjectGraph::new();
        let loaded = s.load(&mut fresh, a_id).await.unwrap().unwrap();

        let node = fresh.get(loaded).unwrap();
        assert_eq!(node.property("test_field"), Some(&json!("test")));
        assert_eq!(fresh.targets(loaded, "many_a").len(), 2);
        assert_eq!(fresh.load_map(loaded)["many_a"].ids.len(), 2);

        // Neighbors sit on the depth boundary: no fields loaded
        let b = fresh.targets(loaded, "many_a")[0];
        assert!(fresh.targets(b, "many_b").is_empty());
    }

    #[tokio::test]
    async fn test_second_save_writes_nothing() {
        let storage = Arc::new(MemoryStorage::new());
        let mut s = session(&storage);
        let mut graph = ObjectGraph::new();
        let a = graph.add(Node::new("A"));
        let b = graph.add(Node::new("B"));
        graph.relate(a, "many_a", b).unwrap();

        s.save_depth(&mut graph, a, 5).await.unwrap();
        let before = stored(&storage).await;

        let report = s.save_depth(&mut graph, a, 5).await.unwrap();
        assert!(report.is_noop());
        assert_eq!(stored(&storage).await, before);
    }

    #[tokio::test]
    async fn test_cycle_saved_once() {
        let storage = Arc::new(MemoryStorage::new());
        let mut s = session(&storage);
        let mut graph = ObjectGraph::new();
        let a = graph.add(Node::new("A"));
        let b = graph.add(Node::new("B"));
        graph.relate(a, "many_a", b).unwrap();
        graph.relate(b, "many_b", a).unwrap();

        let report = s.save_depth(&mut graph, a, 10).await.unwrap();
        assert_eq!(report.nodes_visited, 2);

        let snapshot = stored(&storage).await;
        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(snapshot.edges.len(), 1);
    }

    #[tokio::test]
    async fn test_depth_zero_writes_root_only() {
        let storage = Arc::new(MemoryStorage::new());
        let mut s = session(&storage);
        let mut graph = ObjectGraph::new();
        let a = graph.add(Node::new("A").with_property("test_field", "root"));
        let b = graph.add(Node::new("B"));
        graph.relate(a, "many_a", b).unwrap();

        let report = s.save_depth(&mut graph, a, 0).await.unwrap();
        assert_eq!(report.deferred_links, 1);

        let snapshot = stored(&storage).await;
        assert_eq!(snapshot.nodes.len(), 1);
        assert!(snapshot.edges.is_empty());
        assert!(graph.get(b).unwrap().id().is_none());

        // The deferred link is still pending for a deeper save
        let report = s.save_depth(&mut graph, a, 1).await.unwrap();
        assert_eq!(report.nodes_written, 1);
        assert_eq!(report.relationships_created, 1);
    }

    #[tokio::test]
    async fn test_clearing_single_removes_edge() {
        let storage = Arc::new(MemoryStorage::new());
        let mut s = session(&storage);
        let mut graph = ObjectGraph::new();
        let a = graph.add(Node::new("A"));
        let b = graph.add(Node::new("B"));
        graph.set_single(a, "partner", Some(b)).unwrap();
        graph.set_single(b, "partner_of", Some(a)).unwrap();
        s.save(&mut graph, a).await.unwrap();
        assert_eq!(stored(&storage).await.edges.len(), 1);

        graph.set_single(a, "partner", None).unwrap();
        graph.set_single(b, "partner_of", None).unwrap();
        let report = s.save(&mut graph, a).await.unwrap();
        assert_eq!(report.relationships_deleted, 1);
        assert!(stored(&storage).await.edges.is_empty());
        assert!(graph.load_map(a).is_empty());
    }

    #[tokio::test]
    async fn test_failed_validation_writes_nothing() {
        let storage = Arc::new(MemoryStorage::new());
        let mut s = session(&storage);
        let mut graph = ObjectGraph::new();
        let a = graph.add(Node::new("A"));
        let b1 = graph.add(Node::new("B"));
        let b2 = graph.add(Node::new("B"));
        graph.relate(a, "partner", b1).unwrap();
        graph.relate(a, "partner", b2).unwrap();

        let result = s.save(&mut graph, a).await;
        assert!(matches!(result, Err(Error::SchemaViolation(_))));
        assert!(stored(&storage).await.nodes.is_empty());
        assert!(graph.get(a).unwrap().id().is_none());
    }

    #[tokio::test]
    async fn test_read_only_session_rejects_writes() {
        let storage = Arc::new(MemoryStorage::new());
        let mut s = Session::new(storage.clone(), registry(), SessionConfig::read_only());
        let mut graph = ObjectGraph::new();
        let a = graph.add(Node::new("A"));

        let result = s.save(&mut graph, a).await;
        assert!(result.as_ref().is_err_and(Error::is_transaction));
        assert!(graph.get(a).unwrap().id().is_none());
        assert!(!s.in_transaction());
    }

    #[tokio::test]
    async fn test_explicit_transaction_rollback() {
        let storage = Arc::new(MemoryStorage::new());
        let mut s = session(&storage);
        let mut graph = ObjectGraph::new();
        let a = graph.add(Node::new("A"));

        s.begin().await.unwrap();
        assert!(s.begin().await.is_err());
        s.save(&mut graph, a).await.unwrap();
        assert_eq!(s.snapshot().await.unwrap().nodes.len(), 1);
        s.rollback().await.unwrap();

        assert!(stored(&storage).await.nodes.is_empty());
        assert!(s.commit().await.is_err());
    }

    #[tokio::test]
    async fn test_explicit_transaction_commit() {
        let storage = Arc::new(MemoryStorage::new());
        let mut s = session(&storage);
        let mut graph = ObjectGraph::new();
        let a = graph.add(Node::new("A"));
        let b = graph.add(Node::new("B"));

        s.begin().await.unwrap();
        s.save_depth(&mut graph, a, 0).await.unwrap();
        s.save_depth(&mut graph, b, 0).await.unwrap();
        assert!(stored(&storage).await.nodes.is_empty());
        s.commit().await.unwrap();

        assert_eq!(stored(&storage).await.nodes.len(), 2);
        s.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_save_leaves_open_transaction_clean() {
        let storage = Arc::new(MemoryStorage::new());
        let mut s = session(&storage);

        let mut other = ObjectGraph::new();
        let taken = other.add(Node::new("B").with_token("t"));
        s.save(&mut other, taken).await.unwrap();

        let mut graph = ObjectGraph::new();
        let b = graph.add(Node::new("B").with_token("u"));
        s.save(&mut graph, b).await.unwrap();

        s.begin().await.unwrap();
        let a = graph.add(Node::new("A"));
        graph.set_single(a, "partner", Some(b)).unwrap();
        graph.get_mut(b).unwrap().token = Some(Token::from("t"));

        let result = s.save_depth(&mut graph, a, 1).await;
        assert!(result.is_err_and(|e| e.is_transaction()));
        assert!(s.in_transaction());
        assert!(graph.get(a).unwrap().id().is_none());

        graph.get_mut(b).unwrap().token = Some(Token::from("u"));
        s.save_depth(&mut graph, a, 1).await.unwrap();
        s.commit().await.unwrap();

        let snapshot = stored(&storage).await;
        assert_eq!(snapshot.nodes.len(), 3);
        assert_eq!(snapshot.nodes.iter().filter(|n| n.label == "A").count(), 1);
        assert_eq!(snapshot.edges.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_sessions_on_disjoint_nodes() {
        let storage = Arc::new(MemoryStorage::new());
        let mut first = session(&storage);
        let mut second = session(&storage);
        let mut g1 = ObjectGraph::new();
        let mut g2 = ObjectGraph::new();
        let a = g1.add(Node::new("A"));
        let link = g2.add(Node::new("Link").with_property("name", "head"));

        first.begin().await.unwrap();
        second.begin().await.unwrap();
        first.save(&mut g1, a).await.unwrap();
        second.save(&mut g2, link).await.unwrap();
        first.commit().await.unwrap();
        second.commit().await.unwrap();

        let a_id = g1.get(a).unwrap().id().unwrap();
        let link_id = g2.get(link).unwrap().id().unwrap();
        assert_ne!(a_id, link_id);
        assert_eq!(stored(&storage).await.nodes.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_sessions_on_same_node_conflict() {
        let storage = Arc::new(MemoryStorage::new());
        let mut g1 = ObjectGraph::new();
        let a = g1.add(Node::new("A").with_property("test_field", "v0"));
        session(&storage).save(&mut g1, a).await.unwrap();
        let a_id = g1.get(a).unwrap().id().unwrap();

        let mut first = session(&storage);
        let mut second = session(&storage);
        let mut g2 = ObjectGraph::new();
        first.begin().await.unwrap();
        second.begin().await.unwrap();
        let a2 = second.load(&mut g2, a_id).await.unwrap().unwrap();

        g1.get_mut(a).unwrap().set_property("test_field", "v1");
        g2.get_mut(a2).unwrap().set_property("test_field", "v2");
        first.save(&mut g1, a).await.unwrap();
        second.save(&mut g2, a2).await.unwrap();

        first.commit().await.unwrap();
        assert!(second.commit().await.is_err_and(|e| e.is_transaction()));
    }

    #[tokio::test]
    async fn test_load_depth_bounds_fields() {
        let storage = Arc::new(MemoryStorage::new());
        let mut s = session(&storage);
        let mut graph = ObjectGraph::new();
        let links: Vec<_> = (0..4)
            .map(|i| graph.add(Node::new("Link").with_property("name", format!("l{}", i))))
            .collect();
        for pair in links.windows(2) {
            graph.set_single(pair[0], "next", Some(pair[1])).unwrap();
        }
        s.save_depth(&mut graph, links[0], 10).await.unwrap();
        let first = graph.get(links[0]).unwrap().id().unwrap();

        let mut fresh = ObjectGraph::new();
        let root = s.load_depth(&mut fresh, first, 1).await.unwrap().unwrap();
        assert_eq!(fresh.len(), 2);
        let second = fresh.targets(root, "next")[0];
        // Boundary node: scalars only
        assert_eq!(fresh.get(second).unwrap().property("name"), Some(&json!("l1")));
        assert!(fresh.targets(second, "next").is_empty());
        assert!(fresh.load_map(second).is_empty());

        // Saving the partially loaded graph must not drop unloaded edges
        let report = s.save_depth(&mut fresh, root, 5).await.unwrap();
        assert!(report.is_noop());
        assert_eq!(stored(&storage).await.edges.len(), 3);
    }

    #[tokio::test]
    async fn test_load_reuses_handles() {
        let storage = Arc::new(MemoryStorage::new());
        let mut s = session(&storage);
        let mut graph = ObjectGraph::new();
        let a = graph.add(Node::new("A"));
        let b = graph.add(Node::new("B"));
        graph.relate(a, "many_a", b).unwrap();
        s.save(&mut graph, a).await.unwrap();

        let a_id = graph.get(a).unwrap().id().unwrap();
        let loaded = s.load(&mut graph, a_id).await.unwrap().unwrap();
        assert_eq!(loaded, a);
        assert_eq!(graph.len(), 2);
    }

    #[tokio::test]
    async fn test_load_by_token() {
        let storage = Arc::new(MemoryStorage::new());
        let mut s = session(&storage);
        let mut graph = ObjectGraph::new();
        let a = graph.add(Node::new("A").with_token("a-1"));
        s.save(&mut graph, a).await.unwrap();

        let mut fresh = ObjectGraph::new();
        let found = s
            .load_by_token(&mut fresh, "A", &Token::from("a-1"), 1)
            .await
            .unwrap();
        assert!(found.is_some());
        let missing = s
            .load_by_token(&mut fresh, "A", &Token::from("nope"), 1)
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_ordered_field_roundtrip() {
        let storage = Arc::new(MemoryStorage::new());
        let mut s = session(&storage);
        let mut graph = ObjectGraph::new();
        let a = graph.add(Node::new("A"));
        let bs: Vec<_> = (0..3)
            .map(|i| graph.add(Node::new("B").with_property("test_field", format!("b{}", i))))
            .collect();
        graph.set_targets(a, "ordered_a", vec![bs[2], bs[0], bs[1]]).unwrap();
        s.save(&mut graph, a).await.unwrap();

        let a_id = graph.get(a).unwrap().id().unwrap();
        let mut fresh = ObjectGraph::new();
        let root = s.load(&mut fresh, a_id).await.unwrap().unwrap();
        let names: Vec<_> = fresh
            .targets(root, "ordered_a")
            .iter()
            .map(|t| fresh.get(*t).unwrap().property("test_field").cloned())
            .collect();
        assert_eq!(
            names,
            vec![Some(json!("b2")), Some(json!("b0")), Some(json!("b1"))]
        );
    }

    #[tokio::test]
    async fn test_delete_detaches_node() {
        let storage = Arc::new(MemoryStorage::new());
        let mut s = session(&storage);
        let mut graph = ObjectGraph::new();
        let a = graph.add(Node::new("A"));
        let b = graph.add(Node::new("B"));
        graph.relate(a, "many_a", b).unwrap();
        s.save(&mut graph, a).await.unwrap();

        assert!(s.delete(&mut graph, b).await.unwrap());
        let snapshot = stored(&storage).await;
        assert_eq!(snapshot.nodes.len(), 1);
        assert!(snapshot.edges.is_empty());
        assert!(graph.get(b).unwrap().id().is_none());

        // The stale link must be dropped before A can be saved again
        assert!(matches!(
            s.save(&mut graph, a).await,
            Err(Error::UnresolvedReference { .. })
        ));
        graph.unrelate(a, "many_a", b).unwrap();
        assert!(s.save(&mut graph, a).await.unwrap().is_noop());

        let unsaved = graph.add(Node::new("B"));
        assert!(!s.delete(&mut graph, unsaved).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_database() {
        let storage = Arc::new(MemoryStorage::new());
        let mut s = session(&storage);
        let mut graph = ObjectGraph::new();
        let a = graph.add(Node::new("A"));
        s.save(&mut graph, a).await.unwrap();

        s.purge_database().await.unwrap();
        assert!(stored(&storage).await.nodes.is_empty());
    }

    #[tokio::test]
    async fn test_negative_depth_rejected() {
        let storage = Arc::new(MemoryStorage::new());
        let mut s = session(&storage);
        let mut graph = ObjectGraph::new();
        let a = graph.add(Node::new("A"));

        assert!(matches!(
            s.save_depth(&mut graph, a, -2).await,
            Err(Error::DepthExceeded { depth: -2 })
        ));
        assert!(matches!(
            s.load_depth(&mut graph, NodeId(1), -1).await,
            Err(Error::DepthExceeded { depth: -1 })
        ));
    }
}
