//! Depth-bounded save traversal
//!
//! [`TraversalEngine::plan_save`] walks the object graph breadth-first from a
//! root, visiting each reachable node at most once, validates everything it
//! sees against the registry, and turns the differences between memory and
//! the recorded relationship state into one ordered [`OperationBatch`]. No
//! I/O happens here: the batch is handed to an executor by the caller, and
//! [`SavePlan::commit`] writes assigned ids and new snapshots back into the
//! graph once the executor has confirmed the batch.

use crate::error::{Error, Result};
use crate::node::{Node, NodeId, NodeRef};
use crate::object_graph::ObjectGraph;
use crate::operation::{
    AssignedIds, EdgeKey, Operation, OperationBatch, Target, TempRef, UpsertKey,
};
use crate::reconcile::{reconcile, FieldContext};
use crate::schema::{Cardinality, Direction, EntityRegistry, EntitySchema, FieldKind};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Statistics of one save call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveReport {
    pub nodes_visited: usize,
    pub nodes_written: usize,
    pub relationships_created: usize,
    pub relationships_deleted: usize,
    /// Links to unsaved nodes beyond the depth bound, left for a deeper save
    pub deferred_links: usize,
    pub max_depth_reached: u32,
}

impl SaveReport {
    /// Whether the save produced no writes at all
    pub fn is_noop(&self) -> bool {
        self.nodes_written == 0 && self.relationships_created == 0 && self.relationships_deleted == 0
    }
}

/// Per-call record of a visited node; its index is the node's [`TempRef`]
#[derive(Debug, Clone)]
struct VisitRecord {
    node: NodeRef,
    depth: u32,
    upserted: bool,
}

/// Resolved state of one relationship field of a visited node
#[derive(Debug, Clone)]
struct PlannedField {
    visit: usize,
    field: String,
    cardinality: Cardinality,
    current: Vec<Target>,
}

/// A new edge whose far end sees it through a single-valued field
#[derive(Debug)]
struct MirrorClaim {
    owner: NodeRef,
    far: NodeRef,
    far_target: Target,
    far_label: String,
    mirror: String,
    rel_type: String,
    direction: Direction,
}

/// A validated, not yet applied save
#[derive(Debug, Clone)]
pub struct SavePlan {
    batch: OperationBatch,
    visits: Vec<VisitRecord>,
    fields: Vec<PlannedField>,
    report: SaveReport,
}

impl SavePlan {
    pub fn batch(&self) -> &OperationBatch {
        &self.batch
    }

    pub fn report(&self) -> &SaveReport {
        &self.report
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Handles of the visited nodes, in visit order
    pub fn visited(&self) -> impl Iterator<Item = NodeRef> + '_ {
        self.visits.iter().map(|v| v.node)
    }

    /// Write the outcome of an applied batch back into the graph
    ///
    /// Assigns ids to newly created nodes, refreshes the persisted scalar
    /// state of every upserted node, and sets each visited node's load map
    /// to exactly the targets it held at planning time.
    pub fn commit(self, graph: &mut ObjectGraph, assigned: &AssignedIds) -> Result<SaveReport> {
        for (index, visit) in self.visits.iter().enumerate() {
            if !visit.upserted {
                continue;
            }
            let temp = TempRef(index as u32);
            let id = match graph.get(visit.node)?.id() {
                Some(id) => id,
                None => assigned.get(&temp).copied().ok_or_else(|| {
                    Error::transaction(format!("executor assigned no id to {}", temp))
                })?,
            };
            graph.mark_persisted(visit.node, id)?;
        }

        for planned in &self.fields {
            let ids = planned
                .current
                .iter()
                .map(|t| {
                    t.resolve(assigned).ok_or_else(|| {
                        Error::transaction(format!("executor assigned no id to {}", t))
                    })
                })
                .collect::<Result<Vec<NodeId>>>()?;
            let node = self.visits[planned.visit].node;
            graph
                .tracker_mut()
                .update(node, &planned.field, planned.cardinality, ids);
        }

        tracing::debug!(
            "Committed save: {} nodes written, +{} / -{} relationships",
            self.report.nodes_written,
            self.report.relationships_created,
            self.report.relationships_deleted
        );

        Ok(self.report)
    }
}

/// Plans saves against a registry
pub struct TraversalEngine<'a> {
    registry: &'a EntityRegistry,
}

impl<'a> TraversalEngine<'a> {
    pub fn new(registry: &'a EntityRegistry) -> Self {
        Self { registry }
    }

    /// Plan persisting `root` and everything reachable within `max_depth` hops
    pub fn plan_save(
        &self,
        graph: &ObjectGraph,
        root: NodeRef,
        max_depth: i32,
    ) -> Result<SavePlan> {
        let max_depth =
            u32::try_from(max_depth).map_err(|_| Error::DepthExceeded { depth: max_depth })?;

        let root_node = graph.get(root)?;
        if graph.is_deleted(root) {
            return Err(Error::NodeNotFound(format!("{} (deleted)", root)));
        }
        if !self.registry.contains(&root_node.label) {
            return Err(Error::schema(format!(
                "'{}' is not a registered entity",
                root_node.label
            )));
        }

        tracing::debug!(
            "Planning save: root={} label={} depth={}",
            root,
            root_node.label,
            max_depth
        );

        let visits = self.walk(graph, root, max_depth)?;
        self.build_plan(graph, visits)
    }

    /// Breadth-first discovery; validates every visited node
    fn walk(
        &self,
        graph: &ObjectGraph,
        root: NodeRef,
        max_depth: u32,
    ) -> Result<Vec<VisitRecord>> {
        let mut visits = vec![VisitRecord {
            node: root,
            depth: 0,
            upserted: false,
        }];
        let mut index: HashMap<NodeRef, usize> = HashMap::from([(root, 0)]);
        let mut queue: VecDeque<usize> = VecDeque::from([0]);

        while let Some(current) = queue.pop_front() {
            let VisitRecord { node: handle, depth, .. } = visits[current];
            let node = graph.get(handle)?;
            let schema = self.schema_of(node)?;

            validate_scalars(node, schema)?;
            validate_relation_names(node, schema)?;

            for (field, info) in schema.relationships() {
                let targets = graph.targets(handle, field);

                if info.cardinality == Cardinality::Single && targets.len() > 1 {
                    return Err(Error::schema(format!(
                        "{}.{} is single but holds {} targets",
                        node.label,
                        field,
                        targets.len()
                    )));
                }

                for &target in targets {
                    let target_node = match graph.node(target) {
                        Some(n) if !graph.is_deleted(target) => n,
                        _ => {
                            return Err(Error::UnresolvedReference {
                                node: format!("{}{}", node.label, handle),
                                field: field.to_string(),
                            })
                        }
                    };
                    if target_node.label != info.target {
                        return Err(Error::schema(format!(
                            "{}.{} expects '{}' but holds '{}'",
                            node.label, field, info.target, target_node.label
                        )));
                    }

                    if depth < max_depth && !index.contains_key(&target) {
                        index.insert(target, visits.len());
                        queue.push_back(visits.len());
                        visits.push(VisitRecord {
                            node: target,
                            depth: depth + 1,
                            upserted: false,
                        });
                    }
                }
            }
        }

        Ok(visits)
    }

    fn build_plan(&self, graph: &ObjectGraph, mut visits: Vec<VisitRecord>) -> Result<SavePlan> {
        let index: HashMap<NodeRef, usize> = visits
            .iter()
            .enumerate()
            .map(|(i, v)| (v.node, i))
            .collect();
        let mut report = SaveReport {
            nodes_visited: visits.len(),
            max_depth_reached: visits.iter().map(|v| v.depth).max().unwrap_or(0),
            ..Default::default()
        };

        let endpoint = |i: usize| -> Result<Target> {
            Ok(match graph.get(visits[i].node)?.id() {
                Some(id) => Target::Persisted(id),
                None => Target::Pending(TempRef(i as u32)),
            })
        };

        // Node upserts, in visit order
        let mut upserts = Vec::new();
        for (i, visit) in visits.iter().enumerate() {
            let node = graph.get(visit.node)?;
            if !node.is_dirty() {
                continue;
            }
            let key = match (node.id(), &node.token) {
                (Some(id), _) => UpsertKey::Id(id),
                (None, Some(token)) => UpsertKey::Token(token.clone()),
                (None, None) => UpsertKey::Create,
            };
            upserts.push((
                i,
                Operation::UpsertNode {
                    temp: TempRef(i as u32),
                    label: node.label.clone(),
                    key,
                    token: node.token.clone(),
                    properties: node.properties.clone(),
                },
            ));
        }

        // Relationship reconciliation
        let mut fields = Vec::new();
        let mut deletes: Vec<EdgeKey> = Vec::new();
        let mut delete_origin: HashMap<EdgeKey, (String, String)> = HashMap::new();
        let mut creates: Vec<(EdgeKey, Option<u32>)> = Vec::new();
        let mut create_index: HashMap<EdgeKey, usize> = HashMap::new();
        let mut held: HashMap<EdgeKey, (String, String)> = HashMap::new();
        let mut claims: Vec<MirrorClaim> = Vec::new();

        for (i, visit) in visits.iter().enumerate() {
            let node = graph.get(visit.node)?;
            let schema = self.schema_of(node)?;
            let owner = endpoint(i)?;

            for (field, info) in schema.relationships() {
                let mut current = Vec::new();
                let mut handles = Vec::new();
                for &target in graph.targets(visit.node, field) {
                    if let Some(&j) = index.get(&target) {
                        current.push(endpoint(j)?);
                        handles.push(target);
                    } else if let Some(id) = graph.get(target)?.id() {
                        current.push(Target::Persisted(id));
                        handles.push(target);
                    } else {
                        report.deferred_links += 1;
                        tracing::debug!(
                            "Deferring {}.{} -> {}: target is unsaved and beyond depth {}",
                            node.label,
                            field,
                            target,
                            visit.depth
                        );
                    }
                }

                let prior = graph
                    .tracker()
                    .field(visit.node, field)
                    .map(|c| c.ids.as_slice())
                    .unwrap_or(&[]);
                let diff = reconcile(FieldContext::new(&node.label, field, info), &current, prior)?;

                for target in &current {
                    held.entry(EdgeKey::new(&info.rel_type, owner, *target, info.direction))
                        .or_insert_with(|| (node.label.clone(), field.to_string()));
                }

                for id in &diff.to_remove {
                    let key = EdgeKey::new(&info.rel_type, owner, Target::Persisted(*id), info.direction);
                    if !delete_origin.contains_key(&key) {
                        delete_origin.insert(key.clone(), (node.label.clone(), field.to_string()));
                        deletes.push(key);
                    }
                }

                if let Some((far_label, mirror)) = self.registry.inverse_of(&node.label, field) {
                    let single = mirror
                        .relationship()
                        .is_some_and(|m| m.cardinality == Cardinality::Single);
                    if single {
                        for (target, &far) in current.iter().zip(&handles) {
                            if diff.to_add.contains(target) {
                                claims.push(MirrorClaim {
                                    owner: visit.node,
                                    far,
                                    far_target: *target,
                                    far_label: far_label.to_string(),
                                    mirror: mirror.name.clone(),
                                    rel_type: info.rel_type.clone(),
                                    direction: info.direction,
                                });
                            }
                        }
                    }
                }

                for (n, target) in diff.to_add.iter().enumerate() {
                    let key = EdgeKey::new(&info.rel_type, owner, *target, info.direction);
                    let position = diff.position_of(n);
                    match create_index.get(&key) {
                        Some(&existing) => {
                            if creates[existing].1.is_none() {
                                creates[existing].1 = position;
                            }
                        }
                        None => {
                            create_index.insert(key.clone(), creates.len());
                            creates.push((key, position));
                        }
                    }
                }

                fields.push(PlannedField {
                    visit: i,
                    field: field.to_string(),
                    cardinality: info.cardinality,
                    current,
                });
            }
        }

        for key in &deletes {
            if create_index.contains_key(key) {
                continue;
            }
            if let Some((label, field)) = held.get(key) {
                let (from_label, from_field) = &delete_origin[key];
                return Err(Error::schema(format!(
                    "{} removed through {}.{} but still held by {}.{}",
                    key, from_label, from_field, label, field
                )));
            }
        }

        self.check_single_mirrors(graph, &index, &claims, &delete_origin)?;

        let mut batch = OperationBatch::new();
        report.nodes_written = upserts.len();
        for (i, op) in upserts {
            visits[i].upserted = true;
            batch.push(op);
        }
        report.relationships_deleted = deletes.len();
        for key in deletes {
            batch.push(Operation::DeleteRelationship { key });
        }
        report.relationships_created = creates.len();
        for (key, position) in creates {
            batch.push(Operation::CreateRelationship { key, position });
        }

        tracing::debug!(
            "Planned save: {} visited, {} operations, {} deferred",
            report.nodes_visited,
            batch.len(),
            report.deferred_links
        );

        Ok(SavePlan {
            batch,
            visits,
            fields,
            report,
        })
    }

    /// A new edge must not give a single-valued far end a second holder
    ///
    /// A visited far end is checked against its in-memory field, any other
    /// far end against its recorded state minus the edges this plan deletes.
    fn check_single_mirrors(
        &self,
        graph: &ObjectGraph,
        index: &HashMap<NodeRef, usize>,
        claims: &[MirrorClaim],
        deleted: &HashMap<EdgeKey, (String, String)>,
    ) -> Result<()> {
        let mut claimed: HashMap<(NodeRef, &str), NodeRef> = HashMap::new();
        for claim in claims {
            let owner = graph.get(claim.owner)?;
            let key = (claim.far, claim.mirror.as_str());
            if let Some(previous) = claimed.insert(key, claim.owner) {
                if previous != claim.owner {
                    return Err(Error::schema(format!(
                        "{}.{} is single but both {} and {} link to {}",
                        claim.far_label, claim.mirror, previous, claim.owner, claim.far
                    )));
                }
            }

            let other = if index.contains_key(&claim.far) {
                graph
                    .targets(claim.far, &claim.mirror)
                    .iter()
                    .find(|h| **h != claim.owner)
                    .map(|h| h.to_string())
            } else {
                graph
                    .tracker()
                    .field(claim.far, &claim.mirror)
                    .into_iter()
                    .flat_map(|c| c.ids.iter())
                    .find(|id| {
                        Some(**id) != owner.id()
                            && !deleted.contains_key(&EdgeKey::new(
                                &claim.rel_type,
                                Target::Persisted(**id),
                                claim.far_target,
                                claim.direction,
                            ))
                    })
                    .map(|id| format!("node {}", id))
            };

            if let Some(other) = other {
                return Err(Error::schema(format!(
                    "{}.{} is single and already held by {}; {}{} cannot link to {}",
                    claim.far_label, claim.mirror, other, owner.label, claim.owner, claim.far
                )));
            }
        }
        Ok(())
    }

    fn schema_of(&self, node: &Node) -> Result<&'a EntitySchema> {
        self.registry.entity(&node.label).ok_or_else(|| {
            Error::schema(format!("'{}' is not a registered entity", node.label))
        })
    }
}

fn validate_scalars(node: &Node, schema: &EntitySchema) -> Result<()> {
    for (name, value) in &node.properties {
        match schema.field(name).map(|f| &f.kind) {
            Some(FieldKind::Scalar(kind)) => {
                if !kind.accepts(value) {
                    return Err(Error::schema(format!(
                        "{}.{} expects {:?} but holds {}",
                        node.label, name, kind, value
                    )));
                }
            }
            Some(FieldKind::Relationship(_)) => {
                return Err(Error::schema(format!(
                    "{}.{} is a relationship, not a scalar",
                    node.label, name
                )))
            }
            None => {
                return Err(Error::schema(format!(
                    "{}.{} is not a declared field",
                    node.label, name
                )))
            }
        }
    }
    Ok(())
}

fn validate_relation_names(node: &Node, schema: &EntitySchema) -> Result<()> {
    let declared: HashSet<&str> = schema.relationships().map(|(name, _)| name).collect();
    for name in node.relations.keys() {
        if !declared.contains(name.as_str()) {
            return Err(Error::schema(format!(
                "{}.{} is not a declared relationship",
                node.label, name
            )));
        }
    }
    Ok(())
}
