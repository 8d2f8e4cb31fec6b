//! Diff reconciliation of one relationship field
//!
//! Compares a field's current targets against the targets recorded in the
//! node's load map and decides which edges must be created and which must be
//! removed. Pure function of its inputs: no I/O, no mutation.

use crate::error::{Error, Result};
use crate::node::NodeId;
use crate::operation::Target;
use crate::schema::{Cardinality, RelationshipInfo};
use std::collections::HashSet;

/// The field being reconciled, for cardinality rules and error messages
#[derive(Debug, Clone, Copy)]
pub struct FieldContext<'a> {
    pub label: &'a str,
    pub field: &'a str,
    pub cardinality: Cardinality,
    pub ordered: bool,
}

impl<'a> FieldContext<'a> {
    pub fn new(label: &'a str, field: &'a str, info: &RelationshipInfo) -> Self {
        Self {
            label,
            field,
            cardinality: info.cardinality,
            ordered: info.ordered && info.cardinality == Cardinality::Multi,
        }
    }
}

/// Edges to add and remove for one field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldDiff {
    /// Targets to link, in field order
    pub to_add: Vec<Target>,
    /// Previously persisted targets to unlink
    pub to_remove: Vec<NodeId>,
    /// Ordered fields only: position of the first element of `to_add`
    pub positions_from: Option<u32>,
}

impl FieldDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Position to store with the `index`-th addition
    pub fn position_of(&self, index: usize) -> Option<u32> {
        self.positions_from.map(|start| start + index as u32)
    }
}

/// Compute `current - prior` and `prior - current` for one field
///
/// `current` holds the field's resolvable targets in field order; `prior` the
/// ids recorded in the load map. Order is ignored unless the field is
/// ordered, in which case any change other than an append rewrites the
/// whole field.
pub fn reconcile(
    ctx: FieldContext<'_>,
    current: &[Target],
    prior: &[NodeId],
) -> Result<FieldDiff> {
    if ctx.cardinality == Cardinality::Single {
        if current.len() > 1 {
            return Err(Error::schema(format!(
                "{}.{} is single but holds {} targets",
                ctx.label,
                ctx.field,
                current.len()
            )));
        }
        if prior.len() > 1 {
            return Err(Error::schema(format!(
                "{}.{} is single but {} targets are recorded as persisted",
                ctx.label,
                ctx.field,
                prior.len()
            )));
        }
    }

    if ctx.ordered {
        return Ok(reconcile_ordered(current, prior));
    }

    let prior_set: HashSet<NodeId> = prior.iter().copied().collect();
    let current_ids: HashSet<NodeId> = current
        .iter()
        .filter_map(|t| match t {
            Target::Persisted(id) => Some(*id),
            Target::Pending(_) => None,
        })
        .collect();

    let mut seen = HashSet::new();
    let to_add = current
        .iter()
        .filter(|t| match t {
            Target::Persisted(id) => !prior_set.contains(id),
            Target::Pending(_) => true,
        })
        .filter(|t| seen.insert(**t))
        .copied()
        .collect();

    let mut removed = HashSet::new();
    let to_remove = prior
        .iter()
        .filter(|id| !current_ids.contains(id))
        .filter(|id| removed.insert(**id))
        .copied()
        .collect();

    Ok(FieldDiff {
        to_add,
        to_remove,
        positions_from: None,
    })
}

fn reconcile_ordered(current: &[Target], prior: &[NodeId]) -> FieldDiff {
    let prior_targets: Vec<Target> = prior.iter().copied().map(Target::Persisted).collect();

    if current == prior_targets.as_slice() {
        return FieldDiff::default();
    }

    if current.len() > prior.len() && current[..prior.len()] == prior_targets[..] {
        return FieldDiff {
            to_add: current[prior.len()..].to_vec(),
            to_remove: Vec::new(),
            positions_from: Some(prior.len() as u32),
        };
    }

    FieldDiff {
        to_add: current.to_vec(),
        to_remove: prior.to_vec(),
        positions_from: Some(0),
    }
}
