//! Graft Core - Object-graph mapping engine
//!
//! This crate provides the in-memory object graph, the entity registry, and
//! the save planner that turns graph changes into ordered write batches.
//! Storage and transactions live in `graft-storage`.

pub mod error;
pub mod limits;
pub mod node;
pub mod object_graph;
pub mod operation;
pub mod reconcile;
pub mod schema;
pub mod tracker;
pub mod traversal;

pub use error::{Error, Result};
pub use limits::DEFAULT_DEPTH;
pub use node::{Node, NodeId, NodeRef, Properties, Token};
pub use object_graph::ObjectGraph;
pub use operation::{
    AssignedIds, BatchSummary, EdgeKey, Operation, OperationBatch, Target, TempRef, UpsertKey,
};
pub use reconcile::{reconcile, FieldContext, FieldDiff};
pub use schema::{
    Cardinality, Direction, EntityRegistry, EntitySchema, FieldKind, FieldSchema,
    RelationshipInfo, ScalarKind, SchemaDocument,
};
pub use tracker::{LoadMap, RelationConfig, RelationshipTracker};
pub use traversal::{SavePlan, SaveReport, TraversalEngine};
