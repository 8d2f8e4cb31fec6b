//! Node (vertex) types held in an object graph

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ulid::Ulid;

/// Scalar properties of a node
pub type Properties = BTreeMap<String, serde_json::Value>;

/// Internal identifier assigned by the store on first persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub i64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// External unique token assigned by the application, used for upsert-by-token
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Token(pub String);

impl Token {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Mint a fresh token
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Token {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// In-process identity of a node inside an [`ObjectGraph`](crate::ObjectGraph)
///
/// Stable for the lifetime of the graph; unlike [`NodeId`] it exists before
/// the node has ever been persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeRef(pub(crate) usize);

impl NodeRef {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An in-memory node mapped to a stored vertex
#[derive(Debug, Clone)]
pub struct Node {
    /// Entity label (registered type)
    pub label: String,

    /// Internal identifier, `None` until first persisted
    pub(crate) id: Option<NodeId>,

    /// Optional external token
    pub token: Option<Token>,

    /// Scalar fields
    pub properties: Properties,

    /// Relationship fields: field name -> targets in field order
    pub(crate) relations: BTreeMap<String, Vec<NodeRef>>,

    /// Token and properties as last persisted or loaded
    pub(crate) persisted: Option<(Option<Token>, Properties)>,
}

impl Node {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            id: None,
            token: None,
            properties: Properties::new(),
            relations: BTreeMap::new(),
            persisted: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<Token>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_property(
        mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn id(&self) -> Option<NodeId> {
        self.id
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn property(&self, name: &str) -> Option<&serde_json::Value> {
        self.properties.get(name)
    }

    /// Whether the scalar state differs from what was last persisted
    pub fn is_dirty(&self) -> bool {
        match &self.persisted {
            Some((token, properties)) => token != &self.token || properties != &self.properties,
            None => true,
        }
    }

    /// Relationship field names that currently hold at least one target
    pub fn relation_fields(&self) -> impl Iterator<Item = &str> {
        self.relations
            .iter()
            .filter(|(_, targets)| !targets.is_empty())
            .map(|(name, _)| name.as_str())
    }

    /// Mark the current scalar state as persisted under `id`
    pub(crate) fn mark_persisted(&mut self, id: NodeId) {
        self.id = Some(id);
        self.persisted = Some((self.token.clone(), self.properties.clone()));
    }

    pub(crate) fn forget_persistence(&mut self) {
        self.id = None;
        self.persisted = None;
    }
}
