//! Entity registry: per-label field and relationship schema
//!
//! The registry is built once, up front, from typed registration calls or a
//! declarative [`SchemaDocument`], and is read-only afterwards. The save and
//! load paths only ever query it by label.

use crate::error::{Error, Result};
use crate::limits::{
    validate_field_count, validate_field_name, validate_label, validate_relationship_type,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// How many targets a relationship field may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    /// At most one target
    Single,
    /// Any number of targets
    #[default]
    Multi,
}

impl std::fmt::Display for Cardinality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Multi => write!(f, "multi"),
        }
    }
}

/// Direction of the stored edge relative to the node declaring the field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Outgoing,
    Incoming,
    Both,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Self::Outgoing => Self::Incoming,
            Self::Incoming => Self::Outgoing,
            Self::Both => Self::Both,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Outgoing => write!(f, "outgoing"),
            Self::Incoming => write!(f, "incoming"),
            Self::Both => write!(f, "both"),
        }
    }
}

/// Declared type of a scalar field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    String,
    Int,
    Float,
    Bool,
    /// RFC 3339 timestamp stored as a string
    DateTime,
    /// Any JSON value
    #[default]
    Json,
}

impl ScalarKind {
    /// Whether `value` is acceptable for a field of this kind. Null is always accepted.
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value;

        if value.is_null() {
            return true;
        }
        match self {
            Self::String => value.is_string(),
            Self::Int => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::DateTime => match value {
                Value::String(s) => chrono::DateTime::parse_from_rfc3339(s).is_ok(),
                _ => false,
            },
            Self::Json => true,
        }
    }
}

/// Relationship metadata for one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipInfo {
    /// Edge type written to the store (e.g. "WORKS_AT")
    #[serde(rename = "type")]
    pub rel_type: String,

    /// Label of the target entity
    pub target: String,

    #[serde(default)]
    pub cardinality: Cardinality,

    #[serde(default)]
    pub direction: Direction,

    /// Whether element order is persisted (Multi only)
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ordered: bool,
}

impl RelationshipInfo {
    pub fn single(rel_type: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            rel_type: rel_type.into(),
            target: target.into(),
            cardinality: Cardinality::Single,
            direction: Direction::Outgoing,
            ordered: false,
        }
    }

    pub fn multi(rel_type: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            rel_type: rel_type.into(),
            target: target.into(),
            cardinality: Cardinality::Multi,
            direction: Direction::Outgoing,
            ordered: false,
        }
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Persist element order; a reorder then rewrites the field's edges
    pub fn ordered(mut self) -> Self {
        self.ordered = true;
        self
    }
}

/// Kind of a declared field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Scalar(ScalarKind),
    Relationship(RelationshipInfo),
}

/// One declared field of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FieldDescriptor", into = "FieldDescriptor")]
pub struct FieldSchema {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldSchema {
    pub fn relationship(&self) -> Option<&RelationshipInfo> {
        match &self.kind {
            FieldKind::Relationship(info) => Some(info),
            FieldKind::Scalar(_) => None,
        }
    }

    pub fn scalar(&self) -> Option<ScalarKind> {
        match &self.kind {
            FieldKind::Scalar(kind) => Some(*kind),
            FieldKind::Relationship(_) => None,
        }
    }
}

/// Serialized shape of a field: exactly one of `scalar` / `relationship`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FieldDescriptor {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scalar: Option<ScalarKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    relationship: Option<RelationshipInfo>,
}

impl TryFrom<FieldDescriptor> for FieldSchema {
    type Error = String;

    fn try_from(d: FieldDescriptor) -> std::result::Result<Self, Self::Error> {
        let kind = match (d.scalar, d.relationship) {
            (Some(kind), None) => FieldKind::Scalar(kind),
            (None, Some(info)) => FieldKind::Relationship(info),
            (None, None) => FieldKind::Scalar(ScalarKind::Json),
            (Some(_), Some(_)) => {
                return Err(format!(
                    "field '{}' declares both a scalar kind and a relationship",
                    d.name
                ))
            }
        };
        Ok(Self { name: d.name, kind })
    }
}

impl From<FieldSchema> for FieldDescriptor {
    fn from(f: FieldSchema) -> Self {
        match f.kind {
            FieldKind::Scalar(kind) => Self {
                name: f.name,
                scalar: Some(kind),
                relationship: None,
            },
            FieldKind::Relationship(info) => Self {
                name: f.name,
                scalar: None,
                relationship: Some(info),
            },
        }
    }
}

/// Schema for one entity label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub label: String,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

impl EntitySchema {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            fields: Vec::new(),
        }
    }

    /// Declare a scalar field
    pub fn scalar(mut self, name: impl Into<String>, kind: ScalarKind) -> Self {
        self.fields.push(FieldSchema {
            name: name.into(),
            kind: FieldKind::Scalar(kind),
        });
        self
    }

    /// Declare a relationship field
    pub fn relationship(mut self, name: impl Into<String>, info: RelationshipInfo) -> Self {
        self.fields.push(FieldSchema {
            name: name.into(),
            kind: FieldKind::Relationship(info),
        });
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn relationships(&self) -> impl Iterator<Item = (&str, &RelationshipInfo)> {
        self.fields
            .iter()
            .filter_map(|f| f.relationship().map(|info| (f.name.as_str(), info)))
    }
}

/// Declarative schema file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDocument {
    #[serde(default, rename = "entity")]
    pub entities: Vec<EntitySchema>,
}

/// Immutable registry of entity schemas
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: HashMap<String, EntitySchema>,
    order: Vec<String>,
}

impl EntityRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn from_document(doc: SchemaDocument) -> Result<Self> {
        doc.entities
            .into_iter()
            .fold(Self::builder(), RegistryBuilder::entity)
            .build()
    }

    pub fn to_document(&self) -> SchemaDocument {
        SchemaDocument {
            entities: self
                .order
                .iter()
                .filter_map(|label| self.entities.get(label).cloned())
                .collect(),
        }
    }

    pub fn contains(&self, label: &str) -> bool {
        self.entities.contains_key(label)
    }

    /// Labels in registration order
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn entity(&self, label: &str) -> Option<&EntitySchema> {
        self.entities.get(label)
    }

    /// Declared fields of `label`, in declaration order
    pub fn fields_of(&self, label: &str) -> Option<&[FieldSchema]> {
        self.entities.get(label).map(|e| e.fields.as_slice())
    }

    pub fn relationship_info(&self, label: &str, field: &str) -> Option<&RelationshipInfo> {
        self.entities
            .get(label)
            .and_then(|e| e.field(field))
            .and_then(FieldSchema::relationship)
    }

    /// The field on the target entity that describes the same edges from the other end
    pub fn inverse_of(&self, label: &str, field: &str) -> Option<(&str, &FieldSchema)> {
        let info = self.relationship_info(label, field)?;
        let target = self.entities.get(&info.target)?;

        target
            .fields
            .iter()
            .find(|candidate| match candidate.relationship() {
                Some(other) => {
                    other.rel_type == info.rel_type
                        && other.target == label
                        && other.direction == info.direction.reverse()
                }
                None => false,
            })
            .map(|f| (target.label.as_str(), f))
    }
}

/// Collects entity schemas and validates them as a whole
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entities: Vec<EntitySchema>,
}

impl RegistryBuilder {
    pub fn entity(mut self, schema: EntitySchema) -> Self {
        self.entities.push(schema);
        self
    }

    pub fn build(self) -> Result<EntityRegistry> {
        let mut entities = HashMap::with_capacity(self.entities.len());
        let mut order = Vec::with_capacity(self.entities.len());

        for schema in self.entities {
            validate_label(&schema.label)?;
            validate_field_count(schema.fields.len())?;

            let mut seen = HashSet::new();
            for field in &schema.fields {
                validate_field_name(&field.name)?;
                if !seen.insert(field.name.as_str()) {
                    return Err(Error::InvalidSchema(format!(
                        "duplicate field '{}' on '{}'",
                        field.name, schema.label
                    )));
                }
                if let Some(info) = field.relationship() {
                    validate_relationship_type(&info.rel_type)?;
                    if info.ordered && info.cardinality == Cardinality::Single {
                        return Err(Error::InvalidSchema(format!(
                            "{}.{} is single and cannot be ordered",
                            schema.label, field.name
                        )));
                    }
                }
            }

            if entities.contains_key(&schema.label) {
                return Err(Error::InvalidSchema(format!(
                    "entity '{}' registered twice",
                    schema.label
                )));
            }
            order.push(schema.label.clone());
            entities.insert(schema.label.clone(), schema);
        }

        for schema in entities.values() {
            for (name, info) in schema.relationships() {
                if !entities.contains_key(&info.target) {
                    return Err(Error::InvalidSchema(format!(
                        "{}.{} targets unregistered entity '{}'",
                        schema.label, name, info.target
                    )));
                }
            }
        }

        tracing::debug!("Built entity registry with {} entities", order.len());

        Ok(EntityRegistry { entities, order })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_registry() -> EntityRegistry {
        EntityRegistry::builder()
            .entity(
                EntitySchema::new("Person")
                    .scalar("name", ScalarKind::String)
                    .relationship("employer", RelationshipInfo::single("WORKS_AT", "Company"))
                    .relationship(
                        "friends",
                        RelationshipInfo::multi("KNOWS", "Person").with_direction(Direction::Both),
                    ),
            )
            .entity(
                EntitySchema::new("Company")
                    .scalar("name", ScalarKind::String)
                    .relationship(
                        "staff",
                        RelationshipInfo::multi("WORKS_AT", "Person")
                            .with_direction(Direction::Incoming),
                    ),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_fields_in_declaration_order() {
        let registry = sample_registry();
        let names: Vec<_> = registry
            .fields_of("Person")
            .unwrap()
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["name", "employer", "friends"]);
        assert!(registry.fields_of("Robot").is_none());
    }

    #[test]
    fn test_relationship_info_lookup() {
        let registry = sample_registry();
        let info = registry.relationship_info("Person", "employer").unwrap();
        assert_eq!(info.cardinality, Cardinality::Single);
        assert_eq!(info.target, "Company");
        assert!(registry.relationship_info("Person", "name").is_none());
    }

    #[test]
    fn test_inverse_of() {
        let registry = sample_registry();
        let (label, field) = registry.inverse_of("Person", "employer").unwrap();
        assert_eq!(label, "Company");
        assert_eq!(field.name, "staff");

        let (label, field) = registry.inverse_of("Person", "friends").unwrap();
        assert_eq!(label, "Person");
        assert_eq!(field.name, "friends");
    }

    #[test]
    fn test_unregistered_target_rejected() {
        let result = EntityRegistry::builder()
            .entity(
                EntitySchema::new("Person")
                    .relationship("pet", RelationshipInfo::single("OWNS", "Dog")),
            )
            .build();
        assert!(matches!(result, Err(Error::InvalidSchema(_))));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let result = EntityRegistry::builder()
            .entity(
                EntitySchema::new("Person")
                    .scalar("name", ScalarKind::String)
                    .scalar("name", ScalarKind::Int),
            )
            .build();
        assert!(matches!(result, Err(Error::InvalidSchema(_))));
    }

    #[test]
    fn test_ordered_single_rejected() {
        let result = EntityRegistry::builder()
            .entity(
                EntitySchema::new("Node")
                    .relationship("next", RelationshipInfo::single("NEXT", "Node").ordered()),
            )
            .build();
        assert!(matches!(result, Err(Error::InvalidSchema(_))));
    }

    #[test]
    fn test_scalar_kind_accepts() {
        assert!(ScalarKind::Int.accepts(&json!(600)));
        assert!(!ScalarKind::Int.accepts(&json!("600")));
        assert!(ScalarKind::Float.accepts(&json!(1)));
        assert!(ScalarKind::DateTime.accepts(&json!("2024-05-01T10:00:00Z")));
        assert!(!ScalarKind::DateTime.accepts(&json!("yesterday")));
        assert!(ScalarKind::String.accepts(&json!(null)));
    }

    #[test]
    fn test_document_roundtrip() {
        let doc: SchemaDocument = serde_json::from_value(json!({
            "entity": [
                {
                    "label": "A",
                    "fields": [
                        { "name": "test_field", "scalar": "string" },
                        { "name": "many_a", "relationship": { "type": "TEST_REL", "target": "B" } }
                    ]
                },
                {
                    "label": "B",
                    "fields": [
                        {
                            "name": "many_b",
                            "relationship": {
                                "type": "TEST_REL",
                                "target": "A",
                                "cardinality": "single",
                                "direction": "incoming"
                            }
                        }
                    ]
                }
            ]
        }))
        .unwrap();
        let registry = EntityRegistry::from_document(doc).unwrap();

        let info = registry.relationship_info("B", "many_b").unwrap();
        assert_eq!(info.cardinality, Cardinality::Single);
        assert_eq!(info.direction, Direction::Incoming);
        assert_eq!(registry.labels().collect::<Vec<_>>(), vec!["A", "B"]);

        let json = serde_json::to_value(registry.to_document()).unwrap();
        assert_eq!(json["entity"][0]["fields"][0]["scalar"], "string");
        assert_eq!(json["entity"][0]["fields"][1]["relationship"]["type"], "TEST_REL");
    }

    #[test]
    fn test_field_with_both_kinds_rejected() {
        let result: std::result::Result<FieldSchema, _> = serde_json::from_value(json!({
            "name": "broken",
            "scalar": "int",
            "relationship": { "type": "REL", "target": "A" }
        }));
        assert!(result.is_err());
    }
}
