//! Input validation limits for schema descriptors and node tokens

/// Maximum length for entity labels (128 chars)
pub const MAX_LABEL_LEN: usize = 128;

/// Maximum length for field names (128 chars)
pub const MAX_FIELD_NAME_LEN: usize = 128;

/// Maximum length for relationship types (128 chars)
pub const MAX_RELATIONSHIP_TYPE_LEN: usize = 128;

/// Maximum length for external tokens (256 chars)
pub const MAX_TOKEN_LEN: usize = 256;

/// Maximum fields declared on a single entity (512)
pub const MAX_FIELDS_PER_ENTITY: usize = 512;

/// Depth used by `save`/`load` when the caller does not pass one
pub const DEFAULT_DEPTH: i32 = 1;

/// Validation error type
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyLabel,
    LabelTooLong { len: usize, max: usize },
    InvalidLabel(String),
    EmptyFieldName,
    FieldNameTooLong { len: usize, max: usize },
    InvalidFieldName(String),
    EmptyRelationshipType,
    RelationshipTypeTooLong { len: usize, max: usize },
    InvalidRelationshipType(String),
    EmptyToken,
    TokenTooLong { len: usize, max: usize },
    TooManyFields { count: usize, max: usize },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyLabel => write!(f, "Entity label cannot be empty"),
            Self::LabelTooLong { len, max } => {
                write!(f, "Entity label too long: {} chars (max {})", len, max)
            }
            Self::InvalidLabel(label) => write!(f, "Invalid entity label: {}", label),
            Self::EmptyFieldName => write!(f, "Field name cannot be empty"),
            Self::FieldNameTooLong { len, max } => {
                write!(f, "Field name too long: {} chars (max {})", len, max)
            }
            Self::InvalidFieldName(name) => write!(f, "Invalid field name: {}", name),
            Self::EmptyRelationshipType => write!(f, "Relationship type cannot be empty"),
            Self::RelationshipTypeTooLong { len, max } => {
                write!(f, "Relationship type too long: {} chars (max {})", len, max)
            }
            Self::InvalidRelationshipType(t) => write!(f, "Invalid relationship type: {}", t),
            Self::EmptyToken => write!(f, "Token cannot be empty"),
            Self::TokenTooLong { len, max } => {
                write!(f, "Token too long: {} chars (max {})", len, max)
            }
            Self::TooManyFields { count, max } => {
                write!(f, "Too many fields: {} (max {})", count, max)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Validate entity label
pub fn validate_label(label: &str) -> Result<(), ValidationError> {
    if label.is_empty() {
        return Err(ValidationError::EmptyLabel);
    }
    if label.len() > MAX_LABEL_LEN {
        return Err(ValidationError::LabelTooLong {
            len: label.len(),
            max: MAX_LABEL_LEN,
        });
    }
    if !is_identifier(label) {
        return Err(ValidationError::InvalidLabel(label.to_string()));
    }
    Ok(())
}

/// Validate field name
pub fn validate_field_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyFieldName);
    }
    if name.len() > MAX_FIELD_NAME_LEN {
        return Err(ValidationError::FieldNameTooLong {
            len: name.len(),
            max: MAX_FIELD_NAME_LEN,
        });
    }
    if !is_identifier(name) {
        return Err(ValidationError::InvalidFieldName(name.to_string()));
    }
    Ok(())
}

/// Validate relationship type
pub fn validate_relationship_type(rel_type: &str) -> Result<(), ValidationError> {
    if rel_type.is_empty() {
        return Err(ValidationError::EmptyRelationshipType);
    }
    if rel_type.len() > MAX_RELATIONSHIP_TYPE_LEN {
        return Err(ValidationError::RelationshipTypeTooLong {
            len: rel_type.len(),
            max: MAX_RELATIONSHIP_TYPE_LEN,
        });
    }
    if !is_identifier(rel_type) {
        return Err(ValidationError::InvalidRelationshipType(rel_type.to_string()));
    }
    Ok(())
}

/// Validate external token
pub fn validate_token(token: &str) -> Result<(), ValidationError> {
    if token.is_empty() {
        return Err(ValidationError::EmptyToken);
    }
    if token.len() > MAX_TOKEN_LEN {
        return Err(ValidationError::TokenTooLong {
            len: token.len(),
            max: MAX_TOKEN_LEN,
        });
    }
    Ok(())
}

/// Validate number of fields on an entity
pub fn validate_field_count(count: usize) -> Result<(), ValidationError> {
    if count > MAX_FIELDS_PER_ENTITY {
        return Err(ValidationError::TooManyFields {
            count,
            max: MAX_FIELDS_PER_ENTITY,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_label() {
        assert!(validate_label("Person").is_ok());
        assert!(validate_label("_internal").is_ok());
        assert_eq!(validate_label(""), Err(ValidationError::EmptyLabel));
        assert!(validate_label("9lives").is_err());
        assert!(validate_label("has space").is_err());
        assert!(validate_label(&"x".repeat(200)).is_err());
    }

    #[test]
    fn test_validate_relationship_type() {
        assert!(validate_relationship_type("WORKS_AT").is_ok());
        assert!(validate_relationship_type("works-at").is_err());
        assert!(validate_relationship_type("").is_err());
    }

    #[test]
    fn test_validate_token() {
        assert!(validate_token("01HZX3").is_ok());
        assert!(validate_token("").is_err());
        assert!(validate_token(&"t".repeat(300)).is_err());
    }
}
