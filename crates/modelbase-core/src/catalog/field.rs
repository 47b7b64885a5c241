//! Field definitions for domain declarations.

use super::types::{FieldType, ScalarType};
use serde::{Deserialize, Serialize};

/// A field definition within a declaration or mixin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name, also the column name.
    pub name: String,
    /// Field data type.
    pub field_type: FieldType,
    /// Whether the field is required (non-nullable).
    pub required: bool,
    /// Default value if not provided.
    pub default: Option<DefaultValue>,
    /// Human readable description, emitted as the column comment.
    pub description: Option<String>,
    /// Upper bound for string columns.
    pub max_length: Option<u32>,
    /// Whether this field should be indexed.
    pub indexed: bool,
    /// Whether values must be unique across the table.
    pub unique: bool,
}

/// Default value for a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// String value.
    String(String),
    /// Current timestamp (evaluated at insert time).
    CurrentTimestamp,
    /// Identifier generated by the application before insert.
    AutoUuid,
}

impl FieldDef {
    /// Create a new field. Nullability follows the field type.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let required = !field_type.is_nullable();
        Self {
            name: name.into(),
            field_type,
            required,
            default: None,
            description: None,
            max_length: None,
            indexed: false,
            unique: false,
        }
    }

    /// Create an optional field (required = false).
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            required: false,
            ..Self::new(name, field_type)
        }
    }

    /// Create an optional scalar field.
    pub fn optional_scalar(name: impl Into<String>, scalar: ScalarType) -> Self {
        Self::optional(name, FieldType::OptionalScalar(scalar))
    }

    /// Set the default value.
    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Set the description used as column comment.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Bound the length of a string field.
    pub fn with_max_length(mut self, max_length: u32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Mark as indexed.
    pub fn with_index(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Mark as unique.
    pub fn with_unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Check if this field has a default value.
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Whether the column may hold null.
    pub fn is_nullable(&self) -> bool {
        !self.required || self.field_type.is_nullable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::types::ScalarType;

    #[test]
    fn test_field_def_builder() {
        let field = FieldDef::new("id", FieldType::scalar(ScalarType::Uuid))
            .with_default(DefaultValue::AutoUuid)
            .with_index();

        assert_eq!(field.name, "id");
        assert!(field.required);
        assert!(field.indexed);
        assert!(field.has_default());
    }

    #[test]
    fn test_optional_field() {
        let field = FieldDef::optional("description", FieldType::scalar(ScalarType::String));

        assert!(!field.required);
        assert!(field.is_nullable());
        assert!(!field.indexed);
        assert!(!field.has_default());
    }

    #[test]
    fn test_nullability_follows_type() {
        let field = FieldDef::new("team_id", FieldType::optional_reference("Team"));
        assert!(!field.required);
        assert!(field.is_nullable());

        let field = FieldDef::optional_scalar("nickname", ScalarType::String)
            .with_description("Display name")
            .with_max_length(40);
        assert_eq!(field.description.as_deref(), Some("Display name"));
        assert_eq!(field.max_length, Some(40));
    }
}
