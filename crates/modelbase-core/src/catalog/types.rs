//! Semantic field types and the storage column types they map to.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default bound for string columns without an explicit `max_length`.
pub const DEFAULT_STRING_LENGTH: u32 = 255;

/// Length of the textual identifier columns produced by the identity mixin.
pub const IDENTIFIER_LENGTH: u32 = 36;

/// Column type of identifier and foreign key columns.
pub const IDENTIFIER_COLUMN_TYPE: ColumnType = ColumnType::Varchar(IDENTIFIER_LENGTH);

/// Scalar data types a declaration field can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    /// Boolean value.
    Bool,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 32-bit floating point.
    Float32,
    /// 64-bit floating point.
    Float64,
    /// Fixed-precision decimal.
    Decimal {
        /// Total number of digits.
        precision: u8,
        /// Number of digits after decimal point.
        scale: u8,
    },
    /// Bounded UTF-8 string.
    String,
    /// Unbounded UTF-8 text.
    Text,
    /// Binary data.
    Bytes,
    /// Timestamp with time zone.
    Timestamp,
    /// Textual UUID identifier.
    Uuid,
}

/// How a reference column behaves when its target row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteBehavior {
    /// Delete referencing rows.
    Cascade,
    /// Prevent deletion while referencing rows exist.
    #[default]
    Restrict,
    /// Set the referencing column to null.
    SetNull,
}

/// Field types of a domain declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// A scalar value.
    Scalar(ScalarType),
    /// An optional scalar value (nullable).
    OptionalScalar(ScalarType),
    /// A collection of scalar values, stored serialized.
    ArrayScalar(ScalarType),
    /// An enumeration stored as its variant name.
    Enum {
        /// Name of the enum type.
        name: String,
        /// Allowed variant values.
        variants: Vec<String>,
    },
    /// An optional enumeration.
    OptionalEnum {
        /// Name of the enum type.
        name: String,
        /// Allowed variant values.
        variants: Vec<String>,
    },
    /// A free-form mapping, stored serialized.
    Map,
    /// A relationship to another declaration, stored as a foreign key.
    Reference {
        /// Name of the target declaration.
        target: String,
        /// Column of the target table the key points at.
        target_field: String,
        /// Whether the reference may be absent.
        optional: bool,
        /// Behavior when the referenced row is deleted.
        on_delete: DeleteBehavior,
    },
}

/// Column types of the synthesized storage schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// Bounded text.
    Varchar(u32),
    /// Unbounded text.
    Text,
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    BigInt,
    /// Single precision float.
    Real,
    /// Double precision float.
    Double,
    /// Exact numeric.
    Numeric {
        /// Total number of digits.
        precision: u8,
        /// Digits after the decimal point.
        scale: u8,
    },
    /// Boolean.
    Boolean,
    /// Timestamp with time zone.
    Timestamp,
    /// Structured (JSON) value.
    Json,
    /// Binary blob.
    Blob,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Varchar(len) => write!(f, "varchar({len})"),
            ColumnType::Text => f.write_str("text"),
            ColumnType::Integer => f.write_str("integer"),
            ColumnType::BigInt => f.write_str("bigint"),
            ColumnType::Real => f.write_str("real"),
            ColumnType::Double => f.write_str("double"),
            ColumnType::Numeric { precision, scale } => write!(f, "numeric({precision}, {scale})"),
            ColumnType::Boolean => f.write_str("boolean"),
            ColumnType::Timestamp => f.write_str("timestamp"),
            ColumnType::Json => f.write_str("json"),
            ColumnType::Blob => f.write_str("blob"),
        }
    }
}

impl ScalarType {
    /// Check if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ScalarType::Int32
                | ScalarType::Int64
                | ScalarType::Float32
                | ScalarType::Float64
                | ScalarType::Decimal { .. }
        )
    }

    /// Check if this type is a string-like type.
    pub fn is_string_like(&self) -> bool {
        matches!(
            self,
            ScalarType::String | ScalarType::Text | ScalarType::Uuid | ScalarType::Bytes
        )
    }

    /// Column type for a single value of this scalar.
    pub fn column_type(&self, max_length: Option<u32>) -> ColumnType {
        match self {
            ScalarType::Bool => ColumnType::Boolean,
            ScalarType::Int32 => ColumnType::Integer,
            ScalarType::Int64 => ColumnType::BigInt,
            ScalarType::Float32 => ColumnType::Real,
            ScalarType::Float64 => ColumnType::Double,
            ScalarType::Decimal { precision, scale } => ColumnType::Numeric {
                precision: *precision,
                scale: *scale,
            },
            ScalarType::String => ColumnType::Varchar(max_length.unwrap_or(DEFAULT_STRING_LENGTH)),
            ScalarType::Text => ColumnType::Text,
            ScalarType::Bytes => ColumnType::Blob,
            ScalarType::Timestamp => ColumnType::Timestamp,
            ScalarType::Uuid => ColumnType::Varchar(IDENTIFIER_LENGTH),
        }
    }
}

impl FieldType {
    /// Create a scalar field type.
    pub fn scalar(scalar: ScalarType) -> Self {
        FieldType::Scalar(scalar)
    }

    /// Create an optional scalar field type.
    pub fn optional_scalar(scalar: ScalarType) -> Self {
        FieldType::OptionalScalar(scalar)
    }

    /// Create an array of scalars field type.
    pub fn array_scalar(scalar: ScalarType) -> Self {
        FieldType::ArrayScalar(scalar)
    }

    /// Create an enum field type.
    pub fn enum_type(name: impl Into<String>, variants: Vec<String>) -> Self {
        FieldType::Enum {
            name: name.into(),
            variants,
        }
    }

    /// Create a required reference to the `id` of another declaration.
    pub fn reference(target: impl Into<String>) -> Self {
        FieldType::Reference {
            target: target.into(),
            target_field: "id".to_string(),
            optional: false,
            on_delete: DeleteBehavior::Restrict,
        }
    }

    /// Create an optional reference to the `id` of another declaration.
    ///
    /// Optional references null themselves out when the target row goes away.
    pub fn optional_reference(target: impl Into<String>) -> Self {
        FieldType::Reference {
            target: target.into(),
            target_field: "id".to_string(),
            optional: true,
            on_delete: DeleteBehavior::SetNull,
        }
    }

    /// Check if this type is nullable.
    pub fn is_nullable(&self) -> bool {
        match self {
            FieldType::OptionalScalar(_) | FieldType::OptionalEnum { .. } => true,
            FieldType::Reference { optional, .. } => *optional,
            _ => false,
        }
    }

    /// Check if this type is an array.
    pub fn is_array(&self) -> bool {
        matches!(self, FieldType::ArrayScalar(_))
    }

    /// Check if this type is a relationship.
    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Reference { .. })
    }

    /// Name of the referenced declaration, if this is a relationship.
    pub fn reference_target(&self) -> Option<&str> {
        match self {
            FieldType::Reference { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Get the inner scalar type if this is a scalar-based type.
    pub fn scalar_type(&self) -> Option<&ScalarType> {
        match self {
            FieldType::Scalar(s) | FieldType::OptionalScalar(s) | FieldType::ArrayScalar(s) => {
                Some(s)
            }
            _ => None,
        }
    }
}
