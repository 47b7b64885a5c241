//! JSON model manifests.
//!
//! A manifest lists model definitions that are turned into declarations:
//!
//! ```json
//! {
//!   "models": [
//!     {
//!       "name": "User",
//!       "mixins": ["identity", "audit"],
//!       "fields": [
//!         { "name": "email", "type": "string", "max_length": 320, "unique": true },
//!         { "name": "team_id", "type": "reference", "target": "Team", "optional": true }
//!       ]
//!     }
//!   ]
//! }
//! ```

use crate::catalog::{
    BuiltinMixin, Declaration, DefaultValue, DeleteBehavior, FieldDef, FieldType, MixinRef,
    ScalarType, SeedRow,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// A manifest document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// Model definitions in bind order.
    #[serde(default)]
    pub models: Vec<ModelSpec>,
}

/// One model definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Declaration name.
    pub name: String,
    /// Builtin mixin names or names of other models.
    #[serde(default)]
    pub mixins: Vec<String>,
    /// Fields in order.
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    /// Owning extension.
    #[serde(default)]
    pub extension: Option<String>,
    /// Table name override.
    #[serde(default)]
    pub table_name: Option<String>,
    /// Friendly name override.
    #[serde(default)]
    pub friendly_name: Option<String>,
    /// Table comment.
    #[serde(default)]
    pub comment: Option<String>,
    /// System entity flag.
    #[serde(default)]
    pub system: bool,
    /// Abstract models only contribute fields.
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    /// Seed rows.
    #[serde(default)]
    pub seed: Vec<SeedRow>,
}

/// One field definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name.
    pub name: String,
    /// A scalar type name, `enum`, `map` or `reference`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Nullable.
    #[serde(default)]
    pub optional: bool,
    /// Collection of the scalar type.
    #[serde(default)]
    pub array: bool,
    /// Enum variants.
    #[serde(default)]
    pub variants: Vec<String>,
    /// Reference target declaration.
    #[serde(default)]
    pub target: Option<String>,
    /// Referenced column, `id` by default.
    #[serde(default)]
    pub target_field: Option<String>,
    /// Reference delete behavior.
    #[serde(default)]
    pub on_delete: Option<DeleteBehavior>,
    /// Decimal precision.
    #[serde(default)]
    pub precision: Option<u8>,
    /// Decimal scale.
    #[serde(default)]
    pub scale: Option<u8>,
    /// Column comment.
    #[serde(default)]
    pub description: Option<String>,
    /// String bound.
    #[serde(default)]
    pub max_length: Option<u32>,
    /// Default value.
    #[serde(default)]
    pub default: Option<DefaultValue>,
    /// Secondary index.
    #[serde(default)]
    pub indexed: bool,
    /// Unique constraint.
    #[serde(default)]
    pub unique: bool,
}

impl Manifest {
    /// Parse a manifest from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read and parse a manifest file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    /// Build the declarations, in manifest order.
    pub fn declarations(&self) -> Result<Vec<Arc<Declaration>>> {
        self.models.iter().map(ModelSpec::declaration).collect()
    }
}

impl ModelSpec {
    /// Build the declaration.
    pub fn declaration(&self) -> Result<Arc<Declaration>> {
        let mut builder = Declaration::builder(&self.name);
        for mixin in &self.mixins {
            builder = builder.mixin(match BuiltinMixin::from_name(mixin) {
                Some(builtin) => MixinRef::Builtin(builtin),
                None => MixinRef::Declaration(mixin.clone()),
            });
        }
        for field in &self.fields {
            builder = builder.field(field.field_def().map_err(|reason| {
                Error::Manifest(format!("model {}: {reason}", self.name))
            })?);
        }
        if let Some(extension) = &self.extension {
            builder = builder.extension(extension);
        }
        if let Some(table_name) = &self.table_name {
            builder = builder.table_name(table_name);
        }
        if let Some(friendly_name) = &self.friendly_name {
            builder = builder.friendly_name(friendly_name);
        }
        if let Some(comment) = &self.comment {
            builder = builder.comment(comment);
        }
        if self.system {
            builder = builder.system();
        }
        if self.is_abstract {
            builder = builder.abstract_base();
        }
        for row in &self.seed {
            builder = builder.seed(row.clone());
        }
        Ok(builder.build())
    }
}

impl FieldSpec {
    fn field_type(&self) -> std::result::Result<FieldType, String> {
        let field_type = match self.kind.as_str() {
            "reference" => {
                let target = self
                    .target
                    .clone()
                    .ok_or_else(|| format!("reference field {} has no target", self.name))?;
                let mut reference = if self.optional {
                    FieldType::optional_reference(target)
                } else {
                    FieldType::reference(target)
                };
                if let FieldType::Reference {
                    target_field,
                    on_delete,
                    ..
                } = &mut reference
                {
                    if let Some(field) = &self.target_field {
                        *target_field = field.clone();
                    }
                    if let Some(behavior) = self.on_delete {
                        *on_delete = behavior;
                    }
                }
                reference
            }
            "enum" if self.variants.is_empty() => {
                return Err(format!("enum field {} has no variants", self.name))
            }
            "enum" if self.optional => FieldType::OptionalEnum {
                name: self.name.clone(),
                variants: self.variants.clone(),
            },
            "enum" => FieldType::enum_type(self.name.clone(), self.variants.clone()),
            "map" => FieldType::Map,
            other => {
                let scalar = self.scalar(other)?;
                match (self.array, self.optional) {
                    (true, _) => FieldType::ArrayScalar(scalar),
                    (false, true) => FieldType::OptionalScalar(scalar),
                    (false, false) => FieldType::Scalar(scalar),
                }
            }
        };
        Ok(field_type)
    }

    fn scalar(&self, name: &str) -> std::result::Result<ScalarType, String> {
        Ok(match name {
            "bool" | "boolean" => ScalarType::Bool,
            "int32" | "integer" => ScalarType::Int32,
            "int64" | "bigint" => ScalarType::Int64,
            "float32" => ScalarType::Float32,
            "float64" | "float" => ScalarType::Float64,
            "decimal" => ScalarType::Decimal {
                precision: self.precision.unwrap_or(18),
                scale: self.scale.unwrap_or(2),
            },
            "string" => ScalarType::String,
            "text" => ScalarType::Text,
            "bytes" => ScalarType::Bytes,
            "timestamp" | "datetime" => ScalarType::Timestamp,
            "uuid" => ScalarType::Uuid,
            other => return Err(format!("field {} has unknown type {other}", self.name)),
        })
    }

    /// Build the field definition.
    pub fn field_def(&self) -> std::result::Result<FieldDef, String> {
        let field_type = self.field_type()?;
        let mut field = if self.optional {
            FieldDef::optional(&self.name, field_type)
        } else {
            FieldDef::new(&self.name, field_type)
        };
        field.description = self.description.clone();
        field.max_length = self.max_length;
        field.default = self.default.clone();
        field.indexed = self.indexed;
        field.unique = self.unique;
        Ok(field)
    }
}
