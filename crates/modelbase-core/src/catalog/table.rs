//! Table and column definitions of the storage schema.

use super::declaration::SeedRow;
use super::field::DefaultValue;
use super::mixin::FieldOrigin;
use super::types::{ColumnType, DeleteBehavior};
use serde::Serialize;

/// A table registered in a [`TableCatalog`](super::TableCatalog).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableDef {
    /// Table name, unique within the catalog.
    pub name: String,
    /// Name of the declaration that produced the table.
    pub declaration: String,
    /// Human readable name of that declaration.
    pub label: String,
    /// Owning extension, `None` for core tables.
    pub extension: Option<String>,
    /// Table comment.
    pub comment: Option<String>,
    /// Whether the table backs a system entity.
    pub system: bool,
    /// Columns in flattening order.
    pub columns: Vec<ColumnDef>,
    /// Rows inserted at creation time.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub seed_data: Vec<SeedRow>,
}

/// A column of a synthesized table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Storage type.
    pub column_type: ColumnType,
    /// Whether null is allowed.
    pub nullable: bool,
    /// Part of the primary key.
    pub primary_key: bool,
    /// Unique constraint.
    pub unique: bool,
    /// Secondary index.
    pub indexed: bool,
    /// Default value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    /// Column comment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Foreign key target.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<ForeignKeyRef>,
    /// Where the column came from.
    pub origin: FieldOrigin,
}

/// Foreign key target, referenced by table name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyRef {
    /// Name of the target declaration.
    pub target_declaration: String,
    /// Name of the target table.
    pub target_table: String,
    /// Name of the target column.
    pub target_column: String,
    /// Behavior when the target row is deleted.
    pub on_delete: DeleteBehavior,
    /// Friendly name of the target, set once the target table exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_label: Option<String>,
}

impl TableDef {
    /// Get a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column names in order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Primary key column names.
    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Columns carrying a foreign key.
    pub fn foreign_keys(&self) -> impl Iterator<Item = (&ColumnDef, &ForeignKeyRef)> {
        self.columns
            .iter()
            .filter_map(|c| c.foreign_key.as_ref().map(|fk| (c, fk)))
    }

    /// Whether the table belongs to the core partition.
    pub fn is_core(&self) -> bool {
        self.extension.is_none()
    }
}

impl ForeignKeyRef {
    /// Whether the target has been observed in the catalog.
    pub fn is_resolved(&self) -> bool {
        self.target_label.is_some()
    }
}
