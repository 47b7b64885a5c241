//! The table catalog and the declarative base that owns it.

use super::table::TableDef;
use crate::error::{Error, Result};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_CATALOG_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CatalogId(u64);

/// Core or one named extension.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionKey {
    /// Declarations without an owning extension.
    Core,
    /// Declarations owned by the named extension.
    Extension(String),
}

/// A relationship column whose target table was not yet in the catalog when
/// the column was built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyPlaceholder {
    /// Table holding the foreign key column.
    pub source_table: String,
    /// The foreign key column.
    pub source_column: String,
    /// Name of the referenced table.
    pub target_table: String,
    /// Name of the referenced column.
    pub target_column: String,
}

/// Tables grouped by owning extension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogPartition {
    /// Core tables in registration order.
    pub core: Vec<String>,
    /// Extension tables keyed by extension name.
    pub extensions: BTreeMap<String, Vec<String>>,
}

/// Mutable mapping of table name to table definition for one logical database.
///
/// Table names are unique: registering a name twice is an error that names
/// both declarations, never an overwrite.
pub struct TableCatalog {
    id: CatalogId,
    name: String,
    tables: RwLock<IndexMap<String, TableDef>>,
    pending: Mutex<Vec<ForeignKeyPlaceholder>>,
}

/// Owner of the single table catalog of a logical database.
pub struct DeclarativeBase {
    catalog: Arc<TableCatalog>,
}

impl PartitionKey {
    /// Partition of a declaration or table owned by `extension`.
    pub fn of(extension: Option<&str>) -> Self {
        match extension {
            Some(name) => PartitionKey::Extension(name.to_string()),
            None => PartitionKey::Core,
        }
    }

    /// Whether this is the core partition.
    pub fn is_core(&self) -> bool {
        matches!(self, PartitionKey::Core)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionKey::Core => f.write_str("core"),
            PartitionKey::Extension(name) => write!(f, "extension:{name}"),
        }
    }
}

impl fmt::Display for ForeignKeyPlaceholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.source_table, self.source_column, self.target_table, self.target_column
        )
    }
}

impl CatalogPartition {
    /// Tables of one partition.
    pub fn tables(&self, key: &PartitionKey) -> &[String] {
        match key {
            PartitionKey::Core => &self.core,
            PartitionKey::Extension(name) => {
                self.extensions.get(name).map(Vec::as_slice).unwrap_or(&[])
            }
        }
    }
}

impl TableCatalog {
    /// Create an empty catalog.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: CatalogId(NEXT_CATALOG_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            tables: RwLock::new(IndexMap::new()),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Identity of this catalog.
    pub fn id(&self) -> CatalogId {
        self.id
    }

    /// Logical database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a synthesized table together with the foreign keys it could
    /// not resolve yet.
    ///
    /// Any pending placeholder whose target is now present, including ones
    /// pointing at the new table itself, is resolved before returning.
    pub fn register_table(
        &self,
        table: TableDef,
        placeholders: Vec<ForeignKeyPlaceholder>,
    ) -> Result<()> {
        let mut tables = self.tables.write();
        if let Some(existing) = tables.get(&table.name) {
            return Err(Error::TableCollision {
                table: table.name.clone(),
                existing: existing.declaration.clone(),
                incoming: table.declaration.clone(),
            });
        }

        tracing::debug!(
            catalog = %self.name,
            table = %table.name,
            declaration = %table.declaration,
            columns = table.columns.len(),
            "registered table"
        );
        tables.insert(table.name.clone(), table);

        let mut pending = self.pending.lock();
        pending.extend(placeholders);
        pending.retain(|placeholder| !resolve_placeholder(&mut tables, placeholder));
        Ok(())
    }

    /// Get a table definition by name.
    pub fn table(&self, name: &str) -> Option<TableDef> {
        self.tables.read().get(name).cloned()
    }

    /// Check if a table is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tables.read().contains_key(name)
    }

    /// All table names in registration order.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    /// Snapshot of all tables in registration order.
    pub fn tables(&self) -> Vec<TableDef> {
        self.tables.read().values().cloned().collect()
    }

    /// Number of registered tables.
    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    /// Whether no table is registered.
    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }

    /// Owning extension of a table, read from its metadata.
    ///
    /// Returns `None` when the table does not exist.
    pub fn extension_of(&self, table: &str) -> Option<Option<String>> {
        self.tables.read().get(table).map(|t| t.extension.clone())
    }

    /// Placeholders whose target table has not been registered.
    pub fn pending_placeholders(&self) -> Vec<ForeignKeyPlaceholder> {
        self.pending.lock().clone()
    }

    /// Group tables into core and per-extension subsets.
    pub fn partition(&self) -> CatalogPartition {
        let mut partition = CatalogPartition::default();
        for table in self.tables.read().values() {
            match &table.extension {
                Some(ext) => partition
                    .extensions
                    .entry(ext.clone())
                    .or_default()
                    .push(table.name.clone()),
                None => partition.core.push(table.name.clone()),
            }
        }
        partition
    }

    /// One-table description: label, columns, foreign keys and comments.
    ///
    /// Returns `None` when the table does not exist.
    pub fn describe(&self, table: &str) -> Option<String> {
        let tables = self.tables.read();
        let table = tables.get(table)?;

        let mut out = format!("{} ({})", table.name, table.label);
        if let Some(extension) = &table.extension {
            let _ = write!(out, " [{}]", PartitionKey::Extension(extension.clone()));
        }
        if let Some(comment) = &table.comment {
            let _ = write!(out, ": {comment}");
        }
        for column in &table.columns {
            let _ = write!(out, "\n  {} {}", column.name, column.column_type);
            if column.primary_key {
                out.push_str(" primary key");
            } else if !column.nullable {
                out.push_str(" not null");
            }
            if let Some(fk) = &column.foreign_key {
                let _ = write!(out, " -> {}.{}", fk.target_table, fk.target_column);
            }
            if let Some(comment) = &column.comment {
                let _ = write!(out, "  # {comment}");
            }
        }
        Some(out)
    }

    /// JSON description of every table, with comments, for schema dumps.
    pub fn dump(&self) -> serde_json::Value {
        let tables = self.tables.read();
        serde_json::json!({
            "catalog": self.name,
            "tables": tables.values().collect::<Vec<_>>(),
            "pending_foreign_keys": self.pending.lock().clone(),
        })
    }

    /// Drop every table and placeholder.
    pub fn clear(&self) {
        self.tables.write().clear();
        self.pending.lock().clear();
    }
}

impl fmt::Debug for TableCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableCatalog")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("tables", &self.table_names())
            .finish()
    }
}

/// Apply a placeholder if its target exists. Returns true when resolved.
fn resolve_placeholder(
    tables: &mut IndexMap<String, TableDef>,
    placeholder: &ForeignKeyPlaceholder,
) -> bool {
    let Some(label) = tables.get(&placeholder.target_table).map(|t| t.label.clone()) else {
        return false;
    };

    let Some(column) = tables
        .get_mut(&placeholder.source_table)
        .and_then(|t| t.columns.iter_mut().find(|c| c.name == placeholder.source_column))
    else {
        // Source vanished (catalog cleared between synthesis steps).
        return true;
    };

    if let Some(fk) = column.foreign_key.as_mut() {
        fk.target_label = Some(label.clone());
    }
    if column.comment.is_none() {
        column.comment = Some(label);
    }
    tracing::debug!(placeholder = %placeholder, "resolved foreign key");
    true
}

impl DeclarativeBase {
    /// Create a base with a fresh catalog for the named logical database.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            catalog: Arc::new(TableCatalog::new(name)),
        }
    }

    /// The catalog synthesized classes attach to.
    pub fn catalog(&self) -> &Arc<TableCatalog> {
        &self.catalog
    }

    /// Logical database name.
    pub fn name(&self) -> &str {
        self.catalog.name()
    }
}
