//! DDL emission for the synthesized catalog.
//!
//! Foreign keys are emitted by table name. This is the point where a key
//! whose target table never appeared becomes a hard error.

use crate::catalog::{
    ColumnDef, ColumnType, DefaultValue, DeleteBehavior, PartitionKey, TableCatalog, TableDef,
};
use crate::error::{Error, Result};
use std::fmt::Write;

/// SQL dialect of a target engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Embedded SQLite file.
    Sqlite,
    /// Networked PostgreSQL server.
    Postgres,
}

/// Which tables to emit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Scope {
    /// Every table of the catalog.
    #[default]
    All,
    /// One partition: core or a single extension.
    Partition(PartitionKey),
}

impl Scope {
    /// Whether a table falls in this scope.
    pub fn includes(&self, table: &TableDef) -> bool {
        match self {
            Scope::All => true,
            Scope::Partition(key) => PartitionKey::of(table.extension.as_deref()) == *key,
        }
    }
}

impl Dialect {
    /// Column type name.
    pub fn column_type(&self, ty: ColumnType) -> String {
        match (self, ty) {
            (_, ColumnType::Varchar(len)) => format!("VARCHAR({len})"),
            (_, ColumnType::Text) => "TEXT".to_string(),
            (_, ColumnType::Integer) => "INTEGER".to_string(),
            (_, ColumnType::BigInt) => "BIGINT".to_string(),
            (_, ColumnType::Real) => "REAL".to_string(),
            (Dialect::Sqlite, ColumnType::Double) => "REAL".to_string(),
            (Dialect::Postgres, ColumnType::Double) => "DOUBLE PRECISION".to_string(),
            (_, ColumnType::Numeric { precision, scale }) => {
                format!("NUMERIC({precision}, {scale})")
            }
            (_, ColumnType::Boolean) => "BOOLEAN".to_string(),
            (Dialect::Sqlite, ColumnType::Timestamp) => "TIMESTAMP".to_string(),
            (Dialect::Postgres, ColumnType::Timestamp) => "TIMESTAMPTZ".to_string(),
            (Dialect::Sqlite, ColumnType::Json) => "TEXT".to_string(),
            (Dialect::Postgres, ColumnType::Json) => "JSONB".to_string(),
            (Dialect::Sqlite, ColumnType::Blob) => "BLOB".to_string(),
            (Dialect::Postgres, ColumnType::Blob) => "BYTEA".to_string(),
        }
    }

    fn default_value(&self, default: &DefaultValue) -> Option<String> {
        match default {
            DefaultValue::Null => Some("NULL".to_string()),
            DefaultValue::Bool(b) => Some(match (self, b) {
                (Dialect::Sqlite, true) => "1".to_string(),
                (Dialect::Sqlite, false) => "0".to_string(),
                (Dialect::Postgres, true) => "TRUE".to_string(),
                (Dialect::Postgres, false) => "FALSE".to_string(),
            }),
            DefaultValue::Int(i) => Some(i.to_string()),
            DefaultValue::Float(f) => Some(f.to_string()),
            DefaultValue::String(s) => Some(quote_literal(s)),
            DefaultValue::CurrentTimestamp => Some("CURRENT_TIMESTAMP".to_string()),
            // Identifiers are generated by the application.
            DefaultValue::AutoUuid => None,
        }
    }
}

/// Quote an identifier.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn on_delete(behavior: DeleteBehavior) -> &'static str {
    match behavior {
        DeleteBehavior::Cascade => "CASCADE",
        DeleteBehavior::Restrict => "RESTRICT",
        DeleteBehavior::SetNull => "SET NULL",
    }
}

fn column_sql(dialect: Dialect, column: &ColumnDef) -> String {
    let mut sql = format!(
        "{} {}",
        quote_ident(&column.name),
        dialect.column_type(column.column_type)
    );
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if column.unique && !column.primary_key {
        sql.push_str(" UNIQUE");
    }
    if let Some(default) = column.default.as_ref().and_then(|d| dialect.default_value(d)) {
        let _ = write!(sql, " DEFAULT {default}");
    }
    sql
}

/// Check that every foreign key of `table` names a table of `catalog`.
pub fn check_foreign_keys(catalog: &TableCatalog, table: &TableDef) -> Result<()> {
    let dangling: Vec<String> = table
        .foreign_keys()
        .filter(|(_, fk)| !catalog.contains(&fk.target_table))
        .map(|(column, fk)| {
            format!(
                "{}.{} -> {}.{}",
                table.name, column.name, fk.target_table, fk.target_column
            )
        })
        .collect();
    if dangling.is_empty() {
        Ok(())
    } else {
        Err(Error::DanglingForeignKeys {
            references: dangling,
        })
    }
}

/// `CREATE TABLE` plus index statements for one table.
///
/// SQLite foreign keys are inline; PostgreSQL ones come from
/// [`foreign_key_constraints`] so tables can be created in any order.
pub fn create_table(dialect: Dialect, table: &TableDef) -> Vec<String> {
    let mut definitions: Vec<String> = table.columns.iter().map(|c| column_sql(dialect, c)).collect();

    let primary_key = table.primary_key();
    if !primary_key.is_empty() {
        let cols: Vec<String> = primary_key.iter().map(|c| quote_ident(c)).collect();
        definitions.push(format!("PRIMARY KEY ({})", cols.join(", ")));
    }
    if dialect == Dialect::Sqlite {
        for (column, fk) in table.foreign_keys() {
            definitions.push(format!(
                "FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
                quote_ident(&column.name),
                quote_ident(&fk.target_table),
                quote_ident(&fk.target_column),
                on_delete(fk.on_delete)
            ));
        }
    }

    let mut statements = vec![format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        quote_ident(&table.name),
        definitions.join(",\n    ")
    )];

    for column in table
        .columns
        .iter()
        .filter(|c| c.indexed && !c.unique && !c.primary_key)
    {
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quote_ident(&format!("ix_{}_{}", table.name, column.name)),
            quote_ident(&table.name),
            quote_ident(&column.name)
        ));
    }

    if dialect == Dialect::Postgres {
        if let Some(comment) = &table.comment {
            statements.push(format!(
                "COMMENT ON TABLE {} IS {}",
                quote_ident(&table.name),
                quote_literal(comment)
            ));
        }
        for column in &table.columns {
            if let Some(comment) = &column.comment {
                statements.push(format!(
                    "COMMENT ON COLUMN {}.{} IS {}",
                    quote_ident(&table.name),
                    quote_ident(&column.name),
                    quote_literal(comment)
                ));
            }
        }
    }

    statements
}

/// Trailing foreign key constraints of one table (PostgreSQL only).
pub fn foreign_key_constraints(dialect: Dialect, table: &TableDef) -> Vec<String> {
    if dialect != Dialect::Postgres {
        return Vec::new();
    }
    table
        .foreign_keys()
        .map(|(column, fk)| {
            format!(
                "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
                quote_ident(&table.name),
                quote_ident(&format!("fk_{}_{}", table.name, column.name)),
                quote_ident(&column.name),
                quote_ident(&fk.target_table),
                quote_ident(&fk.target_column),
                on_delete(fk.on_delete)
            )
        })
        .collect()
}

/// All DDL for the tables of `catalog` in `scope`, in registration order.
///
/// Fails when any emitted foreign key names a table the catalog lacks.
pub fn generate(catalog: &TableCatalog, dialect: Dialect, scope: &Scope) -> Result<Vec<String>> {
    let tables: Vec<TableDef> = catalog
        .tables()
        .into_iter()
        .filter(|t| scope.includes(t))
        .collect();

    for table in &tables {
        check_foreign_keys(catalog, table)?;
    }

    let mut statements: Vec<String> = tables
        .iter()
        .flat_map(|t| create_table(dialect, t))
        .collect();
    statements.extend(tables.iter().flat_map(|t| foreign_key_constraints(dialect, t)));

    tracing::debug!(
        catalog = %catalog.name(),
        ?dialect,
        tables = tables.len(),
        statements = statements.len(),
        "generated ddl"
    );
    Ok(statements)
}

/// Render statements as one script.
pub fn to_script(statements: &[String]) -> String {
    statements
        .iter()
        .map(|s| format!("{s};\n"))
        .collect::<Vec<_>>()
        .join("\n")
}
