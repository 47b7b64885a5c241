//! Create synthesized tables and insert their seed rows.

use crate::error::{Error, Result};
use crate::session::Session;
use crate::value::Value;
use modelbase_core::catalog::{DefaultValue, SeedRow, TableCatalog, TableDef};
use modelbase_core::ddl::{self, quote_ident, Dialect, Scope};
use tracing::{debug, info};
use uuid::Uuid;

/// Whether `table` exists in the session's database.
pub fn table_exists(session: &mut Session, table: &str) -> Result<bool> {
    let sql = match session.dialect() {
        Dialect::Sqlite => "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
        Dialect::Postgres => {
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = $1"
        }
    };
    Ok(!session.query(sql, &[Value::from(table)])?.is_empty())
}

fn tables_in(catalog: &TableCatalog, scope: &Scope) -> Result<Vec<TableDef>> {
    let tables: Vec<TableDef> = catalog
        .tables()
        .into_iter()
        .filter(|t| scope.includes(t))
        .collect();
    for table in &tables {
        ddl::check_foreign_keys(catalog, table)?;
    }
    Ok(tables)
}

/// Create the tables of `catalog` in `scope` that do not exist yet.
///
/// Returns the names of the created tables. Existing tables are left as
/// they are. The caller commits.
pub fn create_all(session: &mut Session, catalog: &TableCatalog, scope: &Scope) -> Result<Vec<String>> {
    let dialect = session.dialect();
    let tables = tables_in(catalog, scope)?;

    let mut created = Vec::new();
    for table in &tables {
        if table_exists(session, &table.name)? {
            debug!(table = %table.name, "Table exists");
            continue;
        }
        for statement in ddl::create_table(dialect, table) {
            session.execute_batch(&statement)?;
        }
        created.push(table);
    }
    for table in &created {
        for statement in ddl::foreign_key_constraints(dialect, table) {
            session.execute_batch(&statement)?;
        }
    }

    let created: Vec<String> = created.into_iter().map(|t| t.name.clone()).collect();
    info!(catalog = %catalog.name(), created = created.len(), skipped = tables.len() - created.len(), "Created tables");
    Ok(created)
}

fn insert_sql(dialect: Dialect, table: &TableDef, columns: &[&str]) -> String {
    let placeholders: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, name)| match dialect {
            Dialect::Sqlite => format!("?{}", i + 1),
            Dialect::Postgres => {
                let ty = table
                    .column(name)
                    .map(|c| dialect.column_type(c.column_type))
                    .unwrap_or_else(|| "TEXT".to_string());
                format!("CAST(${} AS {ty})", i + 1)
            }
        })
        .collect();
    let names: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT DO NOTHING",
        quote_ident(&table.name),
        names.join(", "),
        placeholders.join(", ")
    )
}

/// `row` with every missing application-generated identifier filled in.
///
/// Seed identifiers derive from the table and the row content, so the same
/// seed row gets the same id on every run.
fn with_seed_ids(table: &TableDef, row: &SeedRow) -> SeedRow {
    let mut row = row.clone();
    let content = serde_json::Value::Object(row.clone()).to_string();
    for column in &table.columns {
        if column.default == Some(DefaultValue::AutoUuid) && !row.contains_key(&column.name) {
            let key = format!("{}.{}:{content}", table.name, column.name);
            let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes());
            row.insert(column.name.clone(), id.to_string().into());
        }
    }
    row
}

/// Insert the seed rows of every table in `scope`, skipping rows that
/// conflict with existing ones.
///
/// Identifier columns the row leaves out are generated. Returns the number
/// of rows inserted. The caller commits.
pub fn seed(session: &mut Session, catalog: &TableCatalog, scope: &Scope) -> Result<usize> {
    let dialect = session.dialect();
    let mut inserted = 0;

    for table in tables_in(catalog, scope)? {
        for row in &table.seed_data {
            if let Some(unknown) = row.keys().find(|k| table.column(k).is_none()) {
                return Err(Error::Config(format!(
                    "seed row for {} sets unknown column {unknown}",
                    table.name
                )));
            }
            if row.is_empty() {
                continue;
            }
            let row = with_seed_ids(&table, row);
            let columns: Vec<&str> = row.keys().map(String::as_str).collect();
            let params: Vec<Value> = row
                .iter()
                .map(|(name, value)| {
                    Value::from_json(value, table.column(name).map(|c| c.column_type))
                })
                .collect();
            inserted += session.execute(&insert_sql(dialect, &table, &columns), &params)? as usize;
        }
        if !table.seed_data.is_empty() {
            debug!(table = %table.name, rows = table.seed_data.len(), "Seeded table");
        }
    }
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelbase_core::catalog::{ColumnType, FieldOrigin};

    fn roles() -> TableDef {
        let column = |name: &str, column_type| modelbase_core::catalog::ColumnDef {
            name: name.to_string(),
            column_type,
            nullable: false,
            primary_key: name == "id",
            unique: false,
            indexed: false,
            default: None,
            comment: None,
            foreign_key: None,
            origin: FieldOrigin::Declared("Role".into()),
        };
        TableDef {
            name: "roles".into(),
            declaration: "Role".into(),
            label: "Role".into(),
            extension: None,
            comment: None,
            system: true,
            columns: vec![
                column("id", ColumnType::Varchar(36)),
                column("rank", ColumnType::Integer),
            ],
            seed_data: Vec::new(),
        }
    }

    #[test]
    fn test_seed_ids_are_stable_and_explicit_ids_win() {
        let mut table = roles();
        table.columns[0].default = Some(DefaultValue::AutoUuid);

        let row: SeedRow = serde_json::json!({ "rank": 1 }).as_object().cloned().unwrap();
        let first = with_seed_ids(&table, &row);
        let second = with_seed_ids(&table, &row);
        let id = first["id"].as_str().unwrap();
        assert_eq!(id.len(), 36);
        assert_eq!(first, second);

        let other: SeedRow = serde_json::json!({ "rank": 2 }).as_object().cloned().unwrap();
        assert_ne!(with_seed_ids(&table, &other)["id"], first["id"]);

        let explicit: SeedRow = serde_json::json!({ "id": "admin", "rank": 1 })
            .as_object()
            .cloned()
            .unwrap();
        assert_eq!(with_seed_ids(&table, &explicit)["id"], "admin");
    }

    #[test]
    fn test_insert_sql_per_dialect() {
        let table = roles();
        assert_eq!(
            insert_sql(Dialect::Sqlite, &table, &["id", "rank"]),
            "INSERT INTO \"roles\" (\"id\", \"rank\") VALUES (?1, ?2) ON CONFLICT DO NOTHING"
        );
        assert_eq!(
            insert_sql(Dialect::Postgres, &table, &["id", "rank"]),
            "INSERT INTO \"roles\" (\"id\", \"rank\") VALUES (CAST($1 AS VARCHAR(36)), CAST($2 AS INTEGER)) ON CONFLICT DO NOTHING"
        );
    }
}
