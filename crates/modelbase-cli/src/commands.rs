//! Subcommand implementations.

use modelbase_core::{
    ddl, CatalogPartition, DanglingForeignKeyPolicy, Dialect, Manifest, ModelRegistry,
    PartitionKey, RegistryConfig, Scope,
};
use modelbase_db::{bootstrap, DatabaseInfo, DatabaseManager};
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

/// Errors raised by the command layer itself.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] modelbase_core::Error),

    #[error(transparent)]
    Db(#[from] modelbase_db::Error),

    #[error("no table named {0}")]
    UnknownTable(String),

    #[error("{0} foreign key(s) reference missing tables")]
    Dangling(usize),
}

pub type Result<T> = std::result::Result<T, CliError>;

/// Load a manifest, bind and commit it, then synthesize every declaration.
pub fn load(manifest: &Path, extensions: &[String], strict: bool) -> Result<ModelRegistry> {
    let policy = if strict {
        DanglingForeignKeyPolicy::Error
    } else {
        DanglingForeignKeyPolicy::Warn
    };
    let name = manifest
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("modelbase")
        .to_string();

    let declarations = Manifest::from_path(manifest)?.declarations()?;
    let registry = ModelRegistry::with_config(
        name,
        RegistryConfig::default().with_dangling_foreign_keys(policy),
    );
    registry.bind_all(&declarations)?;
    registry.commit(extensions.iter().cloned())?;
    registry.synthesize_all()?;

    info!(
        manifest = %manifest.display(),
        declarations = declarations.len(),
        tables = registry.catalog().len(),
        "Manifest loaded"
    );
    Ok(registry)
}

/// `core`, `extension:<name>` or a bare extension name. `None` means all tables.
pub fn parse_scope(partition: Option<&str>) -> Scope {
    match partition.map(str::trim) {
        None | Some("") | Some("all") => Scope::All,
        Some("core") => Scope::Partition(PartitionKey::Core),
        Some(other) => {
            let name = other.strip_prefix("extension:").unwrap_or(other);
            Scope::Partition(PartitionKey::Extension(name.to_string()))
        }
    }
}

/// The DDL script for `scope`.
pub fn ddl(registry: &ModelRegistry, dialect: Dialect, scope: &Scope) -> Result<String> {
    let statements = ddl::generate(registry.catalog(), dialect, scope)?;
    Ok(ddl::to_script(&statements))
}

/// Partitions and foreign key health of a synthesized catalog.
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    pub partition: CatalogPartition,
    pub dangling: Vec<String>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.dangling.is_empty()
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: {}", PartitionKey::Core, self.partition.core.join(", "))?;
        for (name, tables) in &self.partition.extensions {
            writeln!(
                f,
                "{}: {}",
                PartitionKey::Extension(name.clone()),
                tables.join(", ")
            )?;
        }
        if self.dangling.is_empty() {
            writeln!(f, "foreign keys: ok")
        } else {
            for reference in &self.dangling {
                writeln!(f, "dangling: {reference}")?;
            }
            Ok(())
        }
    }
}

/// Check every table's foreign keys against the catalog.
pub fn check(registry: &ModelRegistry) -> CheckReport {
    let catalog = registry.catalog();
    let mut dangling = Vec::new();
    for table in catalog.tables() {
        if let Err(modelbase_core::Error::DanglingForeignKeys { references }) =
            ddl::check_foreign_keys(catalog, &table)
        {
            dangling.extend(references);
        }
    }
    if !dangling.is_empty() {
        warn!(count = dangling.len(), "Dangling foreign keys");
    }
    CheckReport {
        partition: catalog.partition(),
        dangling,
    }
}

/// What `create` did.
#[derive(Debug)]
pub struct CreateOutcome {
    pub database: DatabaseInfo,
    pub created: Vec<String>,
    pub seeded: usize,
}

/// Create tables and seed rows in the database named by the environment.
pub fn create(
    registry: &ModelRegistry,
    prefix: Option<&str>,
    seed: bool,
    scope: &Scope,
) -> Result<CreateOutcome> {
    let manager = DatabaseManager::from_env()?;
    let outcome = create_with(&manager, registry, prefix, seed, scope);
    let report = manager.close();
    for failure in &report.failures {
        warn!(failure = %failure, "Cleanup failure");
    }
    outcome
}

/// Create tables and seed rows through `manager` in one transaction.
pub fn create_with(
    manager: &DatabaseManager,
    registry: &ModelRegistry,
    prefix: Option<&str>,
    seed: bool,
    scope: &Scope,
) -> Result<CreateOutcome> {
    let database = manager.init_engine_config(prefix, true)?;
    let catalog = registry.catalog();

    let (created, seeded) = manager.get_db(true, |session| {
        let created = bootstrap::create_all(session, catalog, scope)?;
        let seeded = if seed {
            bootstrap::seed(session, catalog, scope)?
        } else {
            0
        };
        Ok::<_, CliError>((created, seeded))
    })?;

    info!(database = %database, created = created.len(), seeded, "Database bootstrapped");
    Ok(CreateOutcome {
        database,
        created,
        seeded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelbase_db::DatabaseSettings;
    use std::io::Write;

    const MANIFEST: &str = r#"{
        "models": [
            {
                "name": "User",
                "mixins": ["identity"],
                "fields": [
                    { "name": "email", "type": "string", "unique": true },
                    { "name": "plan_id", "type": "reference", "target": "Plan", "optional": true }
                ]
            },
            {
                "name": "Plan",
                "mixins": ["identity"],
                "extension": "billing",
                "system": true,
                "seed": [ { "id": "free", "label": "Free" } ],
                "fields": [ { "name": "label", "type": "string" } ]
            }
        ]
    }"#;

    fn manifest() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MANIFEST.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_scope() {
        assert_eq!(parse_scope(None), Scope::All);
        assert_eq!(parse_scope(Some("all")), Scope::All);
        assert_eq!(parse_scope(Some("core")), Scope::Partition(PartitionKey::Core));
        assert_eq!(
            parse_scope(Some("billing")),
            Scope::Partition(PartitionKey::Extension("billing".into()))
        );
        assert_eq!(
            parse_scope(Some("extension:billing")),
            Scope::Partition(PartitionKey::Extension("billing".into()))
        );
    }

    #[test]
    fn test_check_reports_disabled_extension_target() {
        let file = manifest();
        let registry = load(file.path(), &[], false).unwrap();

        let report = check(&registry);
        assert_eq!(report.partition.core, vec!["users"]);
        assert_eq!(report.dangling, vec!["users.plan_id -> plans.id"]);
        assert!(report.to_string().contains("dangling: users.plan_id -> plans.id"));
        assert!(ddl(&registry, Dialect::Sqlite, &Scope::All).is_err());
    }

    #[test]
    fn test_strict_load_fails_on_dangling() {
        let file = manifest();
        let err = load(file.path(), &[], true).unwrap_err();
        assert!(matches!(
            err,
            CliError::Core(modelbase_core::Error::DanglingForeignKeys { .. })
        ));
    }

    #[test]
    fn test_ddl_with_extension_enabled() {
        let file = manifest();
        let registry = load(file.path(), &["billing".to_string()], true).unwrap();

        assert!(check(&registry).is_clean());
        let script = ddl(&registry, Dialect::Postgres, &Scope::All).unwrap();
        assert!(script.contains("CREATE TABLE IF NOT EXISTS \"users\""));
        assert!(script.contains("CREATE TABLE IF NOT EXISTS \"plans\""));

        let core_only = ddl(&registry, Dialect::Sqlite, &parse_scope(Some("core"))).unwrap();
        assert!(core_only.contains("CREATE TABLE IF NOT EXISTS \"users\""));
        assert!(!core_only.contains("CREATE TABLE IF NOT EXISTS \"plans\""));
    }

    #[test]
    fn test_create_bootstraps_sqlite() {
        let file = manifest();
        let registry = load(file.path(), &["billing".to_string()], true).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let manager = DatabaseManager::new(DatabaseSettings::sqlite(dir.path()));

        let outcome = create_with(&manager, &registry, Some("test"), true, &Scope::All).unwrap();
        assert_eq!(outcome.created.len(), 2);
        assert_eq!(outcome.seeded, 1);
        assert!(outcome.database.name.starts_with("test."));

        let again = create_with(&manager, &registry, Some("test"), true, &Scope::All).unwrap();
        assert!(again.created.is_empty());
        assert_eq!(again.seeded, 0);
        assert!(manager.close().is_clean());
    }
}
