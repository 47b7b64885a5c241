//! Integration tests for scoped sessions, cleanup and bootstrap.

use modelbase_core::catalog::{BuiltinMixin, Declaration, FieldDef, FieldType, ScalarType};
use modelbase_core::{Dialect, ModelRegistry, Scope};
use modelbase_db::{
    bootstrap, default_manager, reset_default_manager, set_default_manager, Connection,
    DatabaseManager, DatabaseSettings, Engine, Error, Value,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error("order rejected")]
    Rejected,
    #[error(transparent)]
    Db(#[from] Error),
}

fn manager(dir: &tempfile::TempDir) -> DatabaseManager {
    DatabaseManager::new(DatabaseSettings::sqlite(dir.path()))
}

fn create_orders(manager: &DatabaseManager) {
    manager
        .get_db(true, |s| {
            s.execute_batch("CREATE TABLE orders (id TEXT PRIMARY KEY, total INTEGER)")
        })
        .unwrap();
}

fn order_count(manager: &DatabaseManager) -> i64 {
    let mut fresh = manager.get_session().unwrap();
    let rows = fresh.query("SELECT count(*) AS n FROM orders", &[]).unwrap();
    rows[0].get_i64("n").unwrap()
}

#[test]
fn test_rollback_on_error_is_invisible_to_fresh_session() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&dir);
    create_orders(&manager);

    let err = manager
        .get_db(true, |s| {
            s.execute(
                "INSERT INTO orders VALUES (?1, ?2)",
                &[Value::from("o-1"), Value::from(42i64)],
            )?;
            Err::<(), _>(AppError::Rejected)
        })
        .unwrap_err();

    assert!(matches!(err, AppError::Rejected));
    assert_eq!(order_count(&manager), 0);
    assert_eq!(manager.active_sessions(), 0);
}

#[test]
fn test_database_errors_pass_through() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&dir);
    create_orders(&manager);

    let err = manager
        .get_db(true, |s| {
            s.execute("INSERT INTO orders VALUES ('o-1', 1)", &[])?;
            s.execute("INSERT INTO orders VALUES ('o-1', 2)", &[])?;
            Ok::<_, AppError>(())
        })
        .unwrap_err();

    assert!(matches!(err, AppError::Db(Error::Sqlite(_))));
    assert_eq!(order_count(&manager), 0);
}

#[derive(Debug, Default)]
struct FailingEngine {
    disposed: AtomicBool,
}

impl Engine for FailingEngine {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn label(&self) -> String {
        "failing://audit".to_string()
    }

    fn connect(&self) -> modelbase_db::Result<Box<dyn Connection>> {
        Err(Error::Unsupported("no connections".into()))
    }

    fn dispose(&self) -> modelbase_db::Result<()> {
        self.disposed.store(true, Ordering::SeqCst);
        Err(Error::Unsupported("dispose failed".into()))
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

#[test]
fn test_cleanup_completes_despite_failing_engine() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&dir);
    create_orders(&manager);

    let failing = Arc::new(FailingEngine::default());
    manager.register_engine("audit", failing.clone()).unwrap();
    let engines = manager.engines();
    assert_eq!(engines.len(), 2);
    assert!(manager.named_engine("audit").is_some());

    let mut open = manager.get_session().unwrap();
    open.execute("INSERT INTO orders VALUES ('o-9', 9)", &[]).unwrap();
    let _idle = manager.get_session().unwrap();
    assert_eq!(manager.active_sessions(), 2);

    let report = manager.close_worker();

    assert_eq!(manager.active_sessions(), 0);
    assert_eq!(report.sessions_closed, 2);
    assert_eq!(report.engines_disposed, 1);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].contains("failing://audit"));
    assert!(engines.iter().all(|e| e.is_disposed()));
    assert!(open.is_closed());
    assert!(!manager.is_worker_initialized());

    // The worker rebuilds on the next request; the forced close rolled back.
    assert_eq!(order_count(&manager), 0);
}

#[test]
fn test_default_manager_is_constructed_once() {
    reset_default_manager();
    let barrier = Arc::new(Barrier::new(16));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                default_manager().unwrap()
            })
        })
        .collect();
    let managers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(managers.iter().all(|m| Arc::ptr_eq(m, &managers[0])));

    let dir = tempfile::tempdir().unwrap();
    let replacement = Arc::new(manager(&dir));
    let previous = set_default_manager(Arc::clone(&replacement)).unwrap();
    assert!(Arc::ptr_eq(&previous, &managers[0]));
    assert!(Arc::ptr_eq(&default_manager().unwrap(), &replacement));
    reset_default_manager();
}

#[tokio::test]
async fn test_async_scope_commits_and_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&dir);

    manager
        .get_async_db(true, |s| {
            Box::pin(async move {
                s.execute("CREATE TABLE orders (id TEXT PRIMARY KEY, total INTEGER)", &[])
                    .await?;
                s.execute("INSERT INTO orders VALUES (?, ?)", &["o-1".into(), 1i64.into()])
                    .await?;
                Ok::<_, Error>(())
            })
        })
        .await
        .unwrap();

    let err = manager
        .get_async_db(true, |s| {
            Box::pin(async move {
                s.execute("INSERT INTO orders VALUES (?, ?)", &["o-2".into(), 2i64.into()])
                    .await?;
                Err::<(), _>(AppError::Rejected)
            })
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Rejected));

    let ids = manager
        .get_async_db(true, |s| {
            Box::pin(async move { s.query("SELECT id FROM orders ORDER BY id", &[]).await })
        })
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);
    assert_eq!(ids[0].get_str("id"), Some("o-1"));
    assert_eq!(manager.active_sessions(), 0);

    let _leaked = manager.get_async_session().await.unwrap();
    let report = manager.dispose_all().await;
    assert_eq!(report.sessions_closed, 1);
    assert_eq!(report.engines_disposed, 2);
    assert!(report.is_clean());
    assert_eq!(manager.active_sessions(), 0);
}

fn registry() -> ModelRegistry {
    let role = Declaration::builder("Role")
        .mixin(BuiltinMixin::Identity)
        .field(FieldDef::new("label", FieldType::scalar(ScalarType::String)))
        .system()
        .seed(json!({ "id": "admin", "label": "Administrator" }).as_object().cloned().unwrap())
        .seed(json!({ "id": "viewer", "label": "Viewer" }).as_object().cloned().unwrap())
        .build();
    let member = Declaration::builder("Member")
        .mixin(BuiltinMixin::Identity)
        .mixin(BuiltinMixin::Audit)
        .field(FieldDef::new("role_id", FieldType::reference("Role")))
        .field(FieldDef::optional("tags", FieldType::Map))
        .build();

    let registry = ModelRegistry::new("app");
    registry.bind_all([&member, &role]).unwrap();
    registry.commit(Vec::<String>::new()).unwrap();
    registry.synthesize_all().unwrap();
    registry
}

#[test]
fn test_bootstrap_creates_and_seeds_once() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&dir);
    let registry = registry();
    let catalog = registry.catalog();

    let (created, seeded) = manager
        .get_db(true, |s| {
            let created = bootstrap::create_all(s, catalog, &Scope::All)?;
            let seeded = bootstrap::seed(s, catalog, &Scope::All)?;
            Ok::<_, Error>((created, seeded))
        })
        .unwrap();
    assert_eq!(created, vec!["members", "roles"]);
    assert_eq!(seeded, 2);

    let (created, seeded) = manager
        .get_db(true, |s| {
            let created = bootstrap::create_all(s, catalog, &Scope::All)?;
            let seeded = bootstrap::seed(s, catalog, &Scope::All)?;
            Ok::<_, Error>((created, seeded))
        })
        .unwrap();
    assert!(created.is_empty());
    assert_eq!(seeded, 0);

    manager
        .get_db(true, |s| {
            s.execute(
                "INSERT INTO members (id, role_id, tags) VALUES (?1, ?2, ?3)",
                &["m-1".into(), "admin".into(), Value::Json(json!({"vip": true}))],
            )
        })
        .unwrap();

    let err = manager
        .get_db(true, |s| {
            s.execute(
                "INSERT INTO members (id, role_id) VALUES (?1, ?2)",
                &["m-2".into(), "ghost".into()],
            )
        })
        .unwrap_err();
    assert!(matches!(err, Error::Sqlite(_)));

    let rows = manager
        .get_db(true, |s| {
            s.query(
                "SELECT m.id, r.label FROM members m JOIN roles r ON r.id = m.role_id WHERE r.label REGEXP '^Admin'",
                &[],
            )
        })
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_str("label"), Some("Administrator"));
}

#[test]
fn test_seed_rows_without_id_get_stable_ids() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&dir);

    let tag = Declaration::builder("Tag")
        .mixin(BuiltinMixin::Identity)
        .field(FieldDef::new("label", FieldType::scalar(ScalarType::String)))
        .seed(json!({ "label": "urgent" }).as_object().cloned().unwrap())
        .build();
    let registry = ModelRegistry::new("tags");
    registry.bind(&tag).unwrap();
    registry.commit(Vec::<String>::new()).unwrap();
    registry.synthesize_all().unwrap();
    let catalog = registry.catalog();

    for expected in [1, 0] {
        let seeded = manager
            .get_db(true, |s| {
                bootstrap::create_all(s, catalog, &Scope::All)?;
                bootstrap::seed(s, catalog, &Scope::All)
            })
            .unwrap();
        assert_eq!(seeded, expected);
    }

    let rows = manager
        .get_db(true, |s| s.query("SELECT id, label FROM tags", &[]))
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_str("label"), Some("urgent"));
    assert_eq!(rows[0].get_str("id").map(str::len), Some(36));
}
