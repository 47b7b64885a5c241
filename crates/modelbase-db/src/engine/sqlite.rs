//! Embedded SQLite engine.

use super::{disposed_error, Connection, Engine};
use crate::error::Result;
use crate::value::{Row, Value};
use modelbase_core::Dialect;
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection as RusqliteConnection};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Pragmas applied to every new connection.
const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON;
PRAGMA journal_mode = WAL;
PRAGMA cache_size = -64000;";

/// SQLite file engine. Each connection opens the file anew.
#[derive(Debug)]
pub struct SqliteEngine {
    path: PathBuf,
    lock_timeout: Duration,
    disposed: AtomicBool,
}

impl SqliteEngine {
    /// Create an engine for the database file at `path`.
    pub fn new(path: PathBuf, lock_timeout: Duration) -> Self {
        Self {
            path,
            lock_timeout,
            disposed: AtomicBool::new(false),
        }
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<RusqliteConnection> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = RusqliteConnection::open(&self.path)?;
        conn.busy_timeout(self.lock_timeout)?;
        conn.execute_batch(CONNECTION_PRAGMAS)?;
        register_regexp(&conn)?;
        Ok(conn)
    }
}

impl Engine for SqliteEngine {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn label(&self) -> String {
        format!("sqlite://{}", self.path.display())
    }

    fn connect(&self) -> Result<Box<dyn Connection>> {
        if self.is_disposed() {
            return Err(disposed_error(self));
        }
        let conn = self.open()?;
        tracing::trace!(path = %self.path.display(), "Opened sqlite connection");
        Ok(Box::new(SqliteConnection { conn }))
    }

    fn dispose(&self) -> Result<()> {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            tracing::debug!(path = %self.path.display(), "Disposed sqlite engine");
        }
        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// Register a `REGEXP` function so `text REGEXP pattern` works.
///
/// Compiled patterns are cached per statement. A null subject never matches.
pub fn register_regexp(conn: &RusqliteConnection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let regex: Arc<Regex> = ctx.get_or_create_aux(0, |pattern| -> std::result::Result<_, BoxError> {
                Ok(Regex::new(pattern.as_str()?)?)
            })?;
            match ctx.get_raw(1) {
                ValueRef::Null => Ok(false),
                subject => {
                    let text = subject
                        .as_str()
                        .map_err(|e| rusqlite::Error::UserFunctionError(e.into()))?;
                    Ok(regex.is_match(text))
                }
            }
        },
    )
}

struct SqliteConnection {
    conn: RusqliteConnection,
}

impl Connection for SqliteConnection {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let changed = self.conn.execute(sql, params_from_iter(params.iter()))?;
        Ok(changed as u64)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let values = (0..columns.len())
                .map(|i| row.get_ref(i).map(Value::from))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            out.push(Row::new(columns.clone(), values));
        }
        Ok(out)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}
