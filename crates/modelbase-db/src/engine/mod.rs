//! Storage engines and their blocking connections.
//!
//! An [`Engine`] is created once per worker from an [`EngineConfig`] and
//! hands out [`Connection`]s. Disposing an engine releases its pooled
//! resources; a disposed engine refuses to connect.

pub(crate) mod postgres;
mod sqlite;

pub use postgres::PostgresEngine;
pub use sqlite::{register_regexp, SqliteEngine};

use crate::config::{DatabaseInfo, DatabaseLocation};
use crate::error::{Error, Result};
use crate::value::{Row, Value};
use modelbase_core::Dialect;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// A blocking connection to one database.
pub trait Connection: Send {
    /// Run a statement, returning the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Run a query and collect its rows.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Run several statements without parameters.
    fn execute_batch(&mut self, sql: &str) -> Result<()>;

    /// Start a transaction.
    fn begin(&mut self) -> Result<()> {
        self.execute_batch("BEGIN")
    }

    /// Commit the open transaction.
    fn commit(&mut self) -> Result<()> {
        self.execute_batch("COMMIT")
    }

    /// Roll back the open transaction.
    fn rollback(&mut self) -> Result<()> {
        self.execute_batch("ROLLBACK")
    }
}

/// A storage engine.
pub trait Engine: Send + Sync + Debug {
    /// SQL dialect spoken by the engine.
    fn dialect(&self) -> Dialect;

    /// Human readable target, without secrets.
    fn label(&self) -> String;

    /// Open a connection.
    fn connect(&self) -> Result<Box<dyn Connection>>;

    /// Release pooled resources. Idempotent.
    fn dispose(&self) -> Result<()>;

    /// Whether [`Engine::dispose`] has run.
    fn is_disposed(&self) -> bool;
}

/// Computed engine configuration, fixed by the parent process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Target database.
    pub info: DatabaseInfo,
    /// Name prefix applied to the database, if any.
    pub prefix: Option<String>,
    /// How long a contended writer waits for a lock.
    pub lock_timeout: Duration,
    /// Pool size.
    pub max_connections: u32,
}

impl EngineConfig {
    /// Create the engine described by this configuration.
    pub fn build(&self) -> Result<Arc<dyn Engine>> {
        match &self.info.location {
            DatabaseLocation::File(path) => {
                Ok(Arc::new(SqliteEngine::new(path.clone(), self.lock_timeout)))
            }
            DatabaseLocation::Server { .. } => Ok(Arc::new(PostgresEngine::new(self)?)),
        }
    }

    /// Open one connection and run a trivial query.
    pub fn test_connection(&self) -> Result<()> {
        let engine = self.build()?;
        let outcome = engine
            .connect()
            .and_then(|mut conn| conn.query("SELECT 1", &[]).map(|_| ()));
        let disposed = engine.dispose();
        outcome.and(disposed)
    }
}

pub(crate) fn disposed_error(engine: &dyn Engine) -> Error {
    Error::EngineDisposed(engine.label())
}
