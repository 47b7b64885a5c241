//! Networked PostgreSQL engine.
//!
//! sqlx is async; the blocking engine owns a small tokio runtime and drives
//! pooled connections on it. Blocking sessions cannot be used from inside
//! another runtime; async callers use the manager's async sessions instead.

use super::{Connection, Engine, EngineConfig};
use crate::config::DatabaseLocation;
use crate::error::{Error, Result};
use crate::rows::{bind_values, pg_row};
use crate::value::{Row, Value};
use modelbase_core::Dialect;
use parking_lot::Mutex;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPool, PgPoolOptions};
use sqlx::Postgres;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::{Handle, Runtime};

/// Build connect options for a server location.
pub(crate) fn connect_options(config: &EngineConfig) -> Result<PgConnectOptions> {
    let DatabaseLocation::Server {
        host,
        port,
        user,
        password,
    } = &config.info.location
    else {
        return Err(Error::Config(format!(
            "{} is not a server database",
            config.info
        )));
    };

    let mut options = PgConnectOptions::new()
        .host(host)
        .port(*port)
        .database(&config.info.name)
        .options([(
            "lock_timeout",
            format!("{}ms", config.lock_timeout.as_millis()),
        )]);
    if let Some(user) = user {
        options = options.username(user);
    }
    if let Some(password) = password {
        options = options.password(password);
    }
    Ok(options)
}

/// Build a lazily connecting pool. Must run inside a tokio context.
pub(crate) fn lazy_pool(config: &EngineConfig) -> Result<PgPool> {
    Ok(PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.lock_timeout)
        .connect_lazy_with(connect_options(config)?))
}

struct Shared {
    label: String,
    handle: Handle,
    pool: PgPool,
    disposed: AtomicBool,
}

impl Shared {
    fn check(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::EngineDisposed(self.label.clone()));
        }
        if Handle::try_current().is_ok() {
            return Err(Error::Unsupported(
                "blocking postgres sessions cannot run inside an async runtime; use an async session"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// PostgreSQL engine backed by a sqlx pool on a private runtime.
pub struct PostgresEngine {
    shared: Arc<Shared>,
    runtime: Mutex<Option<Runtime>>,
}

impl PostgresEngine {
    /// Create the engine. No connection is made until first use.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("modelbase-pg")
            .enable_all()
            .build()?;
        let pool = {
            let _guard = runtime.enter();
            lazy_pool(config)?
        };
        Ok(Self {
            shared: Arc::new(Shared {
                label: config.info.to_string(),
                handle: runtime.handle().clone(),
                pool,
                disposed: AtomicBool::new(false),
            }),
            runtime: Mutex::new(Some(runtime)),
        })
    }
}

impl fmt::Debug for PostgresEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresEngine")
            .field("label", &self.shared.label)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Engine for PostgresEngine {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn label(&self) -> String {
        self.shared.label.clone()
    }

    fn connect(&self) -> Result<Box<dyn Connection>> {
        self.shared.check()?;
        let conn = self.shared.handle.block_on(self.shared.pool.acquire())?;
        Ok(Box::new(PostgresConnection {
            shared: Arc::clone(&self.shared),
            conn: Some(conn),
        }))
    }

    fn dispose(&self) -> Result<()> {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let runtime = self.runtime.lock().take();
        if let Some(runtime) = runtime {
            if Handle::try_current().is_err() {
                runtime.block_on(self.shared.pool.close());
            }
            runtime.shutdown_background();
        }
        tracing::debug!(engine = %self.shared.label, "Disposed postgres engine");
        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }
}

impl Drop for PostgresEngine {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_background();
        }
    }
}

struct PostgresConnection {
    shared: Arc<Shared>,
    conn: Option<PoolConnection<Postgres>>,
}

impl PostgresConnection {
    fn conn(&mut self) -> Result<&mut PgConnection> {
        self.shared.check()?;
        match self.conn.as_mut() {
            Some(conn) => Ok(&mut **conn),
            None => Err(Error::EngineDisposed(self.shared.label.clone())),
        }
    }
}

impl Drop for PostgresConnection {
    fn drop(&mut self) {
        // Returning a connection to the pool spawns onto the engine runtime.
        if let Some(conn) = self.conn.take() {
            let _guard = self.shared.handle.enter();
            drop(conn);
        }
    }
}

impl Connection for PostgresConnection {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let handle = self.shared.handle.clone();
        let query = bind_values!(sqlx::query(sql), params);
        let done = handle.block_on(query.execute(self.conn()?))?;
        Ok(done.rows_affected())
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let handle = self.shared.handle.clone();
        let query = bind_values!(sqlx::query(sql), params);
        let rows = handle.block_on(query.fetch_all(self.conn()?))?;
        rows.iter().map(pg_row).collect()
    }

    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        let handle = self.shared.handle.clone();
        handle.block_on(sqlx::raw_sql(sql).execute(self.conn()?))?;
        Ok(())
    }
}
