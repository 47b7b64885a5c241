//! Async sessions over sqlx pools.
//!
//! An [`AsyncSession`] mirrors [`Session`](crate::Session): the first
//! statement opens a transaction, commit and rollback end it, and the
//! session is tracked for forced cleanup.

use crate::config::DatabaseLocation;
use crate::engine::postgres::lazy_pool;
use crate::engine::EngineConfig;
use crate::error::{Error, Result};
use crate::rows::{bind_values, pg_row, sqlite_row};
use crate::session::{next_session_id, SessionTracker, TrackedSession};
use crate::value::{Row, Value};
use modelbase_core::Dialect;
use parking_lot::Mutex;
use sqlx::postgres::PgPool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Postgres, Sqlite, Transaction};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;

/// An async connection pool.
#[derive(Debug, Clone)]
pub enum AsyncPool {
    /// SQLite pool.
    Sqlite(SqlitePool),
    /// PostgreSQL pool.
    Postgres(PgPool),
}

impl AsyncPool {
    /// Build a lazily connecting pool. Must run inside a tokio context.
    pub fn connect_lazy(config: &EngineConfig) -> Result<Self> {
        match &config.info.location {
            DatabaseLocation::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .busy_timeout(config.lock_timeout)
                    .foreign_keys(true)
                    .pragma("cache_size", "-64000")
                    .with_regexp();
                let pool = SqlitePoolOptions::new()
                    .max_connections(config.max_connections)
                    .acquire_timeout(config.lock_timeout)
                    .connect_lazy_with(options);
                Ok(AsyncPool::Sqlite(pool))
            }
            DatabaseLocation::Server { .. } => Ok(AsyncPool::Postgres(lazy_pool(config)?)),
        }
    }

    /// SQL dialect of the pool.
    pub fn dialect(&self) -> Dialect {
        match self {
            AsyncPool::Sqlite(_) => Dialect::Sqlite,
            AsyncPool::Postgres(_) => Dialect::Postgres,
        }
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        match self {
            AsyncPool::Sqlite(pool) => pool.close().await,
            AsyncPool::Postgres(pool) => pool.close().await,
        }
    }

    /// Whether [`AsyncPool::close`] has been called.
    pub fn is_closed(&self) -> bool {
        match self {
            AsyncPool::Sqlite(pool) => pool.is_closed(),
            AsyncPool::Postgres(pool) => pool.is_closed(),
        }
    }

    async fn begin(&self) -> Result<AsyncTx> {
        Ok(match self {
            AsyncPool::Sqlite(pool) => AsyncTx::Sqlite(pool.begin().await?),
            AsyncPool::Postgres(pool) => AsyncTx::Postgres(pool.begin().await?),
        })
    }
}

enum AsyncTx {
    Sqlite(Transaction<'static, Sqlite>),
    Postgres(Transaction<'static, Postgres>),
}

impl AsyncTx {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let done = match self {
            AsyncTx::Sqlite(tx) => bind_values!(sqlx::query(sql), params)
                .execute(&mut **tx)
                .await?
                .rows_affected(),
            AsyncTx::Postgres(tx) => bind_values!(sqlx::query(sql), params)
                .execute(&mut **tx)
                .await?
                .rows_affected(),
        };
        Ok(done)
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        match self {
            AsyncTx::Sqlite(tx) => bind_values!(sqlx::query(sql), params)
                .fetch_all(&mut **tx)
                .await?
                .iter()
                .map(sqlite_row)
                .collect(),
            AsyncTx::Postgres(tx) => bind_values!(sqlx::query(sql), params)
                .fetch_all(&mut **tx)
                .await?
                .iter()
                .map(pg_row)
                .collect(),
        }
    }

    async fn commit(self) -> Result<()> {
        match self {
            AsyncTx::Sqlite(tx) => tx.commit().await?,
            AsyncTx::Postgres(tx) => tx.commit().await?,
        }
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        match self {
            AsyncTx::Sqlite(tx) => tx.rollback().await?,
            AsyncTx::Postgres(tx) => tx.rollback().await?,
        }
        Ok(())
    }
}

struct AsyncSessionState {
    id: u64,
    handle: Handle,
    tx: Mutex<Option<AsyncTx>>,
    closed: AtomicBool,
}

impl AsyncSessionState {
    /// Drop the transaction on the session's runtime; sqlx rolls it back.
    fn discard(&self) {
        let tx = self.tx.lock().take();
        if let Some(tx) = tx {
            let _guard = self.handle.enter();
            drop(tx);
        }
    }
}

impl TrackedSession for AsyncSessionState {
    fn force_close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.discard();
        Ok(())
    }
}

/// A unit of work on one pooled async connection.
pub struct AsyncSession {
    state: Arc<AsyncSessionState>,
    pool: AsyncPool,
    tracker: Arc<SessionTracker>,
}

impl AsyncSession {
    pub(crate) fn new(pool: AsyncPool, handle: Handle, tracker: Arc<SessionTracker>) -> Self {
        let state = Arc::new(AsyncSessionState {
            id: next_session_id(),
            handle,
            tx: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        tracker.track(state.id, &state);
        tracing::trace!(session = state.id, "Opened async session");
        Self {
            state,
            pool,
            tracker,
        }
    }

    /// Session id, unique within the process.
    pub fn id(&self) -> u64 {
        self.state.id
    }

    /// Dialect of the underlying pool.
    pub fn dialect(&self) -> Dialect {
        self.pool.dialect()
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.state.tx.lock().is_some()
    }

    /// Whether the session was closed.
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::SessionClosed(self.state.id))
        } else {
            Ok(())
        }
    }

    async fn take_or_begin(&self) -> Result<AsyncTx> {
        self.check_open()?;
        let open = self.state.tx.lock().take();
        match open {
            Some(tx) => Ok(tx),
            None => self.pool.begin().await,
        }
    }

    fn put_back(&self, tx: AsyncTx) -> Result<()> {
        let mut slot = self.state.tx.lock();
        if self.is_closed() {
            drop(slot);
            let _guard = self.state.handle.enter();
            drop(tx);
            return Err(Error::SessionClosed(self.state.id));
        }
        *slot = Some(tx);
        Ok(())
    }

    /// Open a transaction if none is open.
    pub async fn begin(&mut self) -> Result<()> {
        let tx = self.take_or_begin().await?;
        self.put_back(tx)
    }

    /// Run a statement, returning the number of affected rows.
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut tx = self.take_or_begin().await?;
        let result = tx.execute(sql, params).await;
        self.put_back(tx)?;
        result
    }

    /// Run a query and collect its rows.
    pub async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut tx = self.take_or_begin().await?;
        let result = tx.query(sql, params).await;
        self.put_back(tx)?;
        result
    }

    /// Commit the open transaction, if any.
    pub async fn commit(&mut self) -> Result<()> {
        self.check_open()?;
        let open = self.state.tx.lock().take();
        match open {
            Some(tx) => tx.commit().await,
            None => Ok(()),
        }
    }

    /// Roll back the open transaction, if any.
    pub async fn rollback(&mut self) -> Result<()> {
        self.check_open()?;
        let open = self.state.tx.lock().take();
        match open {
            Some(tx) => tx.rollback().await,
            None => Ok(()),
        }
    }

    /// Roll back any open transaction, release the connection and stop tracking.
    pub async fn close(&mut self) -> Result<()> {
        self.state.closed.store(true, Ordering::SeqCst);
        let open = self.state.tx.lock().take();
        self.tracker.untrack(self.state.id);
        match open {
            Some(tx) => tx.rollback().await,
            None => Ok(()),
        }
    }
}

impl Drop for AsyncSession {
    fn drop(&mut self) {
        self.state.closed.store(true, Ordering::SeqCst);
        self.state.discard();
        self.tracker.untrack(self.state.id);
    }
}

impl fmt::Debug for AsyncSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncSession")
            .field("id", &self.state.id)
            .field("dialect", &self.dialect())
            .field("closed", &self.is_closed())
            .finish()
    }
}
