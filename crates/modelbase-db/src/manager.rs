//! The database manager.
//!
//! The manager splits engine configuration from engine construction. The
//! parent process computes the configuration once with
//! [`DatabaseManager::init_engine_config`]; each worker builds its own
//! engine lazily on the first session request ([`DatabaseManager::init_worker`]).
//!
//! ```text
//! Unconfigured -> Configured -> WorkerInitialized -> Closed
//!                      ^               |
//!                      +- close_worker +
//! ```

use crate::async_session::{AsyncPool, AsyncSession};
use crate::config::{DatabaseInfo, DatabaseSettings};
use crate::engine::{Engine, EngineConfig};
use crate::error::{Error, Result};
use crate::session::{Session, SessionTracker};
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Lifecycle phase of a [`DatabaseManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerPhase {
    /// No configuration computed yet.
    Unconfigured,
    /// Engine parameters computed; no engine built in this worker.
    Configured,
    /// Engines and session factories built.
    WorkerInitialized,
    /// Closed for good.
    Closed,
}

/// Outcome of a cleanup pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    /// Tracked sessions that were force-closed.
    pub sessions_closed: usize,
    /// Engines and async pools disposed.
    pub engines_disposed: usize,
    /// Logged failures, one message each.
    pub failures: Vec<String>,
}

impl CleanupReport {
    /// Whether every step succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct Worker {
    engine: Arc<dyn Engine>,
    extra: Vec<(String, Arc<dyn Engine>)>,
    async_pool: Option<AsyncPool>,
}

impl Worker {
    fn engines(&self) -> impl Iterator<Item = &Arc<dyn Engine>> {
        std::iter::once(&self.engine).chain(self.extra.iter().map(|(_, e)| e))
    }
}

struct ManagerState {
    phase: ManagerPhase,
    config: Option<EngineConfig>,
    worker: Option<Worker>,
}

/// Thread-safe engine and session factory.
pub struct DatabaseManager {
    settings: DatabaseSettings,
    state: RwLock<ManagerState>,
    tracker: Arc<SessionTracker>,
    init_lock: Mutex<()>,
}

impl DatabaseManager {
    /// Create an unconfigured manager.
    pub fn new(settings: DatabaseSettings) -> Self {
        Self {
            settings,
            state: RwLock::new(ManagerState {
                phase: ManagerPhase::Unconfigured,
                config: None,
                worker: None,
            }),
            tracker: Arc::new(SessionTracker::new()),
            init_lock: Mutex::new(()),
        }
    }

    /// Create an unconfigured manager from environment settings.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(DatabaseSettings::from_env()?))
    }

    /// Settings the manager was created with.
    pub fn settings(&self) -> &DatabaseSettings {
        &self.settings
    }

    /// Current phase.
    pub fn phase(&self) -> ManagerPhase {
        self.state.read().phase
    }

    /// Whether this worker has built its engines.
    pub fn is_worker_initialized(&self) -> bool {
        self.phase() == ManagerPhase::WorkerInitialized
    }

    /// Computed database info, once configured.
    pub fn database_info(&self) -> Option<DatabaseInfo> {
        self.state.read().config.as_ref().map(|c| c.info.clone())
    }

    /// Compute the engine configuration, namespacing the database with `prefix`.
    ///
    /// Calling again with the same prefix returns the stored info. A
    /// different prefix is a configuration error. With `test_connection`
    /// a throwaway connection is opened and closed.
    pub fn init_engine_config(
        &self,
        prefix: Option<&str>,
        test_connection: bool,
    ) -> Result<DatabaseInfo> {
        let prefix = prefix.map(str::trim).filter(|p| !p.is_empty());
        let _init = self.init_lock.lock();

        {
            let state = self.state.read();
            if state.phase == ManagerPhase::Closed {
                return Err(Error::ManagerClosed);
            }
            if let Some(config) = &state.config {
                return if config.prefix.as_deref() == prefix {
                    Ok(config.info.clone())
                } else {
                    Err(Error::Config(format!(
                        "engine already configured for {} with prefix {:?}; refusing prefix {:?}",
                        config.info.name, config.prefix, prefix
                    )))
                };
            }
        }

        let config = self.engine_config(prefix);
        if test_connection {
            config.test_connection()?;
        }

        let info = config.info.clone();
        let mut state = self.state.write();
        state.config = Some(config);
        state.phase = ManagerPhase::Configured;
        info!(engine = %info.engine, database = %info, "Engine configured");
        Ok(info)
    }

    fn engine_config(&self, prefix: Option<&str>) -> EngineConfig {
        EngineConfig {
            info: self.settings.database_info(prefix),
            prefix: prefix.map(str::to_string),
            lock_timeout: self.settings.lock_timeout,
            max_connections: self.settings.max_connections,
        }
    }

    /// A fresh manager for a worker, sharing this manager's configuration
    /// and tracked session set.
    ///
    /// The worker has its own engines and builds them on first use. Cleanup
    /// on either manager force-closes sessions opened through both.
    pub fn for_worker(&self) -> Result<Self> {
        let state = self.state.read();
        if state.phase == ManagerPhase::Closed {
            return Err(Error::ManagerClosed);
        }
        let config = state.config.clone().ok_or(Error::NotConfigured)?;
        let mut worker = Self::new(self.settings.clone());
        worker.tracker = Arc::clone(&self.tracker);
        {
            let mut worker_state = worker.state.write();
            worker_state.config = Some(config);
            worker_state.phase = ManagerPhase::Configured;
        }
        Ok(worker)
    }

    /// Build this worker's engine from the stored configuration.
    ///
    /// Runs at most once; concurrent callers wait for the first. An
    /// unconfigured manager configures itself without a prefix. The async
    /// pool is built here when called inside a tokio runtime, otherwise on
    /// the first async session request.
    pub fn init_worker(&self) -> Result<()> {
        match self.phase() {
            ManagerPhase::WorkerInitialized => return Ok(()),
            ManagerPhase::Closed => return Err(Error::ManagerClosed),
            ManagerPhase::Unconfigured | ManagerPhase::Configured => {}
        }

        let _init = self.init_lock.lock();
        let config = {
            let mut state = self.state.write();
            match state.phase {
                ManagerPhase::WorkerInitialized => return Ok(()),
                ManagerPhase::Closed => return Err(Error::ManagerClosed),
                ManagerPhase::Unconfigured | ManagerPhase::Configured => {}
            }
            if let Some(config) = state.config.clone() {
                config
            } else {
                let config = self.engine_config(None);
                info!(database = %config.info, "Engine configured on first use");
                state.config = Some(config.clone());
                state.phase = ManagerPhase::Configured;
                config
            }
        };

        let engine = config.build()?;
        let async_pool = match Handle::try_current() {
            Ok(_) => Some(AsyncPool::connect_lazy(&config)?),
            Err(_) => None,
        };

        let mut state = self.state.write();
        state.worker = Some(Worker {
            engine,
            extra: Vec::new(),
            async_pool,
        });
        state.phase = ManagerPhase::WorkerInitialized;
        info!(database = %config.info, "Worker initialized");
        Ok(())
    }

    /// The primary engine, building it if needed.
    pub fn engine(&self) -> Result<Arc<dyn Engine>> {
        self.init_worker()?;
        let state = self.state.read();
        let worker = state.worker.as_ref().ok_or(Error::NotConfigured)?;
        Ok(Arc::clone(&worker.engine))
    }

    /// Add an engine that cleanup disposes along with the primary one.
    pub fn register_engine(&self, name: impl Into<String>, engine: Arc<dyn Engine>) -> Result<()> {
        self.init_worker()?;
        let name = name.into();
        let mut state = self.state.write();
        let worker = state.worker.as_mut().ok_or(Error::NotConfigured)?;
        debug!(name = %name, engine = %engine.label(), "Registered engine");
        worker.extra.push((name, engine));
        Ok(())
    }

    /// Every engine of this worker, primary first.
    pub fn engines(&self) -> Vec<Arc<dyn Engine>> {
        let state = self.state.read();
        state
            .worker
            .as_ref()
            .map(|w| w.engines().cloned().collect())
            .unwrap_or_default()
    }

    /// A registered engine by name.
    pub fn named_engine(&self, name: &str) -> Option<Arc<dyn Engine>> {
        let state = self.state.read();
        state
            .worker
            .as_ref()
            .and_then(|w| w.extra.iter().find(|(n, _)| n == name))
            .map(|(_, e)| Arc::clone(e))
    }

    /// Number of live tracked sessions.
    pub fn active_sessions(&self) -> usize {
        self.tracker.active()
    }

    /// Open a session with manual lifecycle.
    ///
    /// The session is tracked until it is closed or dropped.
    pub fn get_session(&self) -> Result<Session> {
        let engine = self.engine()?;
        let connection = engine.connect()?;
        Ok(Session::new(
            connection,
            engine.dialect(),
            Arc::clone(&self.tracker),
        ))
    }

    /// Run `body` in a scoped session.
    ///
    /// On success the session commits when `auto_commit` is set. On error it
    /// rolls back and the body's error is returned unchanged. The session is
    /// closed and untracked either way.
    pub fn get_db<T, E, F>(&self, auto_commit: bool, body: F) -> std::result::Result<T, E>
    where
        E: From<Error>,
        F: FnOnce(&mut Session) -> std::result::Result<T, E>,
    {
        let mut session = self.get_session()?;
        let outcome = match body(&mut session) {
            Ok(value) if auto_commit => session.commit().map(|()| value).map_err(E::from),
            Ok(value) => Ok(value),
            Err(err) => {
                if let Err(e) = session.rollback() {
                    warn!(session = session.id(), error = %e, "Rollback failed");
                }
                Err(err)
            }
        };
        if let Err(e) = session.close() {
            warn!(session = session.id(), error = %e, "Failed to close session");
        }
        outcome
    }

    fn async_pool(&self) -> Result<AsyncPool> {
        self.init_worker()?;
        if let Some(pool) = self
            .state
            .read()
            .worker
            .as_ref()
            .and_then(|w| w.async_pool.clone())
        {
            return Ok(pool);
        }

        let _init = self.init_lock.lock();
        let mut state = self.state.write();
        let config = state.config.clone().ok_or(Error::NotConfigured)?;
        let worker = state.worker.as_mut().ok_or(Error::NotConfigured)?;
        if let Some(pool) = &worker.async_pool {
            return Ok(pool.clone());
        }
        let pool = AsyncPool::connect_lazy(&config)?;
        worker.async_pool = Some(pool.clone());
        debug!(database = %config.info, "Async pool created");
        Ok(pool)
    }

    /// Open an async session with manual lifecycle.
    pub async fn get_async_session(&self) -> Result<AsyncSession> {
        let pool = self.async_pool()?;
        Ok(AsyncSession::new(
            pool,
            Handle::current(),
            Arc::clone(&self.tracker),
        ))
    }

    /// Run `body` in a scoped async session, with [`get_db`](Self::get_db) semantics.
    pub async fn get_async_db<T, E, F>(&self, auto_commit: bool, body: F) -> std::result::Result<T, E>
    where
        E: From<Error>,
        F: for<'s> FnOnce(&'s mut AsyncSession) -> BoxFuture<'s, std::result::Result<T, E>>,
    {
        let mut session = self.get_async_session().await?;
        let outcome = match body(&mut session).await {
            Ok(value) if auto_commit => session.commit().await.map(|()| value).map_err(E::from),
            Ok(value) => Ok(value),
            Err(err) => {
                if let Err(e) = session.rollback().await {
                    warn!(session = session.id(), error = %e, "Rollback failed");
                }
                Err(err)
            }
        };
        if let Err(e) = session.close().await {
            warn!(session = session.id(), error = %e, "Failed to close session");
        }
        outcome
    }

    fn take_worker(&self) -> Option<Worker> {
        let mut state = self.state.write();
        if state.phase == ManagerPhase::WorkerInitialized {
            state.phase = ManagerPhase::Configured;
        }
        state.worker.take()
    }

    fn release(&self, worker: Option<Worker>, mut report: CleanupReport) -> CleanupReport {
        let sessions = self.tracker.close_all();
        report.sessions_closed += sessions.closed;
        report.failures.extend(sessions.failures);

        if let Some(worker) = worker {
            for engine in worker.engines() {
                match engine.dispose() {
                    Ok(()) => report.engines_disposed += 1,
                    Err(e) => {
                        warn!(engine = %engine.label(), error = %e, "Failed to dispose engine");
                        report.failures.push(format!("engine {}: {e}", engine.label()));
                    }
                }
            }
            if let Some(pool) = worker.async_pool {
                if !pool.is_closed() {
                    if let Ok(handle) = Handle::try_current() {
                        handle.spawn(async move { pool.close().await });
                    }
                    report.engines_disposed += 1;
                }
            }
        }

        info!(
            sessions_closed = report.sessions_closed,
            engines_disposed = report.engines_disposed,
            failures = report.failures.len(),
            "Worker resources released"
        );
        report
    }

    /// Close every tracked session and dispose every engine.
    ///
    /// Failures are logged and reported, never raised. The manager returns to
    /// [`ManagerPhase::Configured`] and rebuilds on the next session request.
    pub fn close_worker(&self) -> CleanupReport {
        let worker = self.take_worker();
        self.release(worker, CleanupReport::default())
    }

    /// Like [`close_worker`](Self::close_worker), awaiting the async pool's
    /// shutdown for at most the lock timeout.
    pub async fn dispose_all(&self) -> CleanupReport {
        let mut worker = self.take_worker();
        let mut report = CleanupReport::default();

        let pool = worker.as_mut().and_then(|w| w.async_pool.take());
        if let Some(pool) = pool {
            let sessions = self.tracker.close_all();
            report.sessions_closed += sessions.closed;
            report.failures.extend(sessions.failures);

            match tokio::time::timeout(self.settings.lock_timeout, pool.close()).await {
                Ok(()) => report.engines_disposed += 1,
                Err(_) => {
                    warn!("Timed out closing async pool");
                    report.failures.push("async pool: close timed out".to_string());
                }
            }
        }
        self.release(worker, report)
    }

    /// Release everything and refuse further use.
    pub fn close(&self) -> CleanupReport {
        let report = self.close_worker();
        self.state.write().phase = ManagerPhase::Closed;
        info!("Database manager closed");
        report
    }
}

impl fmt::Debug for DatabaseManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("DatabaseManager")
            .field("phase", &state.phase)
            .field("database", &state.config.as_ref().map(|c| c.info.to_string()))
            .field("tracker", &self.tracker)
            .finish()
    }
}

impl Drop for DatabaseManager {
    fn drop(&mut self) {
        if self.state.get_mut().worker.is_some() {
            self.close_worker();
        }
    }
}

static DEFAULT: RwLock<Option<Arc<DatabaseManager>>> = parking_lot::const_rwlock(None);
static DEFAULT_INIT: Mutex<()> = parking_lot::const_mutex(());

/// The process-wide manager, created from the environment on first use.
///
/// Concurrent first calls construct exactly one manager.
pub fn default_manager() -> Result<Arc<DatabaseManager>> {
    if let Some(manager) = DEFAULT.read().as_ref() {
        return Ok(Arc::clone(manager));
    }
    let _init = DEFAULT_INIT.lock();
    if let Some(manager) = DEFAULT.read().as_ref() {
        return Ok(Arc::clone(manager));
    }
    let manager = Arc::new(DatabaseManager::from_env()?);
    *DEFAULT.write() = Some(Arc::clone(&manager));
    Ok(manager)
}

/// Install `manager` as the process-wide manager, returning the previous one.
pub fn set_default_manager(manager: Arc<DatabaseManager>) -> Option<Arc<DatabaseManager>> {
    let _init = DEFAULT_INIT.lock();
    DEFAULT.write().replace(manager)
}

/// Remove the process-wide manager, returning it.
pub fn reset_default_manager() -> Option<Arc<DatabaseManager>> {
    let _init = DEFAULT_INIT.lock();
    DEFAULT.write().take()
}
