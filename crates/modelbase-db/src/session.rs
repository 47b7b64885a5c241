//! Blocking sessions and the tracked-session set.
//!
//! A [`Session`] owns one engine connection. The first statement opens a
//! transaction; [`Session::commit`] and [`Session::rollback`] end it. Every
//! live session is registered in its manager's [`SessionTracker`] by weak
//! reference so shutdown can force it closed without keeping it alive.

use crate::engine::Connection;
use crate::error::{Error, Result};
use crate::value::{Row, Value};
use modelbase_core::Dialect;
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_session_id() -> u64 {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

/// A session that shutdown can close from another thread.
pub trait TrackedSession: Send + Sync {
    /// Roll back any open transaction and release the connection.
    fn force_close(&self) -> Result<()>;
}

/// Weak set of live sessions.
///
/// Sessions register themselves when created and deregister when closed or
/// dropped. A session closed by [`SessionTracker::close_all`] may deregister
/// from inside the close on the same thread, hence the reentrant lock.
#[derive(Default)]
pub struct SessionTracker {
    sessions: ReentrantMutex<RefCell<HashMap<u64, Weak<dyn TrackedSession>>>>,
}

/// Outcome of closing every tracked session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CloseAllReport {
    /// Sessions closed.
    pub closed: usize,
    /// Failures, one message per session.
    pub failures: Vec<String>,
}

impl SessionTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a session under `id`.
    pub fn track<S: TrackedSession + 'static>(&self, id: u64, session: &Arc<S>) {
        let weak: Weak<dyn TrackedSession> = Arc::downgrade(session) as Weak<dyn TrackedSession>;
        let guard = self.sessions.lock();
        guard.borrow_mut().insert(id, weak);
    }

    /// Stop tracking `id`.
    pub fn untrack(&self, id: u64) {
        let guard = self.sessions.lock();
        guard.borrow_mut().remove(&id);
    }

    /// Number of tracked sessions that are still alive.
    pub fn active(&self) -> usize {
        let guard = self.sessions.lock();
        let map = guard.borrow();
        map.values().filter(|w| w.strong_count() > 0).count()
    }

    /// Force every tracked session closed, emptying the set.
    ///
    /// Failures are collected and logged, never propagated.
    pub fn close_all(&self) -> CloseAllReport {
        let drained: Vec<(u64, Weak<dyn TrackedSession>)> = {
            let guard = self.sessions.lock();
            let mut map = guard.borrow_mut();
            map.drain().collect()
        };

        let mut report = CloseAllReport::default();
        for (id, weak) in drained {
            let Some(session) = weak.upgrade() else {
                continue;
            };
            match session.force_close() {
                Ok(()) => report.closed += 1,
                Err(e) => {
                    tracing::warn!(session = id, error = %e, "Failed to close session");
                    report.failures.push(format!("session {id}: {e}"));
                }
            }
        }
        report
    }
}

impl fmt::Debug for SessionTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTracker")
            .field("active", &self.active())
            .finish()
    }
}

struct SessionState {
    id: u64,
    connection: Mutex<Option<Box<dyn Connection>>>,
    in_transaction: AtomicBool,
}

impl SessionState {
    fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut dyn Connection, &AtomicBool) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.connection.lock();
        let conn = guard.as_mut().ok_or(Error::SessionClosed(self.id))?;
        f(&mut **conn, &self.in_transaction)
    }

    fn close(&self) -> Result<()> {
        let conn = self.connection.lock().take();
        match conn {
            Some(mut conn) if self.in_transaction.swap(false, Ordering::SeqCst) => conn.rollback(),
            _ => Ok(()),
        }
    }
}

impl TrackedSession for SessionState {
    fn force_close(&self) -> Result<()> {
        self.close()
    }
}

/// A unit of work on one blocking connection.
pub struct Session {
    state: Arc<SessionState>,
    dialect: Dialect,
    tracker: Arc<SessionTracker>,
}

impl Session {
    pub(crate) fn new(
        connection: Box<dyn Connection>,
        dialect: Dialect,
        tracker: Arc<SessionTracker>,
    ) -> Self {
        let state = Arc::new(SessionState {
            id: next_session_id(),
            connection: Mutex::new(Some(connection)),
            in_transaction: AtomicBool::new(false),
        });
        tracker.track(state.id, &state);
        tracing::trace!(session = state.id, "Opened session");
        Self {
            state,
            dialect,
            tracker,
        }
    }

    /// Session id, unique within the process.
    pub fn id(&self) -> u64 {
        self.state.id
    }

    /// Dialect of the underlying engine.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.state.in_transaction.load(Ordering::SeqCst)
    }

    /// Whether the session was closed.
    pub fn is_closed(&self) -> bool {
        self.state.connection.lock().is_none()
    }

    /// Open a transaction if none is open.
    pub fn begin(&mut self) -> Result<()> {
        self.state.with_connection(autobegin)
    }

    /// Run a statement, returning the number of affected rows.
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.state.with_connection(|conn, tx| {
            autobegin(conn, tx)?;
            conn.execute(sql, params)
        })
    }

    /// Run a query and collect its rows.
    pub fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.state.with_connection(|conn, tx| {
            autobegin(conn, tx)?;
            conn.query(sql, params)
        })
    }

    /// Run several statements without parameters.
    pub fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.state.with_connection(|conn, tx| {
            autobegin(conn, tx)?;
            conn.execute_batch(sql)
        })
    }

    /// Commit the open transaction, if any.
    pub fn commit(&mut self) -> Result<()> {
        self.state.with_connection(|conn, tx| {
            if tx.load(Ordering::SeqCst) {
                conn.commit()?;
                tx.store(false, Ordering::SeqCst);
            }
            Ok(())
        })
    }

    /// Roll back the open transaction, if any.
    pub fn rollback(&mut self) -> Result<()> {
        self.state.with_connection(|conn, tx| {
            if tx.load(Ordering::SeqCst) {
                conn.rollback()?;
                tx.store(false, Ordering::SeqCst);
            }
            Ok(())
        })
    }

    /// Roll back any open transaction, release the connection and stop tracking.
    pub fn close(&mut self) -> Result<()> {
        let closed = self.state.close();
        self.tracker.untrack(self.state.id);
        closed
    }
}

fn autobegin(conn: &mut dyn Connection, in_transaction: &AtomicBool) -> Result<()> {
    if !in_transaction.load(Ordering::SeqCst) {
        conn.begin()?;
        in_transaction.store(true, Ordering::SeqCst);
    }
    Ok(())
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(session = self.state.id, error = %e, "Failed to close dropped session");
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.state.id)
            .field("dialect", &self.dialect)
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, SqliteEngine};
    use std::time::Duration;

    fn open(dir: &tempfile::TempDir, tracker: &Arc<SessionTracker>) -> Session {
        let engine = SqliteEngine::new(dir.path().join("app.db"), Duration::from_secs(1));
        Session::new(engine.connect().unwrap(), Dialect::Sqlite, Arc::clone(tracker))
    }

    #[test]
    fn test_autobegin_and_commit() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(SessionTracker::new());

        let mut session = open(&dir, &tracker);
        assert!(!session.in_transaction());
        session.execute_batch("CREATE TABLE t (id TEXT)").unwrap();
        session.execute("INSERT INTO t VALUES (?1)", &["a".into()]).unwrap();
        assert!(session.in_transaction());
        session.commit().unwrap();
        assert!(!session.in_transaction());

        let mut reader = open(&dir, &tracker);
        assert_eq!(reader.query("SELECT id FROM t", &[]).unwrap().len(), 1);
    }

    #[test]
    fn test_drop_untracks_and_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(SessionTracker::new());
        {
            let mut setup = open(&dir, &tracker);
            setup.execute_batch("CREATE TABLE t (id TEXT)").unwrap();
            setup.commit().unwrap();
        }
        assert_eq!(tracker.active(), 0);

        {
            let mut session = open(&dir, &tracker);
            session.execute("INSERT INTO t VALUES ('x')", &[]).unwrap();
            assert_eq!(tracker.active(), 1);
        }
        assert_eq!(tracker.active(), 0);

        let mut reader = open(&dir, &tracker);
        assert!(reader.query("SELECT id FROM t", &[]).unwrap().is_empty());
    }

    #[test]
    fn test_close_all_closes_live_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(SessionTracker::new());
        let mut a = open(&dir, &tracker);
        let b = open(&dir, &tracker);

        let report = tracker.close_all();
        assert_eq!(report.closed, 2);
        assert!(report.failures.is_empty());
        assert_eq!(tracker.active(), 0);

        assert!(a.is_closed());
        assert!(b.is_closed());
        assert!(matches!(
            a.execute("SELECT 1", &[]),
            Err(Error::SessionClosed(_))
        ));
        a.close().unwrap();
    }

    #[test]
    fn test_tracker_is_weak() {
        struct Dummy;
        impl TrackedSession for Dummy {
            fn force_close(&self) -> Result<()> {
                Ok(())
            }
        }

        let tracker = SessionTracker::new();
        let dummy = Arc::new(Dummy);
        tracker.track(1, &dummy);
        assert_eq!(tracker.active(), 1);
        drop(dummy);
        assert_eq!(tracker.active(), 0);
        assert_eq!(tracker.close_all().closed, 0);
    }
}
