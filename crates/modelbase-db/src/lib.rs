//! Modelbase DB - database manager, engines and scoped sessions.
//!
//! A [`DatabaseManager`] computes engine configuration once and lets each
//! worker build its own engine on first use. Units of work run through
//! [`DatabaseManager::get_db`] (or its async twin), which commits on success,
//! rolls back on error and always closes the session.

pub mod async_session;
pub mod bootstrap;
pub mod config;
pub mod engine;
pub mod error;
pub mod manager;
mod rows;
pub mod session;
pub mod value;

pub use async_session::{AsyncPool, AsyncSession};
pub use config::{DatabaseInfo, DatabaseLocation, DatabaseSettings, EngineKind};
pub use engine::{Connection, Engine, EngineConfig, PostgresEngine, SqliteEngine};
pub use error::{Error, Result};
pub use manager::{
    default_manager, reset_default_manager, set_default_manager, CleanupReport, DatabaseManager,
    ManagerPhase,
};
pub use session::{CloseAllReport, Session, SessionTracker, TrackedSession};
pub use value::{Row, Value};
