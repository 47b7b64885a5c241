//! Database manager error types.

use thiserror::Error;

/// Database manager errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The configured engine family is not supported.
    #[error("unsupported database engine: {0}")]
    UnsupportedEngine(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The manager has not computed its engine configuration.
    #[error("database manager is not configured")]
    NotConfigured,

    /// The manager was closed for good.
    #[error("database manager is closed")]
    ManagerClosed,

    /// The engine was disposed and hands out no more connections.
    #[error("engine {0} is disposed")]
    EngineDisposed(String),

    /// The session was closed, explicitly or by manager cleanup.
    #[error("session {0} is closed")]
    SessionClosed(u64),

    /// The operation cannot run in the current context.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// sqlx error.
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Schema error.
    #[error("schema error: {0}")]
    Core(#[from] modelbase_core::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for database manager operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::UnsupportedEngine("oracle".into()).to_string(),
            "unsupported database engine: oracle"
        );
        assert_eq!(Error::SessionClosed(7).to_string(), "session 7 is closed");
    }

    #[test]
    fn test_core_error_converts() {
        let err: Error = modelbase_core::Error::NotCommitted.into();
        assert!(matches!(err, Error::Core(_)));
    }
}
