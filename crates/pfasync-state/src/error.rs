//! State backend error types.

/// Errors produced by [`StateBackend`](crate::StateBackend) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Underlying `SQLite` failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// `SQLite` failure annotated with the operation that hit it.
    #[error("{context}: {source}")]
    Context {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON column could not be encoded or decoded.
    #[error("json column error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored value does not match the model (unknown enum string, bad timestamp).
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write rejected because it would violate a store invariant.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("state backend lock poisoned")]
    LockPoisoned,
}

impl StateError {
    /// Wrap a raw backend error.
    pub fn backend(err: rusqlite::Error) -> Self {
        Self::Sqlite(err)
    }

    /// Wrap a backend error with the failing operation.
    pub fn backend_context(context: &'static str, source: rusqlite::Error) -> Self {
        Self::Context { context, source }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_error_displays_context() {
        let inner = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(1),
            Some("table not found".into()),
        );
        let err = StateError::Sqlite(inner);
        let msg = err.to_string();
        assert!(msg.contains("sqlite"), "got: {msg}");
    }

    #[test]
    fn backend_context_names_operation() {
        let err = StateError::backend_context("append_page: commit", rusqlite::Error::InvalidQuery);
        assert!(err.to_string().starts_with("append_page: commit"));
    }

    #[test]
    fn lock_poisoned_displays() {
        let err = StateError::LockPoisoned;
        assert_eq!(err.to_string(), "state backend lock poisoned");
    }

    #[test]
    fn io_error_wraps() {
        let inner = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = StateError::Io(inner);
        assert!(err.to_string().contains("i/o"));
    }
}
