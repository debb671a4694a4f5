//! Error handling module for Terminal Rewind.
//!
//! A single `thiserror` enum covers every failure the core can report. Each
//! variant belongs to one [`ErrorKind`], which is what callers should match on
//! when deciding whether to retry, ignore, or alert.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a [`RewindError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Persistence unavailable, locked beyond the retry budget, or inconsistent
    Store,
    /// Snapshot or hash computation failed for a file
    Tracking,
    /// A pre-change copy could not be persisted
    Backup,
    /// A rollback action could not be carried out
    Restore,
    /// A subprocess could not be launched
    Execution,
    /// The requested row does not exist
    NotFound,
    /// Caller-supplied options failed validation
    InvalidInput,
    /// Configuration could not be read or parsed
    Config,
    Other,
}

/// Unified error type for Terminal Rewind.
#[derive(Error, Debug)]
pub enum RewindError {
    /// I/O operation errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// SQLite errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON (tags column) errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Store unavailable, busy after retries, or schema inconsistency
    #[error("Store error: {0}")]
    Store(String),

    /// Referenced row is missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Per-file snapshot failure
    #[error("Tracking error for {path}: {reason}")]
    Tracking { path: PathBuf, reason: String },

    /// Per-file backup failure
    #[error("Backup error for {path}: {reason}")]
    Backup { path: PathBuf, reason: String },

    /// Per-action rollback failure
    #[error("Restore error for {path}: {reason}")]
    Restore { path: PathBuf, reason: String },

    /// Subprocess launch failure
    #[error("Execution error: {0}")]
    Execution(String),

    /// File validation errors
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Option validation errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic operation errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Terminal Rewind operations
pub type Result<T> = std::result::Result<T, RewindError>;

impl RewindError {
    pub fn store(msg: impl Into<String>) -> Self {
        RewindError::Store(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        RewindError::NotFound(msg.into())
    }

    pub fn tracking(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        RewindError::Tracking {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn backup(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        RewindError::Backup {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn restore(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        RewindError::Restore {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_path(msg: impl Into<String>) -> Self {
        RewindError::InvalidPath(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        RewindError::InvalidInput(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        RewindError::Other(msg.into())
    }

    /// Which part of the error taxonomy this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RewindError::Database(_) | RewindError::Pool(_) | RewindError::Store(_) => {
                ErrorKind::Store
            }
            RewindError::NotFound(_) => ErrorKind::NotFound,
            RewindError::Tracking { .. } => ErrorKind::Tracking,
            RewindError::Backup { .. } => ErrorKind::Backup,
            RewindError::Restore { .. } => ErrorKind::Restore,
            RewindError::Execution(_) => ErrorKind::Execution,
            RewindError::InvalidPath(_) | RewindError::InvalidInput(_) => {
                ErrorKind::InvalidInput
            }
            RewindError::Config(_) => ErrorKind::Config,
            RewindError::Io(_) | RewindError::Json(_) | RewindError::Other(_) => ErrorKind::Other,
        }
    }

    /// True for errors that compromise the event log and must reach the caller.
    pub fn is_store_error(&self) -> bool {
        self.kind() == ErrorKind::Store
    }
}

impl From<String> for RewindError {
    fn from(s: String) -> Self {
        RewindError::Other(s)
    }
}

impl From<&str> for RewindError {
    fn from(s: &str) -> Self {
        RewindError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(RewindError::store("locked").kind(), ErrorKind::Store);
        assert_eq!(
            RewindError::Database(rusqlite::Error::QueryReturnedNoRows).kind(),
            ErrorKind::Store
        );
        assert_eq!(RewindError::not_found("command 7").kind(), ErrorKind::NotFound);
        assert_eq!(
            RewindError::backup("/tmp/a", "disk full").kind(),
            ErrorKind::Backup
        );
        assert_eq!(
            RewindError::Execution("no such file".into()).kind(),
            ErrorKind::Execution
        );
        assert!(!RewindError::restore("/tmp/a", "missing").is_store_error());
    }

    #[test]
    fn test_display_includes_path() {
        let err = RewindError::tracking("/srv/data.bin", "permission denied");
        let msg = err.to_string();
        assert!(msg.contains("/srv/data.bin"));
        assert!(msg.contains("permission denied"));
    }
}
