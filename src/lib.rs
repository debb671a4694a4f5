//! # Terminal Rewind
//!
//! A persistent, queryable record of terminal commands and the file-system
//! changes each one made, with selective rollback.
//!
//! ## Features
//!
//! - **Event store**: sessions, commands and file changes in SQLite, with
//!   bounded retry when the database is busy
//! - **Change tracking**: SHA-256 snapshots before and after a command,
//!   classified into created / modified / deleted
//! - **Backups**: pre-command content captured eagerly, so deleted files stay
//!   restorable
//! - **Rollback**: per-file restore with a non-mutating dry run and hash
//!   verification of restored content
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use trewind::{Config, RecordOptions, Recorder, RollbackManager};
//!
//! let mut recorder = Recorder::from_config(&Config::default())?;
//! recorder.begin_session(Some("cleanup"), None)?;
//!
//! let outcome = recorder.record("rm build.log", &RecordOptions::tracked())?;
//! println!("{} file(s) changed", outcome.file_changes.len());
//!
//! let rollback = RollbackManager::new(recorder.store().clone());
//! let report = rollback.execute(outcome.command_id, false)?;
//! assert!(report.success);
//!
//! recorder.end_session()?;
//! # Ok::<(), trewind::RewindError>(())
//! ```

pub mod backup;
pub mod common;
/// Configuration management module for loading and saving settings
pub mod config;
pub mod error;
pub mod executor;
/// Database schema migration system
pub mod migrations;
pub mod models;
pub mod recorder;
/// Retry logic with exponential backoff for transient failures
pub mod retry;
pub mod rollback;
/// SQLite event store for sessions, commands and file changes
pub mod store;
pub mod tracker;
pub mod version;

pub use backup::{BackupLayout, BackupStore, DefaultLayout};
pub use config::Config;
pub use error::{ErrorKind, Result, RewindError};
pub use models::{ChangeType, Command, CommandFilter, FileChange, Session, StoreStats};
pub use recorder::{LogEntry, RecordOptions, RecordOutcome, Recorder, SessionHandle};
pub use rollback::{ActionStatus, Feasibility, RollbackManager, RollbackReport};
pub use store::{NewSession, Store};
pub use tracker::{diff, FileTracker, Snapshot};
pub use version::{short_version, version_string};
