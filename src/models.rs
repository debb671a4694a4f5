//! Data models for Terminal Rewind.
//!
//! Row types mirror the three persisted tables (`sessions`, `commands`,
//! `file_changes`); the `New*` types are what callers hand to the store.

use crate::common::EnvironmentInfo;
use crate::error::{Result, RewindError};
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// How a file differs between the before and after snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChangeType {
    Created,
    Modified,
    Deleted,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Created => "created",
            ChangeType::Modified => "modified",
            ChangeType::Deleted => "deleted",
        }
    }

    /// Modified and deleted files need their pre-command content preserved.
    pub fn needs_backup(&self) -> bool {
        !matches!(self, ChangeType::Created)
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = RewindError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(ChangeType::Created),
            "modified" => Ok(ChangeType::Modified),
            "deleted" => Ok(ChangeType::Deleted),
            other => Err(RewindError::store(format!("unknown change_type '{}'", other))),
        }
    }
}

/// A named, time-bounded grouping of recorded commands.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub agent_name: Option<String>,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub cwd_start: Option<String>,
    pub command_count: u32,
    pub success_count: u32,
    pub error_count: u32,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// One recorded terminal invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub id: i64,
    pub session_id: Option<String>,
    pub timestamp: String,
    pub command: String,
    pub cwd: String,
    pub exit_code: Option<i32>,
    pub output: Option<String>,
    pub error_output: Option<String>,
    pub duration_ms: Option<u64>,
    pub platform: Option<String>,
    pub shell: Option<String>,
    pub user: Option<String>,
    pub hostname: Option<String>,
    pub tags: Vec<String>,
    pub notes: Option<String>,
}

impl Command {
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn is_error(&self) -> bool {
        matches!(self.exit_code, Some(code) if code != 0)
    }
}

/// Attributes of a command about to be inserted.
#[derive(Debug, Clone)]
pub struct NewCommand {
    pub command: String,
    pub cwd: String,
    pub exit_code: Option<i32>,
    pub output: Option<String>,
    pub error_output: Option<String>,
    pub duration_ms: Option<u64>,
    pub environment: EnvironmentInfo,
    pub tags: Vec<String>,
    pub notes: Option<String>,
}

impl NewCommand {
    /// A command with no result yet, stamped with the current environment.
    pub fn new(command: impl Into<String>, cwd: impl Into<String>) -> Self {
        NewCommand {
            command: command.into(),
            cwd: cwd.into(),
            exit_code: None,
            output: None,
            error_output: None,
            duration_ms: None,
            environment: EnvironmentInfo::capture(),
            tags: Vec::new(),
            notes: None,
        }
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = Some(exit_code);
        self
    }
}

/// One file's observed delta attributable to a command.
#[derive(Debug, Clone, PartialEq)]
pub struct FileChange {
    pub id: i64,
    pub command_id: i64,
    pub file_path: PathBuf,
    pub change_type: ChangeType,
    pub old_hash: Option<String>,
    pub new_hash: Option<String>,
    pub old_size: Option<u64>,
    pub new_size: Option<u64>,
    pub backup_path: Option<PathBuf>,
    pub warning: Option<String>,
    pub created_at: String,
}

impl FileChange {
    /// Whether rollback can put this file back.
    pub fn is_restorable(&self) -> bool {
        match self.change_type {
            ChangeType::Created => true,
            ChangeType::Modified | ChangeType::Deleted => self.backup_path.is_some(),
        }
    }
}

/// Attributes of a file change about to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFileChange {
    pub file_path: PathBuf,
    pub change_type: ChangeType,
    pub old_hash: Option<String>,
    pub new_hash: Option<String>,
    pub old_size: Option<u64>,
    pub new_size: Option<u64>,
    pub backup_path: Option<PathBuf>,
    pub warning: Option<String>,
}

impl NewFileChange {
    /// Check the hash/backup shape required by the change type.
    ///
    /// old_hash is null iff created, new_hash is null iff deleted, and a
    /// backup may only exist for modified or deleted files.
    pub fn validate(&self) -> Result<()> {
        let (needs_old, needs_new) = match self.change_type {
            ChangeType::Created => (false, true),
            ChangeType::Modified => (true, true),
            ChangeType::Deleted => (true, false),
        };

        if self.old_hash.is_some() != needs_old {
            return Err(RewindError::invalid_input(format!(
                "{} change for {} must {}have old_hash",
                self.change_type,
                self.file_path.display(),
                if needs_old { "" } else { "not " }
            )));
        }
        if self.new_hash.is_some() != needs_new {
            return Err(RewindError::invalid_input(format!(
                "{} change for {} must {}have new_hash",
                self.change_type,
                self.file_path.display(),
                if needs_new { "" } else { "not " }
            )));
        }
        if self.backup_path.is_some() && !self.change_type.needs_backup() {
            return Err(RewindError::invalid_input(format!(
                "created file {} cannot carry a backup",
                self.file_path.display()
            )));
        }
        if !self.file_path.is_absolute() {
            return Err(RewindError::invalid_path(format!(
                "file change path must be absolute: {}",
                self.file_path.display()
            )));
        }
        Ok(())
    }
}

/// Filters for [`crate::store::Store::get_commands`].
#[derive(Debug, Clone)]
pub struct CommandFilter {
    pub session_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub errors_only: bool,
    /// Substring matched against command text and output
    pub text: Option<String>,
    pub limit: usize,
}

impl Default for CommandFilter {
    fn default() -> Self {
        CommandFilter {
            session_id: None,
            since: None,
            errors_only: false,
            text: None,
            limit: 50,
        }
    }
}

impl CommandFilter {
    pub fn with_limit(limit: usize) -> Self {
        CommandFilter {
            limit,
            ..Default::default()
        }
    }
}

/// Aggregate counts computed from the current rows.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreStats {
    pub total_commands: u64,
    pub successful_commands: u64,
    pub failed_commands: u64,
    pub total_sessions: u64,
    pub total_file_changes: u64,
    pub database_path: PathBuf,
    pub storage_bytes: u64,
}

impl StoreStats {
    /// Percentage of commands with exit code 0, one decimal place.
    pub fn success_rate(&self) -> f64 {
        if self.total_commands == 0 {
            return 0.0;
        }
        let rate = self.successful_commands as f64 / self.total_commands as f64 * 100.0;
        (rate * 10.0).round() / 10.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(kind: ChangeType, old: bool, new: bool, backup: bool) -> NewFileChange {
        NewFileChange {
            file_path: PathBuf::from("/work/file.txt"),
            change_type: kind,
            old_hash: old.then(|| "aa".to_string()),
            new_hash: new.then(|| "bb".to_string()),
            old_size: None,
            new_size: None,
            backup_path: backup.then(|| PathBuf::from("/backups/1/x")),
            warning: None,
        }
    }

    #[test]
    fn test_change_type_round_trip() {
        for kind in [ChangeType::Created, ChangeType::Modified, ChangeType::Deleted] {
            assert_eq!(kind.as_str().parse::<ChangeType>().unwrap(), kind);
        }
        assert!("renamed".parse::<ChangeType>().is_err());
    }

    #[test]
    fn test_validate_hash_shape() {
        assert!(change(ChangeType::Created, false, true, false).validate().is_ok());
        assert!(change(ChangeType::Modified, true, true, true).validate().is_ok());
        assert!(change(ChangeType::Deleted, true, false, true).validate().is_ok());
        // Deleted without a backup is allowed: it is just not restorable
        assert!(change(ChangeType::Deleted, true, false, false).validate().is_ok());

        assert!(change(ChangeType::Created, true, true, false).validate().is_err());
        assert!(change(ChangeType::Deleted, true, true, false).validate().is_err());
        assert!(change(ChangeType::Created, false, true, true).validate().is_err());
    }

    #[test]
    fn test_relative_path_rejected() {
        let mut c = change(ChangeType::Created, false, true, false);
        c.file_path = PathBuf::from("relative.txt");
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_success_rate() {
        let stats = StoreStats {
            total_commands: 3,
            successful_commands: 2,
            failed_commands: 1,
            total_sessions: 1,
            total_file_changes: 0,
            database_path: PathBuf::from("/tmp/x.db"),
            storage_bytes: 0,
        };
        assert_eq!(stats.success_rate(), 66.7);
    }
}
