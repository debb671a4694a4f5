//! Reversing the file-system effects of one recorded command.
//!
//! Each file change becomes an independent action: created files are
//! removed, modified and deleted files are restored from their backups.
//! There is no transaction across actions; the report lists exactly which
//! ones went through.

use crate::backup::write_atomic_with_permissions;
use crate::error::{Result, RewindError};
use crate::models::{ChangeType, FileChange};
use crate::store::Store;
use crate::tracker::{hash_bytes, hash_file};
use log::{info, warn};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// How many recent commands `rollback_last` looks through.
pub const ROLLBACK_LAST_WINDOW: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    /// Remove a file the command created
    Delete,
    /// Put the pre-command copy back; `None` when no backup was kept
    Restore { backup_path: Option<PathBuf> },
}

/// One planned step of a rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackAction {
    pub change_id: i64,
    pub file_path: PathBuf,
    pub change_type: ChangeType,
    pub kind: ActionKind,
    /// Hash the file should have once the action is done
    pub expected_hash: Option<String>,
    /// Hash the command left the file with
    pub post_command_hash: Option<String>,
    /// Warning recorded with the file change, if any
    pub recorded_warning: Option<String>,
}

impl RollbackAction {
    fn from_change(change: FileChange) -> Self {
        let kind = match change.change_type {
            ChangeType::Created => ActionKind::Delete,
            ChangeType::Modified | ChangeType::Deleted => ActionKind::Restore {
                backup_path: change.backup_path,
            },
        };
        RollbackAction {
            change_id: change.id,
            file_path: change.file_path,
            change_type: change.change_type,
            kind,
            expected_hash: change.old_hash,
            post_command_hash: change.new_hash,
            recorded_warning: change.warning,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionStatus {
    /// The action was carried out
    Applied,
    /// Dry run: the action is feasible
    WouldApply,
    /// The file is already in its pre-command state
    Unchanged,
    Failed(String),
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionStatus::Applied => f.write_str("applied"),
            ActionStatus::WouldApply => f.write_str("would apply"),
            ActionStatus::Unchanged => f.write_str("unchanged"),
            ActionStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub action: RollbackAction,
    pub status: ActionStatus,
    /// Restored content does not hash to the recorded `old_hash`, or the
    /// file was edited after the command ran
    pub integrity_warning: Option<String>,
}

impl ActionOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, ActionStatus::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackReport {
    pub command_id: i64,
    pub dry_run: bool,
    pub outcomes: Vec<ActionOutcome>,
    /// True when no action failed. Integrity warnings do not count as failures.
    pub success: bool,
}

impl RollbackReport {
    pub fn failed(&self) -> impl Iterator<Item = &ActionOutcome> {
        self.outcomes.iter().filter(|o| o.is_failed())
    }

    pub fn applied(&self) -> impl Iterator<Item = &ActionOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == ActionStatus::Applied)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter_map(|o| o.integrity_warning.as_deref())
    }
}

/// Answer to "could this command be rolled back right now?"
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feasibility {
    Possible,
    /// The command recorded no file changes
    NothingToUndo,
    /// At least one action would fail; the first reason is given
    Blocked(String),
}

pub struct RollbackManager {
    store: Store,
}

impl RollbackManager {
    pub fn new(store: Store) -> Self {
        RollbackManager { store }
    }

    /// Actions for `command_id`, one per path, ordered by path.
    ///
    /// If two file changes of the command target the same path, the later
    /// one wins.
    pub fn plan(&self, command_id: i64) -> Result<Vec<RollbackAction>> {
        if self.store.get_command(command_id)?.is_none() {
            return Err(RewindError::not_found(format!("command {}", command_id)));
        }

        let mut by_path: BTreeMap<OsString, RollbackAction> = BTreeMap::new();
        for change in self.store.get_file_changes(command_id)? {
            by_path.insert(
                change.file_path.clone().into_os_string(),
                RollbackAction::from_change(change),
            );
        }
        Ok(by_path.into_values().collect())
    }

    /// Roll back `command_id`. With `dry_run` nothing on disk is touched.
    pub fn execute(&self, command_id: i64, dry_run: bool) -> Result<RollbackReport> {
        let actions = self.plan(command_id)?;
        let mut outcomes = Vec::with_capacity(actions.len());

        for action in actions {
            let outcome = if dry_run {
                check_action(action)
            } else {
                apply_action(action)
            };
            if let ActionStatus::Failed(reason) = &outcome.status {
                warn!(
                    "Rollback of {} failed: {}",
                    outcome.action.file_path.display(),
                    reason
                );
            }
            outcomes.push(outcome);
        }

        let success = outcomes.iter().all(|o| !o.is_failed());
        if !dry_run {
            info!(
                "Rolled back command {}: {} of {} actions applied",
                command_id,
                outcomes
                    .iter()
                    .filter(|o| o.status == ActionStatus::Applied)
                    .count(),
                outcomes.len()
            );
        }

        Ok(RollbackReport {
            command_id,
            dry_run,
            outcomes,
            success,
        })
    }

    /// Roll back the most recent command that changed files.
    pub fn rollback_last(&self, dry_run: bool) -> Result<RollbackReport> {
        match self.store.last_command_with_changes(ROLLBACK_LAST_WINDOW)? {
            Some(command) => self.execute(command.id, dry_run),
            None => Err(RewindError::not_found(format!(
                "no command with file changes among the last {}",
                ROLLBACK_LAST_WINDOW
            ))),
        }
    }

    pub fn can_rollback(&self, command_id: i64) -> Result<Feasibility> {
        let report = self.execute(command_id, true)?;
        if report.outcomes.is_empty() {
            return Ok(Feasibility::NothingToUndo);
        }
        let blocked = report.failed().next().map(|outcome| {
            format!(
                "{}: {}",
                outcome.action.file_path.display(),
                outcome.status
            )
        });
        match blocked {
            Some(reason) => Ok(Feasibility::Blocked(reason)),
            None => Ok(Feasibility::Possible),
        }
    }
}

fn outcome(
    action: RollbackAction,
    status: ActionStatus,
    integrity_warning: Option<String>,
) -> ActionOutcome {
    ActionOutcome {
        action,
        status,
        integrity_warning,
    }
}

fn restore_error(path: &Path, reason: impl Into<String>) -> ActionStatus {
    ActionStatus::Failed(RewindError::restore(path, reason).to_string())
}

/// Current hash of `path`, `None` if it does not exist.
fn current_hash(path: &Path) -> io::Result<Option<String>> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_file() => match hash_file(path) {
            Ok(state) => Ok(Some(state.hash)),
            Err(e) => Err(io::Error::new(io::ErrorKind::Other, e.to_string())),
        },
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::Other,
            "target exists and is not a regular file",
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Warn when a file was edited after the command that is being undone.
fn drift_warning(action: &RollbackAction, current: Option<&str>) -> Option<String> {
    match (current, action.post_command_hash.as_deref()) {
        (Some(now), Some(after)) if now != after => Some(format!(
            "{} changed after the command ran",
            action.file_path.display()
        )),
        _ => None,
    }
}

/// Closest existing ancestor of `path` must be a writable directory.
fn check_writable_parent(path: &Path) -> std::result::Result<(), String> {
    let mut dir = path.parent();
    while let Some(candidate) = dir {
        match fs::metadata(candidate) {
            Ok(meta) if !meta.is_dir() => {
                return Err(format!("{} is not a directory", candidate.display()))
            }
            Ok(meta) if meta.permissions().readonly() => {
                return Err(format!("{} is not writable", candidate.display()))
            }
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => dir = candidate.parent(),
            Err(e) => return Err(format!("{}: {}", candidate.display(), e)),
        }
    }
    Err("no existing parent directory".to_string())
}

fn check_action(action: RollbackAction) -> ActionOutcome {
    let path = action.file_path.clone();
    let current = match current_hash(&path) {
        Ok(current) => current,
        Err(e) => {
            let status = restore_error(&path, e.to_string());
            return outcome(action, status, None);
        }
    };

    match &action.kind {
        ActionKind::Delete => {
            if current.is_none() {
                return outcome(action, ActionStatus::Unchanged, None);
            }
            let warning = drift_warning(&action, current.as_deref());
            let status = match check_writable_parent(&path) {
                Ok(()) => ActionStatus::WouldApply,
                Err(reason) => restore_error(&path, reason),
            };
            outcome(action, status, warning)
        }
        ActionKind::Restore { backup_path } => {
            let backup = match backup_path {
                Some(backup) => backup.clone(),
                None => {
                    let status = restore_error(&path, missing_backup_reason(&action));
                    return outcome(action, status, None);
                }
            };
            if current.is_some() && current == action.expected_hash {
                return outcome(action, ActionStatus::Unchanged, None);
            }
            let warning = drift_warning(&action, current.as_deref());
            if let Err(e) = File::open(&backup) {
                let status = restore_error(
                    &path,
                    format!("backup {} is not readable: {}", backup.display(), e),
                );
                return outcome(action, status, warning);
            }
            let status = match check_writable_parent(&path) {
                Ok(()) => ActionStatus::WouldApply,
                Err(reason) => restore_error(&path, reason),
            };
            outcome(action, status, warning)
        }
    }
}

fn apply_action(action: RollbackAction) -> ActionOutcome {
    let path = action.file_path.clone();
    let current = match current_hash(&path) {
        Ok(current) => current,
        Err(e) => {
            let status = restore_error(&path, e.to_string());
            return outcome(action, status, None);
        }
    };

    match &action.kind {
        ActionKind::Delete => {
            if current.is_none() {
                return outcome(action, ActionStatus::Unchanged, None);
            }
            let warning = drift_warning(&action, current.as_deref());
            let status = match fs::remove_file(&path) {
                Ok(()) => {
                    info!("Removed {}", path.display());
                    ActionStatus::Applied
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => ActionStatus::Unchanged,
                Err(e) => restore_error(&path, e.to_string()),
            };
            outcome(action, status, warning)
        }
        ActionKind::Restore { backup_path } => {
            let backup = match backup_path {
                Some(backup) => backup.clone(),
                None => {
                    let status = restore_error(&path, missing_backup_reason(&action));
                    return outcome(action, status, None);
                }
            };
            if current.is_some() && current == action.expected_hash {
                return outcome(action, ActionStatus::Unchanged, None);
            }
            let drift = drift_warning(&action, current.as_deref());

            let content = match fs::read(&backup) {
                Ok(content) => content,
                Err(e) => {
                    let status = restore_error(
                        &path,
                        format!("backup {} is not readable: {}", backup.display(), e),
                    );
                    return outcome(action, status, drift);
                }
            };
            // Backups carry the pre-command mode of the original
            let permissions = fs::metadata(&backup).ok().map(|meta| meta.permissions());
            if let Err(e) = write_atomic_with_permissions(&path, &content, permissions.as_ref()) {
                return outcome(action, restore_error(&path, e.to_string()), drift);
            }
            info!("Restored {} from {}", path.display(), backup.display());

            let integrity = verify_restored(&action, &content);
            outcome(action, ActionStatus::Applied, integrity.or(drift))
        }
    }
}

/// Re-hash the restored file and compare against the recorded `old_hash`.
fn verify_restored(action: &RollbackAction, written: &[u8]) -> Option<String> {
    let restored = match hash_file(&action.file_path) {
        Ok(state) => state.hash,
        Err(e) => {
            warn!("Could not verify {}: {}", action.file_path.display(), e);
            hash_bytes(written)
        }
    };
    match action.expected_hash.as_deref() {
        Some(expected) if expected != restored => {
            let message = format!(
                "restored {} hashes to {} but {} was recorded",
                action.file_path.display(),
                restored,
                expected
            );
            warn!("Integrity mismatch: {}", message);
            Some(message)
        }
        _ => None,
    }
}

fn missing_backup_reason(action: &RollbackAction) -> String {
    match &action.recorded_warning {
        Some(warning) => format!("no backup was kept ({})", warning),
        None => "no backup was kept".to_string(),
    }
}
