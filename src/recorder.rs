use crate::backup::BackupStore;
use crate::common::{resolve_directory, EnvironmentInfo};
use crate::config::Config;
use crate::error::{Result, RewindError};
use crate::executor::Executor;
use crate::models::{NewCommand, NewFileChange, Session};
use crate::retry::RetryConfig;
use crate::store::{NewSession, Store};
use crate::tracker::{diff, Baseline, DetectedChange, FileTracker, Snapshot};
use log::{info, warn};
use std::env;
use std::path::{Path, PathBuf};

/// The session a [`Recorder`] is currently writing into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub id: String,
    pub name: Option<String>,
}

/// How [`Recorder::record`] should treat one command.
#[derive(Debug, Clone, Default)]
pub struct RecordOptions {
    /// Run the command as a subprocess
    pub execute: bool,
    /// Snapshot files before and after execution
    pub track_files: bool,
    /// Working directory (defaults to the current directory)
    pub cwd: Option<PathBuf>,
    /// Track only these files instead of the whole working directory
    pub watch: Vec<PathBuf>,
    pub tags: Vec<String>,
    pub notes: Option<String>,
}

impl RecordOptions {
    /// Run the command and track the working directory.
    pub fn tracked() -> Self {
        RecordOptions {
            execute: true,
            track_files: true,
            ..Default::default()
        }
    }

    /// Run the command without file tracking.
    pub fn executed() -> Self {
        RecordOptions {
            execute: true,
            ..Default::default()
        }
    }

    pub fn in_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn watching(mut self, paths: Vec<PathBuf>) -> Self {
        self.watch = paths;
        self
    }

    /// Check option combinations and resolve the working directory.
    pub fn resolve_cwd(&self) -> Result<PathBuf> {
        if self.track_files && !self.execute {
            return Err(RewindError::invalid_input(
                "file tracking requires executing the command",
            ));
        }
        if !self.watch.is_empty() && !self.track_files {
            return Err(RewindError::invalid_input(
                "watched files given but file tracking is off",
            ));
        }
        match &self.cwd {
            Some(dir) => resolve_directory(dir),
            None => resolve_directory(&env::current_dir()?),
        }
    }
}

/// A command that already ran somewhere else.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub command: String,
    pub exit_code: i32,
    pub output: Option<String>,
    pub error_output: Option<String>,
    pub cwd: Option<PathBuf>,
    pub duration_ms: Option<u64>,
    pub tags: Vec<String>,
    pub notes: Option<String>,
}

impl LogEntry {
    pub fn new(command: impl Into<String>, exit_code: i32) -> Self {
        LogEntry {
            command: command.into(),
            exit_code,
            output: None,
            error_output: None,
            cwd: None,
            duration_ms: None,
            tags: Vec::new(),
            notes: None,
        }
    }
}

/// What [`Recorder::record`] stored.
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub command_id: i64,
    pub exit_code: Option<i32>,
    pub duration_ms: Option<u64>,
    pub file_changes: Vec<NewFileChange>,
    /// Tracking and backup problems; never fatal
    pub warnings: Vec<String>,
}

/// Ties command execution and file tracking to the [`Store`].
///
/// The recorder owns its notion of the active session; nothing is kept in
/// process-wide state, so independent recorders can share one process.
#[derive(Debug)]
pub struct Recorder {
    store: Store,
    backups: BackupStore,
    tracker: FileTracker,
    executor: Executor,
    session: Option<SessionHandle>,
}

impl Recorder {
    pub fn new(store: Store, backups: BackupStore, tracker: FileTracker, executor: Executor) -> Self {
        Recorder {
            store,
            backups,
            tracker,
            executor,
            session: None,
        }
    }

    /// Build every component from configuration.
    ///
    /// The store file and backup directory are excluded from tracking so a
    /// recorder never attributes its own writes to a command.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = Store::open_with_config(config)?;
        let backup_dir = config.backup_dir();
        // The directory must exist so its exclusion resolves like walked paths do
        std::fs::create_dir_all(&backup_dir)
            .map_err(|e| RewindError::backup(&backup_dir, e.to_string()))?;
        let backups = BackupStore::new(
            backup_dir.join(store.store_id()?),
            RetryConfig::from(&config.retry.file_ops),
        );

        let db_path = config.database_path();
        let mut tracker = FileTracker::new(&config.tracking)?
            .exclude_path(&backup_dir)
            .exclude_path(&db_path);
        for suffix in ["-wal", "-shm", "-journal"] {
            let mut sidecar = db_path.clone().into_os_string();
            sidecar.push(suffix);
            tracker = tracker.exclude_path(Path::new(&sidecar));
        }

        Ok(Self::new(
            store,
            backups,
            tracker,
            Executor::new(&config.capture),
        ))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    /// Start a session; any session still active in the store is closed.
    pub fn begin_session(
        &mut self,
        name: Option<&str>,
        agent: Option<&str>,
    ) -> Result<SessionHandle> {
        let cwd_start = env::current_dir()
            .ok()
            .map(|p| p.to_string_lossy().to_string());
        let id = self.store.insert_session(&NewSession {
            name: name.map(str::to_string),
            agent_name: agent.map(str::to_string),
            description: None,
            cwd_start,
        })?;

        let handle = SessionHandle {
            id,
            name: name.map(str::to_string),
        };
        self.session = Some(handle.clone());
        Ok(handle)
    }

    /// Adopt the store's active session, if there is one.
    pub fn resume_active(&mut self) -> Result<Option<SessionHandle>> {
        self.session = self.store.active_session()?.map(|s| SessionHandle {
            id: s.id,
            name: s.name,
        });
        Ok(self.session.clone())
    }

    /// Close the active session; `None` when there was nothing to close.
    pub fn end_session(&mut self) -> Result<Option<Session>> {
        let handle = match self.session.take() {
            Some(handle) => handle,
            None => return Ok(None),
        };
        self.store.close_session(&handle.id)?;
        self.store.get_session(&handle.id)
    }

    fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    /// Store a command that was run elsewhere. No execution, no tracking.
    pub fn log(&self, entry: &LogEntry) -> Result<i64> {
        let cwd = match &entry.cwd {
            Some(dir) => dir.clone(),
            None => env::current_dir()?,
        };

        let command = NewCommand {
            command: entry.command.clone(),
            cwd: cwd.to_string_lossy().to_string(),
            exit_code: Some(entry.exit_code),
            output: entry.output.clone(),
            error_output: entry.error_output.clone(),
            duration_ms: entry.duration_ms,
            environment: EnvironmentInfo::capture(),
            tags: entry.tags.clone(),
            notes: entry.notes.clone(),
        };
        self.store.insert_command(self.session_id(), &command)
    }

    /// Record one command, optionally running it and tracking its file changes.
    ///
    /// The command row is written before anything runs. Tracking and backup
    /// failures end up in [`RecordOutcome::warnings`] and on the affected
    /// file-change rows; only store failures are returned as errors.
    pub fn record(&self, command: &str, options: &RecordOptions) -> Result<RecordOutcome> {
        let cwd = options.resolve_cwd()?;

        let mut new_command = NewCommand::new(command, cwd.to_string_lossy());
        new_command.tags = options.tags.clone();
        new_command.notes = options.notes.clone();
        let command_id = self.store.insert_command(self.session_id(), &new_command)?;

        let mut outcome = RecordOutcome {
            command_id,
            exit_code: None,
            duration_ms: None,
            file_changes: Vec::new(),
            warnings: Vec::new(),
        };
        if !options.execute {
            return Ok(outcome);
        }

        let baseline = if options.track_files {
            match self.capture_baseline(&cwd, &options.watch) {
                Ok(baseline) => {
                    outcome.warnings.extend(baseline.snapshot.warnings.iter().cloned());
                    Some(baseline)
                }
                Err(e) => {
                    warn!("File tracking disabled for command {}: {}", command_id, e);
                    outcome.warnings.push(e.to_string());
                    None
                }
            }
        } else {
            None
        };

        let result = self.executor.run(command, &cwd);
        self.store.complete_command(
            command_id,
            result.exit_code,
            result.output.as_deref(),
            result.error_output.as_deref(),
            Some(result.duration_ms),
        )?;
        outcome.exit_code = Some(result.exit_code);
        outcome.duration_ms = Some(result.duration_ms);

        if let Some(baseline) = baseline {
            let after = match self.take_snapshot(&cwd, &options.watch) {
                Ok(after) => after,
                Err(e) => {
                    warn!("Could not snapshot after command {}: {}", command_id, e);
                    outcome.warnings.push(e.to_string());
                    return Ok(outcome);
                }
            };
            outcome.warnings.extend(after.warnings.iter().cloned());

            let changes: Vec<NewFileChange> = diff(&baseline.snapshot, &after)
                .into_iter()
                .map(|change| self.preserve(command_id, change, &baseline))
                .collect();
            outcome
                .warnings
                .extend(changes.iter().filter_map(|c| c.warning.clone()));

            if !changes.is_empty() {
                self.store.insert_file_changes(command_id, &changes)?;
                info!(
                    "Command {} changed {} file(s)",
                    command_id,
                    changes.len()
                );
            }
            outcome.file_changes = changes;
        }

        Ok(outcome)
    }

    fn capture_baseline(&self, cwd: &Path, watch: &[PathBuf]) -> Result<Baseline> {
        if watch.is_empty() {
            self.tracker.capture(cwd)
        } else {
            self.tracker.capture_paths(&absolutize(cwd, watch))
        }
    }

    fn take_snapshot(&self, cwd: &Path, watch: &[PathBuf]) -> Result<Snapshot> {
        if watch.is_empty() {
            self.tracker.snapshot(cwd)
        } else {
            self.tracker.snapshot_paths(&absolutize(cwd, watch))
        }
    }

    /// Turn a detected change into a row, backing up pre-command content.
    fn preserve(&self, command_id: i64, change: DetectedChange, baseline: &Baseline) -> NewFileChange {
        let mut backup_path = None;
        let mut warning = None;

        if change.change_type.needs_backup() {
            match baseline.content(&change.path) {
                Some(bytes) => match self.backups.write_with_permissions(
                    command_id,
                    &change.path,
                    bytes,
                    baseline.permissions(&change.path),
                ) {
                    Ok(path) => backup_path = Some(path),
                    Err(e) => {
                        warn!("{}", e);
                        warning = Some(format!("not restorable: {}", e));
                    }
                },
                None => {
                    let reason = baseline
                        .skipped_reason(&change.path)
                        .unwrap_or("pre-command content was not captured");
                    warn!("No backup for {}: {}", change.path.display(), reason);
                    warning = Some(format!("not restorable: {}", reason));
                }
            }
        }

        NewFileChange {
            file_path: change.path,
            change_type: change.change_type,
            old_hash: change.old_hash,
            new_hash: change.new_hash,
            old_size: change.old_size,
            new_size: change.new_size,
            backup_path,
            warning,
        }
    }
}

fn absolutize(cwd: &Path, paths: &[PathBuf]) -> Vec<PathBuf> {
    paths
        .iter()
        .map(|p| if p.is_absolute() { p.clone() } else { cwd.join(p) })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn recorder(temp_dir: &TempDir) -> Recorder {
        let mut config = Config::default();
        config.storage.database_path = temp_dir
            .path()
            .join("state")
            .join("trewind.db")
            .to_string_lossy()
            .to_string();
        config.storage.backup_dir = temp_dir
            .path()
            .join("state")
            .join("backups")
            .to_string_lossy()
            .to_string();
        Recorder::from_config(&config).unwrap()
    }

    #[test]
    fn test_log_without_session_has_no_session_id() {
        let temp_dir = TempDir::new().unwrap();
        let recorder = recorder(&temp_dir);

        let id = recorder.log(&LogEntry::new("ls -la", 0)).unwrap();
        let command = recorder.store().get_command(id).unwrap().unwrap();
        assert_eq!(command.session_id, None);
        assert_eq!(command.exit_code, Some(0));
        assert!(command.platform.is_some());
    }

    #[test]
    fn test_session_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let mut recorder = recorder(&temp_dir);

        let handle = recorder.begin_session(Some("fix"), Some("claude")).unwrap();
        recorder.log(&LogEntry::new("make", 0)).unwrap();
        recorder.log(&LogEntry::new("make test", 1)).unwrap();

        let session = recorder.end_session().unwrap().unwrap();
        assert_eq!(session.id, handle.id);
        assert_eq!(session.agent_name.as_deref(), Some("claude"));
        assert_eq!(session.command_count, 2);
        assert_eq!(session.success_count, 1);
        assert_eq!(session.error_count, 1);
        assert!(!session.is_active());

        // Nothing left to end
        assert!(recorder.end_session().unwrap().is_none());
    }

    #[test]
    fn test_resume_active_session() {
        let temp_dir = TempDir::new().unwrap();
        let mut first = recorder(&temp_dir);
        let handle = first.begin_session(Some("shared"), None).unwrap();

        let mut second = recorder(&temp_dir);
        assert_eq!(second.resume_active().unwrap(), Some(handle));
    }

    #[test]
    fn test_record_without_execution() {
        let temp_dir = TempDir::new().unwrap();
        let recorder = recorder(&temp_dir);
        let options = RecordOptions::default().in_dir(temp_dir.path());

        let outcome = recorder.record("rm -rf /", &options).unwrap();
        assert_eq!(outcome.exit_code, None);
        let command = recorder.store().get_command(outcome.command_id).unwrap().unwrap();
        assert_eq!(command.exit_code, None);
        assert_eq!(command.command, "rm -rf /");
    }

    #[test]
    fn test_invalid_options_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let recorder = recorder(&temp_dir);

        let tracking_only = RecordOptions {
            track_files: true,
            ..Default::default()
        };
        let err = recorder.record("true", &tracking_only).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let bad_dir = RecordOptions::executed().in_dir(temp_dir.path().join("missing"));
        let err = recorder.record("true", &bad_dir).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        // Nothing was stored for rejected options
        assert!(recorder.store().last_command().unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_record_executes_and_tracks() {
        let temp_dir = TempDir::new().unwrap();
        let work = temp_dir.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        std::fs::write(work.join("notes.txt"), "draft").unwrap();

        let mut recorder = recorder(&temp_dir);
        recorder.begin_session(None, None).unwrap();
        let outcome = recorder
            .record(
                "echo final > notes.txt",
                &RecordOptions::tracked().in_dir(&work),
            )
            .unwrap();

        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.file_changes.len(), 1);
        let change = &outcome.file_changes[0];
        assert_eq!(change.change_type, crate::models::ChangeType::Modified);
        let backup = change.backup_path.as_ref().unwrap();
        assert_eq!(std::fs::read_to_string(backup).unwrap(), "draft");

        let stored = recorder.store().get_file_changes(outcome.command_id).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].backup_path.as_ref(), Some(backup));
    }

    #[cfg(unix)]
    #[test]
    fn test_watched_files_only() {
        let temp_dir = TempDir::new().unwrap();
        let work = temp_dir.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        std::fs::write(work.join("watched.txt"), "a").unwrap();
        std::fs::write(work.join("other.txt"), "b").unwrap();

        let recorder = recorder(&temp_dir);
        let options = RecordOptions::tracked()
            .in_dir(&work)
            .watching(vec![PathBuf::from("watched.txt")]);
        let outcome = recorder
            .record("echo x > watched.txt; echo y > other.txt", &options)
            .unwrap();

        assert_eq!(outcome.file_changes.len(), 1);
        assert!(outcome.file_changes[0].file_path.ends_with("watched.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_binary_is_recorded_as_failure() {
        let temp_dir = TempDir::new().unwrap();
        let recorder = recorder(&temp_dir);

        let outcome = recorder
            .record(
                "definitely-not-a-real-binary-xyz",
                &RecordOptions::executed().in_dir(temp_dir.path()),
            )
            .unwrap();
        let command = recorder.store().get_command(outcome.command_id).unwrap().unwrap();
        assert_ne!(command.exit_code, Some(0));
        assert!(command.error_output.is_some());
        assert!(command.duration_ms.is_some());
    }
}
