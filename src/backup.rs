//! Pre-change copies of files, keyed by (command id, original path).

use crate::error::{Result, RewindError};
use crate::retry::{retry_if_retryable, RetryConfig};
use crate::tracker::hash_bytes;
use log::debug;
use std::fs::{self, File, Permissions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Maps a (command id, original path) pair to where its backup lives.
///
/// Implementations must be stable and must never map two distinct pairs to
/// the same location.
pub trait BackupLayout: Send + Sync {
    fn backup_path(&self, root: &Path, command_id: i64, file_path: &Path) -> PathBuf;
}

impl<F> BackupLayout for F
where
    F: Fn(&Path, i64, &Path) -> PathBuf + Send + Sync,
{
    fn backup_path(&self, root: &Path, command_id: i64, file_path: &Path) -> PathBuf {
        self(root, command_id, file_path)
    }
}

/// `<root>/cmd_<id>/<sha256 of path>_<file name>`
///
/// The path digest keeps the name unique per command; the file name suffix
/// only makes the directory readable.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultLayout;

const MAX_NAME_CHARS: usize = 64;

impl BackupLayout for DefaultLayout {
    fn backup_path(&self, root: &Path, command_id: i64, file_path: &Path) -> PathBuf {
        let digest = hash_bytes(file_path.to_string_lossy().as_bytes());
        let name: String = file_path
            .file_name()
            .map(|n| n.to_string_lossy().chars().take(MAX_NAME_CHARS).collect())
            .unwrap_or_else(|| "file".to_string());

        root.join(format!("cmd_{}", command_id))
            .join(format!("{}_{}", digest, name))
    }
}

/// Writes backups under a root directory using a [`BackupLayout`].
pub struct BackupStore {
    root: PathBuf,
    layout: Box<dyn BackupLayout>,
    retry: RetryConfig,
}

impl std::fmt::Debug for BackupStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupStore")
            .field("root", &self.root)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl BackupStore {
    pub fn new(root: impl Into<PathBuf>, retry: RetryConfig) -> Self {
        Self::with_layout(root, DefaultLayout, retry)
    }

    pub fn with_layout(
        root: impl Into<PathBuf>,
        layout: impl BackupLayout + 'static,
        retry: RetryConfig,
    ) -> Self {
        BackupStore {
            root: root.into(),
            layout: Box::new(layout),
            retry,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the backup of `file_path` for `command_id` lives.
    pub fn location(&self, command_id: i64, file_path: &Path) -> PathBuf {
        self.layout.backup_path(&self.root, command_id, file_path)
    }

    /// Persist `content` as the pre-command copy of `file_path`.
    ///
    /// Backups are never reused or overwritten: writing the same pair twice
    /// is an error.
    pub fn write(&self, command_id: i64, file_path: &Path, content: &[u8]) -> Result<PathBuf> {
        self.write_with_permissions(command_id, file_path, content, None)
    }

    /// Like [`BackupStore::write`], giving the backup file the original's
    /// permissions so a rollback can hand them back.
    pub fn write_with_permissions(
        &self,
        command_id: i64,
        file_path: &Path,
        content: &[u8],
        permissions: Option<&Permissions>,
    ) -> Result<PathBuf> {
        let location = self.location(command_id, file_path);
        if location.exists() {
            return Err(RewindError::backup(
                file_path,
                format!("backup {} already exists", location.display()),
            ));
        }

        retry_if_retryable(&self.retry, || {
            Ok(write_atomic_with_permissions(&location, content, permissions)?)
        })
        .map_err(|e| RewindError::backup(file_path, e.to_string()))?;

        debug!(
            "Backed up {} ({} bytes) to {}",
            file_path.display(),
            content.len(),
            location.display()
        );
        Ok(location)
    }
}

/// Write `content` to `target` through a sibling temp file and a rename.
///
/// Creates missing parent directories. An existing target keeps its
/// permissions.
pub fn write_atomic(target: &Path, content: &[u8]) -> io::Result<()> {
    write_atomic_with_permissions(target, content, None)
}

/// [`write_atomic`] with explicit permissions for the result.
///
/// `None` falls back to the existing target's permissions, and to the
/// process default when there is no target.
pub fn write_atomic_with_permissions(
    target: &Path,
    content: &[u8],
    permissions: Option<&Permissions>,
) -> io::Result<()> {
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let tmp = parent.join(format!(".{}.trewind-{}.tmp", file_name, std::process::id()));

    let result = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(content)?;
        file.sync_all()?;
        drop(file);

        let permissions = match permissions {
            Some(p) => Some(p.clone()),
            None => fs::metadata(target).ok().map(|meta| meta.permissions()),
        };
        if let Some(permissions) = permissions {
            fs::set_permissions(&tmp, permissions)?;
        }
        fs::rename(&tmp, target)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}
