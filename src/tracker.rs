//! File-state snapshots and change classification.
//!
//! A [`Snapshot`] maps absolute file paths to a SHA-256 content hash. The
//! before-command snapshot is taken through [`FileTracker::capture`], which
//! also keeps the pre-command bytes in memory (within configured caps) so
//! files the command deletes can still be backed up afterwards.

use crate::common::normalize_path;
use crate::config::TrackingConfig;
use crate::error::{Result, RewindError};
use crate::models::ChangeType;
use log::{debug, warn};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, Permissions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Hash and size of one file at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    pub hash: String,
    pub size: u64,
}

/// Path to content-hash mapping of a directory tree (or watched file set).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub files: BTreeMap<PathBuf, FileState>,
    /// Files that could not be read and were left out
    pub warnings: Vec<String>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<&FileState> {
        self.files.get(path)
    }
}

/// A before-command snapshot plus the content needed to back files up.
#[derive(Debug, Default)]
pub struct Baseline {
    pub snapshot: Snapshot,
    contents: HashMap<PathBuf, Vec<u8>>,
    permissions: HashMap<PathBuf, Permissions>,
    not_kept: HashMap<PathBuf, String>,
}

impl Baseline {
    /// Pre-command bytes of `path`, if they were kept.
    pub fn content(&self, path: &Path) -> Option<&[u8]> {
        self.contents.get(path).map(|c| c.as_slice())
    }

    /// Pre-command permissions of `path`, recorded alongside kept content.
    pub fn permissions(&self, path: &Path) -> Option<&Permissions> {
        self.permissions.get(path)
    }

    /// Why the content of `path` was not kept, if it was skipped.
    pub fn skipped_reason(&self, path: &Path) -> Option<&str> {
        self.not_kept.get(path).map(|s| s.as_str())
    }

    pub fn kept_bytes(&self) -> u64 {
        self.contents.values().map(|c| c.len() as u64).sum()
    }
}

/// One classified difference between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedChange {
    pub path: PathBuf,
    pub change_type: ChangeType,
    pub old_hash: Option<String>,
    pub new_hash: Option<String>,
    pub old_size: Option<u64>,
    pub new_size: Option<u64>,
}

/// Walks directories and hashes files according to [`TrackingConfig`].
#[derive(Debug, Clone)]
pub struct FileTracker {
    exclude_dirs: Vec<String>,
    exclude_patterns: Vec<Regex>,
    excluded_paths: Vec<PathBuf>,
    max_file_bytes: u64,
    max_total_bytes: u64,
}

impl FileTracker {
    pub fn new(config: &TrackingConfig) -> Result<Self> {
        let exclude_patterns = config
            .exclude_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    RewindError::Config(format!("Invalid exclude pattern '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(FileTracker {
            exclude_dirs: config.exclude_dirs.clone(),
            exclude_patterns,
            excluded_paths: Vec::new(),
            max_file_bytes: config.max_file_bytes,
            max_total_bytes: config.max_total_bytes,
        })
    }

    /// Never report anything at or below `path` (the store file, the backup dir).
    pub fn exclude_path(mut self, path: &Path) -> Self {
        match normalize_path(path) {
            Ok(p) => self.excluded_paths.push(p),
            Err(e) => warn!("Ignoring exclusion {}: {}", path.display(), e),
        }
        self
    }

    fn is_excluded(&self, root: &Path, path: &Path) -> bool {
        if self.excluded_paths.iter().any(|p| path.starts_with(p)) {
            return true;
        }
        if self.exclude_patterns.is_empty() {
            return false;
        }
        let relative = path.strip_prefix(root).unwrap_or(path);
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        self.exclude_patterns.iter().any(|re| re.is_match(&relative))
    }

    fn is_excluded_dir(&self, entry: &DirEntry) -> bool {
        entry.depth() > 0
            && entry.file_type().is_dir()
            && entry
                .file_name()
                .to_str()
                .map(|name| self.exclude_dirs.iter().any(|d| d == name))
                .unwrap_or(false)
    }

    /// Regular files under `root`, skipping symlinks and exclusions.
    fn walk(&self, root: &Path, warnings: &mut Vec<String>) -> Result<Vec<PathBuf>> {
        let root = normalize_path(root)?;
        if !root.is_dir() {
            return Err(RewindError::tracking(&root, "not a directory"));
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !self.is_excluded_dir(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(|p| p.display().to_string()).unwrap_or_default();
                    warn!("Skipping unreadable entry {}: {}", path, e);
                    warnings.push(format!("{}: {}", path, e));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if self.is_excluded(&root, entry.path()) {
                continue;
            }
            files.push(entry.into_path());
        }
        Ok(files)
    }

    /// Hash every regular file under `root`.
    pub fn snapshot(&self, root: &Path) -> Result<Snapshot> {
        let mut snapshot = Snapshot::default();
        let files = self.walk(root, &mut snapshot.warnings)?;

        for path in files {
            match hash_file(&path) {
                Ok(state) => {
                    snapshot.files.insert(path, state);
                }
                Err(e) => {
                    warn!("{}", e);
                    snapshot.warnings.push(e.to_string());
                }
            }
        }
        debug!("Snapshot of {} has {} files", root.display(), snapshot.len());
        Ok(snapshot)
    }

    /// Hash an explicit set of files; missing ones are simply absent.
    pub fn snapshot_paths(&self, paths: &[PathBuf]) -> Result<Snapshot> {
        let mut snapshot = Snapshot::default();
        for path in paths {
            let path = normalize_path(path)?;
            if !path.is_file() {
                continue;
            }
            match hash_file(&path) {
                Ok(state) => {
                    snapshot.files.insert(path, state);
                }
                Err(e) => {
                    warn!("{}", e);
                    snapshot.warnings.push(e.to_string());
                }
            }
        }
        Ok(snapshot)
    }

    /// Before-command snapshot of `root` that also keeps file content.
    pub fn capture(&self, root: &Path) -> Result<Baseline> {
        let mut warnings = Vec::new();
        let files = self.walk(root, &mut warnings)?;
        let mut baseline = self.capture_files(files);
        warnings.append(&mut baseline.snapshot.warnings);
        baseline.snapshot.warnings = warnings;
        Ok(baseline)
    }

    /// Before-command snapshot of explicit files that also keeps content.
    pub fn capture_paths(&self, paths: &[PathBuf]) -> Result<Baseline> {
        let files = paths
            .iter()
            .map(|p| normalize_path(p))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|p| p.is_file())
            .collect();
        Ok(self.capture_files(files))
    }

    fn capture_files(&self, files: Vec<PathBuf>) -> Baseline {
        let mut baseline = Baseline::default();
        let mut kept: u64 = 0;

        for path in files {
            let (size, permissions) = match std::fs::metadata(&path) {
                Ok(meta) => (meta.len(), meta.permissions()),
                Err(e) => {
                    let err = RewindError::tracking(&path, e.to_string());
                    warn!("{}", err);
                    baseline.snapshot.warnings.push(err.to_string());
                    continue;
                }
            };

            let reason = if size > self.max_file_bytes {
                Some(format!(
                    "file is {} bytes, over the {} byte capture limit",
                    size, self.max_file_bytes
                ))
            } else if kept + size > self.max_total_bytes {
                Some(format!(
                    "capture budget of {} bytes exhausted",
                    self.max_total_bytes
                ))
            } else {
                None
            };

            let result = match reason {
                Some(reason) => hash_file(&path).map(|state| {
                    baseline.not_kept.insert(path.clone(), reason);
                    state
                }),
                None => std::fs::read(&path)
                    .map_err(|e| RewindError::tracking(&path, e.to_string()))
                    .map(|bytes| {
                        let state = FileState {
                            hash: hash_bytes(&bytes),
                            size: bytes.len() as u64,
                        };
                        kept += state.size;
                        baseline.contents.insert(path.clone(), bytes);
                        baseline.permissions.insert(path.clone(), permissions);
                        state
                    }),
            };

            match result {
                Ok(state) => {
                    baseline.snapshot.files.insert(path, state);
                }
                Err(e) => {
                    warn!("{}", e);
                    baseline.snapshot.warnings.push(e.to_string());
                }
            }
        }
        baseline
    }
}

/// SHA-256 of `bytes` as lowercase hex.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Stream a file through SHA-256.
pub fn hash_file(path: &Path) -> Result<FileState> {
    let mut file = File::open(path).map_err(|e| RewindError::tracking(path, e.to_string()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size: u64 = 0;

    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(RewindError::tracking(path, e.to_string())),
        };
        hasher.update(&buf[..n]);
        size += n as u64;
    }

    Ok(FileState {
        hash: format!("{:x}", hasher.finalize()),
        size,
    })
}

/// Classify the differences between two snapshots.
///
/// Output is ordered by the raw path string, so `/a/b-c` sorts before
/// `/a/b/c` even though `PathBuf` ordering would put it after.
pub fn diff(before: &Snapshot, after: &Snapshot) -> Vec<DetectedChange> {
    let mut changes = Vec::new();

    for (path, old) in &before.files {
        match after.files.get(path) {
            None => changes.push(DetectedChange {
                path: path.clone(),
                change_type: ChangeType::Deleted,
                old_hash: Some(old.hash.clone()),
                new_hash: None,
                old_size: Some(old.size),
                new_size: None,
            }),
            Some(new) if new.hash != old.hash => changes.push(DetectedChange {
                path: path.clone(),
                change_type: ChangeType::Modified,
                old_hash: Some(old.hash.clone()),
                new_hash: Some(new.hash.clone()),
                old_size: Some(old.size),
                new_size: Some(new.size),
            }),
            Some(_) => {}
        }
    }

    for (path, new) in &after.files {
        if !before.files.contains_key(path) {
            changes.push(DetectedChange {
                path: path.clone(),
                change_type: ChangeType::Created,
                old_hash: None,
                new_hash: Some(new.hash.clone()),
                old_size: None,
                new_size: Some(new.size),
            });
        }
    }

    changes.sort_by(|a, b| a.path.as_os_str().cmp(b.path.as_os_str()));
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tracker() -> FileTracker {
        FileTracker::new(&TrackingConfig::default()).unwrap()
    }

    #[test]
    fn test_hash_matches_known_digest() {
        assert_eq!(
            hash_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash_file_matches_hash_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.bin");
        let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &content).unwrap();

        let state = hash_file(&path).unwrap();
        assert_eq!(state.hash, hash_bytes(&content));
        assert_eq!(state.size, 200_000);
    }

    #[test]
    fn test_diff_orders_by_path_string() {
        let state = |content: &[u8]| FileState {
            hash: hash_bytes(content),
            size: content.len() as u64,
        };
        let mut after = Snapshot::default();
        after.files.insert(PathBuf::from("/a/b/c"), state(b"nested"));
        after.files.insert(PathBuf::from("/a/b-c"), state(b"sibling"));

        let paths: Vec<PathBuf> = diff(&Snapshot::default(), &after)
            .into_iter()
            .map(|c| c.path)
            .collect();
        assert_eq!(paths, vec![PathBuf::from("/a/b-c"), PathBuf::from("/a/b/c")]);
    }

    #[test]
    fn test_modify_one_file_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("a.txt");
        let b = temp_dir.path().join("sub").join("b.txt");
        fs::create_dir_all(b.parent().unwrap()).unwrap();
        fs::write(&a, "alpha").unwrap();
        fs::write(&b, "beta").unwrap();

        let t = tracker();
        let before = t.snapshot(temp_dir.path()).unwrap();
        fs::write(&b, "BETA").unwrap();
        let after = t.snapshot(temp_dir.path()).unwrap();

        let changes = diff(&before, &after);
        assert_eq!(changes.len(), 1);
        let change = &changes[0];
        assert_eq!(change.change_type, ChangeType::Modified);
        assert_eq!(change.path, b.canonicalize().unwrap());
        assert_eq!(change.old_hash.as_deref(), Some(hash_bytes(b"beta").as_str()));
        assert_eq!(change.new_hash.as_deref(), Some(hash_bytes(b"BETA").as_str()));
    }

    #[test]
    fn test_created_and_deleted_are_classified() {
        let temp_dir = TempDir::new().unwrap();
        let gone = temp_dir.path().join("gone.txt");
        fs::write(&gone, "bye").unwrap();

        let t = tracker();
        let before = t.snapshot(temp_dir.path()).unwrap();
        fs::remove_file(&gone).unwrap();
        fs::write(temp_dir.path().join("new.txt"), "hi").unwrap();
        let after = t.snapshot(temp_dir.path()).unwrap();

        let changes = diff(&before, &after);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].change_type, ChangeType::Deleted);
        assert_eq!(changes[0].new_hash, None);
        assert_eq!(changes[1].change_type, ChangeType::Created);
        assert_eq!(changes[1].old_hash, None);
        assert_eq!(changes[1].new_size, Some(2));
    }

    #[test]
    fn test_excluded_dirs_and_patterns() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join(".git").join("objects")).unwrap();
        fs::write(temp_dir.path().join(".git").join("objects").join("x"), "obj").unwrap();
        fs::create_dir_all(temp_dir.path().join("target")).unwrap();
        fs::write(temp_dir.path().join("target").join("app"), "bin").unwrap();
        fs::write(temp_dir.path().join("main.rs"), "fn main() {}").unwrap();
        fs::write(temp_dir.path().join("trace.log"), "log").unwrap();

        let config = TrackingConfig {
            exclude_patterns: vec![r"^target/".to_string(), r"\.log$".to_string()],
            ..TrackingConfig::default()
        };
        let t = FileTracker::new(&config).unwrap();
        let snapshot = t.snapshot(temp_dir.path()).unwrap();

        assert_eq!(snapshot.len(), 1);
        let only = snapshot.files.keys().next().unwrap();
        assert!(only.ends_with("main.rs"));
    }

    #[test]
    fn test_excluded_path_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let backups = temp_dir.path().join("backups");
        fs::create_dir_all(&backups).unwrap();
        fs::write(backups.join("copy"), "old").unwrap();
        fs::write(temp_dir.path().join("keep.txt"), "k").unwrap();

        let t = tracker().exclude_path(&backups);
        let snapshot = t.snapshot(temp_dir.path()).unwrap();
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let config = TrackingConfig {
            exclude_patterns: vec!["(unclosed".to_string()],
            ..TrackingConfig::default()
        };
        let err = FileTracker::new(&config).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }

    #[test]
    fn test_snapshot_of_missing_root_fails() {
        let temp_dir = TempDir::new().unwrap();
        let err = tracker().snapshot(&temp_dir.path().join("nope")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Tracking);
    }

    #[test]
    fn test_capture_keeps_content_within_caps() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("small.txt"), "tiny").unwrap();
        fs::write(temp_dir.path().join("large.bin"), vec![7u8; 4096]).unwrap();

        let config = TrackingConfig {
            max_file_bytes: 1024,
            ..TrackingConfig::default()
        };
        let t = FileTracker::new(&config).unwrap();
        let baseline = t.capture(temp_dir.path()).unwrap();

        let small = temp_dir.path().canonicalize().unwrap().join("small.txt");
        let large = temp_dir.path().canonicalize().unwrap().join("large.bin");
        assert_eq!(baseline.snapshot.len(), 2);
        assert_eq!(baseline.content(&small), Some(&b"tiny"[..]));
        assert!(baseline.content(&large).is_none());
        assert!(baseline.skipped_reason(&large).unwrap().contains("capture limit"));
        assert_eq!(baseline.kept_bytes(), 4);

        // Hashes agree with a plain snapshot either way
        let plain = t.snapshot(temp_dir.path()).unwrap();
        assert_eq!(plain, baseline.snapshot);
    }

    #[cfg(unix)]
    #[test]
    fn test_capture_records_permissions_of_kept_files() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("run.sh");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let baseline = tracker().capture(temp_dir.path()).unwrap();
        let script = script.canonicalize().unwrap();
        let mode = baseline.permissions(&script).unwrap().mode() & 0o777;
        assert_eq!(mode, 0o755);
    }

    #[test]
    fn test_snapshot_paths_ignores_missing_files() {
        let temp_dir = TempDir::new().unwrap();
        let present = temp_dir.path().join("here.txt");
        fs::write(&present, "x").unwrap();

        let snapshot = tracker()
            .snapshot_paths(&[present.clone(), temp_dir.path().join("absent.txt")])
            .unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.get(&present.canonicalize().unwrap()).is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_is_omitted_with_warning() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let secret = temp_dir.path().join("secret.txt");
        fs::write(&secret, "hidden").unwrap();
        fs::write(temp_dir.path().join("open.txt"), "visible").unwrap();
        fs::set_permissions(&secret, fs::Permissions::from_mode(0o000)).unwrap();

        // Privileged users can read anything; nothing to check then
        if File::open(&secret).is_ok() {
            return;
        }

        let snapshot = tracker().snapshot(temp_dir.path()).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.warnings.len(), 1);
        assert!(snapshot.warnings[0].contains("secret.txt"));

        fs::set_permissions(&secret, fs::Permissions::from_mode(0o644)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("real.txt");
        fs::write(&target, "data").unwrap();
        std::os::unix::fs::symlink(&target, temp_dir.path().join("link.txt")).unwrap();

        let snapshot = tracker().snapshot(temp_dir.path()).unwrap();
        assert_eq!(snapshot.len(), 1);
    }
}
