//! Common utilities shared across modules.

use crate::error::{Result, RewindError};
use chrono::{SecondsFormat, Utc};
use std::env;
use std::path::{Component, Path, PathBuf};

/// Gets the application data directory using the XDG Base Directory layout.
///
/// Returns `~/.local/share/terminal-rewind/` on Unix-like systems.
pub fn get_data_dir() -> PathBuf {
    let base_dir = dirs::data_dir().unwrap_or_else(|| {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".local").join("share")
    });

    base_dir.join("terminal-rewind")
}

/// Current time as UTC RFC 3339 with microseconds.
///
/// Every stored timestamp uses this exact shape, so comparing the strings
/// compares the instants.
///
/// ```rust
/// use trewind::common::current_timestamp;
///
/// let ts = current_timestamp();
/// assert!(ts.ends_with('Z'));
/// ```
pub fn current_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Same formatting as [`current_timestamp`] for an arbitrary instant.
pub fn format_timestamp(at: &chrono::DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Make `path` absolute and lexically clean (`.` and `..` resolved).
///
/// Existing paths are canonicalized so symlinked prefixes agree with what a
/// directory walk reports. Missing paths are cleaned lexically and their
/// longest existing ancestor is canonicalized.
pub fn normalize_path(path: &Path) -> Result<PathBuf> {
    let path_str = path.to_string_lossy();
    if path_str.contains('\0') {
        return Err(RewindError::invalid_path("Path contains null bytes"));
    }

    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()?.join(path)
    };

    let mut cleaned = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }

    for ancestor in cleaned.ancestors().skip(1) {
        if let Ok(canonical) = ancestor.canonicalize() {
            if let Ok(rest) = cleaned.strip_prefix(ancestor) {
                return Ok(canonical.join(rest));
            }
        }
    }
    Ok(cleaned)
}

/// Resolve and validate a working directory.
pub fn resolve_directory(path: &Path) -> Result<PathBuf> {
    let resolved = normalize_path(path)?;
    if !resolved.is_dir() {
        return Err(RewindError::invalid_path(format!(
            "Not a directory: {}",
            resolved.display()
        )));
    }
    Ok(resolved)
}

/// Build a time-derived session id, optionally suffixed with a name slug.
pub fn make_session_id(name: Option<&str>) -> String {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S_%6f").to_string();
    match name.map(slugify).filter(|s| !s.is_empty()) {
        Some(slug) => format!("{}_{}", stamp, slug),
        None => stamp,
    }
}

fn slugify(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .take(20)
        .collect()
}

/// Host descriptors stored alongside every command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentInfo {
    pub platform: String,
    pub shell: String,
    pub user: String,
    pub hostname: String,
}

impl EnvironmentInfo {
    /// Read the descriptors from the current process environment.
    pub fn capture() -> Self {
        let shell = env::var("SHELL")
            .or_else(|_| env::var("COMSPEC"))
            .unwrap_or_else(|_| "unknown".to_string());
        let user = env::var("USER")
            .or_else(|_| env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        EnvironmentInfo {
            platform: env::consts::OS.to_string(),
            shell,
            user,
            hostname,
        }
    }
}
