use crate::common::get_data_dir;
use crate::error::{Result, RewindError};
use log::warn;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Where the event store and backups live
    pub storage: StorageConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Subprocess output capture configuration
    pub capture: CaptureConfig,

    /// File tracking configuration
    pub tracking: TrackingConfig,

    /// Retry configuration
    pub retry: RetryConfig,
}

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database (empty = `<data dir>/trewind.db`)
    pub database_path: String,

    /// Directory for pre-change file copies (empty = `<data dir>/backups`)
    pub backup_dir: String,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Maximum connection pool size
    pub max_connections: u32,

    /// Busy timeout in milliseconds
    pub busy_timeout_ms: u32,
}

/// Output capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Stdout bytes kept per command; the rest is replaced by a marker
    pub max_output_bytes: usize,

    /// Stderr bytes kept per command
    pub max_error_bytes: usize,

    /// Kill the command after this many seconds (0 = wait indefinitely)
    pub timeout_secs: u64,
}

/// File tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Directory names that are never descended into
    pub exclude_dirs: Vec<String>,

    /// Regexes matched against the root-relative path of each file
    pub exclude_patterns: Vec<String>,

    /// Largest file whose pre-command content is kept for backup
    pub max_file_bytes: u64,

    /// Total pre-command content kept per tracked command
    pub max_total_bytes: u64,
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Database operation retry configuration
    pub db_ops: RetrySettings,

    /// Backup write retry configuration
    pub file_ops: RetrySettings,
}

/// Individual retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Maximum number of attempts
    pub max_attempts: u32,

    /// Initial delay in milliseconds
    pub initial_delay_ms: u64,

    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,

    /// Backoff factor (multiplier for each retry)
    pub backoff_factor: f32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            max_connections: 4,
            busy_timeout_ms: 5000,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            max_output_bytes: 100_000,
            max_error_bytes: 10_000,
            timeout_secs: 0,
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        TrackingConfig {
            exclude_dirs: vec![".git".to_string(), ".hg".to_string(), ".svn".to_string()],
            exclude_patterns: Vec::new(),
            max_file_bytes: 16 * 1024 * 1024,
            max_total_bytes: 256 * 1024 * 1024,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            db_ops: RetrySettings {
                max_attempts: 5,
                initial_delay_ms: 50,
                max_delay_ms: 2000,
                backoff_factor: 1.5,
            },
            file_ops: RetrySettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_factor: 2.0,
        }
    }
}

impl Config {
    /// Load configuration from file, or use defaults
    pub fn load() -> Result<Self> {
        if let Some(config_path) = Self::find_config_file() {
            Self::load_from_file(&config_path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| RewindError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| RewindError::Config(format!("Failed to parse config file: {}", e)))?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| RewindError::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                RewindError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        fs::write(path, toml_string)
            .map_err(|e| RewindError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Apply `TREWIND_DB_PATH` / `TREWIND_BACKUP_DIR` overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = env::var("TREWIND_DB_PATH") {
            self.storage.database_path = path;
        }
        if let Ok(dir) = env::var("TREWIND_BACKUP_DIR") {
            self.storage.backup_dir = dir;
        }
    }

    /// Resolved database location
    pub fn database_path(&self) -> PathBuf {
        if self.storage.database_path.is_empty() {
            get_data_dir().join("trewind.db")
        } else {
            PathBuf::from(&self.storage.database_path)
        }
    }

    /// Resolved backup directory
    pub fn backup_dir(&self) -> PathBuf {
        if self.storage.backup_dir.is_empty() {
            get_data_dir().join("backups")
        } else {
            PathBuf::from(&self.storage.backup_dir)
        }
    }

    /// Find config file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        // 1. Explicit path from the CLI flag
        if let Ok(path) = env::var("TREWIND_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        // 2. Environment variable
        if let Ok(path) = env::var("TREWIND_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        // 3. XDG config directory
        if let Some(config_dir) = dirs::config_dir() {
            let path = config_dir.join("terminal-rewind").join("config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        // 4. Home directory
        if let Some(home_dir) = dirs::home_dir() {
            let path = home_dir.join(".trewind.toml");
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Get default config file path (for creating new config)
    pub fn default_config_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("terminal-rewind").join("config.toml"))
            .ok_or_else(|| RewindError::Config("Could not determine config directory".into()))
    }

    /// Generate example config file content
    pub fn example_toml() -> &'static str {
        r#"# Terminal Rewind Configuration File
#
# All values shown are the defaults - override only what you need.

[storage]
# Empty paths resolve inside the data directory
# (~/.local/share/terminal-rewind on Linux)
database_path = ""
backup_dir = ""

[database]
max_connections = 4
busy_timeout_ms = 5000

[capture]
# Output beyond these sizes is truncated with a marker
max_output_bytes = 100000
max_error_bytes = 10000
# Kill recorded commands after N seconds (0 = no timeout)
timeout_secs = 0

[tracking]
# Directory names skipped while snapshotting
exclude_dirs = [".git", ".hg", ".svn"]
# Regexes matched against paths relative to the tracked directory
exclude_patterns = []
# Pre-command content kept in memory for backups
max_file_bytes = 16777216
max_total_bytes = 268435456

[retry.db_ops]
max_attempts = 5
initial_delay_ms = 50
max_delay_ms = 2000
backoff_factor = 1.5

[retry.file_ops]
max_attempts = 3
initial_delay_ms = 100
max_delay_ms = 5000
backoff_factor = 2.0
"#
    }
}

// Global configuration instance, used by the binary only
use std::sync::OnceLock;

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the process-wide configuration
pub fn get_config() -> &'static Config {
    CONFIG.get_or_init(|| {
        let mut config = Config::load().unwrap_or_else(|e| {
            warn!("Failed to load config: {}. Using defaults.", e);
            Config::default()
        });
        config.apply_env_overrides();
        config
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.capture.max_output_bytes, 100_000);
        assert_eq!(config.capture.max_error_bytes, 10_000);
        assert_eq!(config.capture.timeout_secs, 0);
        assert!(config.tracking.exclude_dirs.contains(&".git".to_string()));
        assert_eq!(config.retry.db_ops.max_attempts, 5);
    }

    #[test]
    fn test_save_and_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.capture.timeout_secs = 30;
        config.storage.backup_dir = "/var/tmp/rewind".to_string();
        config.save(&config_path).unwrap();

        let loaded = Config::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.capture.timeout_secs, 30);
        assert_eq!(loaded.backup_dir(), PathBuf::from("/var/tmp/rewind"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "[capture]\nmax_output_bytes = 64\n").unwrap();

        let loaded = Config::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.capture.max_output_bytes, 64);
        assert_eq!(loaded.capture.max_error_bytes, 10_000);
        assert_eq!(loaded.database.max_connections, 4);
    }

    #[test]
    fn test_example_config_parses() {
        let example = Config::example_toml();
        assert!(example.contains("Terminal Rewind Configuration"));
        let parsed: Config = toml::from_str(example).unwrap();
        assert_eq!(parsed.retry.file_ops.max_attempts, 3);
        assert_eq!(parsed.tracking.exclude_dirs.len(), 3);
    }

    #[test]
    fn test_invalid_config_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "[capture\nbroken").unwrap();

        let err = Config::load_from_file(&config_path).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }
}
