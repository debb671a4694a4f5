// Build metadata for `trewind --version-full`

use std::fmt;

/// Version and build information baked in by `build.rs`.
pub struct VersionInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub git_dirty: bool,
    pub build_date: &'static str,
    pub build_profile: &'static str,
    pub rustc_version: &'static str,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            version: env!("TREWIND_VERSION"),
            git_hash: env!("TREWIND_GIT_HASH"),
            git_dirty: env!("TREWIND_GIT_DIRTY") == "true",
            build_date: env!("TREWIND_BUILD_DATE"),
            build_profile: env!("TREWIND_BUILD_PROFILE"),
            rustc_version: env!("TREWIND_RUSTC_VERSION"),
        }
    }

    /// Version plus abbreviated commit, e.g. `v1.0.0 (abc1234)`
    pub fn short(&self) -> String {
        if self.git_dirty {
            format!("v{} ({}+dirty)", self.version, self.git_hash)
        } else {
            format!("v{} ({})", self.version, self.git_hash)
        }
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Terminal Rewind v{}", self.version)?;
        writeln!(
            f,
            "Git: {}{}",
            self.git_hash,
            if self.git_dirty { " +uncommitted changes" } else { "" }
        )?;
        writeln!(f, "Built: {} ({})", self.build_date, self.build_profile)?;
        writeln!(f, "Rustc: {}", self.rustc_version)?;
        Ok(())
    }
}

/// Full multi-line version text for `--version-full`
pub fn version_string() -> String {
    VersionInfo::current().to_string()
}

/// One-line version for `--version`
pub fn short_version() -> String {
    VersionInfo::current().short()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info_creation() {
        let info = VersionInfo::current();
        assert!(!info.version.is_empty());
        assert!(!info.git_hash.is_empty());
        assert!(!info.build_date.is_empty());
    }

    #[test]
    fn test_version_display() {
        let display = version_string();
        assert!(display.contains("Terminal Rewind"));
        assert!(display.contains("Git:"));
        assert!(display.contains("Rustc:"));
    }

    #[test]
    fn test_dirty_flag_in_short_version() {
        let info = VersionInfo::current();
        let short = short_version();
        assert!(short.starts_with('v'));
        assert_eq!(short.contains("+dirty"), info.git_dirty);
    }
}
