//! Configuration loading through the environment
//!
//! These tests mutate process-wide environment variables, so every one of
//! them runs under `#[serial]`.


use serial_test::serial;
use std::env;
use std::fs;
use trewind::Config;

fn clear_overrides() {
    for var in [
        "TREWIND_CONFIG",
        "TREWIND_CONFIG_PATH",
        "TREWIND_DB_PATH",
        "TREWIND_BACKUP_DIR",
    ] {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_defaults_without_any_config_file() {
    let _guard = test_support::init();
    clear_overrides();

    let config = Config::load().unwrap();
    assert_eq!(config.capture.max_output_bytes, 100_000);
    assert_eq!(config.capture.timeout_secs, 0);
    assert_eq!(config.database.busy_timeout_ms, 5000);
    assert!(config
        .database_path()
        .starts_with(test_support::get_test_data_dir()));
    assert!(config.database_path().ends_with("terminal-rewind/trewind.db"));
}

#[test]
#[serial]
fn test_config_file_from_environment() {
    let _guard = test_support::init();
    clear_overrides();

    let path = test_support::get_temp_base().join("custom.toml");
    fs::write(
        &path,
        r#"
[capture]
timeout_secs = 30

[tracking]
exclude_dirs = ["node_modules"]
"#,
    )
    .unwrap();
    env::set_var("TREWIND_CONFIG", &path);

    let config = Config::load().unwrap();
    assert_eq!(config.capture.timeout_secs, 30);
    assert_eq!(config.tracking.exclude_dirs, vec!["node_modules".to_string()]);
    // Untouched sections keep their defaults
    assert_eq!(config.capture.max_error_bytes, 10_000);
    assert_eq!(config.retry.db_ops.max_attempts, 5);

    clear_overrides();
}

#[test]
#[serial]
fn test_explicit_path_wins_over_environment_file() {
    let _guard = test_support::init();
    clear_overrides();

    let base = test_support::get_temp_base();
    let from_env = base.join("env.toml");
    let explicit = base.join("explicit.toml");
    fs::write(&from_env, "[capture]\ntimeout_secs = 1\n").unwrap();
    fs::write(&explicit, "[capture]\ntimeout_secs = 2\n").unwrap();
    env::set_var("TREWIND_CONFIG", &from_env);
    env::set_var("TREWIND_CONFIG_PATH", &explicit);

    assert_eq!(Config::load().unwrap().capture.timeout_secs, 2);

    clear_overrides();
}

#[test]
#[serial]
fn test_xdg_config_file_is_found() {
    let _guard = test_support::init();
    clear_overrides();

    let dir = test_support::get_test_config_dir().join("terminal-rewind");
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join("config.toml");
    fs::write(&path, "[database]\nmax_connections = 9\n").unwrap();

    let config = Config::load().unwrap();
    fs::remove_file(&path).unwrap();

    assert_eq!(config.database.max_connections, 9);
}

#[test]
#[serial]
fn test_storage_overrides_from_environment() {
    let _guard = test_support::init();
    clear_overrides();

    let base = test_support::get_temp_base();
    env::set_var("TREWIND_DB_PATH", base.join("elsewhere.db"));
    env::set_var("TREWIND_BACKUP_DIR", base.join("copies"));

    let mut config = Config::default();
    config.apply_env_overrides();
    assert_eq!(config.database_path(), base.join("elsewhere.db"));
    assert_eq!(config.backup_dir(), base.join("copies"));

    clear_overrides();
}

#[test]
#[serial]
fn test_malformed_file_is_a_config_error() {
    let _guard = test_support::init();
    clear_overrides();

    let path = test_support::get_temp_base().join("broken.toml");
    fs::write(&path, "[capture\ntimeout_secs = ").unwrap();
    env::set_var("TREWIND_CONFIG", &path);

    let err = Config::load().unwrap_err();
    assert_eq!(err.kind(), trewind::ErrorKind::Config);

    clear_overrides();
}

#[test]
#[serial]
fn test_saved_config_loads_back() {
    let _guard = test_support::init();
    clear_overrides();

    let path = test_support::get_temp_base().join("nested").join("saved.toml");
    let mut config = Config::default();
    config.tracking.exclude_patterns = vec![r"\.tmp$".to_string()];
    config.save(&path).unwrap();

    let loaded = Config::load_from_file(&path).unwrap();
    assert_eq!(loaded.tracking.exclude_patterns, config.tracking.exclude_patterns);
}

#[test]
#[serial]
fn test_example_config_parses_to_defaults() {
    let parsed: Config = toml::from_str(Config::example_toml()).unwrap();
    let defaults = Config::default();
    assert_eq!(parsed.capture.max_output_bytes, defaults.capture.max_output_bytes);
    assert_eq!(parsed.tracking.max_file_bytes, defaults.tracking.max_file_bytes);
    assert_eq!(parsed.retry.db_ops.max_attempts, defaults.retry.db_ops.max_attempts);
}
