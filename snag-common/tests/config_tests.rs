//! Configuration loading and resolution priority
//!
//! Tests that touch SNAG_CONFIG are marked #[serial] so they never observe
//! each other's environment changes.

use serial_test::serial;
use snag_common::config::{
    load_config, resolve_config_path, write_toml_config, TomlConfig, CONFIG_ENV_VAR,
};
use snag_common::Error;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
#[serial]
fn test_cli_argument_beats_environment() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/from-env.toml");

    let cli = PathBuf::from("/tmp/from-cli.toml");
    let resolved = resolve_config_path(Some(&cli));
    assert_eq!(resolved, Some(cli));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_environment_used_without_cli_argument() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/from-env.toml");

    let resolved = resolve_config_path(None);
    assert_eq!(resolved, Some(PathBuf::from("/tmp/from-env.toml")));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_written_config_loads_back() {
    env::remove_var(CONFIG_ENV_VAR);
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = TomlConfig::default();
    config.database_path = Some(dir.path().join("site.db"));
    config.capture.album_delay_ms = 3000;
    config.reminders.enabled = false;
    config.control.utc_offset_minutes = 0;

    write_toml_config(&config, &path).unwrap();
    assert!(path.exists());
    assert!(!path.with_extension("toml.tmp").exists());

    let loaded = load_config(Some(&path)).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(loaded.database_path(), dir.path().join("site.db"));
}

#[test]
#[serial]
fn test_missing_explicit_config_is_an_error() {
    env::remove_var(CONFIG_ENV_VAR);
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent.toml");

    let err = load_config(Some(&missing)).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
#[serial]
fn test_invalid_file_contents_rejected() {
    env::remove_var(CONFIG_ENV_VAR);
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[capture]\nalbum_delay_ms = \"soon\"\n").unwrap();

    assert!(load_config(Some(&path)).is_err());
}
