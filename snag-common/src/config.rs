//! Configuration loading and resolution
//!
//! Bootstrap configuration lives in a TOML file. Every field has a built-in
//! default so a missing or partial file never prevents startup.
//!
//! Config file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. `SNAG_CONFIG` environment variable
//! 3. `<config dir>/snag/config.toml`
//! 4. Built-in defaults (fallback)

use crate::time::millis_to_duration;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "SNAG_CONFIG";

/// Full bootstrap configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Path to the SQLite database file
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub control: ControlConfig,

    #[serde(default)]
    pub reminders: ReminderConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Draft capture timing
///
/// `*_delay_ms` is how long a burst must stay quiet before the next field is
/// prompted; `*_quiet_ms` is the minimum elapsed time since the last photo the
/// firing handler re-checks against the current draft. Albums need 2500 ms of
/// quiet, single photos 1000 ms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub album_delay_ms: u64,
    pub album_quiet_ms: u64,
    pub single_delay_ms: u64,
    pub single_quiet_ms: u64,
    pub draft_ttl_hours: u64,
    /// How many one-time callback identifiers are remembered for duplicate detection
    pub dedup_window: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            album_delay_ms: 2500,
            album_quiet_ms: 2500,
            single_delay_ms: 1200,
            single_quiet_ms: 1000,
            draft_ttl_hours: 72,
            dedup_window: 1024,
        }
    }
}

impl CaptureConfig {
    pub fn album_delay(&self) -> Duration {
        millis_to_duration(self.album_delay_ms)
    }

    pub fn single_delay(&self) -> Duration {
        millis_to_duration(self.single_delay_ms)
    }

    pub fn draft_ttl(&self) -> Duration {
        Duration::from_secs(self.draft_ttl_hours * 3600)
    }
}

/// Control wizard and after-photo mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub wizard_ttl_minutes: u64,
    pub after_mode_ttl_minutes: u64,
    /// Offset of the site's local time from UTC; due dates end at 23:59:59 local
    pub utc_offset_minutes: i32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            wizard_ttl_minutes: 60,
            after_mode_ttl_minutes: 15,
            utc_offset_minutes: 180,
        }
    }
}

impl ControlConfig {
    pub fn wizard_ttl(&self) -> Duration {
        Duration::from_secs(self.wizard_ttl_minutes * 60)
    }

    pub fn after_mode_ttl(&self) -> Duration {
        Duration::from_secs(self.after_mode_ttl_minutes * 60)
    }
}

/// Overdue reminder sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub batch_size: u32,
    pub cooldown_hours: u64,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 900,
            batch_size: 50,
            cooldown_hours: 24,
        }
    }
}

impl ReminderConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::hours(self.cooldown_hours as i64)
    }
}

impl TomlConfig {
    /// Database path, falling back to the platform data directory
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(default_database_path)
    }
}

/// Resolve which config file to read, if any
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    dirs::config_dir()
        .map(|d| d.join("snag").join("config.toml"))
        .filter(|p| p.exists())
}

/// Load configuration, degrading to defaults when no file is available
///
/// A file named explicitly (CLI or env) that cannot be read or parsed is an
/// error; a missing default-location file is not.
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    let explicit = cli_arg.is_some() || std::env::var(CONFIG_ENV_VAR).is_ok();

    match resolve_config_path(cli_arg) {
        Some(path) => match std::fs::read_to_string(&path) {
            Ok(content) => {
                let config = parse_config(&content)?;
                info!("Loaded configuration from {}", path.display());
                Ok(config)
            }
            Err(e) if explicit => Err(Error::Config(format!(
                "Cannot read config file {}: {}",
                path.display(),
                e
            ))),
            Err(e) => {
                warn!("Config file {} unreadable ({}), using defaults", path.display(), e);
                Ok(TomlConfig::default())
            }
        },
        None => {
            info!("No config file found, using built-in defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Parse TOML text into a config
pub fn parse_config(content: &str) -> Result<TomlConfig> {
    toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
}

/// Write configuration atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, target: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Cannot serialize config: {}", e)))?;

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = target.with_extension("toml.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, target)?;
    Ok(())
}

/// OS-dependent default database location
fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("snag"))
        .unwrap_or_else(|| PathBuf::from("./snag_data"))
        .join("snag.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config, TomlConfig::default());
        assert_eq!(config.capture.album_delay_ms, 2500);
        assert_eq!(config.capture.album_quiet_ms, 2500);
        assert_eq!(config.capture.album_delay(), std::time::Duration::from_millis(2500));
        assert_eq!(config.capture.single_delay_ms, 1200);
        assert_eq!(config.control.after_mode_ttl_minutes, 15);
        assert_eq!(config.reminders.cooldown_hours, 24);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = parse_config(
            r#"
            [reminders]
            batch_size = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.reminders.batch_size, 10);
        assert_eq!(config.reminders.interval_secs, 900);
        assert!(config.reminders.enabled);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = parse_config("database_path = [").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_default_database_path_named_snag_db() {
        let path = TomlConfig::default().database_path();
        assert_eq!(path.file_name().unwrap(), "snag.db");
    }
}
