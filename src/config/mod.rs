// dbvault/src/config/mod.rs
pub mod models;
pub mod store;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub use models::{BackupStatus, Connection, DatabaseKind, Frequency, HistoryRecord, Schedule};
pub use store::{Catalog, ConfigStore, JsonFileStore, MemoryStore, StoreKey};

pub const DEFAULT_SETTINGS_FILE: &str = "dbvault.json";
pub const DEFAULT_STORE_FILE: &str = "dbvault-store.json";
pub const DEFAULT_MAINTENANCE_TIME: &str = "00:00";
pub const DEFAULT_RELOAD_INTERVAL_SECS: u64 = 30;

// Struct for deserializing dbvault.json
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawJsonSettings {
    pub store_path: Option<PathBuf>,
    pub tools_directory: Option<PathBuf>,
    pub maintenance_time: Option<String>,
    pub temp_directory: Option<PathBuf>,
    pub reload_interval_secs: Option<u64>,
}

/// Process-wide settings, resolved from the settings file with defaults applied.
#[derive(Debug, Clone)]
pub struct Settings {
    pub store_path: PathBuf,
    /// Bundled tools directory used when a connection names none.
    pub tools_directory: PathBuf,
    /// `HH:MM` of the daily retention sweep.
    pub maintenance_time: String,
    /// Parent directory for restore extraction; the system temp dir when unset.
    pub temp_directory: Option<PathBuf>,
    /// How often the daemon re-reads schedules from the store.
    pub reload_interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings::from_raw(RawJsonSettings::default())
    }
}

impl Settings {
    /// Reads the settings file. A missing file yields the defaults.
    pub fn load_from_json(settings_path: &Path) -> Result<Self> {
        if !settings_path.exists() {
            debug!(path = %settings_path.display(), "No settings file, using defaults");
            return Ok(Settings::default());
        }

        let content = fs::read_to_string(settings_path)
            .with_context(|| format!("Failed to read settings file at {}", settings_path.display()))?;
        let raw: RawJsonSettings = serde_json::from_str(&content).with_context(|| {
            format!(
                "Failed to parse JSON from settings file at {}",
                settings_path.display()
            )
        })?;

        Ok(Settings::from_raw(raw))
    }

    fn from_raw(raw: RawJsonSettings) -> Self {
        let maintenance_time = match raw.maintenance_time.filter(|s| !s.trim().is_empty()) {
            Some(time) => time,
            None => DEFAULT_MAINTENANCE_TIME.to_string(),
        };

        let tools_directory = raw.tools_directory.unwrap_or_else(default_tools_directory);
        if !tools_directory.exists() {
            warn!(
                path = %tools_directory.display(),
                "Bundled tools directory does not exist; tools will be looked up on PATH"
            );
        }

        Settings {
            store_path: raw
                .store_path
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_FILE)),
            tools_directory,
            maintenance_time,
            temp_directory: raw.temp_directory,
            reload_interval_secs: raw
                .reload_interval_secs
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_RELOAD_INTERVAL_SECS),
        }
    }
}

/// `<cwd>/bin`, the bundled tools convention.
pub fn default_tools_directory() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("bin")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_settings_file_uses_defaults() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let settings = Settings::load_from_json(&dir.path().join("absent.json"))?;

        assert_eq!(settings.store_path, PathBuf::from(DEFAULT_STORE_FILE));
        assert_eq!(settings.maintenance_time, DEFAULT_MAINTENANCE_TIME);
        assert!(settings.tools_directory.ends_with("bin"));
        assert!(settings.temp_directory.is_none());
        assert_eq!(settings.reload_interval_secs, DEFAULT_RELOAD_INTERVAL_SECS);
        Ok(())
    }

    #[test]
    fn test_settings_file_overrides() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("dbvault.json");
        fs::write(
            &path,
            r#"{
                "storePath": "/srv/dbvault/store.json",
                "toolsDirectory": "/opt/db-tools",
                "maintenanceTime": "03:45",
                "tempDirectory": "/srv/tmp",
                "reloadIntervalSecs": 120
            }"#,
        )?;

        let settings = Settings::load_from_json(&path)?;
        assert_eq!(settings.store_path, PathBuf::from("/srv/dbvault/store.json"));
        assert_eq!(settings.tools_directory, PathBuf::from("/opt/db-tools"));
        assert_eq!(settings.maintenance_time, "03:45");
        assert_eq!(settings.temp_directory, Some(PathBuf::from("/srv/tmp")));
        assert_eq!(settings.reload_interval_secs, 120);
        Ok(())
    }

    #[test]
    fn test_blank_maintenance_time_falls_back() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("dbvault.json");
        fs::write(&path, r#"{"maintenanceTime": "  ", "storePath": ""}"#)?;

        let settings = Settings::load_from_json(&path)?;
        assert_eq!(settings.maintenance_time, DEFAULT_MAINTENANCE_TIME);
        assert_eq!(settings.store_path, PathBuf::from(DEFAULT_STORE_FILE));
        Ok(())
    }

    #[test]
    fn test_invalid_settings_json_is_an_error() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("dbvault.json");
        fs::write(&path, "{ not json")?;
        assert!(Settings::load_from_json(&path).is_err());
        Ok(())
    }
}
