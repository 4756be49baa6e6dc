use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{PennywiseError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    /// Group used by `import` and `identities` when `--group` is omitted.
    #[serde(default)]
    pub default_group: Option<String>,
    /// Format key forced on every file when `--format` is omitted.
    #[serde(default)]
    pub default_format: Option<String>,
    #[serde(default)]
    pub allow_ignored_identities: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            default_group: None,
            default_format: None,
            allow_ignored_identities: false,
        }
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("pennywise")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("pennywise")
}

pub fn load_settings() -> Settings {
    let path = settings_path();
    if path.exists() {
        let content = std::fs::read_to_string(&path).unwrap_or_default();
        serde_json::from_str(&content).unwrap_or_default()
    } else {
        Settings::default()
    }
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| PennywiseError::Settings(e.to_string()))?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

pub fn settings_file_exists() -> bool {
    settings_path().exists()
}

pub fn get_data_dir() -> PathBuf {
    PathBuf::from(&load_settings().data_dir)
}

/// Location of the ledger database inside the data directory.
pub fn ledger_path() -> PathBuf {
    get_data_dir().join("pennywise.db")
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = Settings {
            data_dir: "/tmp/test".to_string(),
            default_group: Some("Flat 4B".to_string()),
            default_format: Some("cashbook".to_string()),
            allow_ignored_identities: true,
        };
        let json = serde_json::to_string_pretty(&settings).unwrap();
        std::fs::write(&path, &json).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let loaded: Settings = serde_json::from_str(&content).unwrap();
        assert_eq!(loaded.data_dir, "/tmp/test");
        assert_eq!(loaded.default_group.as_deref(), Some("Flat 4B"));
        assert_eq!(loaded.default_format.as_deref(), Some("cashbook"));
        assert!(loaded.allow_ignored_identities);
    }

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert!(s.default_group.is_none());
        assert!(!s.allow_ignored_identities);
        assert!(s.data_dir.ends_with("pennywise"));
    }

    #[test]
    fn test_load_merges_with_defaults() {
        let json = r#"{"data_dir": "/tmp/test"}"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.data_dir, "/tmp/test");
        assert!(s.default_format.is_none());
        assert!(!s.allow_ignored_identities);
    }

    #[test]
    fn test_shellexpand_keeps_absolute_paths() {
        let dir = tempfile::tempdir().unwrap();
        let expanded = shellexpand_path(&dir.path().to_string_lossy());
        assert_eq!(
            PathBuf::from(expanded),
            std::fs::canonicalize(dir.path()).unwrap()
        );
    }
}
