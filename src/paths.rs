//! Application directory paths.
//!
//! Uses the [`dirs`] crate for platform-appropriate locations.
//!
//! | Purpose | Linux | macOS |
//! |---------|-------|-------|
//! | Data | `~/.local/share/ponto/` | `~/Library/Application Support/ponto/` |
//! | Config | `~/.config/ponto/` | `~/Library/Application Support/ponto/` |
//!
//! Overrides: `PONTO_DATA_DIR`, `PONTO_CONFIG_DIR`.

use std::path::PathBuf;

/// Application data root: logs and diagnostic snapshots.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("PONTO_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("ponto"))
        .unwrap_or_else(|| PathBuf::from("/tmp/ponto-data"))
}

/// Directory holding `config.toml`.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("PONTO_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("ponto"))
        .unwrap_or_else(|| PathBuf::from("/tmp/ponto-config"))
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Default directory for portal snapshots (`data_dir()/snapshots/`).
#[must_use]
pub fn snapshots_dir() -> PathBuf {
    data_dir().join("snapshots")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_dirs_live_under_data_dir() {
        let data = data_dir();
        assert_eq!(logs_dir(), data.join("logs"));
        assert_eq!(snapshots_dir(), data.join("snapshots"));
    }

    #[test]
    fn default_dirs_are_named_after_the_app() {
        if std::env::var_os("PONTO_CONFIG_DIR").is_none() {
            assert!(config_dir().ends_with("ponto") || config_dir().starts_with("/tmp"));
        }
    }
}
