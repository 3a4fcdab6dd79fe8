//! File-backed settings store.

use std::path::{Path, PathBuf};

use tracing::debug;

use lector_core::settings::{Settings, SettingsError, SettingsStore};

/// Keeps [`Settings`] as pretty-printed JSON in a single file.
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$HOME/.config/lector/settings.json`, or a relative fallback when
    /// `HOME` is unset.
    pub fn default_path() -> PathBuf {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_default()
            .join(".config")
            .join("lector")
            .join("settings.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, e: std::io::Error) -> SettingsError {
        SettingsError::Io {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        }
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self) -> Result<Settings, SettingsError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("settings: {} not found, using defaults", self.path.display());
                return Ok(Settings::default());
            }
            Err(e) => return Err(self.io_error(e)),
        };
        serde_json::from_str(&text).map_err(|e| SettingsError::Parse(e.to_string()))
    }

    fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let json =
            serde_json::to_string_pretty(settings).map_err(|e| SettingsError::Parse(e.to_string()))?;
        std::fs::write(&self.path, json).map_err(|e| self.io_error(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lector_core::types::ModelStrategy;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSettingsStore::new(dir.path().join("nope.json"));
        assert_eq!(store.load().unwrap(), Settings::default());
    }

    #[test]
    fn save_creates_parent_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSettingsStore::new(dir.path().join("nested/dir/settings.json"));
        let settings = Settings {
            voice: "nova".into(),
            speed: 1.25,
            model_strategy: ModelStrategy::Quality,
            credential: "sk-abc".into(),
        };
        store.save(&settings).unwrap();
        assert_eq!(store.load().unwrap(), settings);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"voice":"echo"}"#).unwrap();

        let loaded = JsonSettingsStore::new(&path).load().unwrap();
        assert_eq!(loaded.voice, "echo");
        assert_eq!(loaded.speed, 1.0);
        assert_eq!(loaded.model_strategy, ModelStrategy::Auto);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = JsonSettingsStore::new(&path).load().unwrap_err();
        assert!(matches!(err, SettingsError::Parse(_)));
    }
}
