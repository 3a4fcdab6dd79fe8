//! Persisted reader settings and the store abstraction behind them.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ModelStrategy;

/// Slowest playback rate accepted.
pub const MIN_SPEED: f32 = 0.25;
/// Fastest playback rate accepted.
pub const MAX_SPEED: f32 = 4.0;

/// User-tunable settings that survive across sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub voice: String,
    pub speed: f32,
    pub model_strategy: ModelStrategy,
    /// API key for the synthesis service. Empty means unset.
    pub credential: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            voice: "alloy".into(),
            speed: 1.0,
            model_strategy: ModelStrategy::Auto,
            credential: String::new(),
        }
    }
}

/// Clamp a playback rate into the accepted range. Non-finite input falls
/// back to normal speed.
pub fn clamp_speed(speed: f32) -> f32 {
    if speed.is_finite() {
        speed.clamp(MIN_SPEED, MAX_SPEED)
    } else {
        1.0
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to access settings at {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("malformed settings: {0}")]
    Parse(String),
}

/// Key-value persistence of [`Settings`].
pub trait SettingsStore: Send + Sync {
    /// Load stored settings, or defaults when nothing is stored yet.
    fn load(&self) -> Result<Settings, SettingsError>;

    fn save(&self, settings: &Settings) -> Result<(), SettingsError>;
}

/// Process-local store, used when nothing should touch disk.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    inner: Mutex<Option<Settings>>,
}

impl MemorySettingsStore {
    pub fn with(settings: Settings) -> Self {
        Self {
            inner: Mutex::new(Some(settings)),
        }
    }

    /// Last saved value, if any.
    pub fn saved(&self) -> Option<Settings> {
        self.inner.lock().ok().and_then(|g| g.clone())
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<Settings, SettingsError> {
        Ok(self.saved().unwrap_or_default())
    }

    fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|e| SettingsError::Io {
                path: "<memory>".into(),
                reason: e.to_string(),
            })?;
        *guard = Some(settings.clone());
        Ok(())
    }
}
