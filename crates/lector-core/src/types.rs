//! Shared types for the reader: cache identity, model selection, and the
//! observable playback status.
//!
//! Kept free of tokio and rodio so front-ends can depend on the wire shapes
//! without pulling in the engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ─── Synthesis artifacts ───────────────────────────────────────────────────

/// A synthesized audio resource owned by the cache.
///
/// `locator` is whatever the synthesis client hands back: a file path for the
/// HTTP synthesizer, an opaque string for in-memory clients. Two handles are
/// the same resource iff their ids match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AudioHandle {
    pub id: u64,
    pub locator: String,
}

/// Identity under which a synthesized segment is memoized.
///
/// Playback speed is deliberately absent: speed is applied by the audio
/// engine at playback time, so changing it must never miss the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub segment_index: usize,
    pub voice: String,
    pub model_id: String,
}

impl CacheKey {
    pub fn new(segment_index: usize, voice: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            segment_index,
            voice: voice.into(),
            model_id: model_id.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}/{}/{}", self.segment_index, self.voice, self.model_id)
    }
}

// ─── Model selection ───────────────────────────────────────────────────────

/// High-fidelity, slower model.
pub const MODEL_HD: &str = "tts-1-hd";
/// Standard model.
pub const MODEL_STANDARD: &str = "tts-1";
/// Fast, cheap model.
pub const MODEL_MINI: &str = "gpt-4o-mini-tts";

/// Documents with more segments than this get the HD model under `Auto`.
pub const AUTO_HD_SEGMENT_THRESHOLD: usize = 30;

/// Policy for choosing the synthesis model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStrategy {
    #[default]
    Auto,
    Quality,
    Standard,
    Mini,
}

impl ModelStrategy {
    /// Resolve the concrete model id for a document of `segment_count` segments.
    pub fn model_id(self, segment_count: usize) -> &'static str {
        match self {
            ModelStrategy::Quality => MODEL_HD,
            ModelStrategy::Standard => MODEL_STANDARD,
            ModelStrategy::Mini => MODEL_MINI,
            ModelStrategy::Auto if segment_count > AUTO_HD_SEGMENT_THRESHOLD => MODEL_HD,
            ModelStrategy::Auto => MODEL_MINI,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModelStrategy::Auto => "auto",
            ModelStrategy::Quality => "quality",
            ModelStrategy::Standard => "standard",
            ModelStrategy::Mini => "mini",
        }
    }
}

impl fmt::Display for ModelStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ModelStrategy::Auto),
            "quality" | "hd" => Ok(ModelStrategy::Quality),
            "standard" => Ok(ModelStrategy::Standard),
            "mini" => Ok(ModelStrategy::Mini),
            other => Err(format!(
                "unknown model strategy '{other}'; expected auto, quality, standard or mini"
            )),
        }
    }
}

// ─── Playback status ───────────────────────────────────────────────────────

/// Coarse playback phase of the reader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackPhase {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
}

/// Observable reader status snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderStatus {
    pub phase: PlaybackPhase,
    /// `None` until a segment has been requested for the loaded document.
    pub current_segment_index: Option<usize>,
    pub total_segments: usize,
    pub is_playing: bool,
    pub has_started_reading: bool,
    /// User-visible message from the last failure, if any.
    pub error: Option<String>,
    pub voice: String,
    pub speed: f32,
    pub model_strategy: ModelStrategy,
}

impl ReaderStatus {
    /// Status of a reader with no active segment.
    pub fn idle(total_segments: usize, voice: &str, speed: f32, model_strategy: ModelStrategy) -> Self {
        Self {
            phase: PlaybackPhase::Idle,
            current_segment_index: None,
            total_segments,
            is_playing: false,
            has_started_reading: false,
            error: None,
            voice: voice.to_string(),
            speed,
            model_strategy,
        }
    }
}
