//! Speech synthesis client.
//!
//! [`SynthesisClient`] is the seam the cache calls through. The production
//! implementation, [`HttpSynthesizer`], talks to an OpenAI-compatible
//! `/v1/audio/speech` endpoint (OpenAI itself, or a local Kokoro server) and
//! writes each result to a file under a session audio directory. The file
//! path is the handle's locator; releasing the handle deletes the file.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use lector_core::error::SynthesisError;
use lector_core::types::AudioHandle;
use lector_core::wav;

/// Synthesis always runs at normal rate; playback speed is applied by the
/// audio engine.
pub const NEUTRAL_SPEED: f32 = 1.0;

/// Longest input the speech endpoint accepts, in characters.
pub const MAX_INPUT_CHARS: usize = 4096;

/// One synthesis call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: String,
    pub model: String,
    pub speed: f32,
    #[serde(skip)]
    pub credential: String,
}

#[async_trait]
pub trait SynthesisClient: Send + Sync + 'static {
    /// Render `request` to audio. Must resolve with
    /// [`SynthesisError::Cancelled`] promptly once `cancel` fires.
    async fn synthesize(
        &self,
        request: SynthesisRequest,
        cancel: CancellationToken,
    ) -> Result<AudioHandle, SynthesisError>;

    /// Free a handle nothing references anymore.
    fn release(&self, handle: &AudioHandle);
}

// ─── HTTP implementation ───────────────────────────────────────────────────

/// Connection settings for [`HttpSynthesizer`].
#[derive(Debug, Clone)]
pub struct SynthConfig {
    pub base_url: String,
    /// Where synthesized files live for the session.
    pub audio_dir: PathBuf,
    /// `wav` or `mp3`.
    pub response_format: String,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".into(),
            audio_dir: std::env::temp_dir().join(format!("lector-{}", std::process::id())),
            response_format: "wav".into(),
        }
    }
}

pub struct HttpSynthesizer {
    client: reqwest::Client,
    config: SynthConfig,
    next_id: AtomicU64,
}

#[derive(Serialize)]
struct SpeechBody<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
    response_format: &'a str,
}

impl HttpSynthesizer {
    pub fn new(config: SynthConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &SynthConfig {
        &self.config
    }

    async fn request(&self, request: &SynthesisRequest) -> Result<AudioHandle, SynthesisError> {
        if request.credential.trim().is_empty() {
            return Err(SynthesisError::missing_credential());
        }

        let input = truncate_input(&request.text);
        let url = format!("{}/v1/audio/speech", self.config.base_url.trim_end_matches('/'));
        let body = SpeechBody {
            model: &request.model,
            input,
            voice: &request.voice,
            speed: request.speed,
            response_format: &self.config.response_format,
        };

        debug!(
            "synth: POST {} chars voice={} model={}",
            input.len(),
            request.voice,
            request.model
        );

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&request.credential)
            .json(&body)
            .send()
            .await
            .map_err(|e| SynthesisError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(SynthesisError::from_status(
                status.as_u16(),
                service_message(&text),
            ));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| SynthesisError::Network(e.to_string()))?;
        let audio = if wav::is_wav(&bytes) {
            wav::repair_sizes(bytes.to_vec())
        } else {
            bytes.to_vec()
        };

        self.store(audio).await
    }

    async fn store(&self, audio: Vec<u8>) -> Result<AudioHandle, SynthesisError> {
        let local_error = |e: std::io::Error| SynthesisError::Service {
            status: None,
            message: Some(format!("failed to store audio: {e}")),
        };

        tokio::fs::create_dir_all(&self.config.audio_dir)
            .await
            .map_err(local_error)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let path = self
            .config
            .audio_dir
            .join(format!("segment-{id}.{}", self.config.response_format));
        tokio::fs::write(&path, &audio).await.map_err(local_error)?;

        Ok(AudioHandle {
            id,
            locator: path.to_string_lossy().into_owned(),
        })
    }
}

#[async_trait]
impl SynthesisClient for HttpSynthesizer {
    async fn synthesize(
        &self,
        request: SynthesisRequest,
        cancel: CancellationToken,
    ) -> Result<AudioHandle, SynthesisError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SynthesisError::Cancelled),
            result = self.request(&request) => result,
        }
    }

    fn release(&self, handle: &AudioHandle) {
        if let Err(e) = std::fs::remove_file(&handle.locator) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("synth: failed to release {}: {e}", handle.locator);
            }
        }
    }
}

/// Cut `text` to [`MAX_INPUT_CHARS`] on a char boundary.
fn truncate_input(text: &str) -> &str {
    match text.char_indices().nth(MAX_INPUT_CHARS) {
        Some((cut, _)) => {
            warn!("synth: input longer than {MAX_INPUT_CHARS} chars, truncating");
            &text[..cut]
        }
        None => text,
    }
}

/// Pull a human-readable message out of an error body.
///
/// Understands `{"error": {"message": ".."}}` (OpenAI) and
/// `{"error": ".."}`; anything else is returned trimmed.
fn service_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    let Ok(json) = serde_json::from_str::<serde_json::Value>(body) else {
        return Some(body.to_string());
    };
    let error = json.get("error")?;
    error
        .get("message")
        .and_then(|m| m.as_str())
        .or_else(|| error.as_str())
        .map(str::to_string)
}
