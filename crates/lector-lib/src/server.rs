//! HTTP API for the reader.
//!
//! CORS-permissive so a browser front end on another local port can drive
//! it. Every playback route answers with the resulting [`ReaderStatus`].

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use lector_core::segment::SegmentStore;
use lector_core::settings::Settings;
use lector_core::types::{ModelStrategy, ReaderStatus};

use crate::reader::Reader;

/// Build the axum router around a shared [`Reader`].
pub fn router(reader: Reader) -> Router {
    Router::new()
        .route("/document", post(load_document).delete(discard_document))
        .route("/play", post(play))
        .route("/toggle", post(toggle))
        .route("/next", post(next))
        .route("/previous", post(previous))
        .route("/status", get(status))
        .route("/settings", get(settings).patch(update_settings))
        .route("/error/dismiss", post(dismiss_error))
        .layer(CorsLayer::permissive())
        .with_state(reader)
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Settings as exposed over HTTP. The credential itself never leaves.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SettingsView {
    voice: String,
    speed: f32,
    model_strategy: ModelStrategy,
    has_credential: bool,
}

impl From<Settings> for SettingsView {
    fn from(s: Settings) -> Self {
        Self {
            has_credential: !s.credential.trim().is_empty(),
            voice: s.voice,
            speed: s.speed,
            model_strategy: s.model_strategy,
        }
    }
}

#[derive(Deserialize)]
struct DocumentRequest {
    #[serde(default)]
    segments: Option<Vec<String>>,
    #[serde(default)]
    text: Option<String>,
}

async fn load_document(
    State(reader): State<Reader>,
    Json(req): Json<DocumentRequest>,
) -> ApiResult<ReaderStatus> {
    let store = match (req.segments, req.text) {
        (Some(segments), _) => SegmentStore::from_texts(segments),
        (None, Some(text)) => SegmentStore::from_text(&text),
        (None, None) => return Err(bad_request("expected `segments` or `text`")),
    };
    reader.load_document(store);
    Ok(Json(reader.status()))
}

async fn discard_document(State(reader): State<Reader>) -> Json<ReaderStatus> {
    reader.discard_document();
    Json(reader.status())
}

#[derive(Deserialize)]
struct PlayRequest {
    index: usize,
}

async fn play(State(reader): State<Reader>, Json(req): Json<PlayRequest>) -> ApiResult<ReaderStatus> {
    let total = reader.status().total_segments;
    if req.index >= total {
        return Err(bad_request(format!(
            "segment {} out of range (document has {total})",
            req.index
        )));
    }
    reader.play_segment(req.index).await;
    Ok(Json(reader.status()))
}

async fn toggle(State(reader): State<Reader>) -> Json<ReaderStatus> {
    reader.toggle_play().await;
    Json(reader.status())
}

async fn next(State(reader): State<Reader>) -> Json<ReaderStatus> {
    reader.next().await;
    Json(reader.status())
}

async fn previous(State(reader): State<Reader>) -> Json<ReaderStatus> {
    reader.previous().await;
    Json(reader.status())
}

async fn status(State(reader): State<Reader>) -> Json<ReaderStatus> {
    Json(reader.status())
}

async fn settings(State(reader): State<Reader>) -> Json<SettingsView> {
    Json(reader.settings().into())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsPatch {
    voice: Option<String>,
    speed: Option<f32>,
    model_strategy: Option<ModelStrategy>,
    credential: Option<String>,
}

async fn update_settings(
    State(reader): State<Reader>,
    Json(patch): Json<SettingsPatch>,
) -> Json<SettingsView> {
    if let Some(credential) = patch.credential {
        reader.set_credential(credential);
    }
    if let Some(speed) = patch.speed {
        reader.set_speed(speed);
    }
    if let Some(strategy) = patch.model_strategy {
        reader.set_model_strategy(strategy).await;
    }
    if let Some(voice) = patch.voice {
        reader.set_voice(voice).await;
    }
    Json(reader.settings().into())
}

async fn dismiss_error(State(reader): State<Reader>) -> Json<ReaderStatus> {
    reader.dismiss_error();
    Json(reader.status())
}
