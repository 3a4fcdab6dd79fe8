//! lector CLI — document reader with remote control.
//!
//! ```text
//! lector serve [--port 2004] [--host 127.0.0.1] [--voice alloy] [--speed 1.0] [--model auto]
//! lector read notes.txt [--from 3]
//! lector load notes.txt / play 3 / toggle / next / previous / status [--server ...]
//! lector voice nova / speed 1.5 / model quality [--server ...]
//! ```

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use reqwest::Method;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use lector_lib::lector_core::segment::SegmentStore;
use lector_lib::lector_core::types::{ModelStrategy, PlaybackPhase};
use lector_lib::playback::RodioEngine;
use lector_lib::reader::Reader;
use lector_lib::settings::JsonSettingsStore;
use lector_lib::synth::{HttpSynthesizer, SynthConfig};

const DEFAULT_SERVER: &str = "http://localhost:2004";

/// lector — reads documents aloud, one segment at a time
#[derive(Parser)]
#[command(name = "lector", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Options for commands that run a local reader.
#[derive(Args)]
struct EngineArgs {
    /// Voice (overrides the saved setting)
    #[arg(long)]
    voice: Option<String>,
    /// Playback speed (overrides the saved setting)
    #[arg(long)]
    speed: Option<f32>,
    /// Model strategy: auto, quality, standard, mini
    #[arg(long)]
    model: Option<ModelStrategy>,
    /// Speech API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    /// OpenAI-compatible speech server
    #[arg(long, default_value = "https://api.openai.com")]
    base_url: String,
    /// Directory for synthesized audio (defaults to a temp dir)
    #[arg(long)]
    audio_dir: Option<PathBuf>,
    /// Settings file
    #[arg(long)]
    settings: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the lector HTTP server
    Serve {
        /// Listen port
        #[arg(long, default_value = "2004")]
        port: u16,
        /// Listen host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Read a text file aloud in this process
    Read {
        file: PathBuf,
        /// Segment to start from
        #[arg(long, default_value = "0")]
        from: usize,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Load a text file into the running server
    Load {
        file: PathBuf,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Play a segment
    Play {
        index: usize,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Pause or resume
    Toggle {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Skip to the next segment
    Next {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Go back one segment
    Previous {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Get reader status
    Status {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Change voice
    Voice {
        voice: String,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Change playback speed
    Speed {
        speed: f32,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Change model strategy
    Model {
        strategy: ModelStrategy,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("lector_lib=debug,lector=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { port, host, engine } => {
            let (reader, audio_dir) = build_reader(engine).await?;
            let app = lector_lib::server::router(reader);

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("lector listening on {addr}");

            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await?;
            remove_audio_dir(&audio_dir);
        }

        Command::Read { file, from, engine } => {
            let text = tokio::fs::read_to_string(&file).await?;
            let (reader, audio_dir) = build_reader(engine).await?;
            read_aloud(&reader, SegmentStore::from_text(&text), from).await;
            reader.discard_document();
            remove_audio_dir(&audio_dir);
        }

        Command::Load { file, server } => {
            let text = tokio::fs::read_to_string(&file).await?;
            send(&server, Method::POST, "document", Some(serde_json::json!({ "text": text }))).await?;
        }
        Command::Play { index, server } => {
            send(&server, Method::POST, "play", Some(serde_json::json!({ "index": index }))).await?;
        }
        Command::Toggle { server } => send(&server, Method::POST, "toggle", None).await?,
        Command::Next { server } => send(&server, Method::POST, "next", None).await?,
        Command::Previous { server } => send(&server, Method::POST, "previous", None).await?,
        Command::Status { server } => send(&server, Method::GET, "status", None).await?,
        Command::Voice { voice, server } => {
            send(&server, Method::PATCH, "settings", Some(serde_json::json!({ "voice": voice }))).await?;
        }
        Command::Speed { speed, server } => {
            send(&server, Method::PATCH, "settings", Some(serde_json::json!({ "speed": speed }))).await?;
        }
        Command::Model { strategy, server } => {
            send(
                &server,
                Method::PATCH,
                "settings",
                Some(serde_json::json!({ "modelStrategy": strategy.as_str() })),
            )
            .await?;
        }
    }

    Ok(())
}

/// Wire a reader to the HTTP synthesizer, the default output device and
/// the settings file, then apply command-line overrides.
async fn build_reader(args: EngineArgs) -> Result<(Reader, PathBuf), Box<dyn Error>> {
    let mut config = SynthConfig {
        base_url: args.base_url,
        ..Default::default()
    };
    if let Some(dir) = args.audio_dir {
        config.audio_dir = dir;
    }
    let audio_dir = config.audio_dir.clone();

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let engine = RodioEngine::spawn(events_tx)?;
    let store = JsonSettingsStore::new(args.settings.unwrap_or_else(JsonSettingsStore::default_path));
    info!("settings: {}", store.path().display());

    let reader = Reader::new(
        Arc::new(HttpSynthesizer::new(config)),
        Arc::new(engine),
        Arc::new(store),
    );
    reader.spawn_event_loop(events_rx);

    if let Some(key) = args.api_key.filter(|k| !k.trim().is_empty()) {
        reader.set_credential(key);
    }
    if let Some(voice) = args.voice {
        reader.set_voice(voice).await;
    }
    if let Some(speed) = args.speed {
        reader.set_speed(speed);
    }
    if let Some(strategy) = args.model {
        reader.set_model_strategy(strategy).await;
    }

    Ok((reader, audio_dir))
}

/// Play from `from` until the document ends, playback fails, or Ctrl-C.
async fn read_aloud(reader: &Reader, segments: SegmentStore, from: usize) {
    if segments.is_empty() {
        eprintln!("nothing to read");
        return;
    }
    let from = from.min(segments.len() - 1);
    reader.load_document(segments.clone());

    let mut rx = reader.subscribe();
    reader.play_segment(from).await;

    let mut announced = None;
    loop {
        let status = rx.borrow_and_update().clone();
        if status.phase == PlaybackPhase::Playing && announced != status.current_segment_index {
            announced = status.current_segment_index;
            if let Some(segment) = announced.and_then(|i| segments.get(i)) {
                println!("[{}/{}] {}", segment.index + 1, segments.len(), segment.text);
            }
        }
        if let Some(error) = &status.error {
            eprintln!("error: {error}");
            break;
        }
        if !status.is_playing {
            break;
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }
}

fn remove_audio_dir(dir: &std::path::Path) {
    if let Err(e) = std::fs::remove_dir(dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!("audio dir {} not removed: {e}", dir.display());
        }
    }
}

async fn send(
    server: &str,
    method: Method,
    endpoint: &str,
    body: Option<serde_json::Value>,
) -> Result<(), Box<dyn Error>> {
    let req = reqwest::Client::new().request(method, format!("{server}/{endpoint}"));
    let req = match body {
        Some(body) => req.json(&body),
        None => req,
    };
    let resp = req.send().await?;
    println!("{}", resp.text().await.unwrap_or_default());
    Ok(())
}
