//! Audio engine — one active source, driven by the reader.
//!
//! [`RodioEngine`] owns a dedicated OS thread (rodio's `OutputStream` is
//! `!Send`) and receives commands over a std channel. Natural end of a source
//! and decode failures travel back as [`EngineEvent`]s on a tokio channel.
//!
//! The handle keeps a shadow of the engine state (active source, started,
//! ended) so queries never round-trip through the playback thread.

use std::fs::File;
use std::io::BufReader;
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error};

use lector_core::types::AudioHandle;

/// How often the playback thread checks for the end of the active source.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Notifications from the engine about the source it was playing.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The source played to its natural end.
    Ended(AudioHandle),
    /// The source could not be opened or decoded.
    Error { handle: AudioHandle, message: String },
}

/// A single-source audio output.
pub trait AudioEngine: Send + Sync {
    /// Make `handle` the active source and start it from the beginning.
    fn play(&self, handle: &AudioHandle);

    /// Pause in place.
    fn pause(&self);

    /// Continue a paused source from where it stopped.
    fn resume(&self);

    /// Halt and rewind. The source stays loaded.
    fn stop(&self);

    /// Live playback-rate multiplier.
    fn set_rate(&self, rate: f32);

    /// The active source, if any.
    fn source(&self) -> Option<AudioHandle>;

    /// True when the active source has been started, not rewound, and has
    /// not yet played to its end.
    fn is_resumable(&self) -> bool;
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("failed to spawn playback thread: {0}")]
    Spawn(String),

    #[error("audio output unavailable: {0}")]
    Output(String),
}

// ─── rodio implementation ──────────────────────────────────────────────────

enum PlayCmd {
    Play(AudioHandle),
    Pause,
    Resume,
    Stop,
    SetRate(f32),
}

#[derive(Debug, Default)]
struct Shadow {
    source: Option<AudioHandle>,
    started: bool,
    ended: bool,
}

/// rodio-backed engine. Dropping the last handle stops the playback thread.
pub struct RodioEngine {
    cmd_tx: std_mpsc::Sender<PlayCmd>,
    shadow: Arc<Mutex<Shadow>>,
}

impl RodioEngine {
    /// Open the default output device on a fresh playback thread.
    pub fn spawn(events: mpsc::UnboundedSender<EngineEvent>) -> Result<Self, PlaybackError> {
        let (cmd_tx, cmd_rx) = std_mpsc::channel::<PlayCmd>();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<(), String>>(1);
        let shadow = Arc::new(Mutex::new(Shadow::default()));

        let thread_shadow = Arc::clone(&shadow);
        std::thread::Builder::new()
            .name("lector-playback".into())
            .spawn(move || playback_thread(cmd_rx, ready_tx, events, thread_shadow))
            .map_err(|e| PlaybackError::Spawn(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { cmd_tx, shadow }),
            Ok(Err(e)) => Err(PlaybackError::Output(e)),
            Err(_) => Err(PlaybackError::Output("playback thread exited".into())),
        }
    }

    fn shadow(&self) -> MutexGuard<'_, Shadow> {
        lock_shadow(&self.shadow)
    }

    fn send(&self, cmd: PlayCmd) {
        if self.cmd_tx.send(cmd).is_err() {
            error!("playback: thread is gone, command dropped");
        }
    }
}

impl AudioEngine for RodioEngine {
    fn play(&self, handle: &AudioHandle) {
        {
            let mut shadow = self.shadow();
            shadow.source = Some(handle.clone());
            shadow.started = true;
            shadow.ended = false;
        }
        self.send(PlayCmd::Play(handle.clone()));
    }

    fn pause(&self) {
        self.send(PlayCmd::Pause);
    }

    fn resume(&self) {
        self.send(PlayCmd::Resume);
    }

    fn stop(&self) {
        self.shadow().started = false;
        self.send(PlayCmd::Stop);
    }

    fn set_rate(&self, rate: f32) {
        self.send(PlayCmd::SetRate(rate));
    }

    fn source(&self) -> Option<AudioHandle> {
        self.shadow().source.clone()
    }

    fn is_resumable(&self) -> bool {
        let shadow = self.shadow();
        shadow.source.is_some() && shadow.started && !shadow.ended
    }
}

fn lock_shadow(shadow: &Mutex<Shadow>) -> MutexGuard<'_, Shadow> {
    shadow.lock().unwrap_or_else(PoisonError::into_inner)
}

fn open_source(handle: &AudioHandle) -> Result<Decoder<BufReader<File>>, String> {
    let file = File::open(&handle.locator).map_err(|e| format!("open {}: {e}", handle.locator))?;
    Decoder::new(BufReader::new(file)).map_err(|e| format!("decode {}: {e}", handle.locator))
}

fn new_sink(stream: &OutputStreamHandle, rate: f32) -> Result<Sink, String> {
    let sink = Sink::try_new(stream).map_err(|e| e.to_string())?;
    sink.set_speed(rate);
    Ok(sink)
}

// ─── Playback OS thread ───────────────────────────────────────────────────

fn playback_thread(
    cmd_rx: std_mpsc::Receiver<PlayCmd>,
    ready_tx: std_mpsc::SyncSender<Result<(), String>>,
    events: mpsc::UnboundedSender<EngineEvent>,
    shadow: Arc<Mutex<Shadow>>,
) {
    let mut rate = 1.0_f32;
    let (_stream, stream_handle) = match OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ready_tx.send(Err(e.to_string()));
            return;
        }
    };
    let mut sink = match new_sink(&stream_handle, rate) {
        Ok(sink) => sink,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));

    let mut active = ActiveSource::default();

    loop {
        match cmd_rx.recv_timeout(POLL_INTERVAL) {
            Ok(PlayCmd::Play(handle)) => {
                // Fresh sink per source: nothing queued from the previous one.
                sink.stop();
                sink = match new_sink(&stream_handle, rate) {
                    Ok(sink) => sink,
                    Err(e) => {
                        error!("playback: failed to create sink: {e}");
                        active.clear();
                        let _ = events.send(EngineEvent::Error { handle, message: e });
                        continue;
                    }
                };
                match open_source(&handle) {
                    Ok(source) => {
                        debug!("playback: playing {}", handle.locator);
                        sink.append(source);
                        sink.play();
                        active.start(handle);
                    }
                    Err(message) => {
                        error!("playback: {message}");
                        active.clear();
                        let _ = events.send(EngineEvent::Error { handle, message });
                    }
                }
            }
            Ok(PlayCmd::Pause) => sink.pause(),
            Ok(PlayCmd::Resume) => sink.play(),
            Ok(PlayCmd::Stop) => {
                sink.pause();
                if let Err(e) = sink.try_seek(Duration::ZERO) {
                    debug!("playback: rewind failed: {e}");
                }
            }
            Ok(PlayCmd::SetRate(r)) => {
                rate = r;
                sink.set_speed(r);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                sink.stop();
                break;
            }
        }

        if let Some(handle) = active.poll_end(sink.empty()) {
            let mut shadow = lock_shadow(&shadow);
            // A newer play() may already have replaced the source.
            if shadow.source.as_ref() == Some(&handle) {
                shadow.ended = true;
            }
            drop(shadow);
            let _ = events.send(EngineEvent::Ended(handle));
        }
    }
}

/// Source currently in the sink, and whether its end was already reported.
#[derive(Debug, Default)]
struct ActiveSource {
    handle: Option<AudioHandle>,
    end_reported: bool,
}

impl ActiveSource {
    fn start(&mut self, handle: AudioHandle) {
        self.handle = Some(handle);
        self.end_reported = false;
    }

    /// Nothing is in the sink anymore.
    fn clear(&mut self) {
        self.handle = None;
        self.end_reported = false;
    }

    /// The handle whose end should be reported now, at most once per start.
    fn poll_end(&mut self, sink_empty: bool) -> Option<AudioHandle> {
        if self.end_reported || !sink_empty {
            return None;
        }
        let handle = self.handle.clone()?;
        self.end_reported = true;
        Some(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: u64) -> AudioHandle {
        AudioHandle {
            id,
            locator: format!("segment-{id}.wav"),
        }
    }

    #[test]
    fn end_is_reported_once_per_source() {
        let mut active = ActiveSource::default();
        assert_eq!(active.poll_end(true), None);

        active.start(handle(1));
        assert_eq!(active.poll_end(false), None);
        assert_eq!(active.poll_end(true), Some(handle(1)));
        assert_eq!(active.poll_end(true), None);

        active.start(handle(2));
        assert_eq!(active.poll_end(true), Some(handle(2)));
    }

    #[test]
    fn failed_replacement_does_not_report_previous_source() {
        let mut active = ActiveSource::default();
        active.start(handle(1));

        // Sink creation or decoding failed for the next source.
        active.clear();
        assert_eq!(active.poll_end(true), None);
    }
}
