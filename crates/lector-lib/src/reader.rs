//! Reader — the playback controller.
//!
//! Decides which segment is current, drives the single [`AudioEngine`],
//! auto-advances on natural end, warms the cache ahead of the listener, and
//! reacts to settings changes.
//!
//! ```text
//! play_segment(i) → engine.stop() → claim intent i → Loading(i)
//!     → cache.fetch(i)            (hit / join / synthesize)
//!     → intent still i?  no → discard silently
//!                        yes → engine.play → Playing(i) → prefetch i+1, i+2
//! engine Ended → play_segment(i+1) or Idle at the last segment
//! ```
//!
//! Staleness guard: every `play_segment` claims a fresh intent ticket, and a
//! fetched result is committed only while its ticket is still the latest.
//! Network completions may arrive in any order; the last request wins.
//! Pausing and document changes invalidate the ticket too, so a fetch that
//! lands afterwards fills the cache but never starts playback.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lector_core::error::SynthesisError;
use lector_core::segment::SegmentStore;
use lector_core::settings::{Settings, SettingsStore, clamp_speed};
use lector_core::types::{AudioHandle, CacheKey, ModelStrategy, PlaybackPhase, ReaderStatus};

use crate::cache::AudioCache;
use crate::playback::{AudioEngine, EngineEvent};
use crate::synth::{NEUTRAL_SPEED, SynthesisClient, SynthesisRequest};

/// How many upcoming segments are warmed after each successful start.
pub const PREFETCH_DEPTH: usize = 2;

/// Latest requested target. `index == None` means nothing may commit.
#[derive(Debug, Default, Clone, Copy)]
struct Intent {
    ticket: u64,
    index: Option<usize>,
}

impl Intent {
    fn claim(&mut self, index: usize) -> u64 {
        self.ticket += 1;
        self.index = Some(index);
        self.ticket
    }

    fn invalidate(&mut self) {
        self.ticket += 1;
        self.index = None;
    }

    fn is_current(&self, ticket: u64, index: usize) -> bool {
        self.ticket == ticket && self.index == Some(index)
    }
}

struct State {
    segments: SegmentStore,
    settings: Settings,
    intent: Intent,
    phase: PlaybackPhase,
    current: Option<usize>,
    is_playing: bool,
    has_started_reading: bool,
    error: Option<String>,
    /// Segment whose audio the engine holds.
    loaded: Option<usize>,
}

impl State {
    fn snapshot(&self) -> ReaderStatus {
        let settings = &self.settings;
        ReaderStatus {
            phase: self.phase,
            current_segment_index: self.current,
            is_playing: self.is_playing,
            has_started_reading: self.has_started_reading,
            error: self.error.clone(),
            ..ReaderStatus::idle(
                self.segments.len(),
                &settings.voice,
                settings.speed,
                settings.model_strategy,
            )
        }
    }

    fn model_id(&self) -> &'static str {
        self.settings.model_strategy.model_id(self.segments.len())
    }

    fn reset_playback(&mut self) {
        self.intent.invalidate();
        self.phase = PlaybackPhase::Idle;
        self.current = None;
        self.is_playing = false;
        self.has_started_reading = false;
        self.error = None;
        self.loaded = None;
    }
}

struct Inner {
    cache: AudioCache,
    engine: Arc<dyn AudioEngine>,
    store: Arc<dyn SettingsStore>,
    state: Mutex<State>,
    status_tx: watch::Sender<ReaderStatus>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, settings: &Settings) {
        if let Err(e) = self.store.save(settings) {
            warn!("reader: failed to persist settings: {e}");
        }
    }
}

/// Cloneable handle to the playback controller.
#[derive(Clone)]
pub struct Reader {
    inner: Arc<Inner>,
}

impl Reader {
    /// Build a reader with settings loaded from `store`.
    pub fn new(
        synth: Arc<dyn SynthesisClient>,
        engine: Arc<dyn AudioEngine>,
        store: Arc<dyn SettingsStore>,
    ) -> Self {
        let mut settings = store.load().unwrap_or_else(|e| {
            warn!("reader: failed to load settings, using defaults: {e}");
            Settings::default()
        });
        settings.speed = clamp_speed(settings.speed);
        engine.set_rate(settings.speed);

        let state = State {
            segments: SegmentStore::empty(),
            settings,
            intent: Intent::default(),
            phase: PlaybackPhase::Idle,
            current: None,
            is_playing: false,
            has_started_reading: false,
            error: None,
            loaded: None,
        };
        let (status_tx, _) = watch::channel(state.snapshot());

        Self {
            inner: Arc::new(Inner {
                cache: AudioCache::new(synth),
                engine,
                store,
                state: Mutex::new(state),
                status_tx,
            }),
        }
    }

    /// Apply `f` to the state and publish the snapshot if it changed.
    fn update<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.inner.lock();
        let out = f(&mut state);
        let snapshot = state.snapshot();
        self.inner.status_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
        out
    }

    /// Feed engine events into the reader until the channel closes or the
    /// reader is dropped.
    pub fn spawn_event_loop(&self, mut events: mpsc::UnboundedReceiver<EngineEvent>) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                Reader { inner }.handle_engine_event(event).await;
            }
            debug!("reader: engine event loop finished");
        })
    }

    // ─── Observation ───────────────────────────────────────────────────────

    pub fn status(&self) -> ReaderStatus {
        self.inner.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReaderStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn settings(&self) -> Settings {
        self.inner.lock().settings.clone()
    }

    pub fn segments(&self) -> SegmentStore {
        self.inner.lock().segments.clone()
    }

    pub fn cache(&self) -> &AudioCache {
        &self.inner.cache
    }

    // ─── Document lifecycle ────────────────────────────────────────────────

    /// Replace the document. Halts playback and drops all cached audio.
    pub fn load_document(&self, segments: SegmentStore) {
        let count = segments.len();
        self.update(|st| {
            self.inner.engine.stop();
            st.reset_playback();
            st.segments = segments;
        });
        self.inner.cache.clear();
        info!("reader: loaded document with {count} segments");
    }

    pub fn discard_document(&self) {
        self.load_document(SegmentStore::empty());
    }

    /// Cancel in-flight synthesis and release cached audio. Playback state
    /// is left alone.
    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    // ─── Fetch ─────────────────────────────────────────────────────────────

    /// Audio for segment `index` under the current voice and model.
    pub async fn fetch_audio(&self, index: usize) -> Result<AudioHandle, SynthesisError> {
        let (key, request) = {
            let st = self.inner.lock();
            let Some(segment) = st.segments.get(index) else {
                return Err(SynthesisError::OutOfRange {
                    index,
                    len: st.segments.len(),
                });
            };
            let model = st.model_id();
            let key = CacheKey::new(index, st.settings.voice.clone(), model);
            let request = SynthesisRequest {
                text: segment.text.clone(),
                voice: st.settings.voice.clone(),
                model: model.to_string(),
                speed: NEUTRAL_SPEED,
                credential: st.settings.credential.clone(),
            };
            (key, request)
        };
        self.inner.cache.fetch(key, request).await
    }

    /// Warm the cache for the segments after `index`. Errors are swallowed.
    fn prefetch_after(&self, index: usize) {
        let len = self.inner.lock().segments.len();
        for next in (index + 1..=index + PREFETCH_DEPTH).filter(|&i| i < len) {
            let reader = self.clone();
            tokio::spawn(async move {
                if let Err(e) = reader.fetch_audio(next).await {
                    debug!("prefetch[{next}]: {e}");
                }
            });
        }
    }

    // ─── Playback ──────────────────────────────────────────────────────────

    /// Make `index` the current segment and play it from the top.
    ///
    /// Out-of-range indices are ignored. Returns once the audio is playing,
    /// has failed, or has been superseded by a newer request.
    pub async fn play_segment(&self, index: usize) {
        let ticket = self.update(|st| {
            if index >= st.segments.len() {
                return None;
            }
            self.inner.engine.stop();
            let ticket = st.intent.claim(index);
            st.phase = PlaybackPhase::Loading;
            st.current = Some(index);
            st.is_playing = true;
            st.has_started_reading = true;
            st.error = None;
            Some(ticket)
        });
        let Some(ticket) = ticket else {
            debug!("play[{index}]: out of range, ignored");
            return;
        };

        // The commit runs on its own task so dropping this future never
        // strands the reader in `Loading`.
        let reader = self.clone();
        let load = tokio::spawn(async move { reader.load_and_commit(ticket, index).await });
        if let Err(e) = load.await {
            warn!("play[{index}]: load task failed: {e}");
        }
    }

    async fn load_and_commit(&self, ticket: u64, index: usize) {
        let result = self.fetch_audio(index).await;

        let started = self.update(|st| {
            if !st.intent.is_current(ticket, index) {
                debug!("play[{index}]: superseded, result discarded");
                return false;
            }
            match &result {
                Ok(handle) => {
                    self.inner.engine.play(handle);
                    st.loaded = Some(index);
                    st.phase = PlaybackPhase::Playing;
                    true
                }
                Err(e) => {
                    st.intent.invalidate();
                    st.phase = PlaybackPhase::Paused;
                    st.is_playing = false;
                    if !e.is_silent() {
                        warn!("play[{index}]: {e}");
                        st.error = e.user_message();
                    }
                    false
                }
            }
        });

        if started {
            self.prefetch_after(index);
        }
    }

    /// Play when stopped, pause when playing.
    pub async fn toggle_play(&self) {
        let next = self.update(|st| {
            if st.is_playing {
                self.inner.engine.pause();
                st.intent.invalidate();
                st.is_playing = false;
                st.phase = PlaybackPhase::Paused;
                return None;
            }
            match st.current {
                None if !st.segments.is_empty() => Some(0),
                None => None,
                Some(index) if st.loaded == Some(index) && self.inner.engine.is_resumable() => {
                    self.inner.engine.resume();
                    st.intent.claim(index);
                    st.is_playing = true;
                    st.phase = PlaybackPhase::Playing;
                    st.error = None;
                    None
                }
                Some(index) => Some(index),
            }
        });

        if let Some(index) = next {
            self.play_segment(index).await;
        }
    }

    /// Jump to the segment after the current one, if any.
    pub async fn next(&self) {
        let target = {
            let st = self.inner.lock();
            st.current
                .map(|c| c + 1)
                .filter(|&n| n < st.segments.len())
        };
        if let Some(index) = target {
            self.play_segment(index).await;
        }
    }

    /// Jump to the segment before the current one, if any.
    pub async fn previous(&self) {
        let target = self.inner.lock().current.and_then(|c| c.checked_sub(1));
        if let Some(index) = target {
            self.play_segment(index).await;
        }
    }

    /// Jump straight to `index`. Same as [`play_segment`](Self::play_segment).
    pub async fn seek(&self, index: usize) {
        self.play_segment(index).await;
    }

    /// Dispatch one engine notification.
    pub async fn handle_engine_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::Ended(handle) => {
                let next = self.update(|st| {
                    if !self.owns_active_source(st, &handle) {
                        debug!("reader: ignoring end of inactive source {}", handle.id);
                        return None;
                    }
                    let current = st.current?;
                    if current + 1 < st.segments.len() {
                        Some(current + 1)
                    } else {
                        st.intent.invalidate();
                        st.is_playing = false;
                        st.phase = PlaybackPhase::Idle;
                        info!("reader: reached end of document");
                        None
                    }
                });
                if let Some(index) = next {
                    self.play_segment(index).await;
                }
            }
            EngineEvent::Error { handle, message } => {
                self.update(|st| {
                    if !self.owns_active_source(st, &handle) {
                        return;
                    }
                    warn!("reader: playback failed: {message}");
                    st.intent.invalidate();
                    st.is_playing = false;
                    st.phase = PlaybackPhase::Paused;
                    st.loaded = None;
                    st.error = Some(format!("Playback failed: {message}"));
                });
            }
        }
    }

    /// An event about `handle` only counts while that handle is what the
    /// engine is playing for the current segment.
    fn owns_active_source(&self, st: &State, handle: &AudioHandle) -> bool {
        st.phase == PlaybackPhase::Playing
            && st.loaded.is_some()
            && st.loaded == st.current
            && self.inner.engine.source().as_ref() == Some(handle)
    }

    pub fn dismiss_error(&self) {
        self.update(|st| st.error = None);
    }

    // ─── Settings ──────────────────────────────────────────────────────────

    /// Change voice. Audio depends on it, so a playing segment is resynthesized.
    pub async fn set_voice(&self, voice: impl Into<String>) {
        let voice = voice.into();
        let replay = self.update(|st| {
            if st.settings.voice == voice {
                return None;
            }
            info!("reader: voice {} -> {voice}", st.settings.voice);
            st.settings.voice = voice;
            self.inner.persist(&st.settings);
            st.current.filter(|_| st.is_playing)
        });
        if let Some(index) = replay {
            self.play_segment(index).await;
        }
    }

    /// Change model strategy. A playing segment is resynthesized only when
    /// the resolved model actually changes.
    pub async fn set_model_strategy(&self, strategy: ModelStrategy) {
        let replay = self.update(|st| {
            if st.settings.model_strategy == strategy {
                return None;
            }
            let before = st.model_id();
            info!("reader: model strategy {} -> {strategy}", st.settings.model_strategy);
            st.settings.model_strategy = strategy;
            self.inner.persist(&st.settings);
            st.current
                .filter(|_| st.is_playing && st.model_id() != before)
        });
        if let Some(index) = replay {
            self.play_segment(index).await;
        }
    }

    /// Change playback rate in place. Never touches the cache.
    pub fn set_speed(&self, speed: f32) {
        let speed = clamp_speed(speed);
        self.update(|st| {
            if st.settings.speed == speed {
                return;
            }
            debug!("reader: speed -> {speed}");
            st.settings.speed = speed;
            self.inner.engine.set_rate(speed);
            self.inner.persist(&st.settings);
        });
    }

    /// Change the synthesis credential. Takes effect on the next fetch.
    pub fn set_credential(&self, credential: impl Into<String>) {
        let credential = credential.into();
        self.update(|st| {
            if st.settings.credential == credential {
                return;
            }
            st.settings.credential = credential;
            self.inner.persist(&st.settings);
        });
    }
}
