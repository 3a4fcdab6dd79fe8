//! In-memory synthesis client and audio engine for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use lector_core::error::SynthesisError;
use lector_core::types::AudioHandle;

use crate::playback::AudioEngine;
use crate::synth::{SynthesisClient, SynthesisRequest};

/// Let spawned tasks run until they block.
pub async fn settle_tasks() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Records calls; can hold individual texts until opened, or fail them.
#[derive(Default)]
pub struct FakeSynth {
    calls: Mutex<Vec<SynthesisRequest>>,
    released: Mutex<Vec<AudioHandle>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    failure: Mutex<Option<SynthesisError>>,
    ignore_cancel: AtomicBool,
    next_id: AtomicU64,
}

impl FakeSynth {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn gate(&self, text: &str) -> Option<Arc<Notify>> {
        self.gates.lock().unwrap().get(text).cloned()
    }

    /// Block synthesis of `text` until [`open`](Self::open).
    pub fn hold(&self, text: &str) {
        self.gates
            .lock()
            .unwrap()
            .insert(text.to_string(), Arc::new(Notify::new()));
    }

    pub fn open(&self, text: &str) {
        if let Some(gate) = self.gates.lock().unwrap().remove(text) {
            gate.notify_one();
        }
    }

    /// Every subsequent call resolves with `err`.
    pub fn fail_with(&self, err: SynthesisError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    pub fn succeed(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn ignore_cancel(&self) {
        self.ignore_cancel.store(true, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<SynthesisRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn released(&self) -> Vec<AudioHandle> {
        self.released.lock().unwrap().clone()
    }
}

#[async_trait]
impl SynthesisClient for FakeSynth {
    async fn synthesize(
        &self,
        request: SynthesisRequest,
        cancel: CancellationToken,
    ) -> Result<AudioHandle, SynthesisError> {
        self.calls.lock().unwrap().push(request.clone());

        if let Some(gate) = self.gate(&request.text) {
            if self.ignore_cancel.load(Ordering::SeqCst) {
                gate.notified().await;
            } else {
                tokio::select! {
                    _ = gate.notified() => {}
                    _ = cancel.cancelled() => return Err(SynthesisError::Cancelled),
                }
            }
        }

        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(AudioHandle {
            id,
            locator: format!("{}|{}|{}", request.voice, request.model, request.text),
        })
    }

    fn release(&self, handle: &AudioHandle) {
        self.released.lock().unwrap().push(handle.clone());
    }
}

#[derive(Debug, Default)]
struct EngineState {
    source: Option<AudioHandle>,
    played: Vec<AudioHandle>,
    playing: bool,
    started: bool,
    ended: bool,
    rate: f32,
    stops: usize,
}

/// Audio engine that only tracks what it was told.
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<EngineState>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(EngineState {
                rate: 1.0,
                ..Default::default()
            }),
        })
    }

    /// Every source that was ever started, in order.
    pub fn played(&self) -> Vec<AudioHandle> {
        self.state.lock().unwrap().played.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().unwrap().playing
    }

    pub fn rate(&self) -> f32 {
        self.state.lock().unwrap().rate
    }

    pub fn stops(&self) -> usize {
        self.state.lock().unwrap().stops
    }

    /// Run the active source to its end, as the output device would.
    pub fn finish(&self) -> Option<AudioHandle> {
        let mut st = self.state.lock().unwrap();
        st.playing = false;
        st.ended = true;
        st.source.clone()
    }
}

impl AudioEngine for FakeEngine {
    fn play(&self, handle: &AudioHandle) {
        let mut st = self.state.lock().unwrap();
        st.source = Some(handle.clone());
        st.played.push(handle.clone());
        st.playing = true;
        st.started = true;
        st.ended = false;
    }

    fn pause(&self) {
        self.state.lock().unwrap().playing = false;
    }

    fn resume(&self) {
        let mut st = self.state.lock().unwrap();
        if st.source.is_some() && !st.ended {
            st.playing = true;
        }
    }

    fn stop(&self) {
        let mut st = self.state.lock().unwrap();
        st.playing = false;
        st.started = false;
        st.stops += 1;
    }

    fn set_rate(&self, rate: f32) {
        self.state.lock().unwrap().rate = rate;
    }

    fn source(&self) -> Option<AudioHandle> {
        self.state.lock().unwrap().source.clone()
    }

    fn is_resumable(&self) -> bool {
        let st = self.state.lock().unwrap();
        st.source.is_some() && st.started && !st.ended
    }
}
