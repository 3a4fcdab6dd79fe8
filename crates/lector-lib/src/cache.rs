//! Audio fetch cache with in-flight request deduplication.
//!
//! ```text
//! fetch(key) → ready[key]?            → hit, no call
//!            → pending[key]?          → join the shared future
//!            → spawn synthesize task  → register pending[key]
//!                 on completion: ready[key] = handle (success), drop pending[key]
//! ```
//!
//! The synthesis call runs as its own task, so it finishes (and fills the
//! cache) even when every caller that was waiting on it has gone away.
//! Waiters join through a [`Shared`] future; at most one call per key is ever
//! in flight.
//!
//! Generation-based reset: [`AudioCache::clear`] bumps a generation counter,
//! cancels every pending call and releases every cached handle. A call from
//! an older generation that still completes successfully has its handle
//! released instead of stored, and its waiters see it as cancelled.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use lector_core::error::SynthesisError;
use lector_core::types::{AudioHandle, CacheKey};

use crate::synth::{SynthesisClient, SynthesisRequest};

type SharedFetch = Shared<BoxFuture<'static, Result<AudioHandle, SynthesisError>>>;

struct PendingFetch {
    fetch: SharedFetch,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Maps {
    ready: HashMap<CacheKey, AudioHandle>,
    pending: HashMap<CacheKey, PendingFetch>,
    generation: u64,
}

/// Memoizes synthesized audio per [`CacheKey`].
pub struct AudioCache {
    synth: Arc<dyn SynthesisClient>,
    maps: Arc<Mutex<Maps>>,
}

impl AudioCache {
    pub fn new(synth: Arc<dyn SynthesisClient>) -> Self {
        Self {
            synth,
            maps: Arc::new(Mutex::new(Maps::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Maps> {
        lock_maps(&self.maps)
    }

    /// Resolve `key`, synthesizing `request` only if neither a cached handle
    /// nor an in-flight call exists for it.
    pub async fn fetch(
        &self,
        key: CacheKey,
        request: SynthesisRequest,
    ) -> Result<AudioHandle, SynthesisError> {
        let fetch = {
            let mut maps = self.lock();
            if let Some(handle) = maps.ready.get(&key) {
                debug!("cache: hit {key}");
                return Ok(handle.clone());
            }
            if let Some(pending) = maps.pending.get(&key) {
                debug!("cache: joining in-flight {key}");
                pending.fetch.clone()
            } else {
                debug!("cache: miss {key}, synthesizing");
                self.start(&mut maps, key, request)
            }
        };

        fetch.await
    }

    /// Spawn the synthesis task and register it as pending. Called with the
    /// map lock held so the task cannot settle before it is registered.
    fn start(&self, maps: &mut Maps, key: CacheKey, request: SynthesisRequest) -> SharedFetch {
        let cancel = CancellationToken::new();
        let generation = maps.generation;

        let task = {
            let synth = Arc::clone(&self.synth);
            let shared_maps = Arc::clone(&self.maps);
            let key = key.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let result = synth.synthesize(request, cancel).await;
                if settle(&shared_maps, synth.as_ref(), &key, generation, &result) {
                    result
                } else {
                    Err(SynthesisError::Cancelled)
                }
            })
        };

        let shared_maps = Arc::clone(&self.maps);
        let task_key = key.clone();
        let fetch = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    // The task never reached `settle`; unblock the key.
                    let mut maps = lock_maps(&shared_maps);
                    if maps.generation == generation {
                        maps.pending.remove(&task_key);
                    }
                    if e.is_cancelled() {
                        Err(SynthesisError::Cancelled)
                    } else {
                        Err(SynthesisError::Service {
                            status: None,
                            message: Some(format!("synthesis task failed: {e}")),
                        })
                    }
                }
            }
        }
        .boxed()
        .shared();

        maps.pending.insert(
            key,
            PendingFetch {
                fetch: fetch.clone(),
                cancel,
            },
        );
        fetch
    }

    /// Cancel every pending call and release every cached handle.
    pub fn clear(&self) {
        let (released, cancelled) = {
            let mut maps = self.lock();
            maps.generation += 1;
            let cancelled = maps.pending.len();
            for (_, pending) in maps.pending.drain() {
                pending.cancel.cancel();
            }
            let released: Vec<AudioHandle> = maps.ready.drain().map(|(_, h)| h).collect();
            (released, cancelled)
        };

        for handle in &released {
            self.synth.release(handle);
        }
        info!(
            "cache: cleared ({} released, {} cancelled)",
            released.len(),
            cancelled
        );
    }

    /// Cached handle for `key`, without triggering synthesis.
    pub fn get(&self, key: &CacheKey) -> Option<AudioHandle> {
        self.lock().ready.get(key).cloned()
    }

    pub fn is_pending(&self, key: &CacheKey) -> bool {
        self.lock().pending.contains_key(key)
    }

    /// Number of resolved entries.
    pub fn len(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of in-flight calls.
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }
}

impl Drop for AudioCache {
    fn drop(&mut self) {
        self.clear();
    }
}

fn lock_maps(maps: &Mutex<Maps>) -> MutexGuard<'_, Maps> {
    maps.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Record a finished call. Stale generations only free what they produced
/// and report `false`; their waiters must not see the released handle.
fn settle(
    maps: &Mutex<Maps>,
    synth: &dyn SynthesisClient,
    key: &CacheKey,
    generation: u64,
    result: &Result<AudioHandle, SynthesisError>,
) -> bool {
    let mut guard = lock_maps(maps);
    if guard.generation != generation {
        drop(guard);
        if let Ok(handle) = result {
            debug!("cache: {key} finished after clear, releasing");
            synth.release(handle);
        }
        return false;
    }

    guard.pending.remove(key);
    match result {
        Ok(handle) => {
            guard.ready.insert(key.clone(), handle.clone());
        }
        Err(e) => debug!("cache: {key} failed: {e}"),
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeSynth, settle_tasks};

    fn request(text: &str) -> SynthesisRequest {
        SynthesisRequest {
            text: text.into(),
            voice: "alloy".into(),
            model: "m".into(),
            speed: 1.0,
            credential: "sk-test".into(),
        }
    }

    fn key(index: usize) -> CacheKey {
        CacheKey::new(index, "alloy", "m")
    }

    #[tokio::test]
    async fn second_fetch_is_a_hit() {
        let synth = FakeSynth::new();
        let cache = AudioCache::new(synth.clone());

        let first = cache.fetch(key(0), request("A")).await.unwrap();
        let second = cache.fetch(key(0), request("A")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(synth.call_count(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.pending_len(), 0);
    }

    #[tokio::test]
    async fn concurrent_fetches_share_one_call() {
        let synth = FakeSynth::new();
        synth.hold("A");
        let cache = Arc::new(AudioCache::new(synth.clone()));

        let a = tokio::spawn({
            let cache = cache.clone();
            async move { cache.fetch(key(0), request("A")).await }
        });
        let b = tokio::spawn({
            let cache = cache.clone();
            async move { cache.fetch(key(0), request("A")).await }
        });
        settle_tasks().await;

        assert_eq!(synth.call_count(), 1);
        assert!(cache.is_pending(&key(0)));

        synth.open("A");
        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(synth.call_count(), 1);
        assert_eq!(cache.get(&key(0)), Some(a));
        assert!(!cache.is_pending(&key(0)));
    }

    #[tokio::test]
    async fn different_voice_is_a_different_entry() {
        let synth = FakeSynth::new();
        let cache = AudioCache::new(synth.clone());

        cache.fetch(key(0), request("A")).await.unwrap();
        let mut echo = request("A");
        echo.voice = "echo".into();
        cache.fetch(CacheKey::new(0, "echo", "m"), echo).await.unwrap();

        assert_eq!(synth.call_count(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn failure_reaches_every_waiter_and_is_not_cached() {
        let synth = FakeSynth::new();
        synth.hold("A");
        synth.fail_with(SynthesisError::from_status(429, None));
        let cache = Arc::new(AudioCache::new(synth.clone()));

        let a = tokio::spawn({
            let cache = cache.clone();
            async move { cache.fetch(key(0), request("A")).await }
        });
        let b = tokio::spawn({
            let cache = cache.clone();
            async move { cache.fetch(key(0), request("A")).await }
        });
        settle_tasks().await;
        synth.open("A");

        assert!(matches!(a.await.unwrap(), Err(SynthesisError::RateLimited { .. })));
        assert!(matches!(b.await.unwrap(), Err(SynthesisError::RateLimited { .. })));
        assert_eq!(synth.call_count(), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.pending_len(), 0);
    }

    #[tokio::test]
    async fn clear_empties_both_maps_and_releases_handles() {
        let synth = FakeSynth::new();
        let cache = Arc::new(AudioCache::new(synth.clone()));

        let cached = cache.fetch(key(0), request("A")).await.unwrap();

        synth.hold("B");
        let pending = tokio::spawn({
            let cache = cache.clone();
            async move { cache.fetch(key(1), request("B")).await }
        });
        settle_tasks().await;
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.pending_len(), 1);

        cache.clear();

        assert_eq!(cache.len(), 0);
        assert_eq!(cache.pending_len(), 0);
        assert_eq!(synth.released(), vec![cached]);
        assert_eq!(pending.await.unwrap(), Err(SynthesisError::Cancelled));
    }

    #[tokio::test]
    async fn result_landing_after_clear_is_released_and_cancelled() {
        let synth = FakeSynth::new();
        synth.hold("A");
        synth.ignore_cancel();
        let cache = Arc::new(AudioCache::new(synth.clone()));

        let waiter = tokio::spawn({
            let cache = cache.clone();
            async move { cache.fetch(key(0), request("A")).await }
        });
        settle_tasks().await;

        cache.clear();
        synth.open("A");
        assert_eq!(waiter.await.unwrap(), Err(SynthesisError::Cancelled));
        settle_tasks().await;

        assert!(cache.is_empty());
        assert_eq!(cache.pending_len(), 0);
        let released = synth.released();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].locator, "alloy|m|A");
    }

    #[tokio::test]
    async fn abandoned_fetch_still_fills_cache() {
        let synth = FakeSynth::new();
        synth.hold("A");
        let cache = Arc::new(AudioCache::new(synth.clone()));

        let waiter = tokio::spawn({
            let cache = cache.clone();
            async move { cache.fetch(key(0), request("A")).await }
        });
        settle_tasks().await;
        waiter.abort();
        let _ = waiter.await;

        synth.open("A");
        settle_tasks().await;

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.pending_len(), 0);
        assert_eq!(synth.call_count(), 1);
    }
}
