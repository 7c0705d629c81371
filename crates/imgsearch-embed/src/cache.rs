//! Bounded cache of loaded encoders.
//!
//! At most `capacity` models occupy device memory at any instant, counting
//! both resident models and loads in progress. When a new model is needed
//! and the budget is full, the least recently used resident model is removed
//! from the cache and unloaded before the new load starts.
//!
//! Concurrent requests for the same missing model share one load: the first
//! caller registers an in-flight entry and performs it, later callers block
//! on that entry and receive the same outcome (the loaded encoder or a clone
//! of the error). A failed load leaves nothing behind, so the next request
//! tries again.
//!
//! The cache lock is never held while a model loads or unloads.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use candle_core::Device;
use image::DynamicImage;
use lru::LruCache;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info, warn};

use imgsearch_core::types::{Embedding, ModelDescriptor};
use imgsearch_core::{Error, Registry, Result};

use crate::encoder::{Encoder, EncoderFactory};

/// A cache-owned encoder. Callers hold an `Arc` to it only for the duration
/// of one encode call; once evicted every call fails with `Error::Evicted`.
pub struct ResidentEncoder {
    descriptor: ModelDescriptor,
    inner: RwLock<Option<Box<dyn Encoder>>>,
}

impl ResidentEncoder {
    fn new(descriptor: ModelDescriptor, encoder: Box<dyn Encoder>) -> Self {
        Self { descriptor, inner: RwLock::new(Some(encoder)) }
    }

    pub fn descriptor(&self) -> &ModelDescriptor { &self.descriptor }
    pub fn model_id(&self) -> &str { &self.descriptor.id }
    pub fn is_loaded(&self) -> bool { self.inner.read().is_some() }

    pub fn encode_image(&self, image: &DynamicImage) -> Result<Embedding> {
        let guard = self.inner.read();
        let encoder = guard.as_ref().ok_or_else(|| Error::Evicted(self.descriptor.id.clone()))?;
        self.checked(encoder.encode_image(image)?)
    }

    pub fn encode_text(&self, text: &str) -> Result<Embedding> {
        let guard = self.inner.read();
        let encoder = guard.as_ref().ok_or_else(|| Error::Evicted(self.descriptor.id.clone()))?;
        self.checked(encoder.encode_text(text)?)
    }

    fn checked(&self, v: Embedding) -> Result<Embedding> {
        if v.len() != self.descriptor.vector_dim {
            return Err(Error::Operation(format!(
                "{} produced {} dimensions, expected {}",
                self.descriptor.id, v.len(), self.descriptor.vector_dim
            )));
        }
        Ok(v)
    }

    /// Waits for in-progress encode calls, then drops the weights.
    fn unload(&self) {
        let mut guard = self.inner.write();
        if let Some(mut encoder) = guard.take() {
            encoder.unload();
        }
    }
}

type LoadOutcome = Result<Arc<ResidentEncoder>>;

#[derive(Default)]
struct Flight {
    outcome: Mutex<Option<LoadOutcome>>,
    done: Condvar,
}

impl Flight {
    fn wait(&self) -> LoadOutcome {
        let mut outcome = self.outcome.lock();
        loop {
            if let Some(result) = outcome.as_ref() {
                return result.clone();
            }
            self.done.wait(&mut outcome);
        }
    }

    fn complete(&self, result: LoadOutcome) {
        *self.outcome.lock() = Some(result);
        self.done.notify_all();
    }
}

struct CacheState {
    /// Unbounded by itself; `occupied()` against the cache capacity bounds it.
    resident: LruCache<String, Arc<ResidentEncoder>>,
    in_flight: HashMap<String, Arc<Flight>>,
    /// Evicted by `evict_one` and still releasing memory. Victims evicted
    /// for a load are not counted here: their slot passes to that load.
    unloading: usize,
}

impl Default for CacheState {
    fn default() -> Self {
        Self { resident: LruCache::unbounded(), in_flight: HashMap::new(), unloading: 0 }
    }
}

impl CacheState {
    fn occupied(&self) -> usize {
        self.resident.len() + self.in_flight.len() + self.unloading
    }
}

pub struct ModelCache {
    registry: Arc<Registry>,
    factory: Arc<dyn EncoderFactory>,
    device: Device,
    capacity: usize,
    state: Mutex<CacheState>,
    slot_freed: Condvar,
    current: RwLock<String>,
}

impl ModelCache {
    pub fn new(
        registry: Arc<Registry>,
        factory: Arc<dyn EncoderFactory>,
        device: Device,
        capacity: usize,
        default_model: &str,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidConfig("model cache capacity must be at least 1".into()));
        }
        registry.lookup(default_model)?;
        Ok(Self {
            registry,
            factory,
            device,
            capacity,
            state: Mutex::new(CacheState::default()),
            slot_freed: Condvar::new(),
            current: RwLock::new(default_model.to_string()),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> { &self.registry }
    pub fn capacity(&self) -> usize { self.capacity }

    /// Return a loaded encoder for `model_id`, loading (and evicting) if needed.
    pub fn acquire(&self, model_id: &str) -> Result<Arc<ResidentEncoder>> {
        let descriptor = self.registry.lookup(model_id)?.clone();
        let mut victims = Vec::new();

        let flight = {
            let mut state = self.state.lock();
            loop {
                if let Some(encoder) = state.resident.get(model_id) {
                    return Ok(Arc::clone(encoder));
                }
                if let Some(flight) = state.in_flight.get(model_id).cloned() {
                    drop(state);
                    debug!(model_id, "waiting for in-flight load");
                    return flight.wait();
                }
                // every slot held by a load in progress: nothing evictable yet
                if state.in_flight.len() + state.unloading >= self.capacity {
                    self.slot_freed.wait(&mut state);
                    continue;
                }
                while state.occupied() >= self.capacity {
                    match state.resident.pop_lru() {
                        Some((_, victim)) => victims.push(victim),
                        None => break,
                    }
                }
                break;
            }
            let flight = Arc::new(Flight::default());
            state.in_flight.insert(model_id.to_string(), Arc::clone(&flight));
            flight
        };

        let mut guard = FlightGuard { cache: self, model_id, flight: &flight, finished: false };

        for victim in victims {
            info!(model_id = victim.model_id(), "evicting least recently used model");
            victim.unload();
        }

        let start = Instant::now();
        info!(model_id, family = %descriptor.family, "loading model");
        let mut encoder = self.factory.create(&descriptor);
        let outcome = match encoder.load(&descriptor, &self.device) {
            Ok(()) => Ok(Arc::new(ResidentEncoder::new(descriptor, encoder))),
            Err(Error::Load(msg)) => Err(Error::Load(msg)),
            Err(other) => Err(Error::Load(other.to_string())),
        };
        match &outcome {
            Ok(_) => info!(model_id, elapsed_ms = start.elapsed().as_millis() as u64, "model ready"),
            Err(e) => warn!(model_id, error = %e, "model load failed"),
        }
        guard.finish(outcome.clone());
        outcome
    }

    /// Whether `model_id` is in the resident set. A model evicted to make room
    /// for a load reports `false` as soon as it is removed, while its weights
    /// may still be releasing on the loading thread; its slot already counts
    /// toward that load.
    pub fn is_loaded(&self, model_id: &str) -> bool {
        self.state.lock().resident.contains(model_id)
    }

    pub fn is_loading(&self, model_id: &str) -> bool {
        self.state.lock().in_flight.contains_key(model_id)
    }

    /// Resident model ids, least recently used first.
    pub fn list_loaded(&self) -> Vec<String> {
        self.state.lock().resident.iter().rev().map(|(id, _)| id.clone()).collect()
    }

    /// Unload the least recently used resident model, if any.
    pub fn evict_one(&self) -> Option<String> {
        let victim = {
            let mut state = self.state.lock();
            let (_, victim) = state.resident.pop_lru()?;
            state.unloading += 1;
            victim
        };
        info!(model_id = victim.model_id(), "evicting model");
        victim.unload();
        self.state.lock().unloading -= 1;
        self.slot_freed.notify_all();
        Some(victim.model_id().to_string())
    }

    pub fn current(&self) -> String {
        self.current.read().clone()
    }

    /// Change the default model. Does not load it.
    pub fn set_current(&self, model_id: &str) -> Result<()> {
        self.registry.lookup(model_id)?;
        *self.current.write() = model_id.to_string();
        info!(model_id, "current model changed");
        Ok(())
    }
}

/// Publishes the outcome of a load exactly once, even if the loading thread
/// unwinds before reaching `finish`.
struct FlightGuard<'a> {
    cache: &'a ModelCache,
    model_id: &'a str,
    flight: &'a Flight,
    finished: bool,
}

impl FlightGuard<'_> {
    fn finish(&mut self, outcome: LoadOutcome) {
        if self.finished {
            return;
        }
        self.finished = true;
        {
            let mut state = self.cache.state.lock();
            state.in_flight.remove(self.model_id);
            if let Ok(encoder) = &outcome {
                state.resident.push(self.model_id.to_string(), Arc::clone(encoder));
            }
        }
        self.flight.complete(outcome);
        self.cache.slot_freed.notify_all();
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.finish(Err(Error::Load(format!("load of {} was abandoned", self.model_id))));
        }
    }
}
