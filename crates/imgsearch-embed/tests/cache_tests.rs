use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use candle_core::Device;
use image::DynamicImage;
use parking_lot::Mutex;

use imgsearch_core::types::{Embedding, ModelDescriptor};
use imgsearch_core::{Error, Registry, Result};
use imgsearch_embed::fake::FakeEncoder;
use imgsearch_embed::{EmbeddingPipeline, Encoder, EncoderFactory, ModelCache};

const A: &str = "openai/ViT-B-32";
const B: &str = "openai/ViT-B-16";
const C: &str = "siglip/base-patch16-224";

/// Counts loads/unloads and how many models are resident at once.
#[derive(Default)]
struct LoadTracker {
    loads: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
    failures_left: AtomicUsize,
    load_delay: Duration,
    unload_delay: Duration,
    unloaded: Mutex<Vec<String>>,
}

struct TrackingFactory(Arc<LoadTracker>);

struct TrackingEncoder {
    tracker: Arc<LoadTracker>,
    inner: FakeEncoder,
    id: String,
}

impl EncoderFactory for TrackingFactory {
    fn create(&self, _descriptor: &ModelDescriptor) -> Box<dyn Encoder> {
        Box::new(TrackingEncoder { tracker: Arc::clone(&self.0), inner: FakeEncoder::default(), id: String::new() })
    }
}

impl Encoder for TrackingEncoder {
    fn load(&mut self, descriptor: &ModelDescriptor, device: &Device) -> Result<()> {
        self.tracker.loads.fetch_add(1, SeqCst);
        let live = self.tracker.live.fetch_add(1, SeqCst) + 1;
        self.tracker.max_live.fetch_max(live, SeqCst);
        thread::sleep(self.tracker.load_delay);
        if self.tracker.failures_left.fetch_update(SeqCst, SeqCst, |n| n.checked_sub(1)).is_ok() {
            self.tracker.live.fetch_sub(1, SeqCst);
            return Err(Error::Load("injected failure".into()));
        }
        self.id = descriptor.id.clone();
        self.inner.load(descriptor, device)
    }
    fn encode_image(&self, image: &DynamicImage) -> Result<Embedding> { self.inner.encode_image(image) }
    fn encode_text(&self, text: &str) -> Result<Embedding> { self.inner.encode_text(text) }
    fn unload(&mut self) {
        thread::sleep(self.tracker.unload_delay);
        self.tracker.live.fetch_sub(1, SeqCst);
        self.tracker.unloaded.lock().push(self.id.clone());
        self.inner.unload();
    }
}

fn cache_with(tracker: &Arc<LoadTracker>, capacity: usize) -> Arc<ModelCache> {
    let factory = Arc::new(TrackingFactory(Arc::clone(tracker)));
    Arc::new(ModelCache::new(Arc::new(Registry::builtin()), factory, Device::Cpu, capacity, A).expect("cache"))
}

#[test]
fn concurrent_acquires_share_one_load() {
    let tracker = Arc::new(LoadTracker { load_delay: Duration::from_millis(50), ..Default::default() });
    let cache = cache_with(&tracker, 2);
    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let (cache, barrier) = (Arc::clone(&cache), Arc::clone(&barrier));
            thread::spawn(move || {
                barrier.wait();
                cache.acquire(A).expect("acquire")
            })
        })
        .collect();
    let encoders: Vec<_> = handles.into_iter().map(|h| h.join().expect("join")).collect();

    assert_eq!(tracker.loads.load(SeqCst), 1, "exactly one load for concurrent requests");
    assert!(encoders.iter().all(|e| Arc::ptr_eq(e, &encoders[0])), "all callers share one encoder");
    assert_eq!(cache.list_loaded(), vec![A.to_string()]);
}

#[test]
fn least_recently_used_model_is_evicted() {
    let tracker = Arc::new(LoadTracker::default());
    let cache = cache_with(&tracker, 2);
    for id in [A, B, A, C] {
        cache.acquire(id).expect("acquire");
    }
    assert_eq!(cache.list_loaded(), vec![A.to_string(), C.to_string()], "B was least recent");
    assert!(!cache.is_loaded(B));
    assert_eq!(*tracker.unloaded.lock(), vec![B.to_string()], "B unloaded exactly once");
    assert_eq!(tracker.loads.load(SeqCst), 3, "A stayed resident");
}

#[test]
fn residency_never_exceeds_capacity() {
    let tracker = Arc::new(LoadTracker { load_delay: Duration::from_millis(5), ..Default::default() });
    let cache = cache_with(&tracker, 2);
    let ids = [A, B, C, "openai/ViT-L-14"];
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..10 {
                    let id = ids[(t + i) % ids.len()];
                    let encoder = cache.acquire(id).expect("acquire");
                    // may be evicted by another thread already; only residency matters here
                    let _ = encoder.encode_text("warm");
                }
            })
        })
        .collect();
    for h in handles { h.join().expect("join"); }

    assert!(tracker.max_live.load(SeqCst) <= 2, "max live models {}", tracker.max_live.load(SeqCst));
    assert!(cache.list_loaded().len() <= 2);
}

#[test]
fn failed_load_leaves_no_entry_and_can_be_retried() {
    let tracker = Arc::new(LoadTracker::default());
    tracker.failures_left.store(1, SeqCst);
    let cache = cache_with(&tracker, 2);

    let err = cache.acquire(A).err().expect("first load fails");
    assert!(matches!(err, Error::Load(_)), "got {err:?}");
    assert!(!cache.is_loaded(A));
    assert!(!cache.is_loading(A));

    cache.acquire(A).expect("retry succeeds");
    assert!(cache.is_loaded(A));
    assert_eq!(tracker.loads.load(SeqCst), 2);
}

#[test]
fn waiters_share_a_failed_load() {
    let tracker = Arc::new(LoadTracker { load_delay: Duration::from_millis(200), ..Default::default() });
    tracker.failures_left.store(1, SeqCst);
    let cache = cache_with(&tracker, 2);
    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let (cache, barrier) = (Arc::clone(&cache), Arc::clone(&barrier));
            thread::spawn(move || {
                barrier.wait();
                cache.acquire(B).err()
            })
        })
        .collect();
    for h in handles {
        let err = h.join().expect("join");
        assert!(matches!(err, Some(Error::Load(_))), "every waiter sees the load error: {err:?}");
    }
    assert_eq!(tracker.loads.load(SeqCst), 1);
    assert!(cache.list_loaded().is_empty());
}

#[test]
fn unknown_model_is_not_found_without_loading() {
    let tracker = Arc::new(LoadTracker::default());
    let cache = cache_with(&tracker, 2);
    let err = cache.acquire("nobody/model").err().expect("unknown model");
    assert!(err.is_not_found());
    assert_eq!(tracker.loads.load(SeqCst), 0);
}

#[test]
fn current_model_defaults_and_validates() {
    let tracker = Arc::new(LoadTracker::default());
    let cache = cache_with(&tracker, 2);
    assert_eq!(cache.current(), A);
    cache.set_current(C).expect("set current");
    assert_eq!(cache.current(), C);
    assert!(cache.set_current("nobody/model").is_err());
    assert_eq!(cache.current(), C, "failed switch keeps previous model");
    assert_eq!(tracker.loads.load(SeqCst), 0, "switching does not load");
}

#[test]
fn zero_capacity_is_rejected() {
    let factory = Arc::new(TrackingFactory(Arc::new(LoadTracker::default())));
    let err = ModelCache::new(Arc::new(Registry::builtin()), factory, Device::Cpu, 0, A).err().expect("invalid");
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
fn evicted_handle_fails_and_pipeline_reacquires() {
    let tracker = Arc::new(LoadTracker::default());
    let cache = cache_with(&tracker, 1);
    let stale = cache.acquire(A).expect("acquire A");
    cache.acquire(B).expect("acquire B evicts A");

    assert!(!stale.is_loaded());
    assert!(matches!(stale.encode_text("cat"), Err(Error::Evicted(_))));

    let pipeline = EmbeddingPipeline::new(Arc::clone(&cache));
    let v = pipeline.encode_text("cat", Some(A)).expect("pipeline reloads A");
    assert_eq!(v.len(), 512);
    assert_eq!(cache.list_loaded(), vec![A.to_string()]);
}

#[test]
fn victim_leaves_resident_set_before_its_unload_finishes() {
    let tracker = Arc::new(LoadTracker { unload_delay: Duration::from_millis(300), ..Default::default() });
    let cache = cache_with(&tracker, 1);
    cache.acquire(A).expect("A");
    let loader = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || cache.acquire(B).map(|_| ()))
    };
    thread::sleep(Duration::from_millis(100));

    assert!(!cache.is_loaded(A), "victim is no longer resident");
    assert!(cache.is_loading(B), "its slot already belongs to the new load");
    assert_eq!(tracker.live.load(SeqCst), 1, "victim weights are still being released");

    loader.join().expect("join").expect("B");
    assert_eq!(cache.list_loaded(), vec![B.to_string()]);
    assert_eq!(tracker.max_live.load(SeqCst), 1);
}

#[test]
fn evict_one_unloads_least_recent() {
    let tracker = Arc::new(LoadTracker::default());
    let cache = cache_with(&tracker, 2);
    cache.acquire(A).expect("A");
    cache.acquire(B).expect("B");
    assert_eq!(cache.evict_one().as_deref(), Some(A));
    assert_eq!(cache.list_loaded(), vec![B.to_string()]);
    assert_eq!(*tracker.unloaded.lock(), vec![A.to_string()]);
}

/// The first load dies mid-way, as if the loading thread crashed.
struct CrashOnceFactory(Arc<AtomicUsize>);

struct CrashOnceEncoder {
    loads: Arc<AtomicUsize>,
    inner: FakeEncoder,
}

impl EncoderFactory for CrashOnceFactory {
    fn create(&self, _descriptor: &ModelDescriptor) -> Box<dyn Encoder> {
        Box::new(CrashOnceEncoder { loads: Arc::clone(&self.0), inner: FakeEncoder::default() })
    }
}

impl Encoder for CrashOnceEncoder {
    fn load(&mut self, descriptor: &ModelDescriptor, device: &Device) -> Result<()> {
        if self.loads.fetch_add(1, SeqCst) == 0 {
            thread::sleep(Duration::from_millis(200));
            panic!("weights corrupted mid-load");
        }
        self.inner.load(descriptor, device)
    }
    fn encode_image(&self, image: &DynamicImage) -> Result<Embedding> { self.inner.encode_image(image) }
    fn encode_text(&self, text: &str) -> Result<Embedding> { self.inner.encode_text(text) }
    fn unload(&mut self) { self.inner.unload(); }
}

#[test]
fn crashed_load_releases_waiters_and_leaves_no_entry() {
    let loads = Arc::new(AtomicUsize::new(0));
    let factory = Arc::new(CrashOnceFactory(Arc::clone(&loads)));
    let cache = Arc::new(ModelCache::new(Arc::new(Registry::builtin()), factory, Device::Cpu, 2, A).expect("cache"));
    let barrier = Arc::new(Barrier::new(3));
    let handles: Vec<_> = (0..3)
        .map(|_| {
            let (cache, barrier) = (Arc::clone(&cache), Arc::clone(&barrier));
            thread::spawn(move || {
                barrier.wait();
                cache.acquire(A).err()
            })
        })
        .collect();
    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join()).collect();

    assert_eq!(outcomes.iter().filter(|o| o.is_err()).count(), 1, "only the loading thread panics");
    for err in outcomes.into_iter().flatten() {
        assert!(matches!(err, Some(Error::Load(_))), "waiters see a load error: {err:?}");
    }
    assert!(!cache.is_loaded(A));
    assert!(!cache.is_loading(A));

    cache.acquire(A).expect("load after crash");
    assert_eq!(loads.load(SeqCst), 2, "exactly one more load");
    assert_eq!(cache.list_loaded(), vec![A.to_string()]);
}

/// Loads fine but every call reports the encoder as already evicted.
struct AlwaysEvictedFactory(Arc<AtomicUsize>);

struct AlwaysEvictedEncoder {
    calls: Arc<AtomicUsize>,
    id: String,
}

impl EncoderFactory for AlwaysEvictedFactory {
    fn create(&self, _descriptor: &ModelDescriptor) -> Box<dyn Encoder> {
        Box::new(AlwaysEvictedEncoder { calls: Arc::clone(&self.0), id: String::new() })
    }
}

impl Encoder for AlwaysEvictedEncoder {
    fn load(&mut self, descriptor: &ModelDescriptor, _device: &Device) -> Result<()> {
        self.id = descriptor.id.clone();
        Ok(())
    }
    fn encode_image(&self, _image: &DynamicImage) -> Result<Embedding> {
        self.calls.fetch_add(1, SeqCst);
        Err(Error::Evicted(self.id.clone()))
    }
    fn encode_text(&self, _text: &str) -> Result<Embedding> {
        self.calls.fetch_add(1, SeqCst);
        Err(Error::Evicted(self.id.clone()))
    }
    fn unload(&mut self) {}
}

#[test]
fn pipeline_reports_load_error_after_repeated_eviction() {
    let calls = Arc::new(AtomicUsize::new(0));
    let factory = Arc::new(AlwaysEvictedFactory(Arc::clone(&calls)));
    let cache = Arc::new(ModelCache::new(Arc::new(Registry::builtin()), factory, Device::Cpu, 1, A).expect("cache"));
    let pipeline = EmbeddingPipeline::new(cache);

    let err = pipeline.encode_text("cat", None).err().expect("gives up");
    assert!(matches!(err, Error::Load(_)), "got {err:?}");
    assert_eq!(calls.load(SeqCst), 4, "first attempt plus three retries");
}
