//! Shared fakes for pipeline integration tests.
//!
//! Fake adapters decide what to do from keywords in the prompt:
//!
//! | keyword  | effect                                             |
//! |----------|----------------------------------------------------|
//! | `refuse` | submission is rejected                             |
//! | `stall`  | the operation never finishes                       |
//! | `reject` | the provider reports a failed generation           |
//! | `lost`   | the result URL cannot be downloaded                |

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use genbatch_core::catalog::ProviderCatalog;
use genbatch_core::generation::MediaKind;
use genbatch_core::hashing::content_name;
use genbatch_core::store::{FieldMap, MediaStore, RecordStore, RecordStoreError, StorageError, StoreRecord};
use genbatch_pipeline::{BatchRecord, EngineConfig, Orchestrator, StorePublisher};
use genbatch_providers::{
    Adapter, AdapterSet, AsyncAdapter, GeneratedMedia, GenerationRequest, OperationHandle, PollStatus,
    ProviderError, SyncAdapter,
};

pub const CATALOG: &str = r#"{"models":{
    "pic":{"display_name":"Pic 1","kind":"image","default_provider":"fake",
           "providers":{"fake":{"remote_model_id":"pic-001","unit_cost":0.04}}},
    "clip":{"display_name":"Clip 1","kind":"video","default_provider":"fake",
            "providers":{"fake":{"remote_model_id":"clip-001","unit_cost":0.5}}},
    "clip-lite":{"display_name":"Clip Lite","kind":"video","default_provider":"fake",
                 "providers":{"fake":{"remote_model_id":"clip-lite-001","unit_cost":0.25}}}}}"#;

// ---------------------------------------------------------------------------
// Sync adapter
// ---------------------------------------------------------------------------

/// Returns a small PNG (or plain bytes) immediately.
#[derive(Default)]
pub struct FakeSync {
    pub calls: AtomicUsize,
    /// Return a decodable PNG instead of placeholder bytes.
    pub png: bool,
}

impl FakeSync {
    pub fn with_png() -> Self {
        Self {
            png: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl SyncAdapter for FakeSync {
    fn name(&self) -> &str {
        "fake"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = &request.params.prompt;
        if prompt.contains("refuse") {
            return Err(ProviderError::Rejected("prompt refused".into()));
        }
        let bytes = if self.png {
            solid_png(16, 16, [20, 120, 200, 255])
        } else {
            format!("image:{prompt}").into_bytes()
        };
        Ok(GeneratedMedia::Inline {
            bytes,
            content_type: "image/png".into(),
        })
    }
}

pub fn solid_png(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba(rgba));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}

// ---------------------------------------------------------------------------
// Async adapter
// ---------------------------------------------------------------------------

struct Operation {
    prompt: String,
    checks: u32,
    active: bool,
}

/// Accepts every submission and finishes after a fixed number of checks.
pub struct FakeAsync {
    checks_to_finish: u32,
    check_delay: Duration,
    retrieve_delay: Duration,
    failing: HashSet<String>,
    ops: Mutex<HashMap<String, Operation>>,
    pub submissions: AtomicUsize,
    pub checks: AtomicUsize,
    active: AtomicUsize,
    pub peak: AtomicUsize,
}

impl FakeAsync {
    pub fn new(checks_to_finish: u32) -> Self {
        Self {
            checks_to_finish,
            check_delay: Duration::ZERO,
            retrieve_delay: Duration::ZERO,
            failing: HashSet::new(),
            ops: Mutex::new(HashMap::new()),
            submissions: AtomicUsize::new(0),
            checks: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_check_delay(mut self, delay: Duration) -> Self {
        self.check_delay = delay;
        self
    }

    /// Time taken to fetch a completed result after polling.
    pub fn with_retrieve_delay(mut self, delay: Duration) -> Self {
        self.retrieve_delay = delay;
        self
    }

    /// Handles (`op-0`, `op-1`, ... in submission order) the provider fails.
    pub fn failing<const N: usize>(mut self, handles: [&str; N]) -> Self {
        self.failing = handles.iter().map(|h| h.to_string()).collect();
        self
    }

    fn release(&self, op: &mut Operation) {
        if op.active {
            op.active = false;
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl AsyncAdapter for FakeAsync {
    fn name(&self) -> &str {
        "fake"
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<OperationHandle, ProviderError> {
        let n = self.submissions.fetch_add(1, Ordering::SeqCst);
        let prompt = request.params.prompt.clone();
        if prompt.contains("refuse") {
            return Err(ProviderError::Rejected("prompt refused".into()));
        }
        let id = format!("op-{n}");
        self.ops.lock().unwrap().insert(
            id.clone(),
            Operation {
                prompt,
                checks: 0,
                active: false,
            },
        );
        Ok(OperationHandle::new(id))
    }

    async fn check(&self, handle: &OperationHandle) -> Result<PollStatus, ProviderError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        {
            let mut ops = self.ops.lock().unwrap();
            let op = ops.get_mut(handle.id()).unwrap();
            if op.checks == 0 {
                op.active = true;
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
            }
            op.checks += 1;
        }
        if !self.check_delay.is_zero() {
            tokio::time::sleep(self.check_delay).await;
        }

        let mut ops = self.ops.lock().unwrap();
        let op = ops.get_mut(handle.id()).unwrap();
        if op.prompt.contains("stall") || op.checks < self.checks_to_finish {
            return Ok(PollStatus::Pending("processing".into()));
        }
        self.release(op);
        if self.failing.contains(handle.id()) || op.prompt.contains("reject") {
            return Ok(PollStatus::Failed("content policy violation".into()));
        }
        let host = if op.prompt.contains("lost") { "gone.fake" } else { "cdn.fake" };
        Ok(PollStatus::Completed(GeneratedMedia::Remote {
            url: format!("https://{host}/{}.mp4", handle.id()),
        }))
    }

    async fn retrieve(&self, media: GeneratedMedia) -> Result<GeneratedMedia, ProviderError> {
        tokio::time::sleep(self.retrieve_delay).await;
        Ok(media)
    }
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// Content-addressed in-memory media. Only `cdn.fake` URLs can be fetched.
#[derive(Default)]
pub struct MemoryMediaStore {
    pub objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn store(&self, bytes: Vec<u8>, suggested_name: &str) -> Result<String, StorageError> {
        let name = content_name(&bytes, suggested_name);
        self.objects.lock().unwrap().insert(name.clone(), bytes);
        Ok(format!("https://media.test/{name}"))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        if url.starts_with("https://cdn.fake/") {
            Ok(format!("video:{url}").into_bytes())
        } else {
            Err(StorageError::Download(format!("404 Not Found: {url}")))
        }
    }
}

/// Record store that merges updates into an in-memory table and keeps a
/// log of every update call.
#[derive(Default)]
pub struct MemoryRecordStore {
    pub updates: Mutex<Vec<(String, FieldMap)>>,
    pub state: Mutex<HashMap<String, FieldMap>>,
    write_delay: Duration,
    active: AtomicUsize,
    pub peak_writes: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn with_write_delay(delay: Duration) -> Self {
        Self {
            write_delay: delay,
            ..Self::default()
        }
    }

    pub fn updates_for(&self, record_id: &str) -> Vec<FieldMap> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == record_id)
            .map(|(_, fields)| fields.clone())
            .collect()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn fetch_ready(&self) -> Result<Vec<StoreRecord>, RecordStoreError> {
        Ok(vec![])
    }

    async fn update_record(&self, id: &str, fields: &FieldMap) -> Result<(), RecordStoreError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_writes.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.write_delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        self.updates.lock().unwrap().push((id.to_string(), fields.clone()));
        let mut state = self.state.lock().unwrap();
        let entry = state.entry(id.to_string()).or_default();
        for (k, v) in fields {
            entry.insert(k.clone(), v.clone());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Millisecond-scale timings so whole batches finish quickly.
pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.poll_interval = Duration::from_millis(5);
    config.max_wait = Duration::from_secs(5);
    config.pool_size = 4;
    config.max_transient_retries = 2;
    config.submit_spacing = Duration::ZERO;
    config.masking.enabled = false;
    config.default_image_model = "pic".into();
    config.default_video_model = "clip".into();
    config
}

pub struct Harness {
    pub config: EngineConfig,
    pub sync: Arc<FakeSync>,
    pub asynchronous: Arc<FakeAsync>,
    pub media: Arc<MemoryMediaStore>,
    pub records: Arc<MemoryRecordStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(FakeSync::default(), FakeAsync::new(2))
    }

    pub fn with(sync: FakeSync, asynchronous: FakeAsync) -> Self {
        Self {
            config: fast_config(),
            sync: Arc::new(sync),
            asynchronous: Arc::new(asynchronous),
            media: Arc::new(MemoryMediaStore::default()),
            records: Arc::new(MemoryRecordStore::default()),
        }
    }

    pub fn orchestrator(&self) -> Orchestrator {
        let adapters = AdapterSet::new()
            .with("fake", MediaKind::Image, Adapter::Sync(self.sync.clone()))
            .with("fake", MediaKind::Video, Adapter::Async(self.asynchronous.clone()));
        let publisher = StorePublisher::new(self.records.clone()).with_retry_delays(vec![Duration::from_millis(1)]);
        Orchestrator::new(
            self.config.clone(),
            Arc::new(ProviderCatalog::from_json(CATALOG).unwrap()),
            adapters,
            self.media.clone(),
            Arc::new(publisher),
        )
        .unwrap()
    }
}

pub fn record(id: &str, prompt: &str) -> BatchRecord {
    BatchRecord {
        id: id.into(),
        name: format!("Ad {id}"),
        prompt: prompt.into(),
        model_override: None,
        reference_urls: vec![],
    }
}

pub fn records(n: usize, prompt: &str) -> Vec<BatchRecord> {
    (0..n).map(|i| record(&format!("rec{i}"), prompt)).collect()
}
