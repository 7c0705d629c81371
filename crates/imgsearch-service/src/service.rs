//! Application flows over the embedding pipeline and the index router.
//!
//! Built once at startup and cloned into whatever drives it (CLI, server).
//! Encoding and model loads block, so they run on the blocking thread pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, Stream};
use tracing::{info, warn};
use uuid::Uuid;

use imgsearch_core::config::{SearchConfig, Settings, VectorBackend};
use imgsearch_core::traits::VectorEngine;
use imgsearch_core::types::{Embedding, Payload};
use imgsearch_core::{Error, Registry, Result};
use imgsearch_embed::device::select_device;
use imgsearch_embed::preprocess::decode_image;
use imgsearch_embed::{get_default_factory, EmbeddingPipeline, ModelCache, WeightSource};
use imgsearch_vector::{IndexRouter, LanceEngine, MemoryEngine};

use crate::files::{discover_images, file_name, has_image_extension, item_id_for};
use crate::progress::{IndexSummary, ProgressEvent};
use crate::responses::{file_url, ImageRecord, ModelInfo, SearchResponse, SearchResult, ServiceStatus, UploadReceipt};

#[derive(Clone)]
pub struct ImageSearchService {
    pipeline: EmbeddingPipeline,
    router: Arc<IndexRouter>,
    images_dir: PathBuf,
    search: SearchConfig,
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Operation(format!("blocking task failed: {e}")))?
}

impl ImageSearchService {
    pub fn new(pipeline: EmbeddingPipeline, router: Arc<IndexRouter>, images_dir: PathBuf, search: SearchConfig) -> Self {
        Self { pipeline, router, images_dir, search }
    }

    /// Wire device, model cache, vector engine and router from settings.
    pub async fn from_settings(settings: &Settings, registry: Arc<Registry>) -> Result<Self> {
        settings.validate(&registry)?;
        let device = select_device(settings.models.device)?;
        let factory = get_default_factory(WeightSource::new(settings.cache_dir()));
        let cache = ModelCache::new(
            Arc::clone(&registry),
            factory,
            device,
            settings.models.max_loaded,
            &settings.models.default_model,
        )?;

        let engine: Arc<dyn VectorEngine> = match settings.vector.backend {
            VectorBackend::Lance => {
                let uri = settings.vector_uri();
                std::fs::create_dir_all(&uri).map_err(|e| Error::BackendUnavailable(format!("{}: {e}", uri.display())))?;
                Arc::new(LanceEngine::open(&uri.to_string_lossy()).await?)
            }
            VectorBackend::Memory => Arc::new(MemoryEngine::new()),
        };
        let router = IndexRouter::new(engine, registry, settings.vector.namespace_prefix.clone())
            .with_scroll_limit(settings.vector.scroll_limit);

        info!(
            backend = ?settings.vector.backend,
            max_loaded = settings.models.max_loaded,
            current = %settings.models.default_model,
            "image search service ready"
        );
        Ok(Self::new(EmbeddingPipeline::new(Arc::new(cache)), Arc::new(router), settings.images_dir(), settings.search.clone()))
    }

    pub fn pipeline(&self) -> &EmbeddingPipeline { &self.pipeline }
    pub fn router(&self) -> &Arc<IndexRouter> { &self.router }
    pub fn images_dir(&self) -> &Path { &self.images_dir }

    fn registry(&self) -> &Arc<Registry> { self.pipeline.cache().registry() }

    /// Explicit model if given (must be registered), else the current one.
    fn model_or_current(&self, model_id: Option<&str>) -> Result<String> {
        let id = self.pipeline.resolve_model(model_id);
        self.registry().lookup(&id)?;
        Ok(id)
    }

    async fn encode_file(&self, model_id: &str, path: &Path) -> Result<Embedding> {
        let (pipeline, model_id, path) = (self.pipeline.clone(), model_id.to_string(), path.to_path_buf());
        blocking(move || pipeline.encode_image_file(&path, Some(&model_id))).await
    }

    /// Store an uploaded image as `<uuid>_<name>` and index it.
    pub async fn upload_and_index(&self, bytes: Vec<u8>, original_name: &str, model_id: Option<&str>) -> Result<UploadReceipt> {
        let name = file_name(Path::new(original_name));
        if name.is_empty() || !has_image_extension(Path::new(&name)) {
            return Err(Error::Rejected(format!("{original_name} is not an image file")));
        }
        let model_id = self.model_or_current(model_id)?;
        let id = Uuid::new_v4().to_string();
        let filename = format!("{id}_{name}");
        let path = self.images_dir.join(&filename);

        let (pipeline, images_dir, target, model) = (self.pipeline.clone(), self.images_dir.clone(), path.clone(), model_id.clone());
        let vector = blocking(move || {
            let image = decode_image(&bytes)?;
            std::fs::create_dir_all(&images_dir).map_err(|e| Error::Operation(format!("{}: {e}", images_dir.display())))?;
            std::fs::write(&target, &bytes).map_err(|e| Error::Operation(format!("{}: {e}", target.display())))?;
            pipeline.encode_image(&image, Some(&model)).inspect_err(|_| {
                let _ = std::fs::remove_file(&target);
            })
        })
        .await?;

        let payload = image_payload(&filename, &path);
        if let Err(e) = self.router.upsert_one(&model_id, &id, vector, payload).await {
            let _ = std::fs::remove_file(&path);
            return Err(e);
        }
        info!(id = %id, filename = %filename, model_id = %model_id, "image uploaded and indexed");
        Ok(UploadReceipt { id, filename, model_id })
    }

    pub async fn search_text(&self, query: &str, limit: Option<usize>, model_id: Option<&str>) -> Result<SearchResponse> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::Rejected("search query must not be empty".into()));
        }
        let model_id = self.model_or_current(model_id)?;
        let limit = self.search.clamp_limit(limit);

        let (pipeline, text, model) = (self.pipeline.clone(), query.to_string(), model_id.clone());
        let vector = blocking(move || pipeline.encode_text(&text, Some(&model))).await?;
        let hits = self.router.search(&model_id, &vector, limit).await?;

        let results = hits
            .into_iter()
            .map(|hit| {
                let filename = hit.payload.get("filename").cloned().unwrap_or_default();
                SearchResult { url: file_url(&filename), id: hit.id, filename, score: hit.score }
            })
            .collect();
        Ok(SearchResponse { query: query.to_string(), model_id, results })
    }

    pub async fn list_images(&self, model_id: Option<&str>) -> Result<Vec<ImageRecord>> {
        let model_id = self.model_or_current(model_id)?;
        let items = self.router.list_all(&model_id).await?;
        Ok(items
            .into_iter()
            .map(|item| ImageRecord {
                filename: item.payload.get("filename").cloned().unwrap_or_default(),
                path: item.payload.get("path").cloned().unwrap_or_default(),
                id: item.id,
            })
            .collect())
    }

    /// Remove an image from one model's index. The stored file is kept; other
    /// models may still index it.
    pub async fn delete_image(&self, model_id: Option<&str>, id: &str) -> Result<()> {
        let model_id = self.model_or_current(model_id)?;
        self.router.delete(&model_id, &[id.to_string()]).await?;
        info!(id, model_id = %model_id, "image removed from index");
        Ok(())
    }

    pub async fn models(&self) -> Result<Vec<ModelInfo>> {
        let cache = self.pipeline.cache();
        let current = cache.current();
        let mut models = Vec::with_capacity(self.registry().list().len());
        for d in self.registry().list() {
            let status = self.router.status_of(&d.id).await?;
            models.push(ModelInfo {
                id: d.id.clone(),
                name: d.name.clone(),
                family: d.family,
                vector_dim: d.vector_dim,
                description: d.description.clone(),
                is_loaded: cache.is_loaded(&d.id),
                is_indexed: status.exists,
                indexed_count: status.point_count,
                is_current: d.id == current,
            });
        }
        Ok(models)
    }

    pub fn current_model(&self) -> String {
        self.pipeline.cache().current()
    }

    pub fn set_current_model(&self, model_id: &str) -> Result<()> {
        self.pipeline.cache().set_current(model_id)
    }

    pub async fn status(&self) -> Result<ServiceStatus> {
        let cache = self.pipeline.cache();
        Ok(ServiceStatus {
            current_model: cache.current(),
            capacity: cache.capacity(),
            loaded_models: cache.list_loaded(),
            namespaces: self.router.status().await?,
        })
    }

    /// Make `model_id` resident, evicting if needed.
    pub async fn load_model(&self, model_id: &str) -> Result<()> {
        let (pipeline, id) = (self.pipeline.clone(), model_id.to_string());
        blocking(move || pipeline.cache().acquire(&id).map(|_| ())).await
    }

    /// `starting` then `complete` or `error`. Unknown ids fail before the
    /// stream is created.
    pub fn load_model_stream(&self, model_id: &str) -> Result<impl Stream<Item = ProgressEvent> + Send + 'static> {
        self.registry().lookup(model_id)?;
        let run = LoadRun { service: self.clone(), model_id: model_id.to_string(), phase: LoadPhase::Announce };
        Ok(stream::unfold(run, LoadRun::step))
    }

    /// Index every image directly inside `dir` (default: the images dir).
    ///
    /// Events: `loading_model`, then `error` if the model cannot be loaded,
    /// otherwise `starting`, one `indexing` or `file_error` per file, and
    /// `complete`. A failing file does not stop the run.
    pub async fn index_directory_stream(&self, model_id: &str, dir: Option<PathBuf>) -> Result<impl Stream<Item = ProgressEvent> + Send + 'static> {
        self.registry().lookup(model_id)?;
        let dir = dir.unwrap_or_else(|| self.images_dir.clone());
        let scan = dir.clone();
        let files = blocking(move || discover_images(&scan)).await?;
        info!(model_id, dir = %dir.display(), total = files.len(), "indexing directory");
        let run = IndexRun {
            service: self.clone(),
            model_id: model_id.to_string(),
            files,
            next: 0,
            indexed: 0,
            failed: 0,
            phase: IndexPhase::Announce,
        };
        Ok(stream::unfold(run, IndexRun::step))
    }

    async fn index_file(&self, model_id: &str, path: &Path) -> Result<()> {
        let vector = self.encode_file(model_id, path).await?;
        let filename = file_name(path);
        self.router.upsert_one(model_id, &item_id_for(path), vector, image_payload(&filename, path)).await
    }
}

fn image_payload(filename: &str, path: &Path) -> Payload {
    Payload::from([
        ("filename".to_string(), filename.to_string()),
        ("path".to_string(), path.display().to_string()),
    ])
}

enum LoadPhase {
    Announce,
    Load,
    Done,
}

struct LoadRun {
    service: ImageSearchService,
    model_id: String,
    phase: LoadPhase,
}

impl LoadRun {
    async fn step(mut self) -> Option<(ProgressEvent, Self)> {
        match self.phase {
            LoadPhase::Announce => {
                self.phase = LoadPhase::Load;
                Some((ProgressEvent::Starting { model_id: self.model_id.clone(), total: None }, self))
            }
            LoadPhase::Load => {
                self.phase = LoadPhase::Done;
                let event = match self.service.load_model(&self.model_id).await {
                    Ok(()) => ProgressEvent::Complete { model_id: self.model_id.clone(), summary: None },
                    Err(e) => ProgressEvent::Error { error: e.to_string() },
                };
                Some((event, self))
            }
            LoadPhase::Done => None,
        }
    }
}

enum IndexPhase {
    Announce,
    Load,
    Files,
    Done,
}

struct IndexRun {
    service: ImageSearchService,
    model_id: String,
    files: Vec<PathBuf>,
    next: usize,
    indexed: usize,
    failed: usize,
    phase: IndexPhase,
}

impl IndexRun {
    async fn step(mut self) -> Option<(ProgressEvent, Self)> {
        let total = self.files.len();
        match self.phase {
            IndexPhase::Announce => {
                self.phase = IndexPhase::Load;
                Some((ProgressEvent::LoadingModel { model_id: self.model_id.clone(), total }, self))
            }
            IndexPhase::Load => match self.service.load_model(&self.model_id).await {
                Ok(()) => {
                    self.phase = IndexPhase::Files;
                    Some((ProgressEvent::Starting { model_id: self.model_id.clone(), total: Some(total) }, self))
                }
                Err(e) => {
                    self.phase = IndexPhase::Done;
                    Some((ProgressEvent::Error { error: format!("Failed to load model: {e}") }, self))
                }
            },
            IndexPhase::Files if self.next < total => {
                let path = self.files[self.next].clone();
                self.next += 1;
                let file = file_name(&path);
                let event = match self.service.index_file(&self.model_id, &path).await {
                    Ok(()) => {
                        self.indexed += 1;
                        ProgressEvent::Indexing { current: self.next, total, file }
                    }
                    Err(e) => {
                        self.failed += 1;
                        warn!(file = %file, error = %e, "failed to index image");
                        ProgressEvent::FileError { file, error: e.to_string(), current: self.next, total }
                    }
                };
                Some((event, self))
            }
            IndexPhase::Files => {
                self.phase = IndexPhase::Done;
                let summary = IndexSummary { total, indexed: self.indexed, failed: self.failed };
                info!(model_id = %self.model_id, total, indexed = self.indexed, failed = self.failed, "indexing complete");
                Some((ProgressEvent::Complete { model_id: self.model_id.clone(), summary: Some(summary) }, self))
            }
            IndexPhase::Done => None,
        }
    }
}
