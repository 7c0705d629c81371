use std::path::Path;
use std::sync::Arc;

use image::DynamicImage;
use tracing::debug;

use imgsearch_core::types::Embedding;
use imgsearch_core::{Error, Result};

use crate::cache::{ModelCache, ResidentEncoder};
use crate::preprocess::{decode_image, open_image};

/// An encoder evicted between `acquire` and use is re-acquired this many times.
const EVICTION_RETRIES: usize = 3;

/// Front door for embedding: resolves the model (explicit or current),
/// decodes input, and runs the encoder held by the cache.
#[derive(Clone)]
pub struct EmbeddingPipeline {
    cache: Arc<ModelCache>,
}

impl EmbeddingPipeline {
    pub fn new(cache: Arc<ModelCache>) -> Self { Self { cache } }

    pub fn cache(&self) -> &Arc<ModelCache> { &self.cache }

    /// `model_id` if given, else the cache's current model.
    pub fn resolve_model(&self, model_id: Option<&str>) -> String {
        model_id.map(str::to_string).unwrap_or_else(|| self.cache.current())
    }

    pub fn encode_image(&self, image: &DynamicImage, model_id: Option<&str>) -> Result<Embedding> {
        let model_id = self.resolve_model(model_id);
        self.with_encoder(&model_id, |encoder| encoder.encode_image(image))
    }

    /// Decode failures surface before any model is loaded.
    pub fn encode_image_bytes(&self, bytes: &[u8], model_id: Option<&str>) -> Result<Embedding> {
        let image = decode_image(bytes)?;
        self.encode_image(&image, model_id)
    }

    pub fn encode_image_file(&self, path: &Path, model_id: Option<&str>) -> Result<Embedding> {
        let image = open_image(path)?;
        self.encode_image(&image, model_id)
    }

    pub fn encode_text(&self, text: &str, model_id: Option<&str>) -> Result<Embedding> {
        let model_id = self.resolve_model(model_id);
        self.with_encoder(&model_id, |encoder| encoder.encode_text(text))
    }

    fn with_encoder<T>(&self, model_id: &str, f: impl Fn(&ResidentEncoder) -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            let encoder = self.cache.acquire(model_id)?;
            match f(&encoder) {
                Err(Error::Evicted(_)) if attempt < EVICTION_RETRIES => {
                    attempt += 1;
                    debug!(model_id, attempt, "encoder evicted mid-request, re-acquiring");
                }
                Err(Error::Evicted(_)) => {
                    return Err(Error::Load(format!("{model_id} was evicted {} times before it could be used", attempt + 1)));
                }
                other => return other,
            }
        }
    }
}
