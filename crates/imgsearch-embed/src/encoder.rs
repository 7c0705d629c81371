use std::sync::Arc;

use candle_core::Device;
use image::DynamicImage;
use tracing::info;

use imgsearch_core::types::{Embedding, ModelDescriptor, ModelFamily};
use imgsearch_core::Result;

use crate::clip::ClipEncoder;
use crate::fake::FakeEncoder;
use crate::siglip::SiglipEncoder;
use crate::weights::WeightSource;

/// One model instance able to embed images and text into the same space.
///
/// `load` is called exactly once before any `encode_*`; after `unload` the
/// instance is discarded. Every returned embedding has
/// `descriptor.vector_dim` elements and unit L2 norm.
pub trait Encoder: Send + Sync {
    fn load(&mut self, descriptor: &ModelDescriptor, device: &Device) -> Result<()>;
    fn encode_image(&self, image: &DynamicImage) -> Result<Embedding>;
    fn encode_text(&self, text: &str) -> Result<Embedding>;
    /// Drop weights and release device memory.
    fn unload(&mut self);
}

/// Produces an unloaded encoder for a descriptor.
pub trait EncoderFactory: Send + Sync {
    fn create(&self, descriptor: &ModelDescriptor) -> Box<dyn Encoder>;
}

/// Real encoders, selected by model family.
pub struct FamilyFactory {
    weights: WeightSource,
}

impl FamilyFactory {
    pub fn new(weights: WeightSource) -> Self { Self { weights } }
}

impl EncoderFactory for FamilyFactory {
    fn create(&self, descriptor: &ModelDescriptor) -> Box<dyn Encoder> {
        match descriptor.family {
            ModelFamily::OpenaiClip => Box::new(ClipEncoder::openai(self.weights.clone())),
            ModelFamily::Openclip => Box::new(ClipEncoder::openclip(self.weights.clone())),
            ModelFamily::Siglip => Box::new(SiglipEncoder::new(self.weights.clone())),
        }
    }
}

/// Deterministic hash-based encoders for tests and offline runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct FakeFactory;

impl EncoderFactory for FakeFactory {
    fn create(&self, _descriptor: &ModelDescriptor) -> Box<dyn Encoder> {
        Box::new(FakeEncoder::default())
    }
}

pub fn use_fake_embeddings() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

/// Real encoders unless `APP_USE_FAKE_EMBEDDINGS` is set.
pub fn get_default_factory(weights: WeightSource) -> Arc<dyn EncoderFactory> {
    if use_fake_embeddings() {
        info!("Using fake encoders (APP_USE_FAKE_EMBEDDINGS)");
        return Arc::new(FakeFactory);
    }
    Arc::new(FamilyFactory::new(weights))
}
