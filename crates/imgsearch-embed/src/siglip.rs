//! SigLIP encoder (sigmoid-loss image/text model).

use std::time::Instant;

use anyhow::Context;
use candle_core::Device;
use candle_transformers::models::siglip;
use image::DynamicImage;
use serde::Deserialize;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use imgsearch_core::types::{Embedding, ModelDescriptor};
use imgsearch_core::{Error, Result};

use crate::device::release_device_memory;
use crate::encoder::Encoder;
use crate::pool::to_embedding;
use crate::preprocess::ImageTransform;
use crate::tokenize::{load_tokenizer, tokenize_on_device, TokenPolicy};
use crate::weights::WeightSource;

/// SigLIP text towers are trained on fixed 64-token inputs.
const CONTEXT_LEN: usize = 64;
const EOS_TOKEN: &str = "</s>";

struct Loaded {
    model: siglip::Model,
    tokenizer: Tokenizer,
    tokens: TokenPolicy,
    transform: ImageTransform,
    device: Device,
    dim: usize,
}

pub struct SiglipEncoder {
    weights: WeightSource,
    loaded: Option<Loaded>,
}

impl SiglipEncoder {
    pub fn new(weights: WeightSource) -> Self { Self { weights, loaded: None } }

    fn loaded(&self) -> Result<&Loaded> {
        self.loaded.as_ref().ok_or_else(|| Error::Operation("SigLIP encoder used before load".into()))
    }

    fn build(&self, descriptor: &ModelDescriptor, device: &Device) -> anyhow::Result<Loaded> {
        let files = self.weights.resolve(descriptor)?;
        let raw = files.read_config()?;
        let config = model_config(&raw, descriptor)?;
        let image_size = image_size(&raw, descriptor);
        let tokenizer = load_tokenizer(&files.tokenizer)?;
        let eos = tokenizer.token_to_id(EOS_TOKEN).unwrap_or(1);
        let model = siglip::Model::new(&config, files.var_builder(device)?)?;
        Ok(Loaded {
            model,
            tokenizer,
            tokens: TokenPolicy { max_len: CONTEXT_LEN, pad_id: eos, eot_id: Some(eos) },
            transform: ImageTransform::siglip(image_size),
            device: device.clone(),
            dim: descriptor.vector_dim,
        })
    }
}

fn model_config(raw: &str, descriptor: &ModelDescriptor) -> anyhow::Result<siglip::Config> {
    match serde_json::from_str::<siglip::Config>(raw) {
        Ok(config) => Ok(config),
        Err(e) if descriptor.model_name.ends_with("base-patch16-224") => {
            warn!(model_id = %descriptor.id, error = %e, "config.json incomplete, using built-in base config");
            Ok(siglip::Config::base_patch16_224())
        }
        Err(e) => Err(e).context("parsing SigLIP config.json"),
    }
}

#[derive(Deserialize)]
struct SizeOnly {
    vision_config: VisionSize,
}

#[derive(Deserialize)]
struct VisionSize {
    image_size: u32,
}

/// Input resolution from config.json, else the `-NNN` suffix of the model name.
fn image_size(raw: &str, descriptor: &ModelDescriptor) -> u32 {
    serde_json::from_str::<SizeOnly>(raw)
        .map(|c| c.vision_config.image_size)
        .ok()
        .or_else(|| descriptor.model_name.rsplit('-').next().and_then(|s| s.parse().ok()))
        .unwrap_or(224)
}

impl Encoder for SiglipEncoder {
    fn load(&mut self, descriptor: &ModelDescriptor, device: &Device) -> Result<()> {
        let start = Instant::now();
        let loaded = self.build(descriptor, device).map_err(|e| Error::Load(format!("{}: {e:#}", descriptor.id)))?;
        self.loaded = Some(loaded);
        info!(model_id = %descriptor.id, elapsed_ms = start.elapsed().as_millis() as u64, "SigLIP model loaded");
        Ok(())
    }

    fn encode_image(&self, image: &DynamicImage) -> Result<Embedding> {
        let l = self.loaded()?;
        let run = || -> anyhow::Result<Embedding> {
            let pixels = l.transform.apply(image, &l.device)?;
            let features = l.model.get_image_features(&pixels)?;
            to_embedding(&features, l.dim)
        };
        run().map_err(|e| Error::Operation(format!("image encoding failed: {e:#}")))
    }

    fn encode_text(&self, text: &str) -> Result<Embedding> {
        let l = self.loaded()?;
        let run = || -> anyhow::Result<Embedding> {
            let ids = tokenize_on_device(&l.tokenizer, text, &l.tokens, &l.device)?;
            let features = l.model.get_text_features(&ids)?;
            to_embedding(&features, l.dim)
        };
        run().map_err(|e| Error::Operation(format!("text encoding failed: {e:#}")))
    }

    fn unload(&mut self) {
        if let Some(loaded) = self.loaded.take() {
            let device = loaded.device.clone();
            drop(loaded);
            release_device_memory(&device);
            debug!("SigLIP weights released");
        }
    }
}
