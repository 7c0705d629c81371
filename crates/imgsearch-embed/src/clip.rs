//! CLIP-architecture encoders: OpenAI CLIP and OpenCLIP (LAION) weights.
//!
//! Both variants share the candle CLIP model and image statistics. They
//! differ in how the 77-token text input is padded: OpenAI checkpoints pad
//! with the end-of-text token, OpenCLIP pads with id 0.

use std::time::Instant;

use anyhow::{anyhow, Context};
use candle_core::Device;
use candle_transformers::models::clip::{ClipConfig, ClipModel};
use image::DynamicImage;
use serde::Deserialize;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use imgsearch_core::types::{Embedding, ModelDescriptor};
use imgsearch_core::{Error, Result};

use crate::device::release_device_memory;
use crate::encoder::Encoder;
use crate::pool::to_embedding;
use crate::preprocess::ImageTransform;
use crate::tokenize::{load_tokenizer, tokenize_on_device, TokenPolicy};
use crate::weights::WeightSource;

const CONTEXT_LEN: usize = 77;
const EOT_TOKEN: &str = "<|endoftext|>";
const EOT_FALLBACK_ID: u32 = 49407;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipFlavor {
    OpenAi,
    OpenClip,
}

struct Loaded {
    model: ClipModel,
    tokenizer: Tokenizer,
    tokens: TokenPolicy,
    transform: ImageTransform,
    device: Device,
    dim: usize,
}

pub struct ClipEncoder {
    flavor: ClipFlavor,
    weights: WeightSource,
    loaded: Option<Loaded>,
}

impl ClipEncoder {
    pub fn openai(weights: WeightSource) -> Self { Self { flavor: ClipFlavor::OpenAi, weights, loaded: None } }
    pub fn openclip(weights: WeightSource) -> Self { Self { flavor: ClipFlavor::OpenClip, weights, loaded: None } }

    pub fn flavor(&self) -> ClipFlavor { self.flavor }

    fn loaded(&self) -> Result<&Loaded> {
        self.loaded.as_ref().ok_or_else(|| Error::Operation("CLIP encoder used before load".into()))
    }

    fn build(&self, descriptor: &ModelDescriptor, device: &Device) -> anyhow::Result<Loaded> {
        let files = self.weights.resolve(descriptor)?;
        let hf: HfClipConfig = serde_json::from_str(&files.read_config()?).context("parsing CLIP config.json")?;
        if hf.projection_dim != descriptor.vector_dim {
            return Err(anyhow!("config projection_dim {} does not match {}", hf.projection_dim, descriptor.vector_dim));
        }
        let config = hf.to_candle();
        let tokenizer = load_tokenizer(&files.tokenizer)?;
        let eot = tokenizer.token_to_id(EOT_TOKEN).unwrap_or(EOT_FALLBACK_ID);
        let pad_id = match self.flavor { ClipFlavor::OpenAi => eot, ClipFlavor::OpenClip => 0 };
        let vb = files.var_builder(device)?;
        let model = ClipModel::new(vb, &config)?;
        Ok(Loaded {
            model,
            tokenizer,
            tokens: TokenPolicy { max_len: CONTEXT_LEN, pad_id, eot_id: Some(eot) },
            transform: ImageTransform::clip(hf.vision_config.image_size as u32),
            device: device.clone(),
            dim: descriptor.vector_dim,
        })
    }
}

impl Encoder for ClipEncoder {
    fn load(&mut self, descriptor: &ModelDescriptor, device: &Device) -> Result<()> {
        let start = Instant::now();
        let loaded = self.build(descriptor, device).map_err(|e| Error::Load(format!("{}: {e:#}", descriptor.id)))?;
        self.loaded = Some(loaded);
        info!(model_id = %descriptor.id, flavor = ?self.flavor, elapsed_ms = start.elapsed().as_millis() as u64, "CLIP model loaded");
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
            debug!(flavor = ?self.flavor, "CLIP weights released");
        }
    }
}

/// The subset of a transformers `CLIPConfig` that shapes the candle model.
/// Missing fields fall back to ViT-B/32 values.
#[derive(Debug, Deserialize)]
struct HfClipConfig {
    #[serde(default = "default_projection_dim")]
    projection_dim: usize,
    #[serde(default)]
    text_config: HfTextConfig,
    #[serde(default)]
    vision_config: HfVisionConfig,
}

fn default_projection_dim() -> usize { 512 }

#[derive(Debug, Deserialize)]
#[serde(default)]
struct HfTextConfig {
    vocab_size: usize,
    hidden_size: usize,
    intermediate_size: usize,
    max_position_embeddings: usize,
    num_hidden_layers: usize,
    num_attention_heads: usize,
}

impl Default for HfTextConfig {
    fn default() -> Self {
        Self { vocab_size: 49408, hidden_size: 512, intermediate_size: 2048, max_position_embeddings: 77, num_hidden_layers: 12, num_attention_heads: 8 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct HfVisionConfig {
    hidden_size: usize,
    intermediate_size: usize,
    num_hidden_layers: usize,
    num_attention_heads: usize,
    image_size: usize,
    patch_size: usize,
}

impl Default for HfVisionConfig {
    fn default() -> Self {
        Self { hidden_size: 768, intermediate_size: 3072, num_hidden_layers: 12, num_attention_heads: 12, image_size: 224, patch_size: 32 }
    }
}

impl HfClipConfig {
    fn to_candle(&self) -> ClipConfig {
        let mut config = ClipConfig::vit_base_patch32();
        let (t, v) = (&self.text_config, &self.vision_config);

        config.text_config.vocab_size = t.vocab_size;
        config.text_config.embed_dim = t.hidden_size;
        config.text_config.intermediate_size = t.intermediate_size;
        config.text_config.max_position_embeddings = t.max_position_embeddings;
        config.text_config.num_hidden_layers = t.num_hidden_layers;
        config.text_config.num_attention_heads = t.num_attention_heads;
        config.text_config.projection_dim = self.projection_dim;

        config.vision_config.embed_dim = v.hidden_size;
        config.vision_config.intermediate_size = v.intermediate_size;
        config.vision_config.num_hidden_layers = v.num_hidden_layers;
        config.vision_config.num_attention_heads = v.num_attention_heads;
        config.vision_config.image_size = v.image_size;
        config.vision_config.patch_size = v.patch_size;
        config.vision_config.projection_dim = self.projection_dim;

        config.image_size = v.image_size;
        config
    }
}
