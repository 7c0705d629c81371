//! Where model weights come from.
//!
//! A model is looked up first in `<cache_dir>/local/<safe id>/` (manually
//! placed files, no network), then fetched through the Hugging Face hub into
//! `<cache_dir>/hub`. Both use the transformers layout: `config.json`,
//! `tokenizer.json` and `model.safetensors` (or `pytorch_model.bin`).

use std::path::{Path, PathBuf};

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use hf_hub::api::sync::ApiBuilder;
use tracing::{debug, info};

use imgsearch_core::types::{ModelDescriptor, ModelFamily};
use imgsearch_core::{Error, Result};

const WEIGHT_FILES: [&str; 2] = ["model.safetensors", "pytorch_model.bin"];

#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
}

impl ModelFiles {
    fn in_dir(dir: &Path) -> Option<Self> {
        let config = dir.join("config.json");
        let tokenizer = dir.join("tokenizer.json");
        let weights = WEIGHT_FILES.iter().map(|f| dir.join(f)).find(|p| p.exists())?;
        (config.exists() && tokenizer.exists()).then_some(Self { config, tokenizer, weights })
    }

    pub fn read_config(&self) -> anyhow::Result<String> {
        Ok(std::fs::read_to_string(&self.config)?)
    }

    pub fn var_builder(&self, device: &Device) -> anyhow::Result<VarBuilder<'static>> {
        if self.weights.extension().is_some_and(|ext| ext == "safetensors") {
            // SAFETY: the weight file is not modified while the mapping is alive.
            Ok(unsafe { VarBuilder::from_mmaped_safetensors(&[&self.weights], DType::F32, device)? })
        } else {
            Ok(VarBuilder::from_pth(&self.weights, DType::F32, device)?)
        }
    }
}

#[derive(Debug, Clone)]
pub struct WeightSource {
    cache_dir: PathBuf,
}

impl WeightSource {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self { cache_dir: cache_dir.into() }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn local_dir(&self, descriptor: &ModelDescriptor) -> PathBuf {
        self.cache_dir.join("local").join(descriptor.id.replace('/', "__"))
    }

    pub fn resolve(&self, descriptor: &ModelDescriptor) -> Result<ModelFiles> {
        let local = self.local_dir(descriptor);
        if let Some(files) = ModelFiles::in_dir(&local) {
            info!(model_id = %descriptor.id, dir = %local.display(), "using local model files");
            return Ok(files);
        }

        let repo_id = hub_repo(descriptor)?;
        debug!(model_id = %descriptor.id, repo = %repo_id, "fetching model files from hub");
        let api = ApiBuilder::new()
            .with_cache_dir(self.cache_dir.join("hub"))
            .with_progress(false)
            .build()
            .map_err(|e| Error::Load(format!("hub client: {e}")))?;
        let repo = api.model(repo_id.clone());
        let fetch = |file: &str| repo.get(file).map_err(|e| Error::Load(format!("{repo_id}/{file}: {e}")));

        let config = fetch("config.json")?;
        let tokenizer = fetch("tokenizer.json")?;
        let weights = fetch(WEIGHT_FILES[0]).or_else(|_| fetch(WEIGHT_FILES[1]))?;
        Ok(ModelFiles { config, tokenizer, weights })
    }
}

/// Hub repository holding the transformers-format weights of a model.
pub fn hub_repo(descriptor: &ModelDescriptor) -> Result<String> {
    match descriptor.family {
        ModelFamily::OpenaiClip => {
            let arch = descriptor.model_name.replace('/', "-").to_lowercase();
            Ok(format!("openai/clip-{}", arch.replace("vit-b-", "vit-base-patch").replace("vit-l-", "vit-large-patch")))
        }
        ModelFamily::Openclip => {
            let tag = descriptor.pretrained.as_deref().filter(|t| t.starts_with("laion")).ok_or_else(|| {
                Error::NotFound(format!("no hub weights for {} / {:?}", descriptor.model_name, descriptor.pretrained))
            })?;
            let tag: Vec<String> = tag.split('_').map(upper_last).collect();
            Ok(format!("laion/CLIP-{}-{}", descriptor.model_name, tag.join("-")))
        }
        ModelFamily::Siglip => Ok(descriptor.model_name.clone()),
    }
}

/// `laion2b` -> `laion2B`, `s34b` -> `s34B`.
fn upper_last(part: &str) -> String {
    let mut chars: Vec<char> = part.chars().collect();
    if let Some(last) = chars.last_mut() { *last = last.to_ascii_uppercase(); }
    chars.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgsearch_core::Registry;

    fn repo(id: &str) -> String {
        hub_repo(Registry::builtin().lookup(id).expect("lookup")).expect("repo")
    }

    #[test]
    fn builtin_models_map_to_hub_repos() {
        assert_eq!(repo("openai/ViT-B-32"), "openai/clip-vit-base-patch32");
        assert_eq!(repo("openai/ViT-B-16"), "openai/clip-vit-base-patch16");
        assert_eq!(repo("openai/ViT-L-14"), "openai/clip-vit-large-patch14");
        assert_eq!(repo("openclip/ViT-B-32-laion2b"), "laion/CLIP-ViT-B-32-laion2B-s34B-b79K");
        assert_eq!(repo("openclip/ViT-L-14-laion2b"), "laion/CLIP-ViT-L-14-laion2B-s32B-b82K");
        assert_eq!(repo("siglip/large-patch16-384"), "google/siglip-large-patch16-384");
    }

    #[test]
    fn local_dir_wins_when_complete() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let source = WeightSource::new(tmp.path());
        let d = Registry::builtin().lookup("openai/ViT-B-32").expect("lookup").clone();
        let dir = source.local_dir(&d);
        std::fs::create_dir_all(&dir).expect("mkdir");
        for f in ["config.json", "tokenizer.json", "model.safetensors"] {
            std::fs::write(dir.join(f), b"{}").expect("write");
        }
        let files = source.resolve(&d).expect("resolve");
        assert_eq!(files.weights, dir.join("model.safetensors"));
    }
}
