//! Catalog of known embedding models.
//!
//! Built once at startup and never mutated afterwards; share it behind an
//! `Arc`. Descriptor ids are the only handle the rest of the system uses.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::types::{ModelDescriptor, ModelFamily};

#[derive(Debug, Clone)]
pub struct Registry {
    descriptors: Vec<ModelDescriptor>,
    by_id: HashMap<String, usize>,
}

impl Registry {
    /// Build a registry from an explicit descriptor list, keeping its order.
    pub fn new(descriptors: Vec<ModelDescriptor>) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(descriptors.len());
        for (idx, d) in descriptors.iter().enumerate() {
            if d.vector_dim == 0 {
                return Err(Error::InvalidConfig(format!("model {} has a zero vector_dim", d.id)));
            }
            if by_id.insert(d.id.clone(), idx).is_some() {
                return Err(Error::InvalidConfig(format!("duplicate model id: {}", d.id)));
            }
        }
        Ok(Self { descriptors, by_id })
    }

    /// The built-in catalog of CLIP, OpenCLIP and SigLIP models.
    pub fn builtin() -> Self {
        let descriptors = vec![
            descriptor("openai/ViT-B-32", "CLIP ViT-B/32", ModelFamily::OpenaiClip, 512, "ViT-B/32", None, "Fast, good balance of speed and quality"),
            descriptor("openai/ViT-B-16", "CLIP ViT-B/16", ModelFamily::OpenaiClip, 512, "ViT-B/16", None, "Higher quality, slower than B/32"),
            descriptor("openai/ViT-L-14", "CLIP ViT-L/14", ModelFamily::OpenaiClip, 768, "ViT-L/14", None, "Highest quality OpenAI model"),
            descriptor("openclip/ViT-B-32-laion2b", "OpenCLIP ViT-B/32", ModelFamily::Openclip, 512, "ViT-B-32", Some("laion2b_s34b_b79k"), "Trained on LAION-2B dataset"),
            descriptor("openclip/ViT-L-14-laion2b", "OpenCLIP ViT-L/14", ModelFamily::Openclip, 768, "ViT-L-14", Some("laion2b_s32b_b82k"), "Large model trained on LAION-2B"),
            descriptor("siglip/base-patch16-224", "SigLIP Base", ModelFamily::Siglip, 768, "google/siglip-base-patch16-224", None, "Google SigLIP with sigmoid loss"),
            descriptor("siglip/large-patch16-384", "SigLIP Large", ModelFamily::Siglip, 1024, "google/siglip-large-patch16-384", None, "High-res SigLIP model"),
        ];
        let by_id = descriptors.iter().enumerate().map(|(i, d)| (d.id.clone(), i)).collect();
        Self { descriptors, by_id }
    }

    pub fn lookup(&self, id: &str) -> Result<&ModelDescriptor> {
        self.by_id
            .get(id)
            .map(|&idx| &self.descriptors[idx])
            .ok_or_else(|| Error::unknown_model(id))
    }

    pub fn list(&self) -> &[ModelDescriptor] {
        &self.descriptors
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }
}

fn descriptor(
    id: &str,
    name: &str,
    family: ModelFamily,
    vector_dim: usize,
    model_name: &str,
    pretrained: Option<&str>,
    description: &str,
) -> ModelDescriptor {
    ModelDescriptor {
        id: id.to_string(),
        name: name.to_string(),
        family,
        vector_dim,
        model_name: model_name.to_string(),
        pretrained: pretrained.map(str::to_string),
        description: description.to_string(),
    }
}

/// Vector-engine namespace for a model: `<prefix>_<id>` with `/` and `-`
/// replaced by `_` and lowercased.
///
/// NOT injective: `a/b-c` and `a-b/c` (or ids differing only in case) map to
/// the same namespace. Nothing guards against such a collision; the router
/// only notices when the colliding models have different dimensions.
pub fn namespace_name(prefix: &str, model_id: &str) -> String {
    let safe_id = model_id.replace(['/', '-'], "_").to_lowercase();
    format!("{prefix}_{safe_id}")
}
