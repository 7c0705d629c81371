//! Domain types shared by the encoders, the model cache and the vector router.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type ModelId = String;
pub type ItemId = String;

/// Fixed-length, L2-normalized vector produced by one model.
pub type Embedding = Vec<f32>;

/// Arbitrary key/value data stored next to a vector (e.g. `filename`).
pub type Payload = BTreeMap<String, String>;

/// Closed set of encoder families. Selects the encoder variant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    OpenaiClip,
    Openclip,
    Siglip,
}

impl ModelFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenaiClip => "openai_clip",
            Self::Openclip => "openclip",
            Self::Siglip => "siglip",
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable metadata for one embedding model.
///
/// - `id`: the only stable handle used by the rest of the system
/// - `model_name`/`pretrained`: address of the weights in the weight source
/// - `vector_dim`: length of every embedding the model produces
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub id: ModelId,
    pub name: String,
    pub family: ModelFamily,
    pub vector_dim: usize,
    pub model_name: String,
    pub pretrained: Option<String>,
    pub description: String,
}

/// Similarity metric of a namespace. Only cosine is used.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Cosine,
}

/// A vector plus payload stored under an opaque id inside one namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedItem {
    pub id: ItemId,
    pub vector: Embedding,
    pub payload: Payload,
}

/// An item as returned by listing; vectors are not copied out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredItem {
    pub id: ItemId,
    pub payload: Payload,
}

/// One ranked search result. Higher `score` is more similar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub id: ItemId,
    pub score: f32,
    pub payload: Payload,
}

/// What the vector engine reports about an existing namespace.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamespaceInfo {
    pub dim: usize,
    pub point_count: usize,
}

/// Indexing coverage of one registered model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamespaceStatus {
    pub model_id: ModelId,
    pub namespace: String,
    pub exists: bool,
    pub point_count: usize,
}

/// Euclidean norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn normalize_in_place(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity of two equal-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let denom = l2_norm(a) * l2_norm(b);
    if denom <= f32::EPSILON { 0.0 } else { dot / denom }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_serializes_to_tag() {
        let json = serde_json::to_string(&ModelFamily::OpenaiClip).expect("serialize");
        assert_eq!(json, "\"openai_clip\"");
        assert_eq!(ModelFamily::Siglip.to_string(), "siglip");
    }

    #[test]
    fn normalize_gives_unit_norm() {
        let mut v = vec![3.0f32, 4.0];
        normalize_in_place(&mut v);
        assert!((l2_norm(&v) - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_identical_is_one() {
        let v = [0.1f32, 0.2, 0.3];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
