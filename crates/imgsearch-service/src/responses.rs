use serde::Serialize;

use imgsearch_core::types::{ModelFamily, NamespaceStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadReceipt {
    pub id: String,
    pub filename: String,
    pub model_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub filename: String,
    pub score: f32,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub model_id: String,
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRecord {
    pub id: String,
    pub filename: String,
    pub path: String,
}

/// A registered model with its live residency and indexing state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub family: ModelFamily,
    pub vector_dim: usize,
    pub description: String,
    pub is_loaded: bool,
    pub is_indexed: bool,
    pub indexed_count: usize,
    pub is_current: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub current_model: String,
    pub capacity: usize,
    /// Least recently used first.
    pub loaded_models: Vec<String>,
    pub namespaces: Vec<NamespaceStatus>,
}

pub fn file_url(filename: &str) -> String {
    format!("/api/images/file/{filename}")
}
