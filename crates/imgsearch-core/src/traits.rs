use async_trait::async_trait;

use crate::error::Result;
use crate::types::{IndexedItem, Metric, NamespaceInfo, SearchHit, StoredItem};

/// Storage contract of an external vector engine.
///
/// Namespaces are addressed by name only; the engine knows nothing about
/// models. Operations on a namespace that does not exist fail with
/// `Error::NotFound`; an unreachable engine fails with
/// `Error::BackendUnavailable`.
#[async_trait]
pub trait VectorEngine: Send + Sync {
    /// Create an empty namespace. Fails if it already exists.
    async fn create_namespace(&self, name: &str, dim: usize, metric: Metric) -> Result<()>;
    /// Insert or overwrite items by id.
    async fn upsert(&self, namespace: &str, items: &[IndexedItem]) -> Result<()>;
    /// Nearest neighbours ordered by descending similarity, at most `limit`.
    async fn query(&self, namespace: &str, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>>;
    /// Up to `limit` stored items, in engine order.
    async fn scroll(&self, namespace: &str, limit: usize) -> Result<Vec<StoredItem>>;
    async fn delete(&self, namespace: &str, ids: &[String]) -> Result<()>;
    async fn delete_namespace(&self, name: &str) -> Result<()>;
    async fn info(&self, namespace: &str) -> Result<NamespaceInfo>;
}
