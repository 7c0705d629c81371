//! Per-model namespaces on top of a [`VectorEngine`].
//!
//! Every registered model owns exactly one namespace, named by
//! [`namespace_name`] and sized to the model's dimension. All operations take
//! a model id, so a vector is only ever stored next to, and compared with,
//! vectors from the same model.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use imgsearch_core::traits::VectorEngine;
use imgsearch_core::types::{Embedding, IndexedItem, Metric, ModelDescriptor, NamespaceStatus, Payload, SearchHit, StoredItem};
use imgsearch_core::{namespace_name, Error, Registry, Result};

pub const DEFAULT_SCROLL_LIMIT: usize = 1000;

pub struct IndexRouter {
    engine: Arc<dyn VectorEngine>,
    registry: Arc<Registry>,
    prefix: String,
    scroll_limit: usize,
    /// One async lock per namespace, held while checking and creating it.
    creation_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl IndexRouter {
    pub fn new(engine: Arc<dyn VectorEngine>, registry: Arc<Registry>, prefix: impl Into<String>) -> Self {
        Self {
            engine,
            registry,
            prefix: prefix.into(),
            scroll_limit: DEFAULT_SCROLL_LIMIT,
            creation_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_scroll_limit(mut self, scroll_limit: usize) -> Self {
        self.scroll_limit = scroll_limit.max(1);
        self
    }

    pub fn registry(&self) -> &Arc<Registry> { &self.registry }

    /// Namespace of a registered model. Does not touch the engine.
    pub fn namespace_for(&self, model_id: &str) -> Result<String> {
        self.registry.lookup(model_id)?;
        Ok(namespace_name(&self.prefix, model_id))
    }

    fn resolve(&self, model_id: &str) -> Result<(&ModelDescriptor, String)> {
        let descriptor = self.registry.lookup(model_id)?;
        Ok((descriptor, namespace_name(&self.prefix, model_id)))
    }

    fn creation_lock(&self, namespace: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.creation_locks.lock();
        Arc::clone(locks.entry(namespace.to_string()).or_default())
    }

    /// Create the model's namespace if absent. Idempotent; concurrent callers
    /// for the same model create it once.
    ///
    /// A namespace that exists with a different dimension belongs to another
    /// model whose id maps to the same name; that is reported as `Rejected`.
    pub async fn ensure_namespace(&self, model_id: &str) -> Result<String> {
        let (descriptor, namespace) = self.resolve(model_id)?;
        let lock = self.creation_lock(&namespace);
        let _guard = lock.lock().await;
        match self.engine.info(&namespace).await {
            Ok(info) if info.dim == descriptor.vector_dim => Ok(namespace),
            Ok(info) => Err(Error::Rejected(format!(
                "namespace {namespace} holds {}-dimensional vectors but {model_id} produces {}",
                info.dim, descriptor.vector_dim
            ))),
            Err(Error::NotFound(_)) => {
                self.engine.create_namespace(&namespace, descriptor.vector_dim, Metric::Cosine).await?;
                info!(model_id, namespace = %namespace, dim = descriptor.vector_dim, "created namespace");
                Ok(namespace)
            }
            Err(e) => Err(e),
        }
    }

    /// Insert or overwrite items. Every vector is checked against the model's
    /// dimension before the namespace is touched.
    pub async fn upsert(&self, model_id: &str, items: &[IndexedItem]) -> Result<()> {
        let (descriptor, _) = self.resolve(model_id)?;
        if let Some(bad) = items.iter().find(|i| i.vector.len() != descriptor.vector_dim) {
            return Err(Error::dimension_mismatch(model_id, descriptor.vector_dim, bad.vector.len()));
        }
        if items.is_empty() { return Ok(()); }
        let namespace = self.ensure_namespace(model_id).await?;
        self.engine.upsert(&namespace, items).await?;
        debug!(model_id, count = items.len(), "upserted items");
        Ok(())
    }

    pub async fn upsert_one(&self, model_id: &str, id: &str, vector: Embedding, payload: Payload) -> Result<()> {
        self.upsert(model_id, &[IndexedItem { id: id.to_string(), vector, payload }]).await
    }

    /// Ranked by descending cosine similarity, at most `limit` hits. A model
    /// that has never been indexed yields no hits.
    pub async fn search(&self, model_id: &str, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        let (descriptor, namespace) = self.resolve(model_id)?;
        if vector.len() != descriptor.vector_dim {
            return Err(Error::dimension_mismatch(model_id, descriptor.vector_dim, vector.len()));
        }
        if limit == 0 { return Ok(Vec::new()); }
        match self.engine.query(&namespace, vector, limit).await {
            Err(Error::NotFound(_)) => Ok(Vec::new()),
            other => other,
        }
    }

    /// Up to the configured scroll limit of stored items.
    pub async fn list_all(&self, model_id: &str) -> Result<Vec<StoredItem>> {
        let (_, namespace) = self.resolve(model_id)?;
        match self.engine.scroll(&namespace, self.scroll_limit).await {
            Err(Error::NotFound(_)) => Ok(Vec::new()),
            other => other,
        }
    }

    /// Remove items by id. Deleting from a missing namespace is a no-op.
    pub async fn delete(&self, model_id: &str, ids: &[String]) -> Result<()> {
        let (_, namespace) = self.resolve(model_id)?;
        match self.engine.delete(&namespace, ids).await {
            Err(Error::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    /// Drop the model's namespace. Returns whether it existed.
    pub async fn delete_namespace(&self, model_id: &str) -> Result<bool> {
        let (_, namespace) = self.resolve(model_id)?;
        let lock = self.creation_lock(&namespace);
        let _guard = lock.lock().await;
        match self.engine.delete_namespace(&namespace).await {
            Ok(()) => {
                info!(model_id, namespace = %namespace, "deleted namespace");
                Ok(true)
            }
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn status_of(&self, model_id: &str) -> Result<NamespaceStatus> {
        let (_, namespace) = self.resolve(model_id)?;
        let (exists, point_count) = match self.engine.info(&namespace).await {
            Ok(info) => (true, info.point_count),
            Err(Error::NotFound(_)) => (false, 0),
            Err(e) => return Err(e),
        };
        Ok(NamespaceStatus { model_id: model_id.to_string(), namespace, exists, point_count })
    }

    /// Indexing coverage of every registered model, in registry order.
    pub async fn status(&self) -> Result<Vec<NamespaceStatus>> {
        let mut statuses = Vec::with_capacity(self.registry.list().len());
        for descriptor in self.registry.list() {
            statuses.push(self.status_of(&descriptor.id).await?);
        }
        Ok(statuses)
    }
}
