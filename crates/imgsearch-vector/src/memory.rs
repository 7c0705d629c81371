//! In-process engine: exact cosine scan over a map per namespace.
//!
//! Used by tests and by `vector.backend = "memory"` for throwaway sessions.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;

use imgsearch_core::traits::VectorEngine;
use imgsearch_core::types::{cosine_similarity, Embedding, IndexedItem, Metric, NamespaceInfo, Payload, SearchHit, StoredItem};
use imgsearch_core::{Error, Result};

struct Namespace {
    dim: usize,
    items: BTreeMap<String, (Embedding, Payload)>,
}

#[derive(Default)]
pub struct MemoryEngine {
    namespaces: RwLock<HashMap<String, Namespace>>,
}

impl MemoryEngine {
    pub fn new() -> Self { Self::default() }

    /// Number of namespaces; handy in tests.
    pub fn namespace_count(&self) -> usize { self.namespaces.read().len() }
}

fn missing(name: &str) -> Error {
    Error::NotFound(format!("namespace {name}"))
}

#[async_trait]
impl VectorEngine for MemoryEngine {
    async fn create_namespace(&self, name: &str, dim: usize, _metric: Metric) -> Result<()> {
        let mut namespaces = self.namespaces.write();
        if namespaces.contains_key(name) {
            return Err(Error::Rejected(format!("namespace {name} already exists")));
        }
        namespaces.insert(name.to_string(), Namespace { dim, items: BTreeMap::new() });
        Ok(())
    }

    async fn upsert(&self, namespace: &str, items: &[IndexedItem]) -> Result<()> {
        let mut namespaces = self.namespaces.write();
        let ns = namespaces.get_mut(namespace).ok_or_else(|| missing(namespace))?;
        if let Some(bad) = items.iter().find(|i| i.vector.len() != ns.dim) {
            return Err(Error::Rejected(format!("item {} has {} dimensions, namespace has {}", bad.id, bad.vector.len(), ns.dim)));
        }
        for item in items {
            ns.items.insert(item.id.clone(), (item.vector.clone(), item.payload.clone()));
        }
        Ok(())
    }

    async fn query(&self, namespace: &str, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        let namespaces = self.namespaces.read();
        let ns = namespaces.get(namespace).ok_or_else(|| missing(namespace))?;
        let mut hits: Vec<SearchHit> = ns
            .items
            .iter()
            .map(|(id, (v, payload))| SearchHit { id: id.clone(), score: cosine_similarity(vector, v), payload: payload.clone() })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn scroll(&self, namespace: &str, limit: usize) -> Result<Vec<StoredItem>> {
        let namespaces = self.namespaces.read();
        let ns = namespaces.get(namespace).ok_or_else(|| missing(namespace))?;
        Ok(ns.items.iter().take(limit).map(|(id, (_, payload))| StoredItem { id: id.clone(), payload: payload.clone() }).collect())
    }

    async fn delete(&self, namespace: &str, ids: &[String]) -> Result<()> {
        let mut namespaces = self.namespaces.write();
        let ns = namespaces.get_mut(namespace).ok_or_else(|| missing(namespace))?;
        for id in ids { ns.items.remove(id); }
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        self.namespaces.write().remove(name).map(|_| ()).ok_or_else(|| missing(name))
    }

    async fn info(&self, namespace: &str) -> Result<NamespaceInfo> {
        let namespaces = self.namespaces.read();
        let ns = namespaces.get(namespace).ok_or_else(|| missing(namespace))?;
        Ok(NamespaceInfo { dim: ns.dim, point_count: ns.items.len() })
    }
}
