use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{Connection, DistanceType, Table};
use arrow_array::{Array, Float32Array, RecordBatch, RecordBatchIterator};
use tracing::debug;

use imgsearch_core::traits::VectorEngine;
use imgsearch_core::types::{IndexedItem, Metric, NamespaceInfo, SearchHit, StoredItem};
use imgsearch_core::{Error, Result};

use crate::schema::{vector_dim, ID_COLUMN, PAYLOAD_COLUMN};
use crate::table::{create_empty_table, id_predicate, items_to_record_batch, open_db, rows, table_exists};

/// Embedded LanceDB: one table per namespace under a local directory.
pub struct LanceEngine {
	db: Connection,
}

fn backend<E: std::fmt::Display>(e: E) -> Error {
	Error::BackendUnavailable(e.to_string())
}

impl LanceEngine {
	pub async fn open(uri: &str) -> Result<Self> {
		let db = open_db(uri).await.map_err(backend)?;
		debug!(uri, "opened LanceDB");
		Ok(Self { db })
	}

	async fn table(&self, name: &str) -> Result<Table> {
		if !table_exists(&self.db, name).await.map_err(backend)? {
			return Err(Error::NotFound(format!("namespace {name}")));
		}
		self.db.open_table(name).execute().await.map_err(backend)
	}

	async fn dim_of(table: &Table) -> Result<usize> {
		let schema = table.schema().await.map_err(backend)?;
		vector_dim(&schema).ok_or_else(|| Error::Operation(format!("table {} has no vector column", table.name())))
	}
}

#[async_trait]
impl VectorEngine for LanceEngine {
	async fn create_namespace(&self, name: &str, dim: usize, metric: Metric) -> Result<()> {
		if table_exists(&self.db, name).await.map_err(backend)? {
			return Err(Error::Rejected(format!("namespace {name} already exists")));
		}
		// cosine is applied per query; the table itself only fixes the dimension
		let Metric::Cosine = metric;
		create_empty_table(&self.db, name, dim).await.map_err(backend)
	}

	async fn upsert(&self, namespace: &str, items: &[IndexedItem]) -> Result<()> {
		if items.is_empty() { return Ok(()); }
		let table = self.table(namespace).await?;
		let dim = Self::dim_of(&table).await?;
		if let Some(bad) = items.iter().find(|i| i.vector.len() != dim) {
			return Err(Error::Rejected(format!("item {} has {} dimensions, namespace has {dim}", bad.id, bad.vector.len())));
		}
		let batch = items_to_record_batch(items, dim).map_err(|e| Error::Operation(e.to_string()))?;
		let schema = batch.schema();
		let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
		// Upsert behavior via merge_insert: id is unique
		let mut mi = table.merge_insert(&[ID_COLUMN]);
		mi.when_matched_update_all(None).when_not_matched_insert_all();
		mi.execute(reader).await.map_err(backend)?;
		Ok(())
	}

	async fn query(&self, namespace: &str, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
		let table = self.table(namespace).await?;
		let stream = table
			.vector_search(vector.to_vec())
			.map_err(backend)?
			.distance_type(DistanceType::Cosine)
			.limit(limit)
			.execute()
			.await
			.map_err(backend)?;
		let batches: Vec<RecordBatch> = stream.try_collect().await.map_err(backend)?;
		let mut hits = Vec::new();
		for batch in &batches {
			let distances = batch.column_by_name("_distance").and_then(|c| c.as_any().downcast_ref::<Float32Array>());
			for (i, (id, payload)) in rows(batch).map_err(|e| Error::Operation(e.to_string()))?.into_iter().enumerate() {
				// cosine distance is 1 - similarity
				let score = distances.map(|d| 1.0 - d.value(i)).unwrap_or(0.0);
				hits.push(SearchHit { id, score, payload });
			}
		}
		hits.sort_by(|a, b| b.score.total_cmp(&a.score));
		hits.truncate(limit);
		Ok(hits)
	}

	async fn scroll(&self, namespace: &str, limit: usize) -> Result<Vec<StoredItem>> {
		let table = self.table(namespace).await?;
		let stream = table
			.query()
			.select(Select::columns(&[ID_COLUMN, PAYLOAD_COLUMN]))
			.limit(limit)
			.execute()
			.await
			.map_err(backend)?;
		let batches: Vec<RecordBatch> = stream.try_collect().await.map_err(backend)?;
		let mut items = Vec::new();
		for batch in &batches {
			let batch_rows = rows(batch).map_err(|e| Error::Operation(e.to_string()))?;
			items.extend(batch_rows.into_iter().map(|(id, payload)| StoredItem { id, payload }));
		}
		items.truncate(limit);
		Ok(items)
	}

	async fn delete(&self, namespace: &str, ids: &[String]) -> Result<()> {
		if ids.is_empty() { return Ok(()); }
		let table = self.table(namespace).await?;
		table.delete(&id_predicate(ids)).await.map_err(backend)?;
		Ok(())
	}

	async fn delete_namespace(&self, name: &str) -> Result<()> {
		if !table_exists(&self.db, name).await.map_err(backend)? {
			return Err(Error::NotFound(format!("namespace {name}")));
		}
		self.db.drop_table(name, &[]).await.map_err(backend)
	}

	async fn info(&self, namespace: &str) -> Result<NamespaceInfo> {
		let table = self.table(namespace).await?;
		let dim = Self::dim_of(&table).await?;
		let point_count = table.count_rows(None).await.map_err(backend)?;
		Ok(NamespaceInfo { dim, point_count })
	}
}
