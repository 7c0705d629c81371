//! LanceDB connection and record-batch helpers.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use arrow_array::types::Float32Type;
use arrow_array::{Array, FixedSizeListArray, RecordBatch, RecordBatchIterator, StringArray};
use lancedb::{connect, Connection};

use imgsearch_core::types::{IndexedItem, Payload};

use crate::schema::{build_item_schema, ID_COLUMN, PAYLOAD_COLUMN};

pub async fn open_db(uri: &str) -> Result<Connection> {
    Ok(connect(uri).execute().await?)
}

pub async fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    Ok(conn.table_names().execute().await?.iter().any(|n| n == name))
}

pub async fn create_empty_table(conn: &Connection, name: &str, dim: usize) -> Result<()> {
    let schema = build_item_schema(dim);
    // create empty table with 0 rows
    let iter = RecordBatchIterator::new(vec![].into_iter(), schema);
    conn.create_table(name, Box::new(iter)).execute().await?;
    Ok(())
}

pub fn items_to_record_batch(items: &[IndexedItem], dim: usize) -> Result<RecordBatch> {
    let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
    let payloads = items.iter().map(|i| serde_json::to_string(&i.payload)).collect::<Result<Vec<_>, _>>()?;
    let vectors = items.iter().map(|i| Some(i.vector.iter().map(|&x| Some(x)).collect::<Vec<_>>()));
    Ok(RecordBatch::try_new(
        build_item_schema(dim),
        vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(StringArray::from(payloads)),
            Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors, dim as i32)),
        ],
    )?)
}

pub fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow!("{name} column missing"))
}

/// `(id, payload)` for every row of a batch.
pub fn rows(batch: &RecordBatch) -> Result<Vec<(String, Payload)>> {
    let ids = string_column(batch, ID_COLUMN)?;
    let payloads = string_column(batch, PAYLOAD_COLUMN)?;
    (0..batch.num_rows())
        .map(|i| Ok((ids.value(i).to_string(), parse_payload(payloads, i)?)))
        .collect()
}

fn parse_payload(col: &StringArray, i: usize) -> Result<Payload> {
    if col.is_null(i) { return Ok(Payload::new()); }
    Ok(serde_json::from_str(col.value(i))?)
}

/// SQL predicate matching any of `ids`.
pub fn id_predicate(ids: &[String]) -> String {
    let quoted: Vec<String> = ids.iter().map(|id| format!("'{}'", id.replace('\'', "''"))).collect();
    format!("{ID_COLUMN} IN ({})", quoted.join(", "))
}
