//! LanceIndex - one LanceDB table per chunking mode
//!
//! Rows are flattened [`VectorRecord`]s: chunk metadata as plain columns,
//! repository metadata as nullable columns, and a fixed-width `vector`.
//! Writes go through `merge_insert` on `id`; LanceDB persists every write, so
//! `flush` has nothing to do.

use std::sync::Arc;

use arrow_array::{
  Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::TryStreamExt;
use lancedb::{
  Connection, DistanceType, Table,
  query::{ExecutableQuery, QueryBase},
};
use tracing::{debug, trace};

use super::{ChunkMetadata, MetadataFilter, QueryHit, RepoMetadata, StoreError, StoredChunk, VectorIndex, VectorRecord};
use crate::domain::mode::ChunkingMode;

/// Ids per `IN (...)` predicate
const DELETE_BATCH: usize = 256;

pub fn chunks_schema(vector_dim: usize) -> Arc<Schema> {
  Arc::new(Schema::new(vec![
    Field::new("id", DataType::Utf8, false),
    Field::new("path", DataType::Utf8, false),
    Field::new("file_name", DataType::Utf8, false),
    Field::new("file_type", DataType::Utf8, false),
    Field::new("chunk_index", DataType::UInt32, false),
    Field::new("line_ranges", DataType::Utf8, false),
    Field::new("chunk_size", DataType::UInt32, false),
    Field::new("chunking_mode", DataType::Utf8, false),
    Field::new("document", DataType::Utf8, false),
    // Repository rows only
    Field::new("repository", DataType::Utf8, true),
    Field::new("branch", DataType::Utf8, true),
    Field::new("repo_file_path", DataType::Utf8, true),
    Field::new("commit_sha", DataType::Utf8, true),
    Field::new("last_indexed_at", DataType::Int64, true), // Unix timestamp ms
    Field::new(
      "vector",
      DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), vector_dim as i32),
      false,
    ),
  ]))
}

pub struct LanceIndex {
  table: Table,
  vector_dim: usize,
}

impl LanceIndex {
  /// Open table `name`, creating it when missing. An existing table with a
  /// different vector width is an error.
  pub async fn open(connection: &Connection, name: &str, vector_dim: usize) -> Result<Self, StoreError> {
    let table_names = connection.table_names().execute().await?;
    if !table_names.iter().any(|t| t == name) {
      debug!(table = name, vector_dim, "Creating vector table");
      connection
        .create_empty_table(name, chunks_schema(vector_dim))
        .execute()
        .await?;
    }
    let table = connection.open_table(name).execute().await?;

    let schema = table.schema().await?;
    if let Ok(field) = schema.field_with_name("vector")
      && let DataType::FixedSizeList(_, found) = field.data_type()
      && *found as usize != vector_dim
    {
      return Err(StoreError::Dimension {
        table: name.to_string(),
        expected: vector_dim,
        found: *found as usize,
      });
    }

    Ok(Self { table, vector_dim })
  }

  async fn rows(&self, predicate: String) -> Result<Vec<RecordBatch>, StoreError> {
    Ok(self.table.query().only_if(predicate).execute().await?.try_collect().await?)
  }
}

/// SQL string literal
fn quote(value: &str) -> String {
  format!("'{}'", value.replace('\'', "''"))
}

/// Predicate selecting a superset of the rows `filter` matches; callers
/// re-check with [`MetadataFilter::matches`] since `LIKE` treats `_` and `%`
/// in paths as wildcards.
pub(crate) fn predicate(filter: &MetadataFilter) -> String {
  match filter {
    MetadataFilter::Path(path) => format!("path = {}", quote(path)),
    MetadataFilter::FileName(name) => format!("file_name = {}", quote(name)),
    MetadataFilter::PathPrefix(dir) => {
      let dir = dir.trim_end_matches('/');
      format!("(path = {} OR path LIKE {})", quote(dir), quote(&format!("{dir}/%")))
    }
    MetadataFilter::Repo { repository, branch } => {
      format!("repository = {} AND branch = {}", quote(repository), quote(branch))
    }
    MetadataFilter::RepoFile {
      repository,
      branch,
      file_path,
    } => format!(
      "repository = {} AND branch = {} AND repo_file_path = {}",
      quote(repository),
      quote(branch),
      quote(file_path)
    ),
  }
}

/// Nullable column from the repository metadata
fn repo_column(records: &[VectorRecord], field: fn(&RepoMetadata) -> &str) -> StringArray {
  let values: Vec<Option<&str>> = records.iter().map(|r| r.metadata.repo.as_ref().map(field)).collect();
  StringArray::from(values)
}

fn records_to_batch(records: &[VectorRecord], vector_dim: usize) -> Result<RecordBatch, StoreError> {
  let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
  let paths: Vec<&str> = records.iter().map(|r| r.metadata.path.as_str()).collect();
  let file_names: Vec<&str> = records.iter().map(|r| r.metadata.file_name.as_str()).collect();
  let file_types: Vec<&str> = records.iter().map(|r| r.metadata.file_type.as_str()).collect();
  let chunk_indexes: Vec<u32> = records.iter().map(|r| r.metadata.chunk_index as u32).collect();
  let line_ranges: Vec<&str> = records.iter().map(|r| r.metadata.line_ranges.as_str()).collect();
  let chunk_sizes: Vec<u32> = records.iter().map(|r| r.metadata.chunk_size as u32).collect();
  let modes: Vec<&str> = records.iter().map(|r| r.metadata.chunking_mode.as_str()).collect();
  let documents: Vec<&str> = records.iter().map(|r| r.document.as_str()).collect();
  let indexed_ats: Vec<Option<i64>> = records
    .iter()
    .map(|r| r.metadata.repo.as_ref().map(|m| m.last_indexed_at.timestamp_millis()))
    .collect();

  let mut all_vectors: Vec<f32> = Vec::with_capacity(records.len() * vector_dim);
  for record in records {
    all_vectors.extend(fit(&record.vector, vector_dim));
  }
  let field = Arc::new(Field::new("item", DataType::Float32, true));
  let vector_list = FixedSizeListArray::try_new(field, vector_dim as i32, Arc::new(Float32Array::from(all_vectors)), None)?;

  Ok(RecordBatch::try_new(
    chunks_schema(vector_dim),
    vec![
      Arc::new(StringArray::from(ids)),
      Arc::new(StringArray::from(paths)),
      Arc::new(StringArray::from(file_names)),
      Arc::new(StringArray::from(file_types)),
      Arc::new(UInt32Array::from(chunk_indexes)),
      Arc::new(StringArray::from(line_ranges)),
      Arc::new(UInt32Array::from(chunk_sizes)),
      Arc::new(StringArray::from(modes)),
      Arc::new(StringArray::from(documents)),
      Arc::new(repo_column(records, |m| m.repository.as_str())),
      Arc::new(repo_column(records, |m| m.branch.as_str())),
      Arc::new(repo_column(records, |m| m.file_path.as_str())),
      Arc::new(repo_column(records, |m| m.commit_sha.as_str())),
      Arc::new(Int64Array::from(indexed_ats)),
      Arc::new(vector_list),
    ],
  )?)
}

/// Zero-pad or truncate to the table width
fn fit(vector: &[f32], vector_dim: usize) -> Vec<f32> {
  let mut v = vector.to_vec();
  v.resize(vector_dim, 0.0);
  v
}

fn batch_to_chunk(batch: &RecordBatch, row: usize) -> Result<StoredChunk, StoreError> {
  let strings = |name: &str| -> Result<&StringArray, StoreError> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<StringArray>())
      .ok_or_else(|| StoreError::Row(format!("column {}", name)))
  };
  let get_string = |name: &str| -> Result<String, StoreError> { Ok(strings(name)?.value(row).to_string()) };
  let get_string_opt = |name: &str| -> Option<String> {
    strings(name)
      .ok()
      .filter(|a| !a.is_null(row))
      .map(|a| a.value(row).to_string())
  };
  let get_u32 = |name: &str| -> Result<u32, StoreError> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<UInt32Array>())
      .map(|a| a.value(row))
      .ok_or_else(|| StoreError::Row(format!("column {}", name)))
  };

  let chunking_mode: ChunkingMode = get_string("chunking_mode")?.parse().map_err(StoreError::Row)?;

  let repo = match (get_string_opt("repository"), get_string_opt("branch")) {
    (Some(repository), Some(branch)) => {
      let last_indexed_at = batch
        .column_by_name("last_indexed_at")
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .filter(|a| !a.is_null(row))
        .and_then(|a| Utc.timestamp_millis_opt(a.value(row)).single())
        .unwrap_or_else(Utc::now);
      Some(RepoMetadata {
        repository,
        branch,
        file_path: get_string_opt("repo_file_path").unwrap_or_default(),
        commit_sha: get_string_opt("commit_sha").unwrap_or_default(),
        last_indexed_at,
      })
    }
    _ => None,
  };

  Ok(StoredChunk {
    id: get_string("id")?,
    document: get_string("document")?,
    metadata: ChunkMetadata {
      path: get_string("path")?,
      file_name: get_string("file_name")?,
      file_type: get_string("file_type")?,
      chunk_index: get_u32("chunk_index")? as usize,
      line_ranges: get_string("line_ranges")?,
      chunk_size: get_u32("chunk_size")? as usize,
      chunking_mode,
      repo,
    },
  })
}

#[async_trait]
impl VectorIndex for LanceIndex {
  async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), StoreError> {
    if records.is_empty() {
      return Ok(());
    }
    trace!(operation = "upsert", rows = records.len(), "Writing vector rows");

    let batch = records_to_batch(&records, self.vector_dim)?;
    let batches = RecordBatchIterator::new(vec![Ok(batch)], chunks_schema(self.vector_dim));

    let mut merge_insert = self.table.merge_insert(&["id"]);
    merge_insert.when_matched_update_all(None).when_not_matched_insert_all();
    merge_insert.execute(Box::new(batches)).await?;
    Ok(())
  }

  async fn query(
    &self,
    vector: &[f32],
    filter: Option<&MetadataFilter>,
    k: usize,
  ) -> Result<Vec<QueryHit>, StoreError> {
    if k == 0 {
      return Ok(Vec::new());
    }
    let search = self
      .table
      .vector_search(fit(vector, self.vector_dim))?
      .distance_type(DistanceType::Cosine)
      .limit(k);
    let search = match filter {
      Some(f) => search.only_if(predicate(f)),
      None => search,
    };
    let results: Vec<RecordBatch> = search.execute().await?.try_collect().await?;

    let mut hits = Vec::new();
    for batch in results {
      for i in 0..batch.num_rows() {
        let chunk = batch_to_chunk(&batch, i)?;
        if filter.is_some_and(|f| !f.matches(&chunk.metadata)) {
          continue;
        }
        let distance = batch
          .column_by_name("_distance")
          .and_then(|col| col.as_any().downcast_ref::<Float32Array>())
          .map(|arr| arr.value(i))
          .unwrap_or(1.0);
        hits.push(QueryHit {
          id: chunk.id,
          score: 1.0 - distance,
          document: chunk.document,
          metadata: chunk.metadata,
        });
      }
    }
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    hits.truncate(k);
    debug!(operation = "search", results = hits.len(), "Search complete");
    Ok(hits)
  }

  async fn get_by_metadata(&self, filter: &MetadataFilter) -> Result<Vec<StoredChunk>, StoreError> {
    let mut chunks = Vec::new();
    for batch in self.rows(predicate(filter)).await? {
      for i in 0..batch.num_rows() {
        let chunk = batch_to_chunk(&batch, i)?;
        if filter.matches(&chunk.metadata) {
          chunks.push(chunk);
        }
      }
    }
    Ok(chunks)
  }

  async fn delete(&self, ids: &[String]) -> Result<usize, StoreError> {
    let mut removed = 0;
    for batch in ids.chunks(DELETE_BATCH) {
      let list = batch.iter().map(|id| quote(id)).collect::<Vec<_>>().join(", ");
      let predicate = format!("id IN ({})", list);
      let matching = self.table.count_rows(Some(predicate.clone())).await?;
      if matching == 0 {
        continue;
      }
      self.table.delete(&predicate).await?;
      removed += matching;
    }
    if removed > 0 {
      trace!(operation = "delete", removed, "Deleted vector rows");
    }
    Ok(removed)
  }

  async fn count(&self) -> Result<usize, StoreError> {
    Ok(self.table.count_rows(None).await?)
  }

  async fn clear(&self) -> Result<(), StoreError> {
    self.table.delete("id IS NOT NULL").await?;
    Ok(())
  }
}
