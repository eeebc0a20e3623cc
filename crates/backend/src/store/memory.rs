//! MemoryIndex - brute-force cosine search over a map, for engine tests

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{MetadataFilter, QueryHit, StoreError, StoredChunk, VectorIndex, VectorRecord};

#[derive(Default)]
pub struct MemoryIndex {
  rows: RwLock<BTreeMap<String, VectorRecord>>,
}

impl MemoryIndex {
  pub fn new() -> Self {
    Self::default()
  }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
  if a.len() != b.len() || a.is_empty() {
    return 0.0;
  }
  let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
  for (x, y) in a.iter().zip(b) {
    dot += x * y;
    na += x * x;
    nb += y * y;
  }
  if na == 0.0 || nb == 0.0 {
    return 0.0;
  }
  dot / (na.sqrt() * nb.sqrt())
}

#[async_trait]
impl VectorIndex for MemoryIndex {
  async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), StoreError> {
    if records.is_empty() {
      return Ok(());
    }
    let mut rows = self.rows.write().await;
    for record in records {
      rows.insert(record.id.clone(), record);
    }
    Ok(())
  }

  async fn query(
    &self,
    vector: &[f32],
    filter: Option<&MetadataFilter>,
    k: usize,
  ) -> Result<Vec<QueryHit>, StoreError> {
    let rows = self.rows.read().await;
    let mut hits: Vec<QueryHit> = rows
      .values()
      .filter(|r| filter.is_none_or(|f| f.matches(&r.metadata)))
      .map(|r| QueryHit {
        id: r.id.clone(),
        score: cosine_similarity(vector, &r.vector),
        document: r.document.clone(),
        metadata: r.metadata.clone(),
      })
      .collect();
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    hits.truncate(k);
    Ok(hits)
  }

  async fn get_by_metadata(&self, filter: &MetadataFilter) -> Result<Vec<StoredChunk>, StoreError> {
    let rows = self.rows.read().await;
    Ok(
      rows
        .values()
        .filter(|r| filter.matches(&r.metadata))
        .map(|r| StoredChunk {
          id: r.id.clone(),
          document: r.document.clone(),
          metadata: r.metadata.clone(),
        })
        .collect(),
    )
  }

  async fn delete(&self, ids: &[String]) -> Result<usize, StoreError> {
    let mut rows = self.rows.write().await;
    Ok(ids.iter().filter(|id| rows.remove(*id).is_some()).count())
  }

  async fn count(&self) -> Result<usize, StoreError> {
    Ok(self.rows.read().await.len())
  }

  async fn clear(&self) -> Result<(), StoreError> {
    self.rows.write().await.clear();
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::{domain::mode::ChunkingMode, store::ChunkMetadata};

  fn record(id: &str, path: &str, vector: Vec<f32>) -> VectorRecord {
    VectorRecord {
      id: id.to_string(),
      vector,
      document: format!("doc {id}"),
      metadata: ChunkMetadata {
        path: path.to_string(),
        file_name: path.rsplit('/').next().unwrap_or(path).to_string(),
        file_type: "md".to_string(),
        chunk_index: 1,
        line_ranges: "1".to_string(),
        chunk_size: 5,
        chunking_mode: ChunkingMode::Gist,
        repo: None,
      },
    }
  }

  #[test]
  fn test_cosine_similarity() {
    assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
  }

  #[tokio::test]
  async fn test_query_orders_by_similarity_and_filters() {
    let index = MemoryIndex::new();
    index
      .upsert(vec![
        record("a", "/d/a.md", vec![1.0, 0.0]),
        record("b", "/d/b.md", vec![0.7, 0.7]),
        record("c", "/e/c.md", vec![0.0, 1.0]),
      ])
      .await
      .unwrap();

    let hits = index.query(&[1.0, 0.0], None, 2).await.unwrap();
    assert_eq!(hits.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);

    let filter = MetadataFilter::PathPrefix("/e".to_string());
    let hits = index.query(&[1.0, 0.0], Some(&filter), 5).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "c");
  }

  #[tokio::test]
  async fn test_upsert_replaces_and_delete_counts() {
    let index = MemoryIndex::new();
    index.upsert(vec![record("a", "/d/a.md", vec![1.0])]).await.unwrap();
    index.upsert(vec![record("a", "/d/a.md", vec![2.0])]).await.unwrap();
    assert_eq!(index.count().await.unwrap(), 1);

    let by_name = index
      .get_by_metadata(&MetadataFilter::FileName("a.md".to_string()))
      .await
      .unwrap();
    assert_eq!(by_name.len(), 1);

    assert_eq!(index.delete(&["a".to_string(), "zzz".to_string()]).await.unwrap(), 1);
    assert_eq!(index.count().await.unwrap(), 0);
  }
}
