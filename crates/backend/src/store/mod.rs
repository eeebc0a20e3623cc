//! Vector storage
//!
//! [`VectorIndex`] is the seam to whatever holds the embeddings. Each
//! chunking mode gets its own LanceDB table ([`VectorStores`]); nothing ever
//! queries or deletes across modes.

mod lance;
#[cfg(test)]
mod memory;

use std::{path::Path, sync::Arc};

use chrono::{DateTime, Utc};
pub use lance::LanceIndex;
#[cfg(test)]
pub use memory::MemoryIndex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::mode::ChunkingMode;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("Vector store IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("LanceDB error: {0}")]
  Lance(#[from] lancedb::Error),
  #[error("Arrow error: {0}")]
  Arrow(#[from] arrow_schema::ArrowError),
  #[error("Malformed row: {0}")]
  Row(String),
  #[error("Table {table} holds {found}-dim vectors, configured for {expected}")]
  Dimension { table: String, expected: usize, found: usize },
}

/// Extra metadata for chunks indexed from a cloned repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoMetadata {
  pub repository: String,
  pub branch: String,
  /// Path relative to the repository root
  pub file_path: String,
  pub commit_sha: String,
  pub last_indexed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
  pub path: String,
  pub file_name: String,
  pub file_type: String,
  /// 1-based
  pub chunk_index: usize,
  /// Comma-separated 1-based line numbers covered by the chunk
  pub line_ranges: String,
  pub chunk_size: usize,
  pub chunking_mode: ChunkingMode,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub repo: Option<RepoMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
  pub id: String,
  pub vector: Vec<f32>,
  pub document: String,
  pub metadata: ChunkMetadata,
}

/// A stored row without its vector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredChunk {
  pub id: String,
  pub document: String,
  pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryHit {
  pub id: String,
  /// Cosine similarity, higher is closer
  pub score: f32,
  pub document: String,
  pub metadata: ChunkMetadata,
}

/// Equality filters over chunk metadata
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataFilter {
  Path(String),
  FileName(String),
  /// Rows whose path lies under this directory
  PathPrefix(String),
  Repo {
    repository: String,
    branch: String,
  },
  RepoFile {
    repository: String,
    branch: String,
    file_path: String,
  },
}

impl MetadataFilter {
  pub fn matches(&self, meta: &ChunkMetadata) -> bool {
    match self {
      MetadataFilter::Path(path) => &meta.path == path,
      MetadataFilter::FileName(name) => &meta.file_name == name,
      MetadataFilter::PathPrefix(dir) => Path::new(&meta.path).starts_with(dir),
      MetadataFilter::Repo { repository, branch } => meta
        .repo
        .as_ref()
        .is_some_and(|r| &r.repository == repository && &r.branch == branch),
      MetadataFilter::RepoFile {
        repository,
        branch,
        file_path,
      } => meta
        .repo
        .as_ref()
        .is_some_and(|r| &r.repository == repository && &r.branch == branch && &r.file_path == file_path),
    }
  }
}

#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
  /// Insert or replace rows by id
  async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), StoreError>;

  async fn query(
    &self,
    vector: &[f32],
    filter: Option<&MetadataFilter>,
    k: usize,
  ) -> Result<Vec<QueryHit>, StoreError>;

  async fn get_by_metadata(&self, filter: &MetadataFilter) -> Result<Vec<StoredChunk>, StoreError>;

  /// Returns the number of rows actually removed
  async fn delete(&self, ids: &[String]) -> Result<usize, StoreError>;

  async fn count(&self) -> Result<usize, StoreError>;

  async fn clear(&self) -> Result<(), StoreError>;

  async fn flush(&self) -> Result<(), StoreError> {
    Ok(())
  }
}

pub fn table_name(mode: ChunkingMode) -> String {
  format!("{}_chunks", mode)
}

/// One collection per chunking mode
#[derive(Clone)]
pub struct VectorStores {
  gist: Arc<dyn VectorIndex>,
  pinpoint: Arc<dyn VectorIndex>,
}

impl VectorStores {
  pub fn new(gist: Arc<dyn VectorIndex>, pinpoint: Arc<dyn VectorIndex>) -> Self {
    Self { gist, pinpoint }
  }

  /// LanceDB database at `dir` with one `{mode}_chunks` table per mode
  pub async fn open_lance(dir: &Path, vector_dim: usize) -> Result<Self, StoreError> {
    tokio::fs::create_dir_all(dir).await?;
    let connection = lancedb::connect(&dir.to_string_lossy()).execute().await?;
    info!(path = %dir.display(), vector_dim, "Opened vector database");

    let gist = LanceIndex::open(&connection, &table_name(ChunkingMode::Gist), vector_dim).await?;
    let pinpoint = LanceIndex::open(&connection, &table_name(ChunkingMode::Pinpoint), vector_dim).await?;
    Ok(Self {
      gist: Arc::new(gist),
      pinpoint: Arc::new(pinpoint),
    })
  }

  #[cfg(test)]
  pub fn in_memory() -> Self {
    Self {
      gist: Arc::new(MemoryIndex::new()),
      pinpoint: Arc::new(MemoryIndex::new()),
    }
  }

  pub fn for_mode(&self, mode: ChunkingMode) -> &Arc<dyn VectorIndex> {
    match mode {
      ChunkingMode::Gist => &self.gist,
      ChunkingMode::Pinpoint => &self.pinpoint,
    }
  }

  pub async fn flush_all(&self) -> Result<(), StoreError> {
    self.gist.flush().await?;
    self.pinpoint.flush().await
  }
}
