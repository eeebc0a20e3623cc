//! Per-file indexing: delete existing rows → extract → chunk → embed → upsert
//!
//! The same pipeline serves full runs, sync passes and repository runs. The
//! caller owns bookkeeping (change detector or manifest); the pipeline only
//! touches the vector store and marks the file as touched in the run guard
//! once its rows are written. A file's chunks are embedded in one batch and
//! written in one upsert.

pub mod chunker;
pub mod extract;

use std::{
  collections::BTreeSet,
  path::{Path, PathBuf},
  sync::Arc,
};

use chrono::Utc;
use tracing::{debug, trace, warn};

use self::{chunker::chunker_for, extract::Extractor};
use crate::{
  domain::{config::Config, mode::ChunkingMode, paths},
  embedding::{EmbeddingError, Embedders},
  service::status::RunGuard,
  store::{ChunkMetadata, MetadataFilter, RepoMetadata, StoreError, VectorRecord, VectorStores},
};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
  #[error("Embedding failed: {0}")]
  Embed(#[from] EmbeddingError),
  #[error("Vector store failed: {0}")]
  Store(#[from] StoreError),
  #[error("Extraction task failed: {0}")]
  Task(String),
}

/// A cloned repository checked out at `root`
#[derive(Debug, Clone, PartialEq)]
pub struct RepoContext {
  pub repository: String,
  pub branch: String,
  pub root: PathBuf,
  pub commit_sha: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
  /// Nothing extracted (binary, unreadable, empty)
  Empty,
  /// Fewer characters than `min_content_length`
  TooShort,
  /// The chunker produced no chunks
  NoChunks,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
  Indexed { chunks: usize, chunk_sizes: Vec<usize> },
  Skipped(SkipReason),
}

/// `{mode}-{path}-{index}` for local files
pub fn local_doc_id(mode: ChunkingMode, path: &Path, chunk_index: usize) -> String {
  format!("{}-{}-{}", mode, paths::display_key(path), chunk_index)
}

/// `{repo}@{branch}:{relative path}-{index}` for repository files
pub fn repo_doc_id(repository: &str, branch: &str, relative: &str, chunk_index: usize) -> String {
  format!("{}@{}:{}-{}", repository, branch, relative, chunk_index)
}

pub struct FilePipeline {
  extractor: Arc<dyn Extractor>,
  embedders: Embedders,
  stores: VectorStores,
  config: Arc<Config>,
}

impl FilePipeline {
  pub fn new(extractor: Arc<dyn Extractor>, embedders: Embedders, stores: VectorStores, config: Arc<Config>) -> Self {
    Self {
      extractor,
      embedders,
      stores,
      config,
    }
  }

  pub fn stores(&self) -> &VectorStores {
    &self.stores
  }

  pub fn embedders(&self) -> &Embedders {
    &self.embedders
  }

  /// Delete every local row for `path` in `mode`. Lookup is by the stored
  /// path, plus a file-name lookup whose hits must normalize to `path`.
  pub async fn delete_rows(&self, mode: ChunkingMode, path: &Path) -> Result<usize, PipelineError> {
    let store = self.stores.for_mode(mode);
    let key = paths::display_key(path);

    let mut ids: BTreeSet<String> = store
      .get_by_metadata(&MetadataFilter::Path(key))
      .await?
      .into_iter()
      .filter(|c| c.metadata.repo.is_none())
      .map(|c| c.id)
      .collect();

    let by_name = store
      .get_by_metadata(&MetadataFilter::FileName(paths::file_name(path)))
      .await?;
    ids.extend(
      by_name
        .into_iter()
        .filter(|c| c.metadata.repo.is_none() && paths::normalize(Path::new(&c.metadata.path)) == path)
        .map(|c| c.id),
    );

    if ids.is_empty() {
      return Ok(0);
    }
    let ids: Vec<String> = ids.into_iter().collect();
    let removed = store.delete(&ids).await?;
    trace!(path = %path.display(), mode = %mode, removed, "Deleted rows");
    Ok(removed)
  }

  /// Delete the rows of one repository file
  pub async fn delete_repo_rows(
    &self,
    mode: ChunkingMode,
    repo: &RepoContext,
    relative: &str,
  ) -> Result<usize, PipelineError> {
    let store = self.stores.for_mode(mode);
    let filter = MetadataFilter::RepoFile {
      repository: repo.repository.clone(),
      branch: repo.branch.clone(),
      file_path: relative.to_string(),
    };
    let ids: Vec<String> = store.get_by_metadata(&filter).await?.into_iter().map(|c| c.id).collect();
    if ids.is_empty() {
      return Ok(0);
    }
    Ok(store.delete(&ids).await?)
  }

  /// Delete-then-reindex one file. On error no new rows are written.
  pub async fn index_file(
    &self,
    path: &Path,
    mode: ChunkingMode,
    repo: Option<&RepoContext>,
    guard: &RunGuard,
  ) -> Result<FileOutcome, PipelineError> {
    let relative = repo.and_then(|r| paths::relative_key(&r.root, path));
    match (repo, relative.as_deref()) {
      (Some(repo), Some(rel)) => self.delete_repo_rows(mode, repo, rel).await?,
      _ => self.delete_rows(mode, path).await?,
    };

    let extractor = Arc::clone(&self.extractor);
    let owned = path.to_path_buf();
    let text = tokio::task::spawn_blocking(move || extractor.extract(&owned))
      .await
      .map_err(|e| PipelineError::Task(e.to_string()))?;

    if text.trim().is_empty() {
      debug!(path = %path.display(), "No extractable text, skipping");
      return Ok(FileOutcome::Skipped(SkipReason::Empty));
    }
    if text.trim().chars().count() < self.config.index.min_content_length {
      debug!(path = %path.display(), "Content too short, skipping");
      return Ok(FileOutcome::Skipped(SkipReason::TooShort));
    }

    let file_type = paths::file_type(path);
    let chunker = chunker_for(mode, &self.config.chunking, self.config.index.min_content_length);
    let chunks = chunker.chunk(&text, &file_type);
    if chunks.is_empty() {
      return Ok(FileOutcome::Skipped(SkipReason::NoChunks));
    }

    let embedder = self.embedders.for_mode(mode);
    let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
    let vectors = embedder.embed_batch(&texts).await.inspect_err(|e| {
      warn!(path = %path.display(), chunks = texts.len(), error = %e, "Embedding failed, abandoning file");
    })?;
    if vectors.len() != chunks.len() {
      return Err(PipelineError::Embed(EmbeddingError::ProviderError(format!(
        "expected {} embeddings, got {}",
        chunks.len(),
        vectors.len()
      ))));
    }

    let path_key = paths::display_key(path);
    let file_name = paths::file_name(path);
    let indexed_at = Utc::now();
    let records: Vec<VectorRecord> = chunks
      .iter()
      .zip(vectors)
      .enumerate()
      .map(|(i, (chunk, vector))| {
        let index = i + 1;
        let (id, repo_meta) = match (repo, relative.as_deref()) {
          (Some(repo), Some(rel)) => (
            repo_doc_id(&repo.repository, &repo.branch, rel, index),
            Some(RepoMetadata {
              repository: repo.repository.clone(),
              branch: repo.branch.clone(),
              file_path: rel.to_string(),
              commit_sha: repo.commit_sha.clone(),
              last_indexed_at: indexed_at,
            }),
          ),
          _ => (local_doc_id(mode, path, index), None),
        };
        VectorRecord {
          id,
          vector,
          document: chunk.text.clone(),
          metadata: ChunkMetadata {
            path: path_key.clone(),
            file_name: file_name.clone(),
            file_type: file_type.clone(),
            chunk_index: index,
            line_ranges: chunk.line_ranges(),
            chunk_size: chunk.size(),
            chunking_mode: mode,
            repo: repo_meta,
          },
        }
      })
      .collect();

    self.stores.for_mode(mode).upsert(records).await.inspect_err(|e| {
      warn!(path = %path.display(), error = %e, "Upsert failed, abandoning file");
    })?;
    guard.touch(path);
    let chunk_sizes = chunks.iter().map(|c| c.size()).collect();

    debug!(path = %path.display(), mode = %mode, chunks = chunks.len(), "Indexed file");
    Ok(FileOutcome::Indexed {
      chunks: chunks.len(),
      chunk_sizes,
    })
  }
}
