//! Full index and incremental sync runs over local folders
//!
//! Both run under a [`RunGuard`] and check for cancellation once per file,
//! before starting it. A cancelled run rolls back every path it touched:
//! rows are deleted and the mode's staleness record dropped, so the next
//! pass sees those files as new. Other modes and untouched paths are left
//! alone.

use std::{
  collections::BTreeSet,
  path::{Path, PathBuf},
  time::Instant,
};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{
  engine::EngineInner,
  status::{RunGuard, RunPhase},
};
use crate::{
  domain::{event::ChangeKind, mode::ChunkingMode, paths},
  index::{
    filter::{ExcludePatterns, FilterError},
    settings::FolderSettingsStore,
    walker::TreeWalker,
  },
  pipeline::FileOutcome,
};

/// Parameters of a full index run
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRequest {
  pub folders: Vec<PathBuf>,
  pub mode: ChunkingMode,
  /// Saved settings for this folder set (or the config) when `None`
  pub excludes: Option<Vec<String>>,
  pub max_size_mb: Option<u64>,
}

impl IndexRequest {
  pub fn new(folders: Vec<PathBuf>, mode: ChunkingMode) -> Self {
    Self {
      folders,
      mode,
      excludes: None,
      max_size_mb: None,
    }
  }

  pub fn with_excludes(mut self, excludes: Vec<String>) -> Self {
    self.excludes = Some(excludes);
    self
  }

  pub fn with_max_size_mb(mut self, mb: u64) -> Self {
    self.max_size_mb = Some(mb);
    self
  }
}

/// What a run did, returned to the caller and summarized in the status message
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
  pub phase: RunPhase,
  pub message: String,
  pub indexed: usize,
  /// Unchanged since the last index, not reprocessed
  pub unchanged: usize,
  pub skipped: usize,
  pub deleted: usize,
  pub failed: usize,
  pub failed_paths: Vec<PathBuf>,
  pub rolled_back_files: usize,
  pub rolled_back_rows: usize,
  pub elapsed_ms: u64,
}

impl RunReport {
  pub(crate) fn failed(message: impl Into<String>) -> Self {
    Self {
      phase: RunPhase::Failed,
      message: message.into(),
      ..Self::default()
    }
  }
}

pub(crate) fn conclude(guard: RunGuard, mut report: RunReport, start: Instant) -> RunReport {
  report.elapsed_ms = start.elapsed().as_millis() as u64;
  guard.finish(report.phase, report.message.clone());
  report
}

/// Build the walker used for `folders`: explicit values, then saved
/// settings for this exact folder set, then the config.
pub(crate) fn walker_for(
  inner: &EngineInner,
  folders: &[PathBuf],
  excludes: Option<Vec<String>>,
  max_size_mb: Option<u64>,
) -> Result<(TreeWalker, Vec<String>, u64), FilterError> {
  let saved = inner.settings.get(&FolderSettingsStore::key_for(folders));
  let excludes = excludes
    .or_else(|| saved.as_ref().map(|s| s.excludes.clone()))
    .unwrap_or_else(|| inner.config.index.exclude_patterns.clone());
  let max_size_mb = max_size_mb
    .or_else(|| saved.as_ref().map(|s| s.max_size_mb))
    .unwrap_or(inner.config.index.max_file_size_mb);

  let patterns = ExcludePatterns::new(&excludes)?;
  let walker = TreeWalker::new()
    .with_excludes(patterns)
    .with_max_file_size(max_size_mb.saturating_mul(1024 * 1024));
  Ok((walker, excludes, max_size_mb))
}

async fn walk_all(walker: TreeWalker, roots: Vec<PathBuf>) -> Result<Vec<PathBuf>, String> {
  tokio::task::spawn_blocking(move || {
    let mut files = BTreeSet::new();
    for root in &roots {
      files.extend(walker.walk(root).files.into_iter().map(|f| f.path));
    }
    files.into_iter().collect()
  })
  .await
  .map_err(|e| format!("Traversal task failed: {e}"))
}

// ============================================================================
// Full index
// ============================================================================

pub(crate) async fn run_full_index(inner: &EngineInner, guard: RunGuard, request: IndexRequest) -> RunReport {
  let start = Instant::now();
  let mode = request.mode;

  let requested: Vec<PathBuf> = request.folders.iter().map(|f| paths::normalize(f)).collect();
  let (folders, missing): (Vec<PathBuf>, Vec<PathBuf>) = requested.into_iter().partition(|f| f.is_dir());
  for folder in &missing {
    warn!(folder = %folder.display(), "Folder does not exist, skipping");
  }
  if folders.is_empty() {
    return conclude(guard, RunReport::failed("No existing folders to index"), start);
  }

  let (walker, excludes, max_size_mb) = match walker_for(inner, &folders, request.excludes, request.max_size_mb) {
    Ok(w) => w,
    Err(e) => return conclude(guard, RunReport::failed(e.to_string()), start),
  };

  guard.set_phase(RunPhase::Scanning, format!("Scanning {} folders", folders.len()));
  let files = match walk_all(walker, folders.clone()).await {
    Ok(files) => files,
    Err(e) => return conclude(guard, RunReport::failed(e), start),
  };

  let detector = std::sync::Arc::clone(&inner.detector);
  let classified = match tokio::task::spawn_blocking(move || detector.classify(&files, mode)).await {
    Ok(c) => c,
    Err(e) => return conclude(guard, RunReport::failed(format!("Classification task failed: {e}")), start),
  };

  info!(
    mode = %mode,
    folders = folders.len(),
    to_index = classified.needs_index.len(),
    unchanged = classified.can_skip.len(),
    "Starting full index"
  );

  let mut report = RunReport {
    unchanged: classified.can_skip.len(),
    ..RunReport::default()
  };
  guard.set_phase(RunPhase::Indexing, "Indexing");
  guard.set_total(classified.needs_index.len());

  for (i, path) in classified.needs_index.iter().enumerate() {
    if guard.is_cancelled() {
      break;
    }
    guard.set_progress(i, Some(path));
    index_local_file(inner, &guard, path, mode, &mut report).await;
  }

  if guard.is_cancelled() {
    return cancel_local(inner, guard, mode, report, "Indexing", start).await;
  }
  guard.set_progress(classified.needs_index.len(), None);

  for folder in &folders {
    if let Err(e) = inner.watcher.add_folder(mode, folder) {
      warn!(folder = %folder.display(), error = %e, "Could not register folder for watching");
    }
  }
  if let Err(e) = inner.settings.save(&folders, &excludes, max_size_mb, mode) {
    warn!(error = %e, "Could not save folder settings");
  }
  flush(inner, mode).await;

  report.phase = RunPhase::Completed;
  report.message = format!(
    "Indexed {} files ({} unchanged, {} skipped, {} failed)",
    report.indexed, report.unchanged, report.skipped, report.failed
  );
  conclude(guard, report, start)
}

async fn index_local_file(inner: &EngineInner, guard: &RunGuard, path: &Path, mode: ChunkingMode, report: &mut RunReport) {
  match inner.pipeline.index_file(path, mode, None, guard).await {
    Ok(FileOutcome::Indexed { chunks, chunk_sizes }) => match inner.detector.update(path, mode, chunks, chunk_sizes) {
      Ok(()) => report.indexed += 1,
      Err(e) => {
        warn!(path = %path.display(), error = %e, "Indexed but could not record metadata");
        report.failed += 1;
        report.failed_paths.push(path.to_path_buf());
      }
    },
    Ok(FileOutcome::Skipped(reason)) => {
      // old rows are gone; the record must not claim otherwise
      if let Err(e) = inner.detector.remove(path, Some(mode)) {
        warn!(path = %path.display(), error = %e, "Failed to drop metadata");
      }
      debug!(path = %path.display(), reason = ?reason, "Skipped");
      report.skipped += 1;
    }
    Err(e) => {
      warn!(path = %path.display(), error = %e, "Failed to index file");
      report.failed += 1;
      report.failed_paths.push(path.to_path_buf());
    }
  }
}

// ============================================================================
// Sync pass
// ============================================================================

pub(crate) async fn run_sync(inner: &EngineInner, guard: RunGuard, mode: ChunkingMode) -> RunReport {
  let start = Instant::now();
  let events = inner.queue.drain(mode);

  guard.set_phase(RunPhase::Indexing, format!("Syncing {} changes", events.len()));
  guard.set_total(events.len());
  info!(mode = %mode, changes = events.len(), "Starting sync pass");

  let mut report = RunReport::default();
  let mut synced: Vec<PathBuf> = Vec::new();
  let mut failed: Vec<PathBuf> = Vec::new();

  for (i, event) in events.iter().enumerate() {
    if guard.is_cancelled() {
      break;
    }
    guard.set_progress(i, Some(&event.path));
    let path = &event.path;

    match event.kind {
      ChangeKind::Deleted => {
        let rows = match inner.pipeline.delete_rows(mode, path).await {
          Ok(rows) => rows,
          Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to delete rows");
            failed.push(path.clone());
            continue;
          }
        };
        if let Err(e) = inner.detector.remove(path, Some(mode)) {
          warn!(path = %path.display(), error = %e, "Failed to drop metadata");
        }
        debug!(path = %path.display(), rows, "Removed deleted file");
        report.deleted += 1;
        synced.push(path.clone());
      }
      ChangeKind::Created | ChangeKind::Modified => {
        if !path.is_file() {
          warn!(path = %path.display(), "Changed file no longer exists");
          failed.push(path.clone());
          continue;
        }
        match inner.pipeline.index_file(path, mode, None, &guard).await {
          Ok(FileOutcome::Indexed { chunks, chunk_sizes }) => {
            if let Err(e) = inner.detector.update(path, mode, chunks, chunk_sizes) {
              warn!(path = %path.display(), error = %e, "Indexed but could not record metadata");
              failed.push(path.clone());
              continue;
            }
            report.indexed += 1;
            synced.push(path.clone());
          }
          Ok(FileOutcome::Skipped(reason)) => {
            // old rows are gone; the record must not claim otherwise
            if let Err(e) = inner.detector.remove(path, Some(mode)) {
              warn!(path = %path.display(), error = %e, "Failed to drop metadata");
            }
            debug!(path = %path.display(), reason = ?reason, "Skipped");
            report.skipped += 1;
            synced.push(path.clone());
          }
          Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to reindex file");
            failed.push(path.clone());
          }
        }
      }
    }
  }

  if guard.is_cancelled() {
    return cancel_local(inner, guard, mode, report, "Sync", start).await;
  }
  guard.set_progress(events.len(), None);

  inner.queue.mark_synced(&synced, mode);
  inner.queue.remove(&failed, mode);
  let leftover = inner.queue.clear(mode);
  if leftover > 0 {
    debug!(mode = %mode, leftover, "Cleared remaining queue entries");
  }
  flush(inner, mode).await;

  report.failed = failed.len();
  report.failed_paths = failed;
  report.phase = RunPhase::Completed;
  report.message = format!(
    "Sync complete: {} updated, {} deleted, {} failed",
    report.indexed + report.skipped,
    report.deleted,
    report.failed
  );
  conclude(guard, report, start)
}

// ============================================================================
// Cancellation
// ============================================================================

/// Undo the touched paths of a cancelled local run. The sync queue is not
/// modified, so unprocessed and rolled-back events are retried next pass.
async fn cancel_local(
  inner: &EngineInner,
  guard: RunGuard,
  mode: ChunkingMode,
  mut report: RunReport,
  what: &str,
  start: Instant,
) -> RunReport {
  let touched = guard.touched();
  guard.set_phase(RunPhase::Cancelled, format!("Rolling back {} files", touched.len()));

  for path in &touched {
    match inner.pipeline.delete_rows(mode, path).await {
      Ok(rows) => report.rolled_back_rows += rows,
      Err(e) => warn!(path = %path.display(), error = %e, "Rollback could not delete rows"),
    }
    if let Err(e) = inner.detector.remove(path, Some(mode)) {
      warn!(path = %path.display(), error = %e, "Rollback could not drop metadata");
    }
    report.rolled_back_files += 1;
  }
  flush(inner, mode).await;

  info!(
    mode = %mode,
    files = report.rolled_back_files,
    rows = report.rolled_back_rows,
    "Rolled back cancelled run"
  );
  report.phase = RunPhase::Cancelled;
  report.message = format!(
    "{} cancelled and rolled back: {} rows removed from {} files",
    what, report.rolled_back_rows, report.rolled_back_files
  );
  conclude(guard, report, start)
}

pub(crate) async fn flush(inner: &EngineInner, mode: ChunkingMode) {
  if let Err(e) = inner.pipeline.stores().for_mode(mode).flush().await {
    warn!(mode = %mode, error = %e, "Failed to persist vector collection");
  }
}
