//! Repository runs: full index and manifest-driven resync of a checked-out
//! branch
//!
//! Repository rows are keyed by `{repo}@{branch}:{relative path}` and tracked
//! in a per-branch manifest instead of the change detector. The manifest is
//! only written after a pass completes, so a cancelled or failed pass is
//! simply detected again next time.

use std::{path::PathBuf, time::Instant};

use tracing::{debug, info, warn};

use super::{
  engine::EngineInner,
  orchestrator::{RunReport, conclude, flush},
  status::{RunGuard, RunPhase},
};
use crate::{
  domain::{mode::ChunkingMode, paths},
  index::{
    filter::{ExcludePatterns, FilterError},
    manifest::current_commit,
    walker::TreeWalker,
  },
  pipeline::{FileOutcome, RepoContext},
};

/// A repository branch checked out at `root`
#[derive(Debug, Clone, PartialEq)]
pub struct RepoIndexRequest {
  pub repository: String,
  pub branch: String,
  pub root: PathBuf,
  pub mode: ChunkingMode,
  pub excludes: Option<Vec<String>>,
  pub max_size_mb: Option<u64>,
}

impl RepoIndexRequest {
  pub fn new(repository: impl Into<String>, branch: impl Into<String>, root: impl Into<PathBuf>, mode: ChunkingMode) -> Self {
    Self {
      repository: repository.into(),
      branch: branch.into(),
      root: root.into(),
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

pub(crate) fn repo_walker(inner: &EngineInner, request: &RepoIndexRequest) -> Result<TreeWalker, FilterError> {
  let excludes = request
    .excludes
    .clone()
    .unwrap_or_else(|| inner.config.index.exclude_patterns.clone());
  let max_size_mb = request.max_size_mb.unwrap_or(inner.config.index.max_file_size_mb);
  let patterns = ExcludePatterns::new(&excludes)?;
  Ok(
    TreeWalker::new()
      .with_excludes(patterns)
      .with_max_file_size(max_size_mb.saturating_mul(1024 * 1024)),
  )
}

fn context_for(request: &RepoIndexRequest, root: PathBuf) -> RepoContext {
  RepoContext {
    repository: request.repository.clone(),
    branch: request.branch.clone(),
    commit_sha: current_commit(&root).unwrap_or_else(|| "unknown".to_string()),
    root,
  }
}

#[derive(Default)]
struct RepoTally {
  indexed: Vec<String>,
  /// No rows written; these must not keep a manifest entry
  skipped: Vec<String>,
  failed: Vec<PathBuf>,
}

async fn index_repo_files(
  inner: &EngineInner,
  guard: &RunGuard,
  repo: &RepoContext,
  mode: ChunkingMode,
  relative_paths: &[String],
) -> RepoTally {
  let mut tally = RepoTally::default();
  guard.set_phase(RunPhase::Indexing, format!("Indexing {} files", relative_paths.len()));
  guard.set_total(relative_paths.len());

  for (i, rel) in relative_paths.iter().enumerate() {
    if guard.is_cancelled() {
      break;
    }
    let path = repo.root.join(rel);
    guard.set_progress(i, Some(&path));

    match inner.pipeline.index_file(&path, mode, Some(repo), guard).await {
      Ok(FileOutcome::Indexed { .. }) => tally.indexed.push(rel.clone()),
      Ok(FileOutcome::Skipped(reason)) => {
        debug!(path = %path.display(), reason = ?reason, "Skipped");
        tally.skipped.push(rel.clone());
      }
      Err(e) => {
        warn!(path = %path.display(), error = %e, "Failed to index repository file");
        tally.failed.push(path);
      }
    }
  }
  if !guard.is_cancelled() {
    guard.set_progress(relative_paths.len(), None);
  }
  tally
}

// ============================================================================
// Full repository index
// ============================================================================

pub(crate) async fn run_repo_index(inner: &EngineInner, guard: RunGuard, request: RepoIndexRequest) -> RunReport {
  let start = Instant::now();
  let mode = request.mode;
  let root = paths::normalize(&request.root);
  if !root.is_dir() {
    let message = format!("Repository root does not exist: {}", root.display());
    return conclude(guard, RunReport::failed(message), start);
  }

  let walker = match repo_walker(inner, &request) {
    Ok(w) => w,
    Err(e) => return conclude(guard, RunReport::failed(e.to_string()), start),
  };

  guard.set_phase(RunPhase::Scanning, format!("Scanning {}", request.repository));
  let walk_root = root.clone();
  let walked = match tokio::task::spawn_blocking(move || walker.walk(&walk_root)).await {
    Ok(walked) => walked,
    Err(e) => return conclude(guard, RunReport::failed(format!("Traversal task failed: {e}")), start),
  };
  let relative: Vec<String> = walked.files.into_iter().map(|f| f.relative_path).collect();

  let repo = context_for(&request, root);
  info!(
    repo = %repo.repository,
    branch = %repo.branch,
    commit = %repo.commit_sha,
    files = relative.len(),
    "Starting repository index"
  );

  let tally = index_repo_files(inner, &guard, &repo, mode, &relative).await;
  if guard.is_cancelled() {
    let report = RunReport {
      indexed: tally.indexed.len(),
      ..RunReport::default()
    };
    return cancel_repo(inner, guard, &repo, mode, report, start).await;
  }

  let mut report = RunReport {
    indexed: tally.indexed.len(),
    skipped: tally.skipped.len(),
    failed: tally.failed.len(),
    failed_paths: tally.failed,
    ..RunReport::default()
  };

  let manifest_result = inner
    .manifests
    .update_file_manifest(&repo.repository, &repo.branch, &repo.root, &tally.indexed, Some(&repo.commit_sha))
    .and_then(|_| inner.manifests.remove_files(&repo.repository, &repo.branch, &tally.skipped));
  if let Err(e) = manifest_result {
    flush(inner, mode).await;
    report.phase = RunPhase::Failed;
    report.message = format!("Indexed {} files but could not save manifest: {e}", report.indexed);
    return conclude(guard, report, start);
  }
  flush(inner, mode).await;

  report.phase = RunPhase::Completed;
  report.message = format!(
    "Repository indexed: {} files ({} skipped, {} failed)",
    report.indexed, report.skipped, report.failed
  );
  conclude(guard, report, start)
}

// ============================================================================
// Manifest-driven resync
// ============================================================================

pub(crate) async fn run_repo_sync(inner: &EngineInner, guard: RunGuard, request: RepoIndexRequest) -> RunReport {
  let start = Instant::now();
  let mode = request.mode;
  let root = paths::normalize(&request.root);

  let walker = match repo_walker(inner, &request) {
    Ok(w) => w,
    Err(e) => return conclude(guard, RunReport::failed(e.to_string()), start),
  };

  guard.set_phase(RunPhase::Scanning, format!("Comparing {} with manifest", request.repository));
  let changes = {
    let manifests = inner.manifests.clone();
    let (repo_name, branch, walk_root) = (request.repository.clone(), request.branch.clone(), root.clone());
    tokio::task::spawn_blocking(move || manifests.detect_changes(&repo_name, &branch, &walk_root, &walker)).await
  };
  let changes = match changes {
    Ok(Ok(changes)) => changes,
    Ok(Err(e)) => return conclude(guard, RunReport::failed(e.to_string()), start),
    Err(e) => return conclude(guard, RunReport::failed(format!("Change detection task failed: {e}")), start),
  };

  let repo = context_for(&request, root);
  let mut report = RunReport::default();

  for rel in changes.removed.iter() {
    match inner.pipeline.delete_repo_rows(mode, &repo, rel).await {
      Ok(rows) => {
        debug!(file = %rel, rows, "Removed rows of deleted repository file");
        report.deleted += 1;
      }
      Err(e) => {
        warn!(file = %rel, error = %e, "Failed to delete repository rows");
        report.failed += 1;
        report.failed_paths.push(repo.root.join(rel));
      }
    }
  }

  let mut to_index: Vec<String> = changes.added.clone();
  to_index.extend(changes.modified.iter().cloned());
  let tally = index_repo_files(inner, &guard, &repo, mode, &to_index).await;

  if guard.is_cancelled() {
    report.indexed = tally.indexed.len();
    return cancel_repo(inner, guard, &repo, mode, report, start).await;
  }

  report.indexed = tally.indexed.len();
  report.skipped = tally.skipped.len();
  report.failed += tally.failed.len();
  report.failed_paths.extend(tally.failed);

  let mut dropped = changes.removed.clone();
  dropped.extend(tally.skipped);
  let manifest_result = inner
    .manifests
    .update_file_manifest(&repo.repository, &repo.branch, &repo.root, &tally.indexed, Some(&repo.commit_sha))
    .and_then(|_| inner.manifests.remove_files(&repo.repository, &repo.branch, &dropped));
  flush(inner, mode).await;

  if let Err(e) = manifest_result {
    report.phase = RunPhase::Failed;
    report.message = format!("Repository synced but could not save manifest: {e}");
    return conclude(guard, report, start);
  }

  let added = tally.indexed.iter().filter(|rel| changes.added.contains(rel)).count();
  let modified = tally.indexed.len() - added;
  report.phase = RunPhase::Completed;
  report.message = format!(
    "Repository sync complete: {} added, {} modified, {} removed, {} failed",
    added, modified, report.deleted, report.failed
  );
  conclude(guard, report, start)
}

/// Delete rows written by a cancelled repository pass; the manifest is left
/// as it was so the next pass detects the same changes.
async fn cancel_repo(
  inner: &EngineInner,
  guard: RunGuard,
  repo: &RepoContext,
  mode: ChunkingMode,
  mut report: RunReport,
  start: Instant,
) -> RunReport {
  let touched = guard.touched();
  guard.set_phase(RunPhase::Cancelled, format!("Rolling back {} files", touched.len()));

  for path in &touched {
    let Some(rel) = paths::relative_key(&repo.root, path) else {
      continue;
    };
    match inner.pipeline.delete_repo_rows(mode, repo, &rel).await {
      Ok(rows) => report.rolled_back_rows += rows,
      Err(e) => warn!(file = %rel, error = %e, "Rollback could not delete rows"),
    }
    report.rolled_back_files += 1;
  }
  flush(inner, mode).await;

  report.phase = RunPhase::Cancelled;
  report.message = format!(
    "Repository indexing cancelled and rolled back: {} rows removed from {} files",
    report.rolled_back_rows, report.rolled_back_files
  );
  conclude(guard, report, start)
}
