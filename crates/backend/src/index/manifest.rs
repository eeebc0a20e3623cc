//! BranchManifest - change tracking for cloned repositories
//!
//! One JSON document per (repository, branch) records the hash, size and
//! mtime of every file indexed from that branch, plus the last indexed
//! commit. After a pull, [`ManifestStore::detect_changes`] compares the
//! working tree against it so only changed files are re-embedded.
//!
//! Traversal goes through the same [`TreeWalker`] as full indexing; a file
//! the indexer would never see must not show up here as "added".

use std::{
  collections::BTreeMap,
  path::{Path, PathBuf},
  process::Command,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{FileStat, hash_file, walker::TreeWalker, write_json_atomic};

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
  #[error("Manifest IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Corrupt manifest {path}: {source}")]
  Corrupt {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
  #[error("Repository root does not exist: {0}")]
  MissingRoot(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
  pub hash: String,
  pub size: u64,
  /// Whole seconds since the Unix epoch
  pub mtime: i64,
  pub indexed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchManifest {
  pub repo: String,
  pub branch: String,
  pub last_updated: Option<DateTime<Utc>>,
  pub last_commit_sha: Option<String>,
  #[serde(default)]
  pub files: BTreeMap<String, ManifestEntry>,
}

impl BranchManifest {
  pub fn empty(repo: &str, branch: &str) -> Self {
    Self {
      repo: repo.to_string(),
      branch: branch.to_string(),
      last_updated: None,
      last_commit_sha: None,
      files: BTreeMap::new(),
    }
  }

  pub fn summary(&self) -> ManifestSummary {
    ManifestSummary {
      repo: self.repo.clone(),
      branch: self.branch.clone(),
      last_updated: self.last_updated,
      last_commit_sha: self.last_commit_sha.clone(),
      file_count: self.files.len(),
      has_manifest: !self.files.is_empty(),
    }
  }
}

/// Relative paths that differ between a manifest and the working tree
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ManifestChanges {
  pub added: Vec<String>,
  pub modified: Vec<String>,
  pub removed: Vec<String>,
}

impl ManifestChanges {
  pub fn is_empty(&self) -> bool {
    self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
  }

  pub fn total(&self) -> usize {
    self.added.len() + self.modified.len() + self.removed.len()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestSummary {
  pub repo: String,
  pub branch: String,
  pub last_updated: Option<DateTime<Utc>>,
  pub last_commit_sha: Option<String>,
  pub file_count: usize,
  pub has_manifest: bool,
}

/// Directory of manifests, one file per (repo, branch)
#[derive(Debug, Clone)]
pub struct ManifestStore {
  dir: PathBuf,
}

impl ManifestStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  /// `owner/name@branch` → `owner_name@branch.json`
  pub fn manifest_path(&self, repo: &str, branch: &str) -> PathBuf {
    self
      .dir
      .join(format!("{}@{}.json", sanitize(repo), sanitize(branch)))
  }

  /// Load a manifest; a missing file yields an empty manifest
  pub fn load(&self, repo: &str, branch: &str) -> Result<BranchManifest, ManifestError> {
    let path = self.manifest_path(repo, branch);
    match std::fs::read(&path) {
      Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| ManifestError::Corrupt { path, source }),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BranchManifest::empty(repo, branch)),
      Err(e) => Err(e.into()),
    }
  }

  pub fn save(&self, manifest: &BranchManifest) -> Result<(), ManifestError> {
    let path = self.manifest_path(&manifest.repo, &manifest.branch);
    write_json_atomic(&path, manifest)?;
    debug!(path = %path.display(), files = manifest.files.len(), "Saved manifest");
    Ok(())
  }

  /// Compare the working tree under `root` with the stored manifest
  pub fn detect_changes(
    &self,
    repo: &str,
    branch: &str,
    root: &Path,
    walker: &TreeWalker,
  ) -> Result<ManifestChanges, ManifestError> {
    if !root.is_dir() {
      return Err(ManifestError::MissingRoot(root.to_path_buf()));
    }

    let manifest = self.load(repo, branch)?;
    let walked = walker.walk(root);
    let mut changes = ManifestChanges::default();
    let mut seen = std::collections::BTreeSet::new();

    for file in &walked.files {
      seen.insert(file.relative_path.as_str());
      match manifest.files.get(&file.relative_path) {
        None => changes.added.push(file.relative_path.clone()),
        Some(entry) => {
          if entry.size != file.size {
            changes.modified.push(file.relative_path.clone());
            continue;
          }
          match hash_file(&file.path) {
            Ok(hash) if hash == entry.hash => {}
            Ok(_) => changes.modified.push(file.relative_path.clone()),
            Err(e) => {
              warn!(path = %file.path.display(), error = %e, "Cannot hash file, treating as modified");
              changes.modified.push(file.relative_path.clone());
            }
          }
        }
      }
    }

    changes.removed = manifest
      .files
      .keys()
      .filter(|rel| !seen.contains(rel.as_str()))
      .cloned()
      .collect();

    changes.added.sort();
    changes.modified.sort();

    info!(
      repo,
      branch,
      added = changes.added.len(),
      modified = changes.modified.len(),
      removed = changes.removed.len(),
      "Detected repository changes"
    );
    Ok(changes)
  }

  /// Record the current state of the given files after a successful pass.
  /// Only these paths are touched; `commit` falls back to `git rev-parse HEAD`.
  pub fn update_file_manifest(
    &self,
    repo: &str,
    branch: &str,
    root: &Path,
    relative_paths: &[String],
    commit: Option<&str>,
  ) -> Result<BranchManifest, ManifestError> {
    let mut manifest = self.load(repo, branch)?;
    let now = Utc::now();

    for rel in relative_paths {
      let full = root.join(rel);
      let stat = match FileStat::read(&full) {
        Ok(stat) => stat,
        Err(e) => {
          warn!(path = %full.display(), error = %e, "Skipping manifest entry for unreadable file");
          continue;
        }
      };
      let hash = match hash_file(&full) {
        Ok(hash) => hash,
        Err(e) => {
          warn!(path = %full.display(), error = %e, "Skipping manifest entry for unreadable file");
          continue;
        }
      };
      manifest.files.insert(
        rel.clone(),
        ManifestEntry {
          hash,
          size: stat.size,
          mtime: stat.mtime as i64,
          indexed_at: now,
        },
      );
    }

    let commit = commit
      .map(str::to_string)
      .unwrap_or_else(|| current_commit(root).unwrap_or_else(|| "unknown".to_string()));
    manifest.last_commit_sha = Some(commit);
    manifest.last_updated = Some(now);

    self.save(&manifest)?;
    Ok(manifest)
  }

  /// Drop entries for files that no longer exist in the tree
  pub fn remove_files(&self, repo: &str, branch: &str, relative_paths: &[String]) -> Result<usize, ManifestError> {
    let mut manifest = self.load(repo, branch)?;
    let removed = relative_paths
      .iter()
      .filter(|rel| manifest.files.remove(rel.as_str()).is_some())
      .count();
    if removed > 0 {
      manifest.last_updated = Some(Utc::now());
      self.save(&manifest)?;
    }
    Ok(removed)
  }

  pub fn summary(&self, repo: &str, branch: &str) -> Result<ManifestSummary, ManifestError> {
    Ok(self.load(repo, branch)?.summary())
  }

  /// Reset a manifest so the next pass treats every file as added
  pub fn clear(&self, repo: &str, branch: &str) -> Result<(), ManifestError> {
    self.save(&BranchManifest::empty(repo, branch))
  }

  /// Summaries of all stored manifests, optionally for one repository
  pub fn list(&self, repo: Option<&str>) -> Result<Vec<ManifestSummary>, ManifestError> {
    let mut summaries = Vec::new();
    for (_, manifest) in self.read_all()? {
      if repo.is_none_or(|r| r == manifest.repo) {
        summaries.push(manifest.summary());
      }
    }
    summaries.sort_by(|a, b| (&a.repo, &a.branch).cmp(&(&b.repo, &b.branch)));
    Ok(summaries)
  }

  /// Delete every branch manifest of a repository
  pub fn delete_repo(&self, repo: &str) -> Result<usize, ManifestError> {
    let mut deleted = 0;
    for (path, manifest) in self.read_all()? {
      if manifest.repo == repo {
        std::fs::remove_file(&path)?;
        info!(path = %path.display(), "Deleted manifest");
        deleted += 1;
      }
    }
    Ok(deleted)
  }

  fn read_all(&self) -> Result<Vec<(PathBuf, BranchManifest)>, ManifestError> {
    let entries = match std::fs::read_dir(&self.dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(e.into()),
    };

    let mut manifests = Vec::new();
    for entry in entries {
      let path = entry?.path();
      if path.extension().is_none_or(|ext| ext != "json") {
        continue;
      }
      match std::fs::read(&path).map(|b| serde_json::from_slice::<BranchManifest>(&b)) {
        Ok(Ok(manifest)) => manifests.push((path, manifest)),
        Ok(Err(e)) => warn!(path = %path.display(), error = %e, "Skipping unreadable manifest"),
        Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable manifest"),
      }
    }
    Ok(manifests)
  }
}

fn sanitize(part: &str) -> String {
  part.replace('/', "_").replace('@', "_at_")
}

/// `git rev-parse HEAD` in `root`, if it is a git checkout
pub fn current_commit(root: &Path) -> Option<String> {
  Command::new("git")
    .args(["rev-parse", "HEAD"])
    .current_dir(root)
    .output()
    .ok()
    .filter(|o| o.status.success())
    .and_then(|o| String::from_utf8(o.stdout).ok())
    .map(|s| s.trim().to_string())
    .filter(|s| !s.is_empty())
}
