//! Tree traversal shared by full indexing, manifest change detection and
//! forced rescans. Directories are pruned while walking rather than filtered
//! afterwards, so excluded trees are never read.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::{Duration, Instant},
};

use ignore::WalkBuilder;
use tracing::{debug, trace, warn};

use super::filter::{ExcludePatterns, is_pruned_dir_name, is_skipped_file_name};
use crate::domain::paths;

/// A file accepted by the walker
#[derive(Debug, Clone, PartialEq)]
pub struct WalkedFile {
  /// Normalized absolute path
  pub path: PathBuf,
  /// `/`-separated path relative to the walk root
  pub relative_path: String,
  pub size: u64,
}

#[derive(Debug, Default)]
pub struct WalkResult {
  pub files: Vec<WalkedFile>,
  /// Files rejected by name, exclusion pattern or size
  pub skipped_count: u32,
  pub walk_duration: Duration,
}

/// Filtering traversal over one root
#[derive(Debug, Clone)]
pub struct TreeWalker {
  excludes: Arc<ExcludePatterns>,
  max_file_size: u64,
  follow_links: bool,
}

impl Default for TreeWalker {
  fn default() -> Self {
    Self::new()
  }
}

impl TreeWalker {
  pub fn new() -> Self {
    Self {
      excludes: Arc::new(ExcludePatterns::empty()),
      max_file_size: 50 * 1024 * 1024,
      follow_links: false,
    }
  }

  pub fn with_excludes(mut self, excludes: ExcludePatterns) -> Self {
    self.excludes = Arc::new(excludes);
    self
  }

  /// Size cap in bytes
  pub fn with_max_file_size(mut self, size: u64) -> Self {
    self.max_file_size = size;
    self
  }

  pub fn excludes(&self) -> &ExcludePatterns {
    &self.excludes
  }

  pub fn max_file_size(&self) -> u64 {
    self.max_file_size
  }

  /// Walk `root`, returning accepted files sorted by path
  pub fn walk(&self, root: &Path) -> WalkResult {
    let start = Instant::now();
    let root = paths::normalize(root);
    let mut result = WalkResult::default();

    let prune_root = root.clone();
    let excludes = Arc::clone(&self.excludes);

    let walker = WalkBuilder::new(&root)
      .standard_filters(false)
      .follow_links(self.follow_links)
      .filter_entry(move |entry| {
        if entry.depth() == 0 || !entry.file_type().is_some_and(|ft| ft.is_dir()) {
          return true;
        }
        let name = entry.file_name().to_string_lossy();
        if is_pruned_dir_name(&name) {
          trace!(dir = %entry.path().display(), "Pruning directory");
          return false;
        }
        match paths::relative_key(&prune_root, entry.path()) {
          Some(rel) => !excludes.is_excluded(&rel, true),
          None => true,
        }
      })
      .build();

    for entry in walker {
      let entry = match entry {
        Ok(entry) => entry,
        Err(e) => {
          warn!(root = %root.display(), error = %e, "Error while walking");
          continue;
        }
      };

      if !entry.file_type().is_some_and(|ft| ft.is_file()) {
        continue;
      }

      let path = entry.path();
      let name = entry.file_name().to_string_lossy();
      if is_skipped_file_name(&name) {
        result.skipped_count += 1;
        continue;
      }

      let Some(relative_path) = paths::relative_key(&root, path) else {
        continue;
      };
      if self.excludes.is_excluded(&relative_path, false) {
        trace!(path = %relative_path, "Excluded by pattern");
        result.skipped_count += 1;
        continue;
      }

      let size = match entry.metadata() {
        Ok(meta) => meta.len(),
        Err(e) => {
          debug!(path = %path.display(), error = %e, "Cannot stat file, skipping");
          result.skipped_count += 1;
          continue;
        }
      };
      if size > self.max_file_size {
        debug!(path = %path.display(), size, max = self.max_file_size, "File exceeds size cap");
        result.skipped_count += 1;
        continue;
      }

      result.files.push(WalkedFile {
        path: path.to_path_buf(),
        relative_path,
        size,
      });
    }

    result.files.sort_by(|a, b| a.path.cmp(&b.path));
    result.walk_duration = start.elapsed();

    debug!(
      root = %root.display(),
      files = result.files.len(),
      skipped = result.skipped_count,
      elapsed_ms = result.walk_duration.as_millis(),
      "Walk complete"
    );

    result
  }
}
