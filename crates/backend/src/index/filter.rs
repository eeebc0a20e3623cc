//! Path filtering rules shared by traversal and the file watcher.
//!
//! Exclusion patterns use glob syntax and come in four kinds:
//!
//! | pattern      | kind      | matches                                      |
//! |--------------|-----------|----------------------------------------------|
//! | `/build`     | anchored  | `build` at the folder root (and its content) |
//! | `target/`    | directory | any directory named `target`                 |
//! | `docs/*.md`  | path      | that path at any depth                       |
//! | `*.log`      | simple    | any single path component                    |

use std::path::{Component, Path};

use globset::{Glob, GlobSet, GlobSetBuilder};

/// Directory names that are never descended into
pub const PRUNED_DIRS: &[&str] = &[
  ".git",
  ".svn",
  ".hg",
  ".bzr",
  ".vscode",
  ".idea",
  ".sublime-project",
  ".sublime-workspace",
  ".DS_Store",
  ".Trash",
  ".Spotlight-V100",
  ".pytest_cache",
  ".mypy_cache",
  "__pycache__",
  ".npm",
  ".yarn",
  "node_modules",
  ".next",
  ".nuxt",
  ".output",
  "dist",
  "build",
  ".dist",
  ".build",
  "coverage",
  ".coverage",
  ".nyc_output",
];

/// Substrings marking editor swap files, locks and partial downloads
const TRANSIENT_MARKERS: &[&str] = &[
  ".tmp",
  ".temp",
  ".swp",
  ".swo",
  "~",
  ".lock",
  ".pid",
  ".log",
  ".cache",
  ".ds_store",
  "thumbs.db",
  ".git",
  "__pycache__",
  ".pyc",
  ".pyo",
  "~$",
  ".crdownload",
  ".partial",
];

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
  #[error("Invalid exclusion pattern '{pattern}': {source}")]
  Pattern {
    pattern: String,
    #[source]
    source: globset::Error,
  },
}

/// Hidden directories and well-known tool/build output directories
pub fn is_pruned_dir_name(name: &str) -> bool {
  name.starts_with('.') || PRUNED_DIRS.contains(&name)
}

/// Hidden (`.`) and system (`~`) files are never indexed
pub fn is_skipped_file_name(name: &str) -> bool {
  name.starts_with('.') || name.starts_with('~')
}

/// Names the watcher drops before debouncing
pub fn is_transient_file_name(name: &str) -> bool {
  if name.starts_with('.') {
    return true;
  }
  let lower = name.to_lowercase();
  TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Watcher-side filter for a path relative to its monitored root
pub fn is_watch_ignored(relative: &Path) -> bool {
  let parts: Vec<String> = relative
    .components()
    .filter_map(|c| match c {
      Component::Normal(p) => Some(p.to_string_lossy().into_owned()),
      _ => None,
    })
    .collect();

  let Some((file, dirs)) = parts.split_last() else {
    return true;
  };
  dirs.iter().any(|d| is_pruned_dir_name(d)) || is_transient_file_name(file)
}

// ============================================================================
// Exclusion patterns
// ============================================================================

/// Compiled user exclusion patterns
#[derive(Debug, Clone)]
pub struct ExcludePatterns {
  patterns: Vec<String>,
  anchored: GlobSet,
  directories: GlobSet,
  paths: GlobSet,
  names: GlobSet,
}

impl ExcludePatterns {
  pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, FilterError> {
    let mut anchored = GlobSetBuilder::new();
    let mut directories = GlobSetBuilder::new();
    let mut paths = GlobSetBuilder::new();
    let mut names = GlobSetBuilder::new();
    let mut kept = Vec::new();

    for raw in patterns {
      let pattern = raw.as_ref().trim().replace('\\', "/");
      if pattern.is_empty() {
        continue;
      }

      if let Some(rest) = pattern.strip_prefix('/') {
        anchored.add(compile(&pattern, rest)?);
      } else if let Some(dir) = pattern.strip_suffix('/') {
        if dir.contains('/') {
          paths.add(compile(&pattern, dir)?);
          paths.add(compile(&pattern, &format!("*/{}", dir))?);
        } else {
          directories.add(compile(&pattern, dir)?);
        }
      } else if pattern.contains('/') {
        paths.add(compile(&pattern, &pattern)?);
        paths.add(compile(&pattern, &format!("*/{}", pattern))?);
      } else {
        names.add(compile(&pattern, &pattern)?);
      }
      kept.push(pattern);
    }

    Ok(Self {
      patterns: kept,
      anchored: build(anchored)?,
      directories: build(directories)?,
      paths: build(paths)?,
      names: build(names)?,
    })
  }

  pub fn empty() -> Self {
    Self {
      patterns: Vec::new(),
      anchored: GlobSet::empty(),
      directories: GlobSet::empty(),
      paths: GlobSet::empty(),
      names: GlobSet::empty(),
    }
  }

  pub fn patterns(&self) -> &[String] {
    &self.patterns
  }

  pub fn is_empty(&self) -> bool {
    self.patterns.is_empty()
  }

  /// Test a `/`-separated path relative to the traversal root
  pub fn is_excluded(&self, relative: &str, is_dir: bool) -> bool {
    if self.patterns.is_empty() {
      return false;
    }

    let parts: Vec<&str> = relative.split('/').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
      return false;
    }

    if parts.iter().any(|part| self.names.is_match(part)) {
      return true;
    }

    let dir_parts = if is_dir { &parts[..] } else { &parts[..parts.len() - 1] };
    if dir_parts.iter().any(|part| self.directories.is_match(part)) {
      return true;
    }

    (1..=parts.len()).any(|end| {
      let prefix = parts[..end].join("/");
      self.anchored.is_match(&prefix) || self.paths.is_match(&prefix)
    })
  }
}

fn compile(original: &str, glob: &str) -> Result<Glob, FilterError> {
  Glob::new(glob).map_err(|source| FilterError::Pattern {
    pattern: original.to_string(),
    source,
  })
}

fn build(builder: GlobSetBuilder) -> Result<GlobSet, FilterError> {
  builder.build().map_err(|source| FilterError::Pattern {
    pattern: String::new(),
    source,
  })
}
