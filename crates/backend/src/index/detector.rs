//! ChangeDetector - persisted per-file, per-mode staleness records
//!
//! One JSON table keyed by normalized absolute path. Each entry holds one
//! [`ModeRecord`] per chunking mode the file was indexed in; an entry whose
//! last mode record is removed is deleted outright.
//!
//! Every mutation rewrites the whole table (temp file + rename) while the
//! table lock is held, so a `classify` issued after any mutation returns
//! sees that mutation.

use std::{
  collections::{BTreeMap, BTreeSet},
  path::{Path, PathBuf},
  sync::{Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use super::{FileStat, hash_file, write_json_atomic};
use crate::domain::mode::ChunkingMode;

/// Two mtimes closer than this are considered equal
pub const MTIME_TOLERANCE_SECS: f64 = 1.0;

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
  #[error("Failed to read {path}: {source}")]
  Stat {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Failed to persist metadata table: {0}")]
  Persist(#[source] std::io::Error),
}

/// Staleness record for one file in one mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeRecord {
  pub content_hash: String,
  /// Seconds since the Unix epoch
  pub mtime: f64,
  pub size: u64,
  pub indexed_at: DateTime<Utc>,
  pub chunk_count: usize,
  pub chunk_sizes: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
  pub path: PathBuf,
  pub modes: BTreeMap<ChunkingMode, ModeRecord>,
}

/// Split of a candidate list into files to (re)index and files to skip
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Classification {
  pub needs_index: Vec<PathBuf>,
  pub can_skip: Vec<PathBuf>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ModeStats {
  pub files: usize,
  pub chunks: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct DetectorStats {
  pub total_files: usize,
  pub modes: BTreeMap<ChunkingMode, ModeStats>,
}

type Table = BTreeMap<PathBuf, FileRecord>;

pub struct ChangeDetector {
  table_path: PathBuf,
  records: Mutex<Table>,
}

impl ChangeDetector {
  /// Open (or start) the table stored at `table_path`.
  ///
  /// A missing file starts an empty table. An unreadable or corrupt file is
  /// logged and replaced by an empty table on the next write.
  pub fn open(table_path: impl Into<PathBuf>) -> Self {
    let table_path = table_path.into();
    let records = match std::fs::read(&table_path) {
      Ok(bytes) => match serde_json::from_slice::<Table>(&bytes) {
        Ok(table) => {
          info!(path = %table_path.display(), files = table.len(), "Loaded file metadata");
          table
        }
        Err(e) => {
          warn!(path = %table_path.display(), error = %e, "Corrupt file metadata, starting empty");
          Table::new()
        }
      },
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Table::new(),
      Err(e) => {
        warn!(path = %table_path.display(), error = %e, "Cannot read file metadata, starting empty");
        Table::new()
      }
    };

    Self {
      table_path,
      records: Mutex::new(records),
    }
  }

  pub fn table_path(&self) -> &Path {
    &self.table_path
  }

  fn lock(&self) -> MutexGuard<'_, Table> {
    self.records.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn persist(&self, table: &Table) -> Result<(), DetectorError> {
    write_json_atomic(&self.table_path, table).map_err(DetectorError::Persist)
  }

  // ==========================================================================
  // Staleness checks
  // ==========================================================================

  /// Full check: content hash, size and mtime must all match the stored record.
  /// A missing record or any read failure means the file needs indexing.
  pub fn classify(&self, paths: &[PathBuf], mode: ChunkingMode) -> Classification {
    let snapshot: BTreeMap<PathBuf, ModeRecord> = {
      let table = self.lock();
      paths
        .iter()
        .filter_map(|p| {
          table
            .get(p)
            .and_then(|r| r.modes.get(&mode))
            .map(|m| (p.clone(), m.clone()))
        })
        .collect()
    };

    let mut result = Classification::default();
    for path in paths {
      let unchanged = snapshot.get(path).is_some_and(|stored| is_unchanged(path, stored));
      if unchanged {
        result.can_skip.push(path.clone());
      } else {
        result.needs_index.push(path.clone());
      }
    }

    debug!(
      mode = %mode,
      needs_index = result.needs_index.len(),
      can_skip = result.can_skip.len(),
      "Classified files"
    );
    result
  }

  /// Cheap check used on the real-time path: mtime (within tolerance) and
  /// size only, no hashing. An edit that keeps the size and lands within the
  /// mtime tolerance is not detected here; the next full classify catches it.
  pub fn fast_needs_indexing(&self, path: &Path, mode: ChunkingMode) -> bool {
    let stored = {
      let table = self.lock();
      match table.get(path).and_then(|r| r.modes.get(&mode)) {
        Some(m) => (m.mtime, m.size),
        None => return true,
      }
    };

    match FileStat::read(path) {
      Ok(stat) => (stat.mtime - stored.0).abs() >= MTIME_TOLERANCE_SECS || stat.size != stored.1,
      Err(_) => true,
    }
  }

  // ==========================================================================
  // Mutations
  // ==========================================================================

  /// Record a successful index of `path` in `mode`
  pub fn update(
    &self,
    path: &Path,
    mode: ChunkingMode,
    chunk_count: usize,
    chunk_sizes: Vec<usize>,
  ) -> Result<(), DetectorError> {
    let stat_err = |source| DetectorError::Stat {
      path: path.to_path_buf(),
      source,
    };
    let stat = FileStat::read(path).map_err(stat_err)?;
    let content_hash = hash_file(path).map_err(stat_err)?;

    let record = ModeRecord {
      content_hash,
      mtime: stat.mtime,
      size: stat.size,
      indexed_at: Utc::now(),
      chunk_count,
      chunk_sizes,
    };

    let mut table = self.lock();
    table
      .entry(path.to_path_buf())
      .or_insert_with(|| FileRecord {
        path: path.to_path_buf(),
        modes: BTreeMap::new(),
      })
      .modes
      .insert(mode, record);
    trace!(path = %path.display(), mode = %mode, chunk_count, "Updated file metadata");
    self.persist(&table)
  }

  /// Remove one mode's record, or the whole entry when `mode` is `None` or
  /// the removed mode was the last one. Returns whether anything was removed.
  pub fn remove(&self, path: &Path, mode: Option<ChunkingMode>) -> Result<bool, DetectorError> {
    let mut table = self.lock();
    let removed = remove_locked(&mut table, path, mode);
    if removed {
      trace!(path = %path.display(), mode = ?mode, "Removed file metadata");
      self.persist(&table)?;
    }
    Ok(removed)
  }

  /// Drop records under `folder` (one mode or all). Returns the number of
  /// files whose metadata changed.
  pub fn clear_folder(&self, folder: &Path, mode: Option<ChunkingMode>) -> Result<usize, DetectorError> {
    let mut table = self.lock();
    let targets: Vec<PathBuf> = table.keys().filter(|p| p.starts_with(folder)).cloned().collect();

    let removed = targets
      .iter()
      .filter(|p| remove_locked(&mut table, p, mode))
      .count();

    if removed > 0 {
      info!(folder = %folder.display(), mode = ?mode, removed, "Cleared folder metadata");
      self.persist(&table)?;
    }
    Ok(removed)
  }

  /// Drop records whose file no longer exists
  pub fn cleanup_orphaned(&self) -> Result<usize, DetectorError> {
    let mut table = self.lock();
    let before = table.len();
    table.retain(|path, _| path.exists());
    let removed = before - table.len();

    if removed > 0 {
      info!(removed, "Removed orphaned file metadata");
      self.persist(&table)?;
    }
    Ok(removed)
  }

  pub fn clear_all(&self) -> Result<(), DetectorError> {
    let mut table = self.lock();
    table.clear();
    info!("Cleared all file metadata");
    self.persist(&table)
  }

  // ==========================================================================
  // Queries
  // ==========================================================================

  pub fn record(&self, path: &Path) -> Option<FileRecord> {
    self.lock().get(path).cloned()
  }

  pub fn has_mode(&self, path: &Path, mode: ChunkingMode) -> bool {
    self.lock().get(path).is_some_and(|r| r.modes.contains_key(&mode))
  }

  pub fn files_for_mode(&self, mode: ChunkingMode) -> Vec<PathBuf> {
    self
      .lock()
      .values()
      .filter(|r| r.modes.contains_key(&mode))
      .map(|r| r.path.clone())
      .collect()
  }

  /// Parent directories of indexed files with the modes indexed there
  pub fn indexed_folders(&self) -> BTreeMap<PathBuf, BTreeSet<ChunkingMode>> {
    let mut folders: BTreeMap<PathBuf, BTreeSet<ChunkingMode>> = BTreeMap::new();
    for record in self.lock().values() {
      if let Some(parent) = record.path.parent() {
        folders
          .entry(parent.to_path_buf())
          .or_default()
          .extend(record.modes.keys().copied());
      }
    }
    folders
  }

  pub fn stats(&self) -> DetectorStats {
    let table = self.lock();
    let mut stats = DetectorStats {
      total_files: table.len(),
      modes: BTreeMap::new(),
    };
    for record in table.values() {
      for (mode, m) in &record.modes {
        let entry = stats.modes.entry(*mode).or_default();
        entry.files += 1;
        entry.chunks += m.chunk_count;
      }
    }
    stats
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }
}

fn remove_locked(table: &mut Table, path: &Path, mode: Option<ChunkingMode>) -> bool {
  match mode {
    None => table.remove(path).is_some(),
    Some(mode) => {
      let Some(record) = table.get_mut(path) else {
        return false;
      };
      let removed = record.modes.remove(&mode).is_some();
      if record.modes.is_empty() {
        table.remove(path);
      }
      removed
    }
  }
}

fn is_unchanged(path: &Path, stored: &ModeRecord) -> bool {
  let Ok(stat) = FileStat::read(path) else {
    return false;
  };
  if stat.size != stored.size || (stat.mtime - stored.mtime).abs() >= MTIME_TOLERANCE_SECS {
    return false;
  }
  match hash_file(path) {
    Ok(hash) => !hash.is_empty() && hash == stored.content_hash,
    Err(_) => false,
  }
}
