//! Saved indexing preferences per folder set
//!
//! A full index over a set of folders stores its excludes, size cap and mode
//! here so later rescans and watcher seeding reuse them. The key is a stable
//! hash of the sorted, normalized folder list.

use std::{
  collections::{BTreeMap, BTreeSet},
  path::{Path, PathBuf},
  sync::{Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::write_json_atomic;
use crate::domain::{config::DEFAULT_EXCLUDES, mode::ChunkingMode, paths};

#[derive(Debug, thiserror::Error)]
#[error("Failed to persist folder settings: {0}")]
pub struct SettingsError(#[from] std::io::Error);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderSettingsRecord {
  pub folders: Vec<PathBuf>,
  pub excludes: Vec<String>,
  pub max_size_mb: u64,
  pub mode: ChunkingMode,
  pub created_at: DateTime<Utc>,
  pub display_name: String,
}

pub struct FolderSettingsStore {
  path: PathBuf,
  default_max_size_mb: u64,
  records: Mutex<BTreeMap<String, FolderSettingsRecord>>,
}

impl FolderSettingsStore {
  /// Load the settings file; a missing or corrupt file starts empty
  pub fn open(path: impl Into<PathBuf>, default_max_size_mb: u64) -> Self {
    let path = path.into();
    let records = match std::fs::read(&path) {
      Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "Corrupt folder settings, starting empty");
        BTreeMap::new()
      }),
      Err(_) => BTreeMap::new(),
    };
    Self {
      path,
      default_max_size_mb,
      records: Mutex::new(records),
    }
  }

  fn lock(&self) -> MutexGuard<'_, BTreeMap<String, FolderSettingsRecord>> {
    self.records.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Stable key for a folder set, independent of order and spelling
  pub fn key_for(folders: &[PathBuf]) -> String {
    let combined = normalized_set(folders)
      .iter()
      .map(|p| p.to_string_lossy().into_owned())
      .collect::<Vec<_>>()
      .join("|");
    let digest = hex::encode(Sha256::digest(combined.as_bytes()));
    digest[..16].to_string()
  }

  pub fn save(
    &self,
    folders: &[PathBuf],
    excludes: &[String],
    max_size_mb: u64,
    mode: ChunkingMode,
  ) -> Result<String, SettingsError> {
    let folders = normalized_set(folders);
    let key = Self::key_for(&folders);
    let record = FolderSettingsRecord {
      display_name: display_name(&folders),
      folders,
      excludes: excludes.to_vec(),
      max_size_mb,
      mode,
      created_at: Utc::now(),
    };

    let mut records = self.lock();
    records.insert(key.clone(), record);
    write_json_atomic(&self.path, &*records)?;
    debug!(key = %key, "Saved folder settings");
    Ok(key)
  }

  pub fn get(&self, key: &str) -> Option<FolderSettingsRecord> {
    self.lock().get(key).cloned()
  }

  /// Saved excludes for this exact folder set, or the defaults
  pub fn excludes_for(&self, folders: &[PathBuf]) -> Vec<String> {
    self
      .get(&Self::key_for(folders))
      .map(|r| r.excludes)
      .unwrap_or_else(|| DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect())
  }

  pub fn max_size_for(&self, folders: &[PathBuf]) -> u64 {
    self
      .get(&Self::key_for(folders))
      .map(|r| r.max_size_mb)
      .unwrap_or(self.default_max_size_mb)
  }

  /// Most recent settings whose folder set contains `root`
  pub fn settings_for_root(&self, root: &Path) -> Option<FolderSettingsRecord> {
    let root = paths::normalize(root);
    self
      .lock()
      .values()
      .filter(|r| r.folders.contains(&root))
      .max_by_key(|r| r.created_at)
      .cloned()
  }

  pub fn list(&self) -> BTreeMap<String, FolderSettingsRecord> {
    self.lock().clone()
  }

  pub fn delete(&self, key: &str) -> Result<bool, SettingsError> {
    let mut records = self.lock();
    if records.remove(key).is_none() {
      return Ok(false);
    }
    write_json_atomic(&self.path, &*records)?;
    Ok(true)
  }

  /// Every saved folder that still exists on disk
  pub fn indexed_folders(&self) -> Vec<PathBuf> {
    let folders: BTreeSet<PathBuf> = self
      .lock()
      .values()
      .flat_map(|r| r.folders.iter().cloned())
      .filter(|f| f.exists())
      .collect();
    folders.into_iter().collect()
  }
}

fn normalized_set(folders: &[PathBuf]) -> Vec<PathBuf> {
  let set: BTreeSet<PathBuf> = folders.iter().map(|f| paths::normalize(f)).collect();
  set.into_iter().collect()
}

fn display_name(folders: &[PathBuf]) -> String {
  let name = |p: &PathBuf| {
    p.file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| p.display().to_string())
  };
  match folders {
    [] => String::new(),
    [only] => name(only),
    few if few.len() <= 3 => few.iter().map(name).collect::<Vec<_>>().join(", "),
    [first, rest @ ..] => format!("{} + {} others", name(first), rest.len()),
  }
}
