use std::{fmt, path::PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::mode::ChunkingMode;

/// Canonical change type produced after debouncing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
  Created,
  Modified,
  Deleted,
}

impl ChangeKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ChangeKind::Created => "created",
      ChangeKind::Modified => "modified",
      ChangeKind::Deleted => "deleted",
    }
  }
}

impl fmt::Display for ChangeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A pending change for one (mode, folder root) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
  pub path: PathBuf,
  pub kind: ChangeKind,
  pub timestamp: DateTime<Utc>,
  pub mode: ChunkingMode,
  /// Monitored root the path was matched against
  pub folder_root: PathBuf,
}

impl ChangeEvent {
  pub fn new(path: PathBuf, kind: ChangeKind, mode: ChunkingMode, folder_root: PathBuf) -> Self {
    Self {
      path,
      kind,
      timestamp: Utc::now(),
      mode,
      folder_root,
    }
  }
}
