//! Staleness tracking and tree traversal
//!
//! - [`detector`]: per-file, per-mode staleness records for local folders
//! - [`manifest`]: per (repository, branch) manifests for cloned repositories
//! - [`walker`] + [`filter`]: the one traversal used by indexing, manifests and rescans
//! - [`settings`]: saved per-folder-set indexing preferences

pub mod detector;
pub mod filter;
pub mod manifest;
pub mod settings;
pub mod walker;

use std::{
  fs::File,
  io::{self, Read, Write},
  path::Path,
  time::UNIX_EPOCH,
};

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Size and modification time of a file on disk
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileStat {
  pub size: u64,
  /// Seconds since the Unix epoch, fractional
  pub mtime: f64,
}

impl FileStat {
  pub fn read(path: &Path) -> io::Result<Self> {
    let meta = std::fs::metadata(path)?;
    let mtime = meta
      .modified()?
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_secs_f64())
      .unwrap_or(0.0);
    Ok(Self { size: meta.len(), mtime })
  }
}

/// Streaming SHA-256 of a file's content, hex encoded
pub fn hash_file(path: &Path) -> io::Result<String> {
  let mut file = File::open(path)?;
  let mut hasher = Sha256::new();
  let mut buf = [0u8; 64 * 1024];
  loop {
    let n = file.read(&mut buf)?;
    if n == 0 {
      break;
    }
    hasher.update(&buf[..n]);
  }
  Ok(hex::encode(hasher.finalize()))
}

/// Serialize to pretty JSON and replace `path` atomically (temp file + rename)
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
  let json = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
  write_atomic(path, &json)
}

/// Replace `path` with `bytes` through a sibling temp file
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)?;
  }
  let tmp = path.with_extension("json.tmp");
  {
    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
  }
  std::fs::rename(&tmp, path)
}
