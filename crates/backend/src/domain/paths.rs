//! Path canonicalization.
//!
//! Every path entering the engine (index requests, watcher events, monitored
//! roots) goes through [`normalize`] once, so stored records, vector metadata
//! and queue keys all share one spelling. Symlinks are not resolved: deleted
//! files must normalize the same way as live ones.

use std::path::{Component, Path, PathBuf};

/// Make a path absolute and lexically resolve `.` and `..` components.
pub fn normalize(path: &Path) -> PathBuf {
  let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());

  let mut out = PathBuf::new();
  for component in absolute.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        out.pop();
      }
      other => out.push(other.as_os_str()),
    }
  }
  out
}

/// String form used in vector-store metadata and doc ids
pub fn display_key(path: &Path) -> String {
  path.to_string_lossy().into_owned()
}

/// Lowercased extension without the dot, or empty
pub fn file_type(path: &Path) -> String {
  path
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| e.to_lowercase())
    .unwrap_or_default()
}

pub fn file_name(path: &Path) -> String {
  path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default()
}

/// Relative path with forward slashes, used as manifest keys and glob input
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
  let rel = path.strip_prefix(root).ok()?;
  let parts: Vec<String> = rel
    .components()
    .filter_map(|c| match c {
      Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
      _ => None,
    })
    .collect();
  Some(parts.join("/"))
}
