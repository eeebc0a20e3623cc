use std::{io::Read, path::Path};

use tracing::debug;

/// Bytes inspected for NUL when deciding a file is binary
const BINARY_SNIFF_LEN: usize = 8 * 1024;

/// Turns a file into plain text. Never fails: unreadable or unsupported
/// content comes back empty and the file is skipped.
pub trait Extractor: Send + Sync {
  fn extract(&self, path: &Path) -> String;
}

/// Lossy UTF-8 reader; binary files (NUL in the first 8 KiB) yield nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl Extractor for PlainTextExtractor {
  fn extract(&self, path: &Path) -> String {
    let mut bytes = Vec::new();
    let read = std::fs::File::open(path).and_then(|mut f| f.read_to_end(&mut bytes));
    if let Err(e) = read {
      debug!(path = %path.display(), error = %e, "Extraction failed");
      return String::new();
    }

    let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_LEN)];
    if sniff.contains(&0) {
      debug!(path = %path.display(), "Binary content, nothing to extract");
      return String::new();
    }

    String::from_utf8_lossy(&bytes).into_owned()
  }
}
