//! Line-based chunkers, one per chunking mode
//!
//! - gist: overlapping windows of cleaned lines for topic-level search, with
//!   near-duplicate windows dropped
//! - pinpoint: a few lines at a time, closed early at sentence ends, for
//!   exact phrase lookups
//!
//! Line numbers are 1-based and refer to the original text.

use std::collections::HashSet;

use crate::domain::{config::ChunkingConfig, mode::ChunkingMode};

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
  pub text: String,
  pub line_numbers: Vec<usize>,
}

impl Chunk {
  /// Comma-separated line numbers, as stored in chunk metadata
  pub fn line_ranges(&self) -> String {
    self
      .line_numbers
      .iter()
      .map(|n| n.to_string())
      .collect::<Vec<_>>()
      .join(",")
  }

  pub fn size(&self) -> usize {
    self.text.chars().count()
  }
}

pub trait Chunker: Send + Sync {
  fn chunk(&self, text: &str, file_ext: &str) -> Vec<Chunk>;
}

pub fn chunker_for(mode: ChunkingMode, config: &ChunkingConfig, min_content_length: usize) -> Box<dyn Chunker> {
  match mode {
    ChunkingMode::Gist => Box::new(GistChunker {
      chunk_lines: config.gist_chunk_lines.max(1),
      overlap_lines: config.gist_overlap_lines,
      dedup_window: config.gist_dedup_window,
      dedup_threshold: config.gist_dedup_threshold,
      min_content_length,
    }),
    ChunkingMode::Pinpoint => Box::new(PinpointChunker {
      max_lines: config.pinpoint_chunk_lines.max(1),
    }),
  }
}

// ============================================================================
// Gist
// ============================================================================

#[derive(Debug, Clone)]
pub struct GistChunker {
  pub chunk_lines: usize,
  pub overlap_lines: usize,
  pub dedup_window: usize,
  pub dedup_threshold: f32,
  pub min_content_length: usize,
}

impl Default for GistChunker {
  fn default() -> Self {
    let config = ChunkingConfig::default();
    Self {
      chunk_lines: config.gist_chunk_lines,
      overlap_lines: config.gist_overlap_lines,
      dedup_window: config.gist_dedup_window,
      dedup_threshold: config.gist_dedup_threshold,
      min_content_length: 10,
    }
  }
}

impl Chunker for GistChunker {
  fn chunk(&self, text: &str, _file_ext: &str) -> Vec<Chunk> {
    let lines = clean_lines(text);
    if lines.is_empty() {
      return Vec::new();
    }

    let step = self.chunk_lines.saturating_sub(self.overlap_lines).max(1);
    let mut chunks = Vec::new();
    let mut recent: Vec<HashSet<String>> = Vec::new();

    let mut start = 0;
    while start < lines.len() {
      let window = &lines[start..(start + self.chunk_lines).min(lines.len())];
      start += step;

      let text = window.iter().map(|(_, l)| l.as_str()).collect::<Vec<_>>().join("\n");
      if text.trim().chars().count() < self.min_content_length {
        continue;
      }

      let tokens = token_set(&text);
      let duplicate = recent
        .iter()
        .rev()
        .take(self.dedup_window)
        .any(|prev| jaccard(prev, &tokens) >= self.dedup_threshold);
      if duplicate {
        continue;
      }
      recent.push(tokens);

      chunks.push(Chunk {
        text,
        line_numbers: window.iter().map(|(n, _)| *n).collect(),
      });
    }
    chunks
  }
}

/// Trimmed, whitespace-collapsed lines without separators and boilerplate
fn clean_lines(text: &str) -> Vec<(usize, String)> {
  text
    .lines()
    .enumerate()
    .filter_map(|(i, line)| {
      let trimmed = line.trim();
      if trimmed.is_empty() || is_boilerplate(trimmed) {
        return None;
      }
      Some((i + 1, trimmed.split_whitespace().collect::<Vec<_>>().join(" ")))
    })
    .collect()
}

fn is_boilerplate(line: &str) -> bool {
  if line.chars().count() >= 3 && line.chars().all(|c| "-=_*#".contains(c)) {
    return true;
  }
  let lower = line.to_lowercase();
  if lower.starts_with("copyright") || lower.starts_with('©') || lower.starts_with("(c)") {
    return true;
  }
  let mut words = lower.split_whitespace();
  words.next() == Some("generated") && matches!(words.next(), Some("automatically" | "by"))
}

fn token_set(text: &str) -> HashSet<String> {
  text
    .split(|c: char| !c.is_alphanumeric())
    .filter(|t| !t.is_empty())
    .map(str::to_lowercase)
    .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
  if a.is_empty() && b.is_empty() {
    return 1.0;
  }
  let intersection = a.intersection(b).count();
  let union = a.len() + b.len() - intersection;
  intersection as f32 / union as f32
}

// ============================================================================
// Pinpoint
// ============================================================================

#[derive(Debug, Clone)]
pub struct PinpointChunker {
  pub max_lines: usize,
}

impl Default for PinpointChunker {
  fn default() -> Self {
    Self {
      max_lines: ChunkingConfig::default().pinpoint_chunk_lines,
    }
  }
}

impl Chunker for PinpointChunker {
  fn chunk(&self, text: &str, _file_ext: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut current = Chunk {
      text: String::new(),
      line_numbers: Vec::new(),
    };

    for (i, line) in text.lines().enumerate() {
      let line = line.trim();
      if line.is_empty() {
        continue;
      }
      if !current.text.is_empty() {
        current.text.push('\n');
      }
      current.text.push_str(line);
      current.line_numbers.push(i + 1);

      let sentence_end = line.ends_with(['.', '!', '?', ';', ':']);
      if sentence_end || current.line_numbers.len() >= self.max_lines {
        chunks.push(std::mem::replace(
          &mut current,
          Chunk {
            text: String::new(),
            line_numbers: Vec::new(),
          },
        ));
      }
    }
    if !current.line_numbers.is_empty() {
      chunks.push(current);
    }
    chunks
  }
}
