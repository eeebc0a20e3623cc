//! Configuration system for semdex with per-folder overrides.
//!
//! Config priority: folder-relative (.semdex/config.toml) > user (~/.config/semdex/config.toml) > defaults

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::mode::ChunkingMode;

/// Exclusion patterns applied when a request does not bring its own
pub const DEFAULT_EXCLUDES: &[&str] = &[
  "node_modules",
  ".git",
  ".DS_Store",
  "*.log",
  "dist",
  "build",
  "__pycache__",
  ".vscode",
  ".idea",
  "*.pyc",
];

// ============================================================================
// Index Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexConfig {
  /// Files larger than this are never indexed (default: 50)
  pub max_file_size_mb: u64,

  /// Extracted text shorter than this many characters is skipped (default: 10)
  pub min_content_length: usize,

  /// Exclusion patterns used when none are given for a run
  pub exclude_patterns: Vec<String>,
}

impl Default for IndexConfig {
  fn default() -> Self {
    Self {
      max_file_size_mb: 50,
      min_content_length: 10,
      exclude_patterns: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
    }
  }
}

impl IndexConfig {
  pub fn max_file_size_bytes(&self) -> u64 {
    self.max_file_size_mb * 1024 * 1024
  }
}

// ============================================================================
// Chunking Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
  /// Lines per gist chunk (default: 35)
  pub gist_chunk_lines: usize,
  /// Lines shared between consecutive gist chunks (default: 5)
  pub gist_overlap_lines: usize,
  /// How many previous chunks a new gist chunk is compared against (default: 5)
  pub gist_dedup_window: usize,
  /// Similarity at or above which a gist chunk is dropped as a near duplicate (default: 0.98)
  pub gist_dedup_threshold: f32,
  /// Maximum lines per pinpoint chunk (default: 3)
  pub pinpoint_chunk_lines: usize,
}

impl Default for ChunkingConfig {
  fn default() -> Self {
    Self {
      gist_chunk_lines: 35,
      gist_overlap_lines: 5,
      gist_dedup_window: 5,
      gist_dedup_threshold: 0.98,
      pinpoint_chunk_lines: 3,
    }
  }
}

// ============================================================================
// Embedding Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
  /// Ollama server URL
  pub ollama_url: String,
  /// Model used for gist chunks
  pub gist_model: String,
  /// Model used for pinpoint chunks
  pub pinpoint_model: String,
  /// Vector width of both models; shorter vectors are zero-padded
  pub dimensions: usize,
}

impl Default for EmbeddingConfig {
  fn default() -> Self {
    Self {
      ollama_url: "http://localhost:11434".to_string(),
      gist_model: "msmarco-minilm".to_string(),
      pinpoint_model: "all-minilm".to_string(),
      dimensions: 384,
    }
  }
}

impl EmbeddingConfig {
  pub fn model_for(&self, mode: ChunkingMode) -> &str {
    match mode {
      ChunkingMode::Gist => &self.gist_model,
      ChunkingMode::Pinpoint => &self.pinpoint_model,
    }
  }
}

// ============================================================================
// Watcher Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatcherConfig {
  /// Per-path debounce window in milliseconds (default: 500)
  pub debounce_ms: u64,

  /// Treat a buffered delete whose file exists at fire time as a modification
  /// (editors that save by delete + recreate). Default: true
  pub recreate_as_modified: bool,

  /// How often `watch` drains the queues with a sync pass, in seconds (0 = never)
  pub auto_sync_secs: u64,
}

impl Default for WatcherConfig {
  fn default() -> Self {
    Self {
      debounce_ms: 500,
      recreate_as_modified: true,
      auto_sync_secs: 5,
    }
  }
}

// ============================================================================
// Log Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
  /// Log level: "off", "error", "warn", "info", "debug", "trace"
  pub level: String,

  /// Log file rotation: "daily", "hourly", "never"
  pub rotation: String,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      rotation: "daily".to_string(),
    }
  }
}

// ============================================================================
// Root Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
  pub index: IndexConfig,
  pub chunking: ChunkingConfig,
  pub embedding: EmbeddingConfig,
  pub watcher: WatcherConfig,
  pub log: LogConfig,
}

impl Config {
  /// Load config for a folder, with fallback to user config
  pub fn load_for_folder(folder: &Path) -> Self {
    let folder_config = Self::folder_config_path(folder);
    if folder_config.exists()
      && let Ok(content) = std::fs::read_to_string(&folder_config)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }

    if let Some(user_config_path) = Self::user_config_path()
      && user_config_path.exists()
      && let Ok(content) = std::fs::read_to_string(&user_config_path)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }

    Self::default()
  }

  /// Get the user-level config path
  pub fn user_config_path() -> Option<PathBuf> {
    Some(crate::dirs::default_config_dir().join("config.toml"))
  }

  /// Get the folder-relative config path
  pub fn folder_config_path(folder: &Path) -> PathBuf {
    folder.join(".semdex").join("config.toml")
  }

  /// Generate a default config file as a string
  pub fn generate_template() -> String {
    let defaults = Config::default();
    let excludes = defaults
      .index
      .exclude_patterns
      .iter()
      .map(|p| format!("\"{}\"", p))
      .collect::<Vec<_>>()
      .join(", ");

    format!(
      r#"# semdex configuration
# Place in <folder>/.semdex/config.toml (folder) or ~/.config/semdex/config.toml (user)

# ============================================================================
# Indexing
# ============================================================================

[index]
# Files larger than this (in MB) are skipped
max_file_size_mb = {max_size}

# Extracted text shorter than this is not indexed
min_content_length = {min_len}

# Exclusion patterns:
#   "/build"     anchored at the indexed folder
#   "target/"    any directory with that name
#   "docs/*.md"  path pattern, matched at any depth
#   "*.log"      any single path component
exclude_patterns = [{excludes}]

# ============================================================================
# Chunking
# ============================================================================

[chunking]
gist_chunk_lines = {gist_lines}
gist_overlap_lines = {gist_overlap}
gist_dedup_window = {dedup_window}
gist_dedup_threshold = {dedup_threshold}
pinpoint_chunk_lines = {pin_lines}

# ============================================================================
# Embedding (Ollama)
# ============================================================================

[embedding]
ollama_url = "{ollama_url}"
gist_model = "{gist_model}"
pinpoint_model = "{pinpoint_model}"

# Changing this requires clearing the index
dimensions = {dimensions}

# ============================================================================
# Watcher
# ============================================================================

[watcher]
# Per-path debounce window
debounce_ms = {debounce}

# A delete followed by the file reappearing inside the window counts as a modification
recreate_as_modified = {recreate}

# Seconds between automatic sync passes while watching (0 disables)
auto_sync_secs = {auto_sync}

# ============================================================================
# Logging
# ============================================================================

[log]
# off, error, warn, info, debug, trace (RUST_LOG overrides)
level = "{level}"

# daily, hourly, never
rotation = "{rotation}"
"#,
      max_size = defaults.index.max_file_size_mb,
      min_len = defaults.index.min_content_length,
      excludes = excludes,
      gist_lines = defaults.chunking.gist_chunk_lines,
      gist_overlap = defaults.chunking.gist_overlap_lines,
      dedup_window = defaults.chunking.gist_dedup_window,
      dedup_threshold = defaults.chunking.gist_dedup_threshold,
      pin_lines = defaults.chunking.pinpoint_chunk_lines,
      ollama_url = defaults.embedding.ollama_url,
      gist_model = defaults.embedding.gist_model,
      pinpoint_model = defaults.embedding.pinpoint_model,
      dimensions = defaults.embedding.dimensions,
      debounce = defaults.watcher.debounce_ms,
      recreate = defaults.watcher.recreate_as_modified,
      auto_sync = defaults.watcher.auto_sync_secs,
      level = defaults.log.level,
      rotation = defaults.log.rotation,
    )
  }
}
