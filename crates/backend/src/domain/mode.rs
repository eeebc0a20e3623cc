use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// A chunking strategy. Selects the chunker and the embedding model together,
/// and owns its own queue partition and vector collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingMode {
  /// Large overlapping context chunks
  #[default]
  Gist,
  /// Small sentence-bounded chunks
  Pinpoint,
}

impl ChunkingMode {
  pub const ALL: [ChunkingMode; 2] = [ChunkingMode::Gist, ChunkingMode::Pinpoint];

  pub fn as_str(&self) -> &'static str {
    match self {
      ChunkingMode::Gist => "gist",
      ChunkingMode::Pinpoint => "pinpoint",
    }
  }
}

impl fmt::Display for ChunkingMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ChunkingMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "gist" => Ok(ChunkingMode::Gist),
      "pinpoint" => Ok(ChunkingMode::Pinpoint),
      other => Err(format!("unknown chunking mode '{}' (expected gist or pinpoint)", other)),
    }
  }
}
