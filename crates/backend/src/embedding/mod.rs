mod ollama;

use std::sync::Arc;

pub use ollama::OllamaProvider;

use crate::domain::{config::EmbeddingConfig, mode::ChunkingMode};

#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
  fn name(&self) -> &str;
  fn model_id(&self) -> &str;

  async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

  async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let mut out = Vec::with_capacity(texts.len());
    for text in texts {
      out.push(self.embed(text).await?);
    }
    Ok(out)
  }
}

/// One embedding provider per chunking mode
#[derive(Clone)]
pub struct Embedders {
  gist: Arc<dyn EmbeddingProvider>,
  pinpoint: Arc<dyn EmbeddingProvider>,
}

impl Embedders {
  pub fn new(gist: Arc<dyn EmbeddingProvider>, pinpoint: Arc<dyn EmbeddingProvider>) -> Self {
    Self { gist, pinpoint }
  }

  /// The same provider for every mode
  pub fn uniform(provider: Arc<dyn EmbeddingProvider>) -> Self {
    Self {
      gist: Arc::clone(&provider),
      pinpoint: provider,
    }
  }

  /// Ollama with the configured model for each mode
  pub fn from_config(config: &EmbeddingConfig) -> Self {
    let provider = |mode| -> Arc<dyn EmbeddingProvider> {
      Arc::new(OllamaProvider::new(&config.ollama_url, config.model_for(mode)))
    };
    Self {
      gist: provider(ChunkingMode::Gist),
      pinpoint: provider(ChunkingMode::Pinpoint),
    }
  }

  pub fn for_mode(&self, mode: ChunkingMode) -> &Arc<dyn EmbeddingProvider> {
    match mode {
      ChunkingMode::Gist => &self.gist,
      ChunkingMode::Pinpoint => &self.pinpoint,
    }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
  #[error("Request failed: {0}")]
  Request(#[from] reqwest::Error),
  #[error("Provider error: {0}")]
  ProviderError(String),
}
