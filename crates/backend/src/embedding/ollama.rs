use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, trace, warn};

use super::{EmbeddingError, EmbeddingProvider};

/// the gpu is the bottleneck, more in flight only queues on the server
const OLLAMA_MAX_CONCURRENT_REQUESTS: usize = 4;

/// Texts per /api/embed request
const OLLAMA_MAX_BATCH_SIZE: usize = 32;

#[derive(Debug, Clone)]
pub struct OllamaProvider {
  client: reqwest::Client,
  base_url: String,
  model: String,
  max_batch_size: usize,
  max_concurrent: usize,
}

impl OllamaProvider {
  pub fn new(base_url: &str, model: &str) -> Self {
    info!(base_url, model, "Ollama provider initialized");
    Self {
      client: reqwest::Client::new(),
      base_url: base_url.trim_end_matches('/').to_string(),
      model: model.to_string(),
      max_batch_size: OLLAMA_MAX_BATCH_SIZE,
      max_concurrent: OLLAMA_MAX_CONCURRENT_REQUESTS,
    }
  }

  pub fn with_max_batch_size(mut self, size: usize) -> Self {
    self.max_batch_size = size.max(1);
    self
  }

  fn embed_url(&self) -> String {
    format!("{}/api/embed", self.base_url)
  }

  /// Split into sub-batches and run them with bounded concurrency, keeping order
  async fn embed_sub_batches(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let num_batches = texts.len().div_ceil(self.max_batch_size);
    if num_batches <= 1 {
      return self.embed_single_batch(texts).await;
    }

    let start = Instant::now();
    debug!(
      batch_size = texts.len(),
      sub_batches = num_batches,
      model = %self.model,
      "Processing batch with concurrent sub-batches"
    );

    let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
    let futures: Vec<_> = texts
      .chunks(self.max_batch_size)
      .map(|chunk| {
        let semaphore = Arc::clone(&semaphore);
        async move {
          let _permit = semaphore
            .acquire()
            .await
            .map_err(|_| EmbeddingError::ProviderError("semaphore closed".to_string()))?;
          self.embed_single_batch(chunk).await
        }
      })
      .collect();

    // join_all preserves input order
    let mut all = Vec::with_capacity(texts.len());
    for result in futures::future::join_all(futures).await {
      all.extend(result?);
    }

    debug!(
      batch_size = texts.len(),
      elapsed_ms = start.elapsed().as_millis(),
      "Batch embedding complete"
    );
    Ok(all)
  }

  async fn embed_single_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let request = EmbedRequest {
      model: &self.model,
      input: texts.to_vec(),
    };

    trace!(batch_size = texts.len(), model = %self.model, "Sending embedding request");
    let start = Instant::now();

    let response = self.client.post(self.embed_url()).json(&request).send().await?;

    if !response.status().is_success() {
      let status = response.status();
      let body = response.text().await.unwrap_or_default();
      warn!(
        status = %status,
        batch_size = texts.len(),
        model = %self.model,
        "Ollama embedding failed"
      );
      return Err(EmbeddingError::ProviderError(format!(
        "Ollama returned {}: {}",
        status, body
      )));
    }

    let result: EmbedResponse = response.json().await?;
    trace!(
      embeddings = result.embeddings.len(),
      elapsed_ms = start.elapsed().as_millis(),
      "Parsed embedding response"
    );

    if result.embeddings.len() != texts.len() {
      error!(
        expected = texts.len(),
        got = result.embeddings.len(),
        model = %self.model,
        "Batch size mismatch in embedding response"
      );
      return Err(EmbeddingError::ProviderError(format!(
        "Batch size mismatch: got {} embeddings for {} inputs",
        result.embeddings.len(),
        texts.len()
      )));
    }

    Ok(result.embeddings)
  }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
  model: &'a str,
  input: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
  embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
  fn name(&self) -> &str {
    "ollama"
  }

  fn model_id(&self) -> &str {
    &self.model
  }

  async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
    self
      .embed_single_batch(&[text])
      .await?
      .pop()
      .ok_or_else(|| EmbeddingError::ProviderError("empty embedding response".to_string()))
  }

  async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if texts.is_empty() {
      return Ok(Vec::new());
    }
    self.embed_sub_batches(texts).await
  }
}
