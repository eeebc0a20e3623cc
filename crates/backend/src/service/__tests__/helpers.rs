//! Shared helpers for engine scenario tests.
//!
//! `EngineTestContext` owns a watched-folder temp dir and a data temp dir,
//! and wires an [`Engine`] to in-memory vector collections and a counting
//! fake embedder, so runs never touch the network.

use std::{
  path::{Path, PathBuf},
  sync::{
    Arc, Mutex, OnceLock,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use filetime::FileTime;
use tempfile::TempDir;

use crate::{
  domain::{config::Config, mode::ChunkingMode, paths},
  embedding::{EmbeddingError, EmbeddingProvider, Embedders},
  pipeline::extract::PlainTextExtractor,
  service::{engine::Engine, status::RunControl},
  store::{MetadataFilter, VectorStores},
};

type Hook = Box<dyn FnOnce() + Send>;

/// Deterministic embedder that counts calls and can request cancellation of
/// the active run after a given number of embeds.
pub struct FakeEmbedder {
  calls: AtomicUsize,
  batches: AtomicUsize,
  cancel_at: AtomicUsize,
  fail_marker: OnceLock<String>,
  control: OnceLock<Arc<RunControl>>,
  hook: Mutex<Option<(usize, Hook)>>,
}

impl FakeEmbedder {
  pub fn new() -> Self {
    Self {
      calls: AtomicUsize::new(0),
      batches: AtomicUsize::new(0),
      cancel_at: AtomicUsize::new(usize::MAX),
      fail_marker: OnceLock::new(),
      control: OnceLock::new(),
      hook: Mutex::new(None),
    }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  /// Number of `embed_batch` calls
  pub fn batches(&self) -> usize {
    self.batches.load(Ordering::SeqCst)
  }

  /// Request cancellation once `n` more embeds have completed
  pub fn cancel_after(&self, n: usize) {
    self.cancel_at.store(self.calls() + n, Ordering::SeqCst);
  }

  /// Run `hook` once `n` more embeds have completed, while the run is
  /// still in progress
  pub fn on_call(&self, n: usize, hook: impl FnOnce() + Send + 'static) {
    *self.hook.lock().unwrap() = Some((self.calls() + n, Box::new(hook)));
  }

  /// Fail every text containing `marker`
  pub fn fail_on(&self, marker: &str) {
    let _ = self.fail_marker.set(marker.to_string());
  }

  fn attach(&self, control: Arc<RunControl>) {
    let _ = self.control.set(control);
  }
}

/// Letter-frequency vector; identical texts embed identically
pub fn fake_vector(text: &str) -> Vec<f32> {
  let mut v = vec![0.0f32; 27];
  for c in text.chars().flat_map(char::to_lowercase) {
    match c {
      'a'..='z' => v[(c as u8 - b'a') as usize] += 1.0,
      _ => v[26] += 1.0,
    }
  }
  v
}

#[async_trait::async_trait]
impl EmbeddingProvider for FakeEmbedder {
  fn name(&self) -> &str {
    "fake"
  }

  fn model_id(&self) -> &str {
    "fake-letters"
  }

  async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
    if let Some(marker) = self.fail_marker.get()
      && text.contains(marker.as_str())
    {
      return Err(EmbeddingError::ProviderError(format!("refusing '{marker}'")));
    }

    let done = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
    let due = {
      let mut hook = self.hook.lock().unwrap();
      match hook.as_ref() {
        Some((at, _)) if done >= *at => hook.take().map(|(_, f)| f),
        _ => None,
      }
    };
    if let Some(hook) = due {
      hook();
    }
    if done >= self.cancel_at.load(Ordering::SeqCst)
      && let Some(control) = self.control.get()
    {
      control.request_cancel();
    }
    Ok(fake_vector(text))
  }

  async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    self.batches.fetch_add(1, Ordering::SeqCst);
    let mut out = Vec::with_capacity(texts.len());
    for text in texts {
      out.push(self.embed(text).await?);
    }
    Ok(out)
  }
}

pub struct EngineTestContext {
  /// Folder being indexed and watched
  pub folder: TempDir,
  /// Engine data directory
  pub data: TempDir,
  pub embedder: Arc<FakeEmbedder>,
  pub engine: Engine,
}

impl EngineTestContext {
  pub fn new() -> Self {
    let folder = TempDir::new().expect("create folder temp dir");
    let data = TempDir::new().expect("create data temp dir");
    let (engine, embedder) = open_engine(data.path());
    Self {
      folder,
      data,
      embedder,
      engine,
    }
  }

  /// Normalized root of the indexed folder
  pub fn root(&self) -> PathBuf {
    paths::normalize(self.folder.path())
  }

  /// Write a file relative to the folder, creating parents
  pub fn write(&self, relative: &str, content: &str) -> PathBuf {
    let path = self.root().join(relative);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).expect("create parent dir");
    }
    std::fs::write(&path, content).expect("write test file");
    path
  }

  /// Push a file's mtime forward so stat-only checks see it as changed
  pub fn touch_later(&self, path: &Path, secs: i64) {
    let meta = std::fs::metadata(path).expect("stat test file");
    let mtime = FileTime::from_last_modification_time(&meta);
    let shifted = FileTime::from_unix_time(mtime.unix_seconds() + secs, mtime.nanoseconds());
    filetime::set_file_mtime(path, shifted).expect("set mtime");
  }

  /// Row ids stored for a local path in `mode`
  pub async fn row_ids(&self, mode: ChunkingMode, path: &Path) -> Vec<String> {
    let mut ids: Vec<String> = self
      .engine
      .stores()
      .for_mode(mode)
      .get_by_metadata(&MetadataFilter::Path(paths::display_key(path)))
      .await
      .expect("query rows")
      .into_iter()
      .map(|c| c.id)
      .collect();
    ids.sort();
    ids
  }

  pub async fn row_count(&self, mode: ChunkingMode) -> usize {
    self.engine.stores().for_mode(mode).count().await.expect("count rows")
  }
}

/// Engine over `data_dir` with in-memory collections and a fresh fake embedder
pub fn open_engine(data_dir: &Path) -> (Engine, Arc<FakeEmbedder>) {
  let embedder = Arc::new(FakeEmbedder::new());
  let engine = Engine::with_components(
    test_config(),
    data_dir,
    Embedders::uniform(embedder.clone()),
    VectorStores::in_memory(),
    Arc::new(PlainTextExtractor),
  )
  .expect("open engine");
  embedder.attach(Arc::clone(engine.run_control()));
  (engine, embedder)
}

pub fn test_config() -> Config {
  let mut config = Config::default();
  config.watcher.debounce_ms = 100;
  config
}

/// Poll `check` every 50ms until it holds or `timeout` passes
pub async fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
  let deadline = tokio::time::Instant::now() + timeout;
  while tokio::time::Instant::now() < deadline {
    if check() {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
  }
  check()
}

/// A paragraph long enough to survive the minimum-length check
pub fn prose(topic: &str) -> String {
  format!(
    "This note is about {topic}.\nIt has a few lines of text.\nEach line mentions {topic} again.\n"
  )
}
