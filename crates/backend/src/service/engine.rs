//! Engine - the single owner of indexing state
//!
//! Holds the change detector, sync queue, folder watcher, folder settings,
//! branch manifests, vector collections and the run slot. Cheap to clone;
//! every clone shares the same state. Runs can be awaited in place
//! ([`Engine::index`]) or spawned ([`Engine::start_index`]) and observed
//! through [`Engine::status`].

use std::{
  collections::{BTreeMap, BTreeSet},
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
  orchestrator::{self, IndexRequest, RunReport},
  repo::{self, RepoIndexRequest},
  status::{AlreadyRunning, RunControl, RunKind, RunStatus, SourceKind},
};
use crate::{
  domain::{config::Config, mode::ChunkingMode, paths},
  embedding::{Embedders, EmbeddingError},
  index::{
    detector::{ChangeDetector, DetectorError, DetectorStats},
    filter::{ExcludePatterns, FilterError},
    manifest::{ManifestChanges, ManifestError, ManifestStore, ManifestSummary},
    settings::{FolderSettingsRecord, FolderSettingsStore, SettingsError},
    walker::TreeWalker,
  },
  pipeline::{
    FilePipeline, PipelineError,
    extract::{Extractor, PlainTextExtractor},
  },
  store::{MetadataFilter, QueryHit, StoreError, VectorStores},
  watch::{FolderWatcher, QueueStatus, SyncQueue, WatcherError, WatcherStatus},
};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  #[error(transparent)]
  Busy(#[from] AlreadyRunning),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("Change detector error: {0}")]
  Detector(#[from] DetectorError),

  #[error("Manifest error: {0}")]
  Manifest(#[from] ManifestError),

  #[error("Folder settings error: {0}")]
  Settings(#[from] SettingsError),

  #[error("Watcher error: {0}")]
  Watcher(#[from] WatcherError),

  #[error("Vector store error: {0}")]
  Store(#[from] StoreError),

  #[error("Embedding error: {0}")]
  Embedding(#[from] EmbeddingError),

  #[error("Pipeline error: {0}")]
  Pipeline(#[from] PipelineError),

  #[error(transparent)]
  Filter(#[from] FilterError),

  #[error("Folder does not exist: {0}")]
  MissingFolder(PathBuf),

  #[error("Background task failed: {0}")]
  Task(String),
}

/// Files and rows per mode, for `status`
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
  pub detector: DetectorStats,
  pub rows: BTreeMap<ChunkingMode, usize>,
}

pub(crate) struct EngineInner {
  pub(crate) config: Arc<Config>,
  pub(crate) data_dir: PathBuf,
  pub(crate) detector: Arc<ChangeDetector>,
  pub(crate) queue: Arc<SyncQueue>,
  pub(crate) watcher: FolderWatcher,
  pub(crate) settings: FolderSettingsStore,
  pub(crate) manifests: ManifestStore,
  pub(crate) pipeline: FilePipeline,
  pub(crate) run: Arc<RunControl>,
}

#[derive(Clone)]
pub struct Engine {
  inner: Arc<EngineInner>,
}

impl Engine {
  /// Open persisted state under `data_dir`, embedding with Ollama
  pub async fn open(config: Config, data_dir: impl Into<PathBuf>) -> Result<Self, EngineError> {
    let data_dir = data_dir.into();
    let embedders = Embedders::from_config(&config.embedding);
    let stores = VectorStores::open_lance(&data_dir.join("vectors"), config.embedding.dimensions).await?;
    Self::with_components(config, data_dir, embedders, stores, Arc::new(PlainTextExtractor))
  }

  /// Open persisted bookkeeping with caller-provided embedders, vector
  /// collections and extractor
  pub fn with_components(
    config: Config,
    data_dir: impl Into<PathBuf>,
    embedders: Embedders,
    stores: VectorStores,
    extractor: Arc<dyn Extractor>,
  ) -> Result<Self, EngineError> {
    let data_dir = data_dir.into();
    std::fs::create_dir_all(&data_dir)?;
    let config = Arc::new(config);

    let detector = Arc::new(ChangeDetector::open(data_dir.join("file_metadata.json")));
    let queue = Arc::new(SyncQueue::new(Arc::clone(&detector)));
    let watcher = FolderWatcher::new(Arc::clone(&queue), &config.watcher);
    let settings = FolderSettingsStore::open(data_dir.join("folder_settings.json"), config.index.max_file_size_mb);
    let manifests = ManifestStore::new(data_dir.join("manifests"));
    let pipeline = FilePipeline::new(extractor, embedders, stores, Arc::clone(&config));

    info!(data_dir = %data_dir.display(), files = detector.len(), "Engine opened");

    Ok(Self {
      inner: Arc::new(EngineInner {
        config,
        data_dir,
        detector,
        queue,
        watcher,
        settings,
        manifests,
        pipeline,
        run: Arc::new(RunControl::new()),
      }),
    })
  }

  pub fn config(&self) -> &Config {
    &self.inner.config
  }

  pub fn data_dir(&self) -> &Path {
    &self.inner.data_dir
  }

  pub fn run_control(&self) -> &Arc<RunControl> {
    &self.inner.run
  }

  pub fn detector(&self) -> &ChangeDetector {
    &self.inner.detector
  }

  pub fn queue(&self) -> &SyncQueue {
    &self.inner.queue
  }

  pub fn stores(&self) -> &VectorStores {
    self.inner.pipeline.stores()
  }

  // ==========================================================================
  // Runs
  // ==========================================================================

  /// Full index of local folders, awaited in place
  pub async fn index(&self, request: IndexRequest) -> Result<RunReport, EngineError> {
    let guard = self.inner.run.begin(request.mode, SourceKind::Local, RunKind::Full)?;
    Ok(orchestrator::run_full_index(&self.inner, guard, request).await)
  }

  /// Full index in a background task. Rejected immediately when a run is active.
  pub fn start_index(&self, request: IndexRequest) -> Result<JoinHandle<RunReport>, EngineError> {
    let guard = self.inner.run.begin(request.mode, SourceKind::Local, RunKind::Full)?;
    let inner = Arc::clone(&self.inner);
    Ok(tokio::spawn(async move {
      orchestrator::run_full_index(&inner, guard, request).await
    }))
  }

  /// Drain and process the sync queue of one mode
  pub async fn sync(&self, mode: ChunkingMode) -> Result<RunReport, EngineError> {
    let guard = self.inner.run.begin(mode, SourceKind::Local, RunKind::Sync)?;
    Ok(orchestrator::run_sync(&self.inner, guard, mode).await)
  }

  pub fn start_sync(&self, mode: ChunkingMode) -> Result<JoinHandle<RunReport>, EngineError> {
    let guard = self.inner.run.begin(mode, SourceKind::Local, RunKind::Sync)?;
    let inner = Arc::clone(&self.inner);
    Ok(tokio::spawn(async move { orchestrator::run_sync(&inner, guard, mode).await }))
  }

  /// Full index of a repository checkout
  pub async fn repo_index(&self, request: RepoIndexRequest) -> Result<RunReport, EngineError> {
    let guard = self.inner.run.begin(request.mode, SourceKind::Repository, RunKind::Full)?;
    Ok(repo::run_repo_index(&self.inner, guard, request).await)
  }

  pub fn start_repo_index(&self, request: RepoIndexRequest) -> Result<JoinHandle<RunReport>, EngineError> {
    let guard = self.inner.run.begin(request.mode, SourceKind::Repository, RunKind::Full)?;
    let inner = Arc::clone(&self.inner);
    Ok(tokio::spawn(async move { repo::run_repo_index(&inner, guard, request).await }))
  }

  /// Reindex what changed in a repository checkout since its manifest
  pub async fn repo_sync(&self, request: RepoIndexRequest) -> Result<RunReport, EngineError> {
    let guard = self.inner.run.begin(request.mode, SourceKind::Repository, RunKind::Sync)?;
    Ok(repo::run_repo_sync(&self.inner, guard, request).await)
  }

  /// Ask the active run to stop; false when idle
  pub fn cancel(&self) -> bool {
    self.inner.run.request_cancel()
  }

  pub fn status(&self) -> RunStatus {
    self.inner.run.status()
  }

  pub fn sync_status(&self) -> QueueStatus {
    self.inner.queue.status()
  }

  // ==========================================================================
  // Watching
  // ==========================================================================

  /// Register every previously indexed folder as a monitored root without
  /// starting the watcher. Returns the number of newly monitored
  /// (mode, root) pairs.
  pub fn restore_roots(&self) -> usize {
    let mut monitored = 0;
    for record in self.inner.settings.list().into_values() {
      for folder in record.folders.iter().filter(|f| f.is_dir()) {
        if self.inner.queue.add_root(record.mode, folder) {
          monitored += 1;
        }
      }
    }

    // Folders indexed before settings were recorded
    for (folder, modes) in topmost(self.inner.detector.indexed_folders()) {
      if !folder.is_dir() || self.inner.queue.all_roots().iter().any(|r| folder.starts_with(r)) {
        continue;
      }
      for mode in modes {
        if self.inner.queue.add_root(mode, &folder) {
          monitored += 1;
        }
      }
    }
    monitored
  }

  /// Monitor every previously indexed folder and start the watcher
  pub fn start_watching(&self) -> Result<usize, EngineError> {
    let monitored = self.restore_roots();
    self.inner.watcher.start()?;
    info!(monitored, "Watching indexed folders");
    Ok(monitored)
  }

  pub async fn stop_watching(&self) {
    self.inner.watcher.stop().await;
  }

  pub fn watcher_status(&self) -> WatcherStatus {
    self.inner.watcher.status()
  }

  pub fn add_folder(&self, mode: ChunkingMode, folder: &Path) -> Result<PathBuf, EngineError> {
    Ok(self.inner.watcher.add_folder(mode, folder)?)
  }

  pub fn remove_folder(&self, mode: ChunkingMode, folder: &Path) -> bool {
    self.inner.watcher.remove_folder(mode, folder)
  }

  /// Rescan monitored roots (one mode or all) against the change detector
  /// and enqueue what the watcher missed. Returns the number of changes found.
  pub async fn force_check(&self, mode: Option<ChunkingMode>) -> Result<usize, EngineError> {
    let modes: Vec<ChunkingMode> = match mode {
      Some(mode) => vec![mode],
      None => ChunkingMode::ALL.to_vec(),
    };

    let mut found = 0;
    for mode in modes {
      for root in self.inner.queue.roots(mode) {
        let walker = self.walker_for_root(&root)?;
        let queue = Arc::clone(&self.inner.queue);
        found += tokio::task::spawn_blocking(move || queue.reconcile(mode, &root, &walker))
          .await
          .map_err(|e| EngineError::Task(e.to_string()))?;
      }
    }
    Ok(found)
  }

  fn walker_for_root(&self, root: &Path) -> Result<TreeWalker, EngineError> {
    let (excludes, max_size_mb) = match self.inner.settings.settings_for_root(root) {
      Some(record) => (record.excludes, record.max_size_mb),
      None => (
        self.inner.config.index.exclude_patterns.clone(),
        self.inner.config.index.max_file_size_mb,
      ),
    };
    Ok(
      TreeWalker::new()
        .with_excludes(ExcludePatterns::new(&excludes)?)
        .with_max_file_size(max_size_mb.saturating_mul(1024 * 1024)),
    )
  }

  /// Run a sync pass for every mode with pending changes every `interval`
  /// until `cancel` fires. Ticks that find a run active are skipped.
  pub async fn auto_sync_loop(&self, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
      tokio::select! {
        _ = cancel.cancelled() => break,
        _ = ticker.tick() => {}
      }

      for mode in ChunkingMode::ALL {
        if self.inner.queue.len(mode) == 0 {
          continue;
        }
        match self.sync(mode).await {
          Ok(report) => info!(mode = %mode, message = %report.message, "Auto sync"),
          Err(EngineError::Busy(_)) => debug!(mode = %mode, "Run active, auto sync deferred"),
          Err(e) => warn!(mode = %mode, error = %e, "Auto sync failed"),
        }
      }
    }
    debug!("Auto sync stopped");
  }

  // ==========================================================================
  // Repository manifests
  // ==========================================================================

  /// What a resync of this checkout would do, without doing it
  pub async fn detect_repo_changes(&self, request: &RepoIndexRequest) -> Result<ManifestChanges, EngineError> {
    let root = paths::normalize(&request.root);
    if !root.is_dir() {
      return Err(EngineError::MissingFolder(root));
    }
    let walker = repo::repo_walker(&self.inner, request)?;
    let manifests = self.inner.manifests.clone();
    let (repository, branch) = (request.repository.clone(), request.branch.clone());
    let changes = tokio::task::spawn_blocking(move || manifests.detect_changes(&repository, &branch, &root, &walker))
      .await
      .map_err(|e| EngineError::Task(e.to_string()))??;
    Ok(changes)
  }

  pub fn list_manifests(&self, repository: Option<&str>) -> Result<Vec<ManifestSummary>, EngineError> {
    Ok(self.inner.manifests.list(repository)?)
  }

  pub fn manifest_summary(&self, repository: &str, branch: &str) -> Result<ManifestSummary, EngineError> {
    Ok(self.inner.manifests.summary(repository, branch)?)
  }

  /// Reset a branch manifest so the next resync reindexes every file
  pub fn clear_manifest(&self, repository: &str, branch: &str) -> Result<(), EngineError> {
    Ok(self.inner.manifests.clear(repository, branch)?)
  }

  /// Delete a repository's manifests and, per mode, its rows on those branches
  pub async fn forget_repo(&self, repository: &str) -> Result<usize, EngineError> {
    let branches: Vec<String> = self
      .inner
      .manifests
      .list(Some(repository))?
      .into_iter()
      .map(|s| s.branch)
      .collect();

    for mode in ChunkingMode::ALL {
      let store = self.inner.pipeline.stores().for_mode(mode);
      for branch in &branches {
        let filter = MetadataFilter::Repo {
          repository: repository.to_string(),
          branch: branch.clone(),
        };
        let ids: Vec<String> = store.get_by_metadata(&filter).await?.into_iter().map(|c| c.id).collect();
        let removed = store.delete(&ids).await?;
        debug!(repo = repository, branch = %branch, mode = %mode, removed, "Deleted repository rows");
      }
    }
    self.inner.pipeline.stores().flush_all().await?;
    Ok(self.inner.manifests.delete_repo(repository)?)
  }

  // ==========================================================================
  // Queries and maintenance
  // ==========================================================================

  /// Nearest chunks to `query` in one mode, optionally under `folder`
  pub async fn search(
    &self,
    query: &str,
    mode: ChunkingMode,
    limit: usize,
    folder: Option<&Path>,
  ) -> Result<Vec<QueryHit>, EngineError> {
    let vector = self.inner.pipeline.embedders().for_mode(mode).embed(query).await?;
    let filter = folder.map(|f| MetadataFilter::PathPrefix(paths::display_key(&paths::normalize(f))));
    let hits = self
      .inner
      .pipeline
      .stores()
      .for_mode(mode)
      .query(&vector, filter.as_ref(), limit)
      .await?;
    Ok(hits)
  }

  /// Remove a folder's rows and records, for one mode or all.
  /// Returns (rows removed, records removed).
  pub async fn clear_folder(&self, folder: &Path, mode: Option<ChunkingMode>) -> Result<(usize, usize), EngineError> {
    if self.inner.run.is_running() {
      return Err(AlreadyRunning(self.inner.run.status().message).into());
    }
    let folder = paths::normalize(folder);
    let modes: Vec<ChunkingMode> = mode.map(|m| vec![m]).unwrap_or_else(|| ChunkingMode::ALL.to_vec());

    let mut rows = 0;
    for mode in &modes {
      let store = self.inner.pipeline.stores().for_mode(*mode);
      let filter = MetadataFilter::PathPrefix(paths::display_key(&folder));
      let ids: Vec<String> = store
        .get_by_metadata(&filter)
        .await?
        .into_iter()
        .filter(|c| c.metadata.repo.is_none())
        .map(|c| c.id)
        .collect();
      rows += store.delete(&ids).await?;
      self.inner.watcher.remove_folder(*mode, &folder);
    }
    self.inner.pipeline.stores().flush_all().await?;
    let records = self.inner.detector.clear_folder(&folder, mode)?;

    info!(folder = %folder.display(), rows, records, "Cleared folder");
    Ok((rows, records))
  }

  /// Drop every row, record, manifest and saved setting
  pub async fn delete_all_data(&self) -> Result<(), EngineError> {
    if self.inner.run.is_running() {
      return Err(AlreadyRunning(self.inner.run.status().message).into());
    }
    for mode in ChunkingMode::ALL {
      self.inner.pipeline.stores().for_mode(mode).clear().await?;
      for root in self.inner.queue.roots(mode) {
        self.inner.watcher.remove_folder(mode, &root);
      }
    }
    self.inner.pipeline.stores().flush_all().await?;
    self.inner.detector.clear_all()?;
    for summary in self.inner.manifests.list(None)? {
      self.inner.manifests.delete_repo(&summary.repo)?;
    }
    for key in self.inner.settings.list().into_keys() {
      self.inner.settings.delete(&key)?;
    }
    warn!("Deleted all index data");
    Ok(())
  }

  /// Drop records of files that no longer exist
  pub fn cleanup_orphaned(&self) -> Result<usize, EngineError> {
    Ok(self.inner.detector.cleanup_orphaned()?)
  }

  pub async fn stats(&self) -> Result<EngineStats, EngineError> {
    let mut rows = BTreeMap::new();
    for mode in ChunkingMode::ALL {
      rows.insert(mode, self.inner.pipeline.stores().for_mode(mode).count().await?);
    }
    Ok(EngineStats {
      detector: self.inner.detector.stats(),
      rows,
    })
  }

  pub fn indexed_folders(&self) -> BTreeMap<PathBuf, BTreeSet<ChunkingMode>> {
    self.inner.detector.indexed_folders()
  }

  pub fn folder_settings(&self) -> BTreeMap<String, FolderSettingsRecord> {
    self.inner.settings.list()
  }

  pub fn forget_folder_settings(&self, key: &str) -> Result<bool, EngineError> {
    Ok(self.inner.settings.delete(key)?)
  }
}

/// Keep only folders that are not nested inside another listed folder
fn topmost(
  folders: BTreeMap<PathBuf, BTreeSet<ChunkingMode>>,
) -> Vec<(PathBuf, BTreeSet<ChunkingMode>)> {
  let mut out: Vec<(PathBuf, BTreeSet<ChunkingMode>)> = Vec::new();
  for (folder, modes) in folders {
    match out.iter_mut().find(|(top, _)| folder.starts_with(top)) {
      Some((_, top_modes)) => top_modes.extend(modes),
      None => out.push((folder, modes)),
    }
  }
  out
}
