//! FolderWatcher - OS notifications for monitored roots
//!
//! notify's callback runs on its own thread and only forwards into an
//! unbounded channel, so it never blocks. A tokio task owns the
//! [`EventCoalescer`] and sleeps until the earliest debounce deadline (or
//! forever when nothing is buffered). Fired events go to the [`SyncQueue`].
//!
//! Watched roots are refcounted by the queue: a root stays watched while any
//! mode still monitors it.

use std::{
  collections::{BTreeMap, BTreeSet},
  path::{Path, PathBuf},
  sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicUsize, Ordering},
  },
  time::{Duration, Instant},
};

use notify::{
  Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
  event::{ModifyKind, RenameMode},
};
use serde::Serialize;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{coalescer::EventCoalescer, queue::SyncQueue};
use crate::{
  domain::{config::WatcherConfig, event::ChangeKind, mode::ChunkingMode, paths},
  index::filter,
};

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
  #[error("Failed to initialize watcher: {0}")]
  Init(#[source] notify::Error),

  #[error("Failed to watch {path}: {source}")]
  Watch {
    path: PathBuf,
    #[source]
    source: notify::Error,
  },

  #[error("Folder does not exist: {0}")]
  MissingRoot(PathBuf),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WatcherStatus {
  pub running: bool,
  pub watched_roots: Vec<PathBuf>,
  pub monitored: BTreeMap<ChunkingMode, Vec<PathBuf>>,
  /// Paths with buffered events whose debounce window is still open
  pub pending_debounce: usize,
}

struct Running {
  watcher: RecommendedWatcher,
  watched: BTreeSet<PathBuf>,
  cancel: CancellationToken,
  task: JoinHandle<()>,
}

pub struct FolderWatcher {
  queue: Arc<SyncQueue>,
  debounce: Duration,
  recreate_as_modified: bool,
  running: Mutex<Option<Running>>,
  pending_debounce: Arc<AtomicUsize>,
}

impl FolderWatcher {
  pub fn new(queue: Arc<SyncQueue>, config: &WatcherConfig) -> Self {
    Self {
      queue,
      debounce: Duration::from_millis(config.debounce_ms),
      recreate_as_modified: config.recreate_as_modified,
      running: Mutex::new(None),
      pending_debounce: Arc::new(AtomicUsize::new(0)),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Option<Running>> {
    self.running.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn queue(&self) -> &Arc<SyncQueue> {
    &self.queue
  }

  pub fn is_running(&self) -> bool {
    self.lock().is_some()
  }

  /// Start watching every monitored root. Must be called inside a tokio
  /// runtime. Starting a running watcher is a no-op.
  pub fn start(&self) -> Result<(), WatcherError> {
    let mut running = self.lock();
    if running.is_some() {
      return Ok(());
    }

    let (event_tx, event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher = RecommendedWatcher::new(
      move |res| {
        // Receiver gone means the task stopped; nothing to do
        let _ = event_tx.send(res);
      },
      Config::default(),
    )
    .map_err(WatcherError::Init)?;

    let mut watched = BTreeSet::new();
    for root in self.queue.all_roots() {
      if !root.is_dir() {
        warn!(root = %root.display(), "Monitored folder is missing, not watching");
        continue;
      }
      watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|source| WatcherError::Watch {
          path: root.clone(),
          source,
        })?;
      watched.insert(root);
    }

    let cancel = CancellationToken::new();
    let task = tokio::spawn(run_loop(
      event_rx,
      Arc::clone(&self.queue),
      EventCoalescer::new(self.debounce, self.recreate_as_modified),
      cancel.clone(),
      Arc::clone(&self.pending_debounce),
    ));

    info!(roots = watched.len(), debounce_ms = self.debounce.as_millis(), "File watcher started");
    *running = Some(Running {
      watcher,
      watched,
      cancel,
      task,
    });
    Ok(())
  }

  /// Stop watching. Buffered events are flushed into the queue first.
  pub async fn stop(&self) {
    let Some(running) = self.lock().take() else {
      return;
    };
    running.cancel.cancel();
    drop(running.watcher);
    if let Err(e) = running.task.await {
      warn!(error = %e, "Watcher task ended abnormally");
    }
    self.pending_debounce.store(0, Ordering::Relaxed);
    info!("File watcher stopped");
  }

  /// Monitor `root` for `mode`, watching it right away if running.
  /// Returns the normalized root.
  pub fn add_folder(&self, mode: ChunkingMode, root: &Path) -> Result<PathBuf, WatcherError> {
    if !root.is_dir() {
      return Err(WatcherError::MissingRoot(root.to_path_buf()));
    }
    let root = paths::normalize(root);
    self.queue.add_root(mode, &root);

    let mut running = self.lock();
    if let Some(running) = running.as_mut()
      && !running.watched.contains(&root)
    {
      running
        .watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|source| WatcherError::Watch {
          path: root.clone(),
          source,
        })?;
      running.watched.insert(root.clone());
      debug!(root = %root.display(), "Watching folder");
    }
    Ok(root)
  }

  /// Stop monitoring `root` for `mode`; unwatch it once no mode uses it
  pub fn remove_folder(&self, mode: ChunkingMode, root: &Path) -> bool {
    let root = paths::normalize(root);
    let removed = self.queue.remove_root(mode, &root);
    if !removed || self.queue.all_roots().contains(&root) {
      return removed;
    }

    let mut running = self.lock();
    if let Some(running) = running.as_mut()
      && running.watched.remove(&root)
      && let Err(e) = running.watcher.unwatch(&root)
    {
      debug!(root = %root.display(), error = %e, "Unwatch failed");
    }
    removed
  }

  pub fn status(&self) -> WatcherStatus {
    let (running, watched_roots) = match self.lock().as_ref() {
      Some(r) => (true, r.watched.iter().cloned().collect()),
      None => (false, Vec::new()),
    };
    let monitored = ChunkingMode::ALL
      .into_iter()
      .map(|mode| (mode, self.queue.roots(mode)))
      .filter(|(_, roots)| !roots.is_empty())
      .collect();
    WatcherStatus {
      running,
      watched_roots,
      monitored,
      pending_debounce: self.pending_debounce.load(Ordering::Relaxed),
    }
  }
}

// ============================================================================
// Event loop
// ============================================================================

async fn run_loop(
  mut event_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
  queue: Arc<SyncQueue>,
  mut coalescer: EventCoalescer,
  cancel: CancellationToken,
  pending_debounce: Arc<AtomicUsize>,
) {
  debug!("Watcher task started");

  loop {
    let deadline = coalescer.next_deadline();

    tokio::select! {
      biased;

      _ = cancel.cancelled() => break,

      event = event_rx.recv() => match event {
        Some(Ok(event)) => {
          let now = Instant::now();
          for (path, kind) in map_event(&event, |p| p.exists(), |p| p.is_dir()) {
            if is_ignored(&queue, &path) {
              trace!(path = %path.display(), "Ignoring event");
              continue;
            }
            coalescer.push(path, kind, now);
          }
        }
        Some(Err(e)) => warn!(error = %e, "Watcher error"),
        None => break,
      },

      _ = sleep_until(deadline) => {
        for (path, kind) in coalescer.take_ready(Instant::now(), |p| p.exists()) {
          queue.record_event(&path, kind);
        }
      }
    }

    pending_debounce.store(coalescer.len(), Ordering::Relaxed);
  }

  if !coalescer.is_empty() {
    debug!(pending = coalescer.len(), "Flushing buffered events on shutdown");
    for (path, kind) in coalescer.take_all(|p| p.exists()) {
      queue.record_event(&path, kind);
    }
  }
  debug!("Watcher task stopped");
}

async fn sleep_until(deadline: Option<Instant>) {
  match deadline {
    Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
    None => std::future::pending().await,
  }
}

/// Paths outside every root, or hidden/transient relative to their root
fn is_ignored(queue: &SyncQueue, path: &Path) -> bool {
  queue
    .relative_to_root(path)
    .is_none_or(|relative| filter::is_watch_ignored(&relative))
}

/// Translate one notify event into raw per-path changes. A rename with both
/// ends known becomes a delete of the source and a create of the target.
fn map_event(
  event: &Event,
  exists: impl Fn(&Path) -> bool,
  is_dir: impl Fn(&Path) -> bool,
) -> Vec<(PathBuf, ChangeKind)> {
  let mut out = Vec::new();

  if let EventKind::Modify(ModifyKind::Name(RenameMode::Both)) = event.kind
    && let [from, to, ..] = event.paths.as_slice()
  {
    out.push((paths::normalize(from), ChangeKind::Deleted));
    if !is_dir(to) {
      out.push((paths::normalize(to), ChangeKind::Created));
    }
    return out;
  }

  for path in &event.paths {
    let kind = match event.kind {
      EventKind::Create(_) => ChangeKind::Created,
      EventKind::Remove(_) => ChangeKind::Deleted,
      EventKind::Modify(ModifyKind::Name(RenameMode::From)) => ChangeKind::Deleted,
      EventKind::Modify(ModifyKind::Name(RenameMode::To)) => ChangeKind::Created,
      EventKind::Modify(ModifyKind::Name(_)) => {
        if exists(path) {
          ChangeKind::Created
        } else {
          ChangeKind::Deleted
        }
      }
      EventKind::Modify(_) => {
        if exists(path) {
          ChangeKind::Modified
        } else {
          ChangeKind::Deleted
        }
      }
      EventKind::Access(_) | EventKind::Any | EventKind::Other => continue,
    };
    if kind != ChangeKind::Deleted && is_dir(path) {
      continue;
    }
    out.push((paths::normalize(path), kind));
  }
  out
}
