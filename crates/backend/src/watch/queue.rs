//! SyncQueue - pending canonical changes, partitioned by chunking mode
//!
//! Each mode has its own set of monitored roots and its own `path → event`
//! map (last write wins). One canonical filesystem event fans out to every
//! (mode, root) pair whose root contains the path. Creations and
//! modifications that the cheap mtime/size check says are no-ops are dropped
//! here, so the sync pass only sees real work.
//!
//! Consumers never hold the lock while working: [`SyncQueue::drain`] hands
//! out a snapshot and the pass reports back with `mark_synced` / `remove`.

use std::{
  collections::{BTreeMap, BTreeSet, VecDeque},
  path::{Path, PathBuf},
  sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, trace};

use crate::{
  domain::{
    event::{ChangeEvent, ChangeKind},
    mode::ChunkingMode,
    paths,
  },
  index::{detector::ChangeDetector, walker::TreeWalker},
};

/// Recorded events kept per mode for status reporting
pub const HISTORY_LIMIT: usize = 50;

#[derive(Debug, Default)]
struct ModeQueue {
  roots: BTreeSet<PathBuf>,
  pending: BTreeMap<PathBuf, ChangeEvent>,
  folder_counts: BTreeMap<PathBuf, u64>,
  history: VecDeque<ChangeEvent>,
  last_sync: Option<DateTime<Utc>>,
  synced_total: u64,
}

impl ModeQueue {
  fn enqueue(&mut self, event: ChangeEvent) {
    *self.folder_counts.entry(event.folder_root.clone()).or_default() += 1;
    if self.history.len() == HISTORY_LIMIT {
      self.history.pop_front();
    }
    self.history.push_back(event.clone());
    self.pending.insert(event.path.clone(), event);
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModeQueueStatus {
  pub pending: usize,
  pub roots: Vec<PathBuf>,
  pub folder_counts: BTreeMap<PathBuf, u64>,
  pub last_sync: Option<DateTime<Utc>>,
  pub synced_total: u64,
  /// Oldest first
  pub recent_events: Vec<ChangeEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStatus {
  pub needs_sync: bool,
  pub total_pending: usize,
  pub modes: BTreeMap<ChunkingMode, ModeQueueStatus>,
}

pub struct SyncQueue {
  detector: Arc<ChangeDetector>,
  modes: Mutex<BTreeMap<ChunkingMode, ModeQueue>>,
}

impl SyncQueue {
  pub fn new(detector: Arc<ChangeDetector>) -> Self {
    Self {
      detector,
      modes: Mutex::new(BTreeMap::new()),
    }
  }

  fn lock(&self) -> MutexGuard<'_, BTreeMap<ChunkingMode, ModeQueue>> {
    self.modes.lock().unwrap_or_else(PoisonError::into_inner)
  }

  // ==========================================================================
  // Monitored roots
  // ==========================================================================

  /// Monitor `root` for `mode`. Returns false if it already was.
  pub fn add_root(&self, mode: ChunkingMode, root: &Path) -> bool {
    let root = paths::normalize(root);
    let added = self.lock().entry(mode).or_default().roots.insert(root.clone());
    if added {
      info!(mode = %mode, root = %root.display(), "Monitoring folder");
    }
    added
  }

  /// Stop monitoring `root` for `mode` and drop its pending entries
  pub fn remove_root(&self, mode: ChunkingMode, root: &Path) -> bool {
    let root = paths::normalize(root);
    let mut modes = self.lock();
    let Some(queue) = modes.get_mut(&mode) else {
      return false;
    };
    if !queue.roots.remove(&root) {
      return false;
    }
    queue.pending.retain(|_, e| e.folder_root != root);
    queue.folder_counts.remove(&root);
    info!(mode = %mode, root = %root.display(), "Stopped monitoring folder");
    true
  }

  pub fn roots(&self, mode: ChunkingMode) -> Vec<PathBuf> {
    self
      .lock()
      .get(&mode)
      .map(|q| q.roots.iter().cloned().collect())
      .unwrap_or_default()
  }

  /// Union of monitored roots across modes
  pub fn all_roots(&self) -> BTreeSet<PathBuf> {
    self.lock().values().flat_map(|q| q.roots.iter().cloned()).collect()
  }

  /// Every (mode, root) pair whose root contains `path`
  pub fn matching_roots(&self, path: &Path) -> Vec<(ChunkingMode, PathBuf)> {
    let modes = self.lock();
    modes
      .iter()
      .flat_map(|(mode, q)| {
        q.roots
          .iter()
          .filter(|root| path.starts_with(root))
          .map(|root| (*mode, root.clone()))
      })
      .collect()
  }

  /// `path` relative to the deepest monitored root containing it
  pub fn relative_to_root(&self, path: &Path) -> Option<PathBuf> {
    self
      .matching_roots(path)
      .into_iter()
      .max_by_key(|(_, root)| root.components().count())
      .and_then(|(_, root)| path.strip_prefix(&root).ok().map(Path::to_path_buf))
  }

  // ==========================================================================
  // Events
  // ==========================================================================

  /// Route one canonical event to every matching (mode, root) pair.
  /// Returns the number of queue entries written.
  pub fn record_event(&self, path: &Path, kind: ChangeKind) -> usize {
    let path = paths::normalize(path);
    let matches = self.matching_roots(&path);
    if matches.is_empty() {
      trace!(path = %path.display(), "Event outside monitored roots");
      return 0;
    }

    // The stat happens outside the lock
    let mode_set: BTreeSet<ChunkingMode> = matches.iter().map(|(m, _)| *m).collect();
    let needs: BTreeMap<ChunkingMode, bool> = mode_set
      .into_iter()
      .map(|mode| {
        let needed = kind == ChangeKind::Deleted || self.detector.fast_needs_indexing(&path, mode);
        (mode, needed)
      })
      .collect();

    let mut written = 0;
    let mut modes = self.lock();
    for (mode, root) in matches {
      let queue = modes.entry(mode).or_default();
      if needs.get(&mode).copied().unwrap_or(true) {
        queue.enqueue(ChangeEvent::new(path.clone(), kind, mode, root));
        written += 1;
      } else if queue.pending.remove(&path).is_some() {
        trace!(path = %path.display(), mode = %mode, "Dropped no-op change");
      }
    }

    if written > 0 {
      debug!(path = %path.display(), kind = %kind, entries = written, "Queued change");
    }
    written
  }

  /// Enqueue an event for one known (mode, root) without the no-op check
  pub fn enqueue(&self, mode: ChunkingMode, root: &Path, path: &Path, kind: ChangeKind) {
    let event = ChangeEvent::new(paths::normalize(path), kind, mode, paths::normalize(root));
    self.lock().entry(mode).or_default().enqueue(event);
  }

  /// Snapshot of the pending events for `mode`, sorted by path
  pub fn drain(&self, mode: ChunkingMode) -> Vec<ChangeEvent> {
    self
      .lock()
      .get(&mode)
      .map(|q| q.pending.values().cloned().collect())
      .unwrap_or_default()
  }

  pub fn mark_synced(&self, paths: &[PathBuf], mode: ChunkingMode) -> usize {
    let mut modes = self.lock();
    let Some(queue) = modes.get_mut(&mode) else {
      return 0;
    };
    let removed = paths.iter().filter(|p| queue.pending.remove(*p).is_some()).count();
    queue.synced_total += removed as u64;
    queue.last_sync = Some(Utc::now());
    removed
  }

  /// Drop entries without counting them as synced
  pub fn remove(&self, paths: &[PathBuf], mode: ChunkingMode) -> usize {
    let mut modes = self.lock();
    let Some(queue) = modes.get_mut(&mode) else {
      return 0;
    };
    paths.iter().filter(|p| queue.pending.remove(*p).is_some()).count()
  }

  /// Drop every pending entry for `mode`; other modes are untouched
  pub fn clear(&self, mode: ChunkingMode) -> usize {
    let mut modes = self.lock();
    let Some(queue) = modes.get_mut(&mode) else {
      return 0;
    };
    let cleared = queue.pending.len();
    queue.pending.clear();
    cleared
  }

  pub fn len(&self, mode: ChunkingMode) -> usize {
    self.lock().get(&mode).map_or(0, |q| q.pending.len())
  }

  pub fn total_len(&self) -> usize {
    self.lock().values().map(|q| q.pending.len()).sum()
  }

  pub fn status(&self) -> QueueStatus {
    let modes = self.lock();
    let mut status = QueueStatus::default();
    for (mode, q) in modes.iter() {
      status.total_pending += q.pending.len();
      status.modes.insert(
        *mode,
        ModeQueueStatus {
          pending: q.pending.len(),
          roots: q.roots.iter().cloned().collect(),
          folder_counts: q.folder_counts.clone(),
          last_sync: q.last_sync,
          synced_total: q.synced_total,
          recent_events: q.history.iter().cloned().collect(),
        },
      );
    }
    status.needs_sync = status.total_pending > 0;
    status
  }

  // ==========================================================================
  // Forced rescan
  // ==========================================================================

  /// Compare one monitored root against the change detector and enqueue the
  /// differences. Blocking: walks the tree and stats every file.
  pub fn reconcile(&self, mode: ChunkingMode, root: &Path, walker: &TreeWalker) -> usize {
    let root = paths::normalize(root);
    let walked = walker.walk(&root);
    let live: BTreeSet<&Path> = walked.files.iter().map(|f| f.path.as_path()).collect();

    let mut changes: Vec<(PathBuf, ChangeKind)> = Vec::new();
    for file in &walked.files {
      if !self.detector.has_mode(&file.path, mode) {
        changes.push((file.path.clone(), ChangeKind::Created));
      } else if self.detector.fast_needs_indexing(&file.path, mode) {
        changes.push((file.path.clone(), ChangeKind::Modified));
      }
    }
    for recorded in self.detector.files_for_mode(mode) {
      if recorded.starts_with(&root) && !live.contains(recorded.as_path()) && !recorded.exists() {
        changes.push((recorded, ChangeKind::Deleted));
      }
    }

    let found = changes.len();
    let mut modes = self.lock();
    let queue = modes.entry(mode).or_default();
    for (path, kind) in changes {
      queue.enqueue(ChangeEvent::new(path, kind, mode, root.clone()));
    }
    info!(mode = %mode, root = %root.display(), changes = found, "Rescan complete");
    found
  }
}
