//! Run status and the single-flight run slot
//!
//! At most one indexing run (full, sync, repository) is active per engine.
//! [`RunControl::begin`] claims the slot atomically and hands back a
//! [`RunGuard`]; the slot is released when the guard is finished or dropped.
//!
//! Status is polled: callers read a snapshot through a short read lock, the
//! run writes progress through the guard, and `request_cancel` is the only
//! outside mutation.

use std::{
  collections::BTreeSet,
  path::{Path, PathBuf},
  sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::mode::ChunkingMode;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
  #[default]
  Idle,
  Scanning,
  Indexing,
  Completed,
  Cancelled,
  Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
  Local,
  Repository,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
  Full,
  Sync,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
  pub phase: RunPhase,
  pub message: String,
  pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStatus {
  pub is_indexing: bool,
  pub phase: RunPhase,
  /// Percent of `total_files` processed
  pub progress: f32,
  pub total_files: usize,
  pub processed_files: usize,
  pub current_file: Option<PathBuf>,
  pub message: String,
  pub mode: Option<ChunkingMode>,
  pub source_kind: Option<SourceKind>,
  pub run_kind: Option<RunKind>,
  pub cancel_requested: bool,
  /// Paths with at least one row written by the current run
  pub touched_paths: BTreeSet<PathBuf>,
  pub started_at: Option<DateTime<Utc>>,
  pub last_outcome: Option<RunOutcome>,
}

#[derive(Debug, thiserror::Error)]
#[error("An indexing run is already in progress: {0}")]
pub struct AlreadyRunning(pub String);

#[derive(Default)]
pub struct RunControl {
  status: RwLock<RunStatus>,
  /// Only locked while `status` is write-locked
  token: Mutex<Option<CancellationToken>>,
}

impl RunControl {
  pub fn new() -> Self {
    Self::default()
  }

  fn read(&self) -> RwLockReadGuard<'_, RunStatus> {
    self.status.read().unwrap_or_else(PoisonError::into_inner)
  }

  fn write(&self) -> RwLockWriteGuard<'_, RunStatus> {
    self.status.write().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn status(&self) -> RunStatus {
    self.read().clone()
  }

  pub fn is_running(&self) -> bool {
    self.read().is_indexing
  }

  /// Claim the run slot, or reject if a run is active
  pub fn begin(
    self: &Arc<Self>,
    mode: ChunkingMode,
    source: SourceKind,
    kind: RunKind,
  ) -> Result<RunGuard, AlreadyRunning> {
    let token = CancellationToken::new();
    {
      let mut status = self.write();
      if status.is_indexing {
        return Err(AlreadyRunning(status.message.clone()));
      }
      let last_outcome = status.last_outcome.take();
      *status = RunStatus {
        is_indexing: true,
        phase: RunPhase::Scanning,
        message: "Starting".to_string(),
        mode: Some(mode),
        source_kind: Some(source),
        run_kind: Some(kind),
        started_at: Some(Utc::now()),
        last_outcome,
        ..RunStatus::default()
      };
      *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
    }
    debug!(mode = %mode, source = ?source, kind = ?kind, "Run started");

    Ok(RunGuard {
      control: Arc::clone(self),
      token,
      finished: false,
    })
  }

  /// Ask the active run to stop after its current file. Returns false when
  /// nothing is running.
  pub fn request_cancel(&self) -> bool {
    {
      let mut status = self.write();
      if !status.is_indexing {
        return false;
      }
      status.cancel_requested = true;
      status.message = "Cancelling".to_string();
      if let Some(token) = self.token.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
        token.cancel();
      }
    }
    info!("Cancellation requested");
    true
  }

  fn release(&self, phase: RunPhase, message: String) {
    {
      let mut status = self.write();
      let outcome = RunOutcome {
        phase,
        message: message.clone(),
        finished_at: Utc::now(),
      };
      *status = RunStatus {
        message,
        last_outcome: Some(outcome),
        ..RunStatus::default()
      };
      *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
  }
}

/// Exclusive handle on the run slot
pub struct RunGuard {
  control: Arc<RunControl>,
  token: CancellationToken,
  finished: bool,
}

impl RunGuard {
  pub fn is_cancelled(&self) -> bool {
    self.token.is_cancelled()
  }

  pub fn set_phase(&self, phase: RunPhase, message: impl Into<String>) {
    let mut status = self.control.write();
    status.phase = phase;
    status.message = message.into();
  }

  pub fn set_total(&self, total: usize) {
    let mut status = self.control.write();
    status.total_files = total;
    status.processed_files = 0;
    status.progress = 0.0;
  }

  /// Record that `processed` files are done and `current` is next
  pub fn set_progress(&self, processed: usize, current: Option<&Path>) {
    let mut status = self.control.write();
    status.processed_files = processed;
    status.current_file = current.map(Path::to_path_buf);
    status.progress = if status.total_files == 0 {
      100.0
    } else {
      processed as f32 * 100.0 / status.total_files as f32
    };
    if !status.cancel_requested {
      status.message = format!("Processing {}/{}", processed, status.total_files);
    }
  }

  /// Mark `path` as written by this run; it joins the rollback set
  pub fn touch(&self, path: &Path) {
    let mut status = self.control.write();
    if !status.touched_paths.contains(path) {
      status.touched_paths.insert(path.to_path_buf());
    }
  }

  pub fn touched(&self) -> Vec<PathBuf> {
    self.control.read().touched_paths.iter().cloned().collect()
  }

  /// Release the slot, recording how the run ended
  pub fn finish(mut self, phase: RunPhase, message: impl Into<String>) {
    let message = message.into();
    match phase {
      RunPhase::Failed => warn!(message = %message, "Run failed"),
      _ => info!(phase = ?phase, message = %message, "Run finished"),
    }
    self.control.release(phase, message);
    self.finished = true;
  }
}

impl Drop for RunGuard {
  fn drop(&mut self) {
    if !self.finished {
      self.control.release(RunPhase::Failed, "Run aborted".to_string());
    }
  }
}
