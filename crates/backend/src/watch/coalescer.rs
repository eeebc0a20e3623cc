//! EventCoalescer - per-path debouncing of raw filesystem events
//!
//! Every path with buffered events has exactly one deadline in a single
//! ordered queue. A new event for the path pushes its deadline back by the
//! full window. When a deadline passes, all buffered kinds for the path are
//! reduced to one canonical [`ChangeKind`] with [`canonicalize`].
//!
//! The coalescer is clock-agnostic: callers pass `now` in, which keeps the
//! debounce behavior testable without sleeping.

use std::{
  collections::{BTreeSet, HashMap},
  path::{Path, PathBuf},
  time::{Duration, Instant},
};

use tracing::trace;

use crate::domain::event::ChangeKind;

/// Reduce the kinds buffered during one debounce window to one event.
///
/// A delete followed by the file existing at fire time is an atomic save
/// (write temp, delete, rename) and comes out as `Modified` when
/// `recreate_as_modified` is set. Otherwise deletes win over creates, which
/// win over modifications.
pub fn canonicalize(kinds: &[ChangeKind], exists: bool, recreate_as_modified: bool) -> Option<ChangeKind> {
  let last = *kinds.last()?;
  let has = |k: ChangeKind| kinds.contains(&k);

  let kind = if has(ChangeKind::Deleted) && exists && recreate_as_modified {
    ChangeKind::Modified
  } else if has(ChangeKind::Deleted) && !exists {
    ChangeKind::Deleted
  } else if has(ChangeKind::Created) {
    ChangeKind::Created
  } else if has(ChangeKind::Modified) {
    ChangeKind::Modified
  } else {
    last
  };
  Some(kind)
}

struct Pending {
  kinds: Vec<ChangeKind>,
  deadline: Instant,
  seq: u64,
}

pub struct EventCoalescer {
  window: Duration,
  recreate_as_modified: bool,
  pending: HashMap<PathBuf, Pending>,
  /// (deadline, insertion sequence, path), one entry per pending path
  deadlines: BTreeSet<(Instant, u64, PathBuf)>,
  seq: u64,
}

impl EventCoalescer {
  pub fn new(window: Duration, recreate_as_modified: bool) -> Self {
    Self {
      window,
      recreate_as_modified,
      pending: HashMap::new(),
      deadlines: BTreeSet::new(),
      seq: 0,
    }
  }

  pub fn window(&self) -> Duration {
    self.window
  }

  /// Buffer one raw event and (re)arm the path's deadline
  pub fn push(&mut self, path: PathBuf, kind: ChangeKind, now: Instant) {
    self.seq += 1;
    let deadline = now + self.window;

    match self.pending.get_mut(&path) {
      Some(entry) => {
        self.deadlines.remove(&(entry.deadline, entry.seq, path.clone()));
        entry.kinds.push(kind);
        entry.deadline = deadline;
        entry.seq = self.seq;
        trace!(path = %path.display(), kind = %kind, buffered = entry.kinds.len(), "Debounce timer reset");
      }
      None => {
        self.pending.insert(
          path.clone(),
          Pending {
            kinds: vec![kind],
            deadline,
            seq: self.seq,
          },
        );
      }
    }
    self.deadlines.insert((deadline, self.seq, path));
  }

  /// Earliest deadline, if anything is buffered
  pub fn next_deadline(&self) -> Option<Instant> {
    self.deadlines.first().map(|(deadline, _, _)| *deadline)
  }

  /// Pop every path whose window has expired, in deadline order, with its
  /// canonical kind. `exists` is consulted once per path at fire time.
  pub fn take_ready(&mut self, now: Instant, exists: impl Fn(&Path) -> bool) -> Vec<(PathBuf, ChangeKind)> {
    let mut ready = Vec::new();
    while let Some((deadline, _, _)) = self.deadlines.first() {
      if *deadline > now {
        break;
      }
      let Some((_, _, path)) = self.deadlines.pop_first() else {
        break;
      };
      if let Some(entry) = self.pending.remove(&path)
        && let Some(kind) = canonicalize(&entry.kinds, exists(&path), self.recreate_as_modified)
      {
        ready.push((path, kind));
      }
    }
    ready
  }

  /// Fire everything regardless of deadlines (shutdown)
  pub fn take_all(&mut self, exists: impl Fn(&Path) -> bool) -> Vec<(PathBuf, ChangeKind)> {
    self.deadlines.clear();
    let mut all: Vec<(PathBuf, ChangeKind)> = self
      .pending
      .drain()
      .filter_map(|(path, entry)| {
        let kind = canonicalize(&entry.kinds, exists(&path), self.recreate_as_modified)?;
        Some((path, kind))
      })
      .collect();
    all.sort_by(|a, b| a.0.cmp(&b.0));
    all
  }

  pub fn len(&self) -> usize {
    self.pending.len()
  }

  pub fn is_empty(&self) -> bool {
    self.pending.is_empty()
  }
}
