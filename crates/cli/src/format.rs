//! Human-readable output for command results.

use std::path::Path;

use semdex::{
  RunPhase, RunReport,
  event::ChangeEvent,
  index::manifest::{ManifestChanges, ManifestSummary},
  mode::ChunkingMode,
  store::QueryHit,
};

pub fn format_report(report: &RunReport) -> String {
  let mut out = String::new();
  let marker = match report.phase {
    RunPhase::Completed => "done",
    RunPhase::Cancelled => "cancelled",
    _ => "failed",
  };
  out.push_str(&format!("[{marker}] {} ({} ms)\n", report.message, report.elapsed_ms));
  for path in &report.failed_paths {
    out.push_str(&format!("  failed: {}\n", path.display()));
  }
  out
}

pub fn format_hits(hits: &[QueryHit]) -> String {
  if hits.is_empty() {
    return "No results\n".to_string();
  }

  let mut out = String::new();
  for (i, hit) in hits.iter().enumerate() {
    let source = match &hit.metadata.repo {
      Some(repo) => format!("{}@{}:{}", repo.repository, repo.branch, repo.file_path),
      None => hit.metadata.path.clone(),
    };
    out.push_str(&format!(
      "{}. {} (lines {}, score {:.3})\n",
      i + 1,
      source,
      hit.metadata.line_ranges,
      hit.score
    ));
    for line in hit.document.lines().take(4) {
      out.push_str(&format!("   {}\n", line));
    }
  }
  out
}

/// Pending events per mode, as drained from the sync queues
pub fn format_pending(pending: &[(ChunkingMode, Vec<ChangeEvent>)]) -> String {
  let total: usize = pending.iter().map(|(_, events)| events.len()).sum();
  if total == 0 {
    return "No pending changes\n".to_string();
  }

  let mut out = format!("{} pending changes\n", total);
  for (mode, events) in pending.iter().filter(|(_, events)| !events.is_empty()) {
    out.push_str(&format!("\n{} ({} pending)\n", mode, events.len()));
    for event in events {
      out.push_str(&format!(
        "  {:<8} {}\n",
        event.kind.as_str(),
        relative(&event.folder_root, &event.path)
      ));
    }
  }
  out
}

pub fn format_changes(changes: &ManifestChanges) -> String {
  if changes.is_empty() {
    return "Manifest is up to date\n".to_string();
  }
  let mut out = String::new();
  for (label, list) in [
    ("added", &changes.added),
    ("modified", &changes.modified),
    ("removed", &changes.removed),
  ] {
    for rel in list {
      out.push_str(&format!("  {:<8} {}\n", label, rel));
    }
  }
  out
}

pub fn format_manifests(summaries: &[ManifestSummary]) -> String {
  if summaries.is_empty() {
    return "No manifests\n".to_string();
  }
  let mut out = String::new();
  for s in summaries {
    let updated = s
      .last_updated
      .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
      .unwrap_or_else(|| "never".to_string());
    let commit = s.last_commit_sha.as_deref().map(short_sha).unwrap_or("-");
    out.push_str(&format!(
      "{}@{}  {} files  commit {}  updated {}\n",
      s.repo, s.branch, s.file_count, commit, updated
    ));
  }
  out
}

fn short_sha(sha: &str) -> &str {
  sha.get(..8).unwrap_or(sha)
}

fn relative(root: &Path, path: &Path) -> String {
  path
    .strip_prefix(root)
    .unwrap_or(path)
    .display()
    .to_string()
}
