//! Index, sync and pending-change commands for local folders

use std::{collections::BTreeMap, path::PathBuf};

use anyhow::{Context, Result};
use semdex::{IndexRequest, mode::ChunkingMode};
use tracing::{debug, info};

use super::{await_run, finish_report, open_engine};
use crate::format::format_pending;

/// Index folders in one mode
pub async fn cmd_index(
  folders: Vec<PathBuf>,
  mode: ChunkingMode,
  excludes: Vec<String>,
  max_size_mb: Option<u64>,
) -> Result<()> {
  let engine = open_engine(folders.first().map(PathBuf::as_path)).await?;

  let mut request = IndexRequest::new(folders, mode);
  if !excludes.is_empty() {
    request = request.with_excludes(excludes);
  }
  if let Some(mb) = max_size_mb {
    request = request.with_max_size_mb(mb);
  }

  let handle = engine.start_index(request).context("Failed to start indexing")?;
  let report = await_run(&engine, handle).await?;
  finish_report(&report)
}

fn modes(mode: Option<ChunkingMode>) -> Vec<ChunkingMode> {
  mode.map(|m| vec![m]).unwrap_or_else(|| ChunkingMode::ALL.to_vec())
}

/// Rescan indexed folders and run a sync pass for each mode with changes
pub async fn cmd_sync(mode: Option<ChunkingMode>) -> Result<()> {
  let engine = open_engine(None).await?;
  let roots = engine.restore_roots();
  debug!(roots, "Restored monitored roots");

  let found = engine.force_check(mode).await.context("Failed to rescan folders")?;
  if found == 0 {
    println!("Everything is up to date");
    return Ok(());
  }
  info!(changes = found, "Found changes");

  for mode in modes(mode) {
    if engine.queue().len(mode) == 0 {
      continue;
    }
    println!("{}:", mode);
    let handle = engine.start_sync(mode).context("Failed to start sync")?;
    let report = await_run(&engine, handle).await?;
    finish_report(&report)?;
  }
  Ok(())
}

/// Show what a sync would do
pub async fn cmd_changes(mode: Option<ChunkingMode>, json: bool) -> Result<()> {
  let engine = open_engine(None).await?;
  engine.restore_roots();
  engine.force_check(mode).await.context("Failed to rescan folders")?;

  let pending: Vec<(ChunkingMode, Vec<_>)> = modes(mode)
    .into_iter()
    .map(|m| (m, engine.queue().drain(m)))
    .collect();

  if json {
    let map: BTreeMap<_, _> = pending.into_iter().collect();
    println!("{}", serde_json::to_string_pretty(&map)?);
  } else {
    print!("{}", format_pending(&pending));
  }
  Ok(())
}
