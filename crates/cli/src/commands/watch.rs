//! Watch command: monitor indexed folders and sync changes until Ctrl-C

use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::open_engine;

pub async fn cmd_watch() -> Result<()> {
  let engine = open_engine(None).await?;
  let monitored = engine.start_watching().context("Failed to start watcher")?;
  if monitored == 0 {
    warn!("No indexed folders to watch");
    println!("Nothing to watch yet. Index a folder first: semdex index <folder>");
    engine.stop_watching().await;
    return Ok(());
  }

  // Catch up with changes made while nothing was watching
  let offline = engine.force_check(None).await.context("Failed to rescan folders")?;
  info!(monitored, offline, "Watching");
  println!("Watching {} folders ({} changes since last run). Ctrl-C to stop.", monitored, offline);

  let cancel = CancellationToken::new();
  let interval = engine.config().watcher.auto_sync_secs;
  let sync_task = (interval > 0).then(|| {
    let engine = engine.clone();
    let cancel = cancel.clone();
    tokio::spawn(async move { engine.auto_sync_loop(Duration::from_secs(interval), cancel).await })
  });

  tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
  println!("Stopping...");

  cancel.cancel();
  engine.cancel();
  if let Some(task) = sync_task
    && let Err(e) = task.await
  {
    warn!(error = %e, "Auto sync task ended abnormally");
  }
  engine.stop_watching().await;

  let pending = engine.sync_status().total_pending;
  if pending > 0 {
    println!("{} changes left unsynced; they will be picked up by the next sync", pending);
  }
  Ok(())
}
