//! CLI command implementations

mod admin;
mod index;
mod repo;
mod search;
mod watch;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use semdex::{Engine, RunPhase, RunReport, config::Config, dirs};
use tokio::task::JoinHandle;

use crate::format::format_report;

pub use admin::{cmd_clear, cmd_config_init, cmd_config_show, cmd_settings, cmd_status};
pub use index::{cmd_changes, cmd_index, cmd_sync};
pub use repo::cmd_repo;
pub use search::cmd_search;
pub use watch::cmd_watch;

/// Config for `folder` (or the current directory) and the engine over the
/// default data directory
async fn open_engine(folder: Option<&Path>) -> Result<Engine> {
  let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
  let config = Config::load_for_folder(folder.unwrap_or(&cwd));
  let data_dir = dirs::default_data_dir();
  Engine::open(config, &data_dir)
    .await
    .with_context(|| format!("Failed to open index at {}", data_dir.display()))
}

/// Wait for a spawned run, cancelling it (with rollback) on Ctrl-C
async fn await_run(engine: &Engine, mut handle: JoinHandle<RunReport>) -> Result<RunReport> {
  let report = tokio::select! {
    res = &mut handle => res.context("Run task failed")?,
    _ = tokio::signal::ctrl_c() => {
      eprintln!("Cancelling, rolling back this run's changes...");
      engine.cancel();
      handle.await.context("Run task failed")?
    }
  };
  Ok(report)
}

/// Print a report; failed runs become a non-zero exit
fn finish_report(report: &RunReport) -> Result<()> {
  print!("{}", format_report(report));
  if report.phase == RunPhase::Failed {
    bail!("{}", report.message);
  }
  Ok(())
}
