//! Status, cleanup, folder settings and configuration commands

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use semdex::{config::Config, mode::ChunkingMode};
use tracing::error;

use super::open_engine;

/// Show index statistics and indexed folders
pub async fn cmd_status(json: bool) -> Result<()> {
  let engine = open_engine(None).await?;
  let stats = engine.stats().await.context("Failed to read index statistics")?;
  let folders = engine.indexed_folders();

  if json {
    let value = serde_json::json!({
      "data_dir": engine.data_dir(),
      "stats": stats,
      "settings": engine.folder_settings(),
    });
    println!("{}", serde_json::to_string_pretty(&value)?);
    return Ok(());
  }

  println!("Data directory: {}", engine.data_dir().display());
  println!("Tracked files:  {}", stats.detector.total_files);
  for mode in ChunkingMode::ALL {
    let files = stats.detector.modes.get(&mode).map_or(0, |m| m.files);
    let rows = stats.rows.get(&mode).copied().unwrap_or(0);
    println!("  {:<9} {} files, {} chunks", mode.as_str(), files, rows);
  }

  let settings = engine.folder_settings();
  if !settings.is_empty() {
    println!();
    println!("Indexed folder sets:");
    for record in settings.values() {
      println!(
        "  {} [{}] since {}",
        record.display_name,
        record.mode,
        record.created_at.format("%Y-%m-%d %H:%M")
      );
    }
  }
  if settings.is_empty() && !folders.is_empty() {
    println!();
    println!("Folders with indexed files: {}", folders.len());
  }
  Ok(())
}

/// Remove one folder (all or one mode), or every piece of index data
pub async fn cmd_clear(folder: Option<&Path>, mode: Option<ChunkingMode>, all: bool) -> Result<()> {
  let engine = open_engine(folder).await?;

  if all {
    engine.delete_all_data().await.context("Failed to delete index data")?;
    println!("Deleted all index data");
    return Ok(());
  }

  let Some(folder) = folder else {
    bail!("Specify a folder to clear, or --all");
  };
  let (rows, records) = engine
    .clear_folder(folder, mode)
    .await
    .with_context(|| format!("Failed to clear {}", folder.display()))?;
  let orphans = engine.cleanup_orphaned()?;
  println!(
    "Removed {} chunks and {} file records ({} orphaned records dropped)",
    rows, records, orphans
  );
  Ok(())
}

/// List saved folder settings, or forget one set
pub async fn cmd_settings(forget: Option<&str>) -> Result<()> {
  let engine = open_engine(None).await?;

  if let Some(key) = forget {
    if !engine.forget_folder_settings(key)? {
      error!("No folder settings with key {}", key);
      std::process::exit(1);
    }
    println!("Forgot folder settings {}", key);
    return Ok(());
  }

  let settings = engine.folder_settings();
  if settings.is_empty() {
    println!("No saved folder settings");
    return Ok(());
  }
  for (key, record) in settings {
    println!("{}  {} [{}]", key, record.display_name, record.mode);
    for folder in &record.folders {
      println!("    {}", folder.display());
    }
    println!("    max size: {} MB", record.max_size_mb);
    println!("    excludes: {}", record.excludes.join(", "));
  }
  Ok(())
}

fn folder_or_cwd(folder: Option<PathBuf>) -> Result<PathBuf> {
  match folder {
    Some(folder) => Ok(folder),
    None => Ok(std::env::current_dir()?),
  }
}

/// Show the effective configuration
pub fn cmd_config_show(folder: Option<PathBuf>) -> Result<()> {
  let folder = folder_or_cwd(folder)?;
  let config = Config::load_for_folder(&folder);

  let folder_config = Config::folder_config_path(&folder);
  let user_config = Config::user_config_path();

  println!("Effective configuration for: {:?}", folder);
  println!();

  if folder_config.exists() {
    println!("Using folder config: {:?}", folder_config);
  } else if let Some(ref user_path) = user_config
    && user_path.exists()
  {
    println!("Using user config: {:?}", user_path);
  } else {
    println!("Using default configuration (no config file found)");
  }
  println!();

  let toml_str = toml::to_string_pretty(&config)?;
  println!("{}", toml_str);

  Ok(())
}

/// Write a config template for a folder
pub fn cmd_config_init(folder: Option<PathBuf>) -> Result<()> {
  let folder = folder_or_cwd(folder)?;
  let config_path = Config::folder_config_path(&folder);

  if config_path.exists() {
    error!("Config file already exists: {:?}", config_path);
    println!("Delete it first if you want to regenerate");
    std::process::exit(1);
  }

  if let Some(parent) = config_path.parent() {
    std::fs::create_dir_all(parent)?;
  }
  std::fs::write(&config_path, Config::generate_template())?;

  println!("Created folder config: {:?}", config_path);
  println!("Edit the file to customize settings.");
  Ok(())
}
