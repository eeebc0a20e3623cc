//! Search command

use std::path::Path;

use anyhow::{Context, Result};
use semdex::mode::ChunkingMode;

use super::open_engine;
use crate::format::format_hits;

pub async fn cmd_search(query: &str, mode: ChunkingMode, limit: usize, folder: Option<&Path>, json: bool) -> Result<()> {
  let engine = open_engine(folder).await?;
  let hits = engine
    .search(query, mode, limit, folder)
    .await
    .context("Search failed")?;

  if json {
    println!("{}", serde_json::to_string_pretty(&hits)?);
  } else {
    print!("{}", format_hits(&hits));
  }
  Ok(())
}
