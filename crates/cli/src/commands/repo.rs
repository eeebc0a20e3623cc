//! Repository commands: index, sync, manifests, forget

use anyhow::{Context, Result};
use semdex::RepoIndexRequest;

use super::{await_run, finish_report, open_engine};
use crate::{
  RepoCommand,
  format::{format_changes, format_manifests},
};

pub async fn cmd_repo(command: RepoCommand) -> Result<()> {
  match command {
    RepoCommand::Index {
      repository,
      branch,
      root,
      mode,
    } => {
      let engine = open_engine(Some(&root)).await?;
      let request = RepoIndexRequest::new(repository, branch, root, mode);
      let handle = engine
        .start_repo_index(request)
        .context("Failed to start repository index")?;
      let report = await_run(&engine, handle).await?;
      finish_report(&report)
    }
    RepoCommand::Sync {
      repository,
      branch,
      root,
      mode,
      dry_run,
    } => {
      let engine = open_engine(Some(&root)).await?;
      let request = RepoIndexRequest::new(repository, branch, root, mode);
      if dry_run {
        let changes = engine
          .detect_repo_changes(&request)
          .await
          .context("Failed to compare with manifest")?;
        print!("{}", format_changes(&changes));
        return Ok(());
      }
      let report = engine.repo_sync(request).await.context("Failed to start repository sync")?;
      finish_report(&report)
    }
    RepoCommand::Manifests { repository, json } => {
      let engine = open_engine(None).await?;
      let summaries = engine.list_manifests(repository.as_deref())?;
      if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
      } else {
        print!("{}", format_manifests(&summaries));
      }
      Ok(())
    }
    RepoCommand::Forget { repository } => {
      let engine = open_engine(None).await?;
      let removed = engine
        .forget_repo(&repository)
        .await
        .with_context(|| format!("Failed to forget {}", repository))?;
      println!("Deleted {} manifests for {}", removed, repository);
      Ok(())
    }
  }
}
