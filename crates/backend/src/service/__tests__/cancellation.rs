//! Single-flight runs, cooperative cancellation and rollback.

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use crate::{
    domain::{event::ChangeKind, mode::ChunkingMode},
    service::{
      __tests__::helpers::{EngineTestContext, prose},
      engine::EngineError,
      orchestrator::IndexRequest,
      status::RunPhase,
    },
  };

  fn write_topics(ctx: &EngineTestContext, topics: &[&str]) -> Vec<std::path::PathBuf> {
    topics
      .iter()
      .map(|t| ctx.write(&format!("{t}.md"), &prose(t)))
      .collect()
  }

  #[tokio::test]
  async fn test_second_run_is_rejected_while_active() {
    let ctx = EngineTestContext::new();
    write_topics(&ctx, &["tides", "glaciers"]);

    let handle = ctx
      .engine
      .start_index(IndexRequest::new(vec![ctx.root()], ChunkingMode::Gist))
      .unwrap();

    let second = ctx
      .engine
      .index(IndexRequest::new(vec![ctx.root()], ChunkingMode::Pinpoint))
      .await;
    assert!(matches!(second, Err(EngineError::Busy(_))));
    assert!(matches!(ctx.engine.sync(ChunkingMode::Gist).await, Err(EngineError::Busy(_))));

    let report = handle.await.unwrap();
    assert_eq!(report.phase, RunPhase::Completed);
    assert!(ctx.engine.sync(ChunkingMode::Gist).await.is_ok());
  }

  #[tokio::test]
  async fn test_cancel_when_idle_is_a_no_op() {
    let ctx = EngineTestContext::new();
    assert!(!ctx.engine.cancel());
    assert!(!ctx.engine.status().cancel_requested);
  }

  #[tokio::test]
  async fn test_cancelled_full_run_rolls_back_touched_paths() {
    let ctx = EngineTestContext::new();
    let files = write_topics(&ctx, &["alpha", "bravo", "charlie", "delta", "echo"]);
    ctx.embedder.cancel_after(2);

    let report = ctx
      .engine
      .index(IndexRequest::new(vec![ctx.root()], ChunkingMode::Gist))
      .await
      .unwrap();

    assert_eq!(report.phase, RunPhase::Cancelled);
    assert!(report.message.contains("cancelled and rolled back"));
    assert_eq!(report.rolled_back_files, 2);
    assert_eq!(report.rolled_back_rows, 2);
    assert_eq!(ctx.row_count(ChunkingMode::Gist).await, 0);
    for file in &files {
      assert!(ctx.engine.detector().record(file).is_none());
    }

    let status = ctx.engine.status();
    assert!(!status.is_indexing);
    assert!(!status.cancel_requested);
    assert!(status.touched_paths.is_empty());
    assert_eq!(status.last_outcome.unwrap().phase, RunPhase::Cancelled);
    // cancelled runs do not start watching
    assert!(ctx.engine.queue().roots(ChunkingMode::Gist).is_empty());
  }

  #[tokio::test]
  async fn test_rollback_keeps_other_modes() {
    let ctx = EngineTestContext::new();
    let files = write_topics(&ctx, &["alpha", "bravo", "charlie"]);
    ctx
      .engine
      .index(IndexRequest::new(vec![ctx.root()], ChunkingMode::Pinpoint))
      .await
      .unwrap();
    let pinpoint_rows = ctx.row_count(ChunkingMode::Pinpoint).await;

    ctx.embedder.cancel_after(1);
    let report = ctx
      .engine
      .index(IndexRequest::new(vec![ctx.root()], ChunkingMode::Gist))
      .await
      .unwrap();

    assert_eq!(report.phase, RunPhase::Cancelled);
    assert_eq!(ctx.row_count(ChunkingMode::Gist).await, 0);
    assert_eq!(ctx.row_count(ChunkingMode::Pinpoint).await, pinpoint_rows);
    for file in &files {
      assert!(ctx.engine.detector().has_mode(file, ChunkingMode::Pinpoint));
      assert!(!ctx.engine.detector().has_mode(file, ChunkingMode::Gist));
    }
  }

  #[tokio::test]
  async fn test_cancelled_sync_keeps_queue_for_retry() {
    let ctx = EngineTestContext::new();
    let files = write_topics(&ctx, &["alpha", "bravo", "charlie"]);
    ctx
      .engine
      .index(IndexRequest::new(vec![ctx.root()], ChunkingMode::Gist))
      .await
      .unwrap();

    for (file, topic) in files.iter().zip(["alpha", "bravo", "charlie"]) {
      std::fs::write(file, prose(&format!("{topic} revisited"))).unwrap();
      ctx.engine.queue().record_event(file, ChangeKind::Modified);
    }
    assert_eq!(ctx.engine.queue().len(ChunkingMode::Gist), 3);

    ctx.embedder.cancel_after(1);
    let report = ctx.engine.sync(ChunkingMode::Gist).await.unwrap();

    assert_eq!(report.phase, RunPhase::Cancelled);
    assert_eq!(report.rolled_back_files, 1);
    assert_eq!(ctx.engine.queue().len(ChunkingMode::Gist), 3);
    assert!(!ctx.engine.detector().has_mode(&files[0], ChunkingMode::Gist));
    assert!(ctx.row_ids(ChunkingMode::Gist, &files[0]).await.is_empty());

    let retry = ctx.engine.sync(ChunkingMode::Gist).await.unwrap();
    assert_eq!(retry.message, "Sync complete: 3 updated, 0 deleted, 0 failed");
    assert_eq!(ctx.row_count(ChunkingMode::Gist).await, 3);
  }
}
