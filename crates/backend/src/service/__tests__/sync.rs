//! Sync passes driven by queued change events.

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use crate::{
    domain::{event::ChangeKind, mode::ChunkingMode},
    service::{
      __tests__::helpers::{EngineTestContext, prose},
      orchestrator::IndexRequest,
      status::RunPhase,
    },
  };

  async fn indexed(ctx: &EngineTestContext, mode: ChunkingMode) {
    let report = ctx
      .engine
      .index(IndexRequest::new(vec![ctx.root()], mode))
      .await
      .unwrap();
    assert_eq!(report.phase, RunPhase::Completed);
  }

  #[tokio::test]
  async fn test_empty_sync_reports_zero_counts() {
    let ctx = EngineTestContext::new();
    let report = ctx.engine.sync(ChunkingMode::Gist).await.unwrap();

    assert_eq!(report.phase, RunPhase::Completed);
    assert_eq!(report.message, "Sync complete: 0 updated, 0 deleted, 0 failed");
  }

  #[tokio::test]
  async fn test_deleted_event_removes_rows_and_record() {
    let ctx = EngineTestContext::new();
    let a = ctx.write("a.md", &prose("tides"));
    indexed(&ctx, ChunkingMode::Gist).await;
    assert!(!ctx.row_ids(ChunkingMode::Gist, &a).await.is_empty());

    std::fs::remove_file(&a).unwrap();
    assert_eq!(ctx.engine.queue().record_event(&a, ChangeKind::Deleted), 1);
    let report = ctx.engine.sync(ChunkingMode::Gist).await.unwrap();

    assert_eq!(report.message, "Sync complete: 0 updated, 1 deleted, 0 failed");
    assert!(ctx.row_ids(ChunkingMode::Gist, &a).await.is_empty());
    assert!(ctx.engine.detector().record(&a).is_none());
    assert_eq!(ctx.engine.queue().len(ChunkingMode::Gist), 0);
  }

  #[tokio::test]
  async fn test_modified_event_reindexes_file() {
    let ctx = EngineTestContext::new();
    let a = ctx.write("a.md", "One sentence only.\n");
    indexed(&ctx, ChunkingMode::Pinpoint).await;

    std::fs::write(&a, "One sentence only.\nAnd now a second sentence.\n").unwrap();
    assert_eq!(ctx.engine.queue().record_event(&a, ChangeKind::Modified), 1);
    let report = ctx.engine.sync(ChunkingMode::Pinpoint).await.unwrap();

    assert_eq!(report.message, "Sync complete: 1 updated, 0 deleted, 0 failed");
    assert_eq!(ctx.row_ids(ChunkingMode::Pinpoint, &a).await.len(), 2);
    let status = ctx.engine.sync_status();
    assert!(!status.needs_sync);
    assert_eq!(status.modes[&ChunkingMode::Pinpoint].synced_total, 1);
  }

  #[tokio::test]
  async fn test_unchanged_file_event_is_dropped() {
    let ctx = EngineTestContext::new();
    let a = ctx.write("a.md", &prose("tides"));
    indexed(&ctx, ChunkingMode::Gist).await;

    assert_eq!(ctx.engine.queue().record_event(&a, ChangeKind::Modified), 0);
    assert_eq!(ctx.engine.queue().len(ChunkingMode::Gist), 0);
  }

  #[tokio::test]
  async fn test_missing_file_counts_as_failure_and_queue_is_cleared() {
    let ctx = EngineTestContext::new();
    ctx.write("a.md", &prose("tides"));
    indexed(&ctx, ChunkingMode::Gist).await;

    let ghost = ctx.root().join("ghost.md");
    ctx
      .engine
      .queue()
      .enqueue(ChunkingMode::Gist, &ctx.root(), &ghost, ChangeKind::Created);
    let report = ctx.engine.sync(ChunkingMode::Gist).await.unwrap();

    assert_eq!(report.message, "Sync complete: 0 updated, 0 deleted, 1 failed");
    assert_eq!(report.failed_paths, vec![ghost]);
    assert_eq!(ctx.engine.queue().len(ChunkingMode::Gist), 0);
    assert_eq!(ctx.engine.sync_status().modes[&ChunkingMode::Gist].synced_total, 0);
  }

  #[tokio::test]
  async fn test_sync_of_one_mode_leaves_other_queue() {
    let ctx = EngineTestContext::new();
    let a = ctx.write("a.md", &prose("tides"));
    indexed(&ctx, ChunkingMode::Gist).await;
    indexed(&ctx, ChunkingMode::Pinpoint).await;

    std::fs::write(&a, prose("much higher tides")).unwrap();
    assert_eq!(ctx.engine.queue().record_event(&a, ChangeKind::Modified), 2);

    ctx.engine.sync(ChunkingMode::Gist).await.unwrap();
    assert_eq!(ctx.engine.queue().len(ChunkingMode::Gist), 0);
    assert_eq!(ctx.engine.queue().len(ChunkingMode::Pinpoint), 1);
  }

  #[tokio::test]
  async fn test_completed_sync_clears_events_queued_mid_pass() {
    let ctx = EngineTestContext::new();
    let a = ctx.write("a.md", &prose("tides"));
    indexed(&ctx, ChunkingMode::Gist).await;
    indexed(&ctx, ChunkingMode::Pinpoint).await;

    std::fs::write(&a, prose("much higher tides")).unwrap();
    assert_eq!(ctx.engine.queue().record_event(&a, ChangeKind::Modified), 2);
    let late = ctx.write("late.md", &prose("late arrival"));

    let engine = ctx.engine.clone();
    let (root, late_path) = (ctx.root(), late.clone());
    ctx.embedder.on_call(1, move || {
      engine.queue().enqueue(ChunkingMode::Gist, &root, &late_path, ChangeKind::Created);
    });

    let report = ctx.engine.sync(ChunkingMode::Gist).await.unwrap();

    assert_eq!(report.phase, RunPhase::Completed);
    assert_eq!(report.message, "Sync complete: 1 updated, 0 deleted, 0 failed");
    assert_eq!(ctx.engine.queue().len(ChunkingMode::Gist), 0);
    assert_eq!(ctx.engine.queue().len(ChunkingMode::Pinpoint), 1);
    // the late event was dropped with the rest of the queue, not processed
    assert!(!ctx.engine.detector().has_mode(&late, ChunkingMode::Gist));
    assert!(ctx.row_ids(ChunkingMode::Gist, &late).await.is_empty());
  }

  #[tokio::test]
  async fn test_cancelled_sync_keeps_events_queued_mid_pass() {
    let ctx = EngineTestContext::new();
    let a = ctx.write("a.md", &prose("tides"));
    let b = ctx.write("b.md", &prose("glaciers"));
    indexed(&ctx, ChunkingMode::Gist).await;
    indexed(&ctx, ChunkingMode::Pinpoint).await;

    for (path, topic) in [(&a, "tides"), (&b, "glaciers")] {
      std::fs::write(path, prose(&format!("{topic} revisited"))).unwrap();
      ctx.engine.queue().record_event(path, ChangeKind::Modified);
    }
    let late = ctx.write("late.md", &prose("late arrival"));

    let engine = ctx.engine.clone();
    let (root, late_path) = (ctx.root(), late.clone());
    ctx.embedder.on_call(1, move || {
      engine.queue().enqueue(ChunkingMode::Gist, &root, &late_path, ChangeKind::Created);
    });
    ctx.embedder.cancel_after(1);

    let report = ctx.engine.sync(ChunkingMode::Gist).await.unwrap();

    assert_eq!(report.phase, RunPhase::Cancelled);
    assert_eq!(ctx.engine.queue().len(ChunkingMode::Gist), 3);
    assert_eq!(ctx.engine.queue().len(ChunkingMode::Pinpoint), 2);
  }

  #[tokio::test]
  async fn test_file_shrunk_below_minimum_is_dropped() {
    let ctx = EngineTestContext::new();
    let a = ctx.write("a.md", &prose("tides"));
    indexed(&ctx, ChunkingMode::Gist).await;

    std::fs::write(&a, "ok").unwrap();
    ctx.engine.queue().record_event(&a, ChangeKind::Modified);
    let report = ctx.engine.sync(ChunkingMode::Gist).await.unwrap();

    assert_eq!(report.message, "Sync complete: 1 updated, 0 deleted, 0 failed");
    assert!(ctx.row_ids(ChunkingMode::Gist, &a).await.is_empty());
    assert!(!ctx.engine.detector().has_mode(&a, ChunkingMode::Gist));
  }

  #[tokio::test]
  async fn test_force_check_finds_offline_changes() {
    let ctx = EngineTestContext::new();
    let keep = ctx.write("keep.md", &prose("tides"));
    let edit = ctx.write("edit.md", &prose("glaciers"));
    let gone = ctx.write("gone.md", &prose("deserts"));
    indexed(&ctx, ChunkingMode::Gist).await;

    std::fs::write(&edit, prose("retreating glaciers")).unwrap();
    ctx.touch_later(&edit, 10);
    std::fs::remove_file(&gone).unwrap();
    ctx.write("new.md", &prose("volcanoes"));

    let found = ctx.engine.force_check(Some(ChunkingMode::Gist)).await.unwrap();
    assert_eq!(found, 3);

    let report = ctx.engine.sync(ChunkingMode::Gist).await.unwrap();
    assert_eq!(report.message, "Sync complete: 2 updated, 1 deleted, 0 failed");
    assert!(ctx.engine.detector().has_mode(&keep, ChunkingMode::Gist));
    assert!(ctx.engine.detector().record(&gone).is_none());
    assert_eq!(ctx.row_count(ChunkingMode::Gist).await, 3);
  }
}
