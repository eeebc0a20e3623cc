//! Watching indexed folders end to end: restore, live events, auto sync.

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use pretty_assertions::assert_eq;
  use tokio_util::sync::CancellationToken;

  use crate::{
    domain::{event::ChangeKind, mode::ChunkingMode},
    service::{
      __tests__::helpers::{EngineTestContext, open_engine, prose, wait_for},
      orchestrator::IndexRequest,
    },
  };

  #[tokio::test]
  async fn test_start_watching_restores_indexed_roots() {
    let ctx = EngineTestContext::new();
    ctx.write("a.md", &prose("tides"));
    ctx
      .engine
      .index(IndexRequest::new(vec![ctx.root()], ChunkingMode::Pinpoint))
      .await
      .unwrap();

    let (reopened, _embedder) = open_engine(ctx.data.path());
    let monitored = reopened.start_watching().unwrap();

    assert_eq!(monitored, 1);
    let status = reopened.watcher_status();
    assert!(status.running);
    assert_eq!(status.watched_roots, vec![ctx.root()]);
    assert_eq!(status.monitored[&ChunkingMode::Pinpoint], vec![ctx.root()]);
    assert!(!status.monitored.contains_key(&ChunkingMode::Gist));

    reopened.stop_watching().await;
    assert!(!reopened.watcher_status().running);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_live_write_is_queued_and_synced() {
    let ctx = EngineTestContext::new();
    ctx.write("a.md", &prose("tides"));
    ctx
      .engine
      .index(IndexRequest::new(vec![ctx.root()], ChunkingMode::Gist))
      .await
      .unwrap();
    ctx.engine.start_watching().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let fresh = ctx.write("fresh.md", &prose("volcanoes"));
    let queued = wait_for(Duration::from_secs(5), || ctx.engine.queue().len(ChunkingMode::Gist) > 0).await;
    assert!(queued, "write should reach the gist queue");

    let report = ctx.engine.sync(ChunkingMode::Gist).await.unwrap();
    assert_eq!(report.message, "Sync complete: 1 updated, 0 deleted, 0 failed");
    assert!(ctx.engine.detector().has_mode(&fresh, ChunkingMode::Gist));

    ctx.engine.stop_watching().await;
  }

  #[tokio::test]
  async fn test_auto_sync_loop_drains_pending_modes() {
    let ctx = EngineTestContext::new();
    let a = ctx.write("a.md", &prose("tides"));
    ctx
      .engine
      .add_folder(ChunkingMode::Pinpoint, &ctx.root())
      .unwrap();
    assert_eq!(ctx.engine.queue().record_event(&a, ChangeKind::Created), 1);

    let cancel = CancellationToken::new();
    let engine = ctx.engine.clone();
    let loop_cancel = cancel.clone();
    let task = tokio::spawn(async move { engine.auto_sync_loop(Duration::from_millis(50), loop_cancel).await });

    let drained = wait_for(Duration::from_secs(5), || ctx.engine.queue().len(ChunkingMode::Pinpoint) == 0).await;
    cancel.cancel();
    task.await.unwrap();

    assert!(drained);
    assert!(ctx.engine.detector().has_mode(&a, ChunkingMode::Pinpoint));
    assert_eq!(ctx.row_ids(ChunkingMode::Pinpoint, &a).await.len(), 3);
  }

  #[tokio::test]
  async fn test_removed_folder_stops_routing_events() {
    let ctx = EngineTestContext::new();
    let a = ctx.write("a.md", &prose("tides"));
    ctx.engine.add_folder(ChunkingMode::Gist, &ctx.root()).unwrap();
    assert!(ctx.engine.remove_folder(ChunkingMode::Gist, &ctx.root()));

    assert_eq!(ctx.engine.queue().record_event(&a, ChangeKind::Created), 0);
    assert!(ctx.engine.add_folder(ChunkingMode::Gist, &ctx.root().join("missing")).is_err());
  }
}
