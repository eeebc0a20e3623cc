//! Full index runs: rows, records, idempotence and folder settings.

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use crate::{
    domain::mode::ChunkingMode,
    service::{
      __tests__::helpers::{EngineTestContext, prose},
      orchestrator::IndexRequest,
      status::RunPhase,
    },
  };

  #[tokio::test]
  async fn test_full_index_writes_rows_and_records() {
    let ctx = EngineTestContext::new();
    let a = ctx.write("a.md", &prose("tides"));
    let b = ctx.write("notes/b.txt", &prose("glaciers"));

    let report = ctx
      .engine
      .index(IndexRequest::new(vec![ctx.root()], ChunkingMode::Gist))
      .await
      .unwrap();

    assert_eq!(report.phase, RunPhase::Completed);
    assert_eq!(report.indexed, 2);
    assert_eq!(report.failed, 0);
    assert!(ctx.engine.detector().has_mode(&a, ChunkingMode::Gist));
    assert!(ctx.engine.detector().has_mode(&b, ChunkingMode::Gist));
    assert!(!ctx.engine.detector().has_mode(&a, ChunkingMode::Pinpoint));

    let ids = ctx.row_ids(ChunkingMode::Gist, &a).await;
    assert_eq!(ids, vec![format!("gist-{}-1", a.display())]);
    assert_eq!(ctx.row_count(ChunkingMode::Pinpoint).await, 0);

    let status = ctx.engine.status();
    assert!(!status.is_indexing);
    assert_eq!(status.phase, RunPhase::Idle);
    assert_eq!(status.last_outcome.unwrap().phase, RunPhase::Completed);
  }

  #[tokio::test]
  async fn test_second_index_of_unchanged_folder_embeds_nothing() {
    let ctx = EngineTestContext::new();
    ctx.write("a.md", &prose("tides"));
    ctx.write("b.md", &prose("glaciers"));
    let request = IndexRequest::new(vec![ctx.root()], ChunkingMode::Pinpoint);

    ctx.engine.index(request.clone()).await.unwrap();
    let calls = ctx.embedder.calls();
    assert!(calls > 0);

    let second = ctx.engine.index(request).await.unwrap();
    assert_eq!(ctx.embedder.calls(), calls);
    assert_eq!(second.indexed, 0);
    assert_eq!(second.unchanged, 2);
  }

  #[tokio::test]
  async fn test_shrinking_file_leaves_no_stale_chunks() {
    let ctx = EngineTestContext::new();
    let path = ctx.write("a.md", "First sentence here.\nSecond one follows.\nThird closes it.\n");
    let request = IndexRequest::new(vec![ctx.root()], ChunkingMode::Pinpoint);

    ctx.engine.index(request.clone()).await.unwrap();
    assert_eq!(ctx.row_ids(ChunkingMode::Pinpoint, &path).await.len(), 3);

    std::fs::write(&path, "Only one sentence remains.\n").unwrap();
    let report = ctx.engine.index(request).await.unwrap();

    assert_eq!(report.indexed, 1);
    let ids = ctx.row_ids(ChunkingMode::Pinpoint, &path).await;
    assert_eq!(ids, vec![format!("pinpoint-{}-1", path.display())]);
    let record = ctx.engine.detector().record(&path).unwrap();
    assert_eq!(record.modes[&ChunkingMode::Pinpoint].chunk_count, 1);
  }

  #[tokio::test]
  async fn test_file_chunks_embed_in_one_batch() {
    let ctx = EngineTestContext::new();
    let path = ctx.write("a.md", "First sentence here.\nSecond one follows.\nThird closes it.\n");

    ctx
      .engine
      .index(IndexRequest::new(vec![ctx.root()], ChunkingMode::Pinpoint))
      .await
      .unwrap();

    assert_eq!(ctx.row_ids(ChunkingMode::Pinpoint, &path).await.len(), 3);
    assert_eq!(ctx.embedder.calls(), 3);
    assert_eq!(ctx.embedder.batches(), 1);
  }

  #[tokio::test]
  async fn test_file_shrunk_below_minimum_loses_rows_and_record() {
    let ctx = EngineTestContext::new();
    let path = ctx.write("a.md", &prose("tides"));
    let request = IndexRequest::new(vec![ctx.root()], ChunkingMode::Gist);

    ctx.engine.index(request.clone()).await.unwrap();
    assert!(ctx.engine.detector().has_mode(&path, ChunkingMode::Gist));

    std::fs::write(&path, "hi").unwrap();
    let report = ctx.engine.index(request.clone()).await.unwrap();

    assert_eq!(report.skipped, 1);
    assert!(ctx.row_ids(ChunkingMode::Gist, &path).await.is_empty());
    assert!(!ctx.engine.detector().has_mode(&path, ChunkingMode::Gist));

    // growing back past the minimum is picked up as new
    std::fs::write(&path, prose("tides again")).unwrap();
    let report = ctx.engine.index(request).await.unwrap();
    assert_eq!(report.indexed, 1);
    assert_eq!(ctx.row_ids(ChunkingMode::Gist, &path).await.len(), 1);
  }

  #[tokio::test]
  async fn test_short_binary_and_excluded_files_are_not_indexed() {
    let ctx = EngineTestContext::new();
    ctx.write("real.md", &prose("tides"));
    ctx.write("tiny.md", "hi");
    let binary = ctx.root().join("blob.dat");
    std::fs::write(&binary, [0x89, 0x50, 0x00, 0x47, 0x00, 0x0a, 0x1a, 0x0a, 0x00, 0x01, 0x02, 0x03]).unwrap();
    let log = ctx.write("debug.log", &prose("stack traces"));

    let report = ctx
      .engine
      .index(IndexRequest::new(vec![ctx.root()], ChunkingMode::Gist).with_excludes(vec!["*.log".to_string()]))
      .await
      .unwrap();

    assert_eq!(report.indexed, 1);
    assert_eq!(report.skipped, 2);
    assert!(!ctx.engine.detector().has_mode(&binary, ChunkingMode::Gist));
    assert!(ctx.row_ids(ChunkingMode::Gist, &log).await.is_empty());
  }

  #[tokio::test]
  async fn test_index_saves_folder_settings() {
    let ctx = EngineTestContext::new();
    ctx.write("a.md", &prose("tides"));

    ctx
      .engine
      .index(
        IndexRequest::new(vec![ctx.root()], ChunkingMode::Pinpoint)
          .with_excludes(vec!["drafts/".to_string()])
          .with_max_size_mb(2),
      )
      .await
      .unwrap();

    let settings = ctx.engine.folder_settings();
    assert_eq!(settings.len(), 1);
    let record = settings.values().next().unwrap();
    assert_eq!(record.folders, vec![ctx.root()]);
    assert_eq!(record.excludes, vec!["drafts/".to_string()]);
    assert_eq!(record.max_size_mb, 2);
    assert_eq!(record.mode, ChunkingMode::Pinpoint);
  }

  #[tokio::test]
  async fn test_index_registers_folder_for_watching() {
    let ctx = EngineTestContext::new();
    ctx.write("a.md", &prose("tides"));

    ctx
      .engine
      .index(IndexRequest::new(vec![ctx.root()], ChunkingMode::Gist))
      .await
      .unwrap();

    assert_eq!(ctx.engine.queue().roots(ChunkingMode::Gist), vec![ctx.root()]);
    assert!(ctx.engine.queue().roots(ChunkingMode::Pinpoint).is_empty());
  }

  #[tokio::test]
  async fn test_missing_folder_fails_run() {
    let ctx = EngineTestContext::new();
    let missing = ctx.root().join("does-not-exist");

    let report = ctx
      .engine
      .index(IndexRequest::new(vec![missing], ChunkingMode::Gist))
      .await
      .unwrap();

    assert_eq!(report.phase, RunPhase::Failed);
    assert!(!ctx.engine.status().is_indexing);
  }

  #[tokio::test]
  async fn test_embed_failure_counts_file_as_failed() {
    let ctx = EngineTestContext::new();
    ctx.write("good.md", &prose("tides"));
    let bad = ctx.write("bad.md", &prose("forbidden"));
    ctx.embedder.fail_on("forbidden");

    let report = ctx
      .engine
      .index(IndexRequest::new(vec![ctx.root()], ChunkingMode::Gist))
      .await
      .unwrap();

    assert_eq!(report.phase, RunPhase::Completed);
    assert_eq!(report.indexed, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failed_paths, vec![bad.clone()]);
    assert!(!ctx.engine.detector().has_mode(&bad, ChunkingMode::Gist));
  }

  #[tokio::test]
  async fn test_search_finds_matching_chunk() {
    let ctx = EngineTestContext::new();
    ctx.write("a.md", "Zebras zigzag across the zone.\nBoring ordinary sentence here.\n");
    ctx.write("b.md", "Quiet quails quarrel quickly.\n");

    ctx
      .engine
      .index(IndexRequest::new(vec![ctx.root()], ChunkingMode::Pinpoint))
      .await
      .unwrap();

    let hits = ctx
      .engine
      .search("Quiet quails quarrel quickly.", ChunkingMode::Pinpoint, 2, None)
      .await
      .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].document, "Quiet quails quarrel quickly.");
    assert_eq!(hits[0].metadata.line_ranges, "1");

    let elsewhere = ctx
      .engine
      .search("Quiet quails", ChunkingMode::Pinpoint, 5, Some(&ctx.root().join("nowhere")))
      .await
      .unwrap();
    assert!(elsewhere.is_empty());
  }

  #[tokio::test]
  async fn test_clear_folder_is_mode_scoped() {
    let ctx = EngineTestContext::new();
    let a = ctx.write("a.md", &prose("tides"));
    ctx
      .engine
      .index(IndexRequest::new(vec![ctx.root()], ChunkingMode::Gist))
      .await
      .unwrap();
    ctx
      .engine
      .index(IndexRequest::new(vec![ctx.root()], ChunkingMode::Pinpoint))
      .await
      .unwrap();

    let (rows, records) = ctx
      .engine
      .clear_folder(&ctx.root(), Some(ChunkingMode::Gist))
      .await
      .unwrap();

    assert_eq!(rows, 1);
    assert_eq!(records, 1);
    assert_eq!(ctx.row_count(ChunkingMode::Gist).await, 0);
    assert_eq!(ctx.row_ids(ChunkingMode::Pinpoint, &a).await.len(), 3);
    assert!(ctx.engine.detector().has_mode(&a, ChunkingMode::Pinpoint));
    assert!(!ctx.engine.detector().has_mode(&a, ChunkingMode::Gist));
  }
}
