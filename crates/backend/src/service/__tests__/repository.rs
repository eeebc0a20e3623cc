//! Repository index, manifest-driven resync and cleanup.

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use crate::{
    domain::mode::ChunkingMode,
    service::{
      __tests__::helpers::{EngineTestContext, prose},
      repo::RepoIndexRequest,
      status::RunPhase,
    },
    store::MetadataFilter,
  };

  fn request(ctx: &EngineTestContext) -> RepoIndexRequest {
    RepoIndexRequest::new("octo/docs", "main", ctx.root(), ChunkingMode::Gist)
  }

  async fn repo_ids(ctx: &EngineTestContext) -> Vec<String> {
    let filter = MetadataFilter::Repo {
      repository: "octo/docs".to_string(),
      branch: "main".to_string(),
    };
    let mut ids: Vec<String> = ctx
      .engine
      .stores()
      .for_mode(ChunkingMode::Gist)
      .get_by_metadata(&filter)
      .await
      .unwrap()
      .into_iter()
      .map(|c| c.id)
      .collect();
    ids.sort();
    ids
  }

  #[tokio::test]
  async fn test_repo_index_writes_manifest_and_repo_ids() {
    let ctx = EngineTestContext::new();
    ctx.write("README.md", &prose("onboarding"));
    ctx.write("guide/setup.md", &prose("installation"));

    let report = ctx.engine.repo_index(request(&ctx)).await.unwrap();

    assert_eq!(report.phase, RunPhase::Completed);
    assert_eq!(report.indexed, 2);
    assert_eq!(
      repo_ids(&ctx).await,
      vec![
        "octo/docs@main:README.md-1".to_string(),
        "octo/docs@main:guide/setup.md-1".to_string(),
      ]
    );

    let summary = ctx.engine.manifest_summary("octo/docs", "main").unwrap();
    assert!(summary.has_manifest);
    assert_eq!(summary.file_count, 2);
    assert_eq!(summary.last_commit_sha.as_deref(), Some("unknown"));
    // repository files never enter the change detector
    assert!(ctx.engine.detector().is_empty());
  }

  #[tokio::test]
  async fn test_repo_sync_applies_manifest_diff() {
    let ctx = EngineTestContext::new();
    let readme = ctx.write("README.md", &prose("onboarding"));
    let setup = ctx.write("guide/setup.md", &prose("installation"));
    ctx.engine.repo_index(request(&ctx)).await.unwrap();

    std::fs::write(&readme, prose("onboarding for new staff")).unwrap();
    std::fs::remove_file(&setup).unwrap();
    ctx.write("guide/faq.md", &prose("common questions"));

    let changes = ctx.engine.detect_repo_changes(&request(&ctx)).await.unwrap();
    assert_eq!(changes.added, vec!["guide/faq.md".to_string()]);
    assert_eq!(changes.modified, vec!["README.md".to_string()]);
    assert_eq!(changes.removed, vec!["guide/setup.md".to_string()]);

    let report = ctx.engine.repo_sync(request(&ctx)).await.unwrap();
    assert_eq!(
      report.message,
      "Repository sync complete: 1 added, 1 modified, 1 removed, 0 failed"
    );
    assert_eq!(
      repo_ids(&ctx).await,
      vec![
        "octo/docs@main:README.md-1".to_string(),
        "octo/docs@main:guide/faq.md-1".to_string(),
      ]
    );

    let again = ctx.engine.detect_repo_changes(&request(&ctx)).await.unwrap();
    assert!(again.is_empty());
  }

  #[tokio::test]
  async fn test_repo_sync_drops_manifest_entry_of_skipped_file() {
    let ctx = EngineTestContext::new();
    let readme = ctx.write("README.md", &prose("onboarding"));
    ctx.write("guide/setup.md", &prose("installation"));
    ctx.engine.repo_index(request(&ctx)).await.unwrap();
    assert_eq!(ctx.engine.manifest_summary("octo/docs", "main").unwrap().file_count, 2);

    std::fs::write(&readme, "hi").unwrap();
    let report = ctx.engine.repo_sync(request(&ctx)).await.unwrap();

    assert_eq!(report.phase, RunPhase::Completed);
    assert_eq!(report.skipped, 1);
    assert_eq!(repo_ids(&ctx).await, vec!["octo/docs@main:guide/setup.md-1".to_string()]);
    assert_eq!(ctx.engine.manifest_summary("octo/docs", "main").unwrap().file_count, 1);

    // no entry left, so the file reads as new rather than unchanged
    let changes = ctx.engine.detect_repo_changes(&request(&ctx)).await.unwrap();
    assert_eq!(changes.added, vec!["README.md".to_string()]);
    assert!(changes.modified.is_empty());
  }

  #[tokio::test]
  async fn test_repo_index_keeps_skipped_files_out_of_manifest() {
    let ctx = EngineTestContext::new();
    let readme = ctx.write("README.md", &prose("onboarding"));
    ctx.write("guide/setup.md", &prose("installation"));
    ctx.engine.repo_index(request(&ctx)).await.unwrap();

    std::fs::write(&readme, "hi").unwrap();
    let report = ctx.engine.repo_index(request(&ctx)).await.unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(ctx.engine.manifest_summary("octo/docs", "main").unwrap().file_count, 1);
  }

  #[tokio::test]
  async fn test_cancelled_repo_index_leaves_manifest_untouched() {
    let ctx = EngineTestContext::new();
    ctx.write("a.md", &prose("alpha"));
    ctx.write("b.md", &prose("bravo"));
    ctx.write("c.md", &prose("charlie"));
    ctx.embedder.cancel_after(1);

    let report = ctx.engine.repo_index(request(&ctx)).await.unwrap();

    assert_eq!(report.phase, RunPhase::Cancelled);
    assert!(report.message.contains("cancelled and rolled back"));
    assert!(repo_ids(&ctx).await.is_empty());
    let summary = ctx.engine.manifest_summary("octo/docs", "main").unwrap();
    assert!(!summary.has_manifest);
  }

  #[tokio::test]
  async fn test_forget_repo_deletes_rows_and_manifests() {
    let ctx = EngineTestContext::new();
    ctx.write("README.md", &prose("onboarding"));
    ctx.engine.repo_index(request(&ctx)).await.unwrap();
    ctx
      .engine
      .repo_index(RepoIndexRequest::new("octo/docs", "dev", ctx.root(), ChunkingMode::Gist))
      .await
      .unwrap();
    assert_eq!(ctx.engine.list_manifests(Some("octo/docs")).unwrap().len(), 2);

    let removed = ctx.engine.forget_repo("octo/docs").await.unwrap();

    assert_eq!(removed, 2);
    assert!(ctx.engine.list_manifests(None).unwrap().is_empty());
    assert_eq!(ctx.row_count(ChunkingMode::Gist).await, 0);
  }
}
