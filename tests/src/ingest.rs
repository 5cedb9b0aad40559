use crate::assertions::*;
use crate::data::*;
use crate::fixtures::*;
use crate::setup::*;
use patchgate_common::errors::CycleError;
use rstest::rstest;

#[rstest]
#[tokio::test]
pub async fn series_is_tested_on_the_stable_commit(isolated_engine: IsolatedEngine) {
    let mut ctx = isolated_engine;

    let build_id = setup_pending_series(&mut ctx).await;

    let params = ctx.executor.params(build_id);
    assert!(!params.is_baseline());
    assert_eq!(params.git_ref.as_deref(), Some(DUMMY_STABLE_COMMIT));
    assert_eq!(params.patchwork, vec![patch_url(101), patch_url(102)]);
    assert_eq!(params.subject.as_deref(), Some("[PATCH 0/2] net: fix the thing"));
    assert_eq!(params.emails.len(), 2);

    let jobs = ctx.store.list_pending_jobs().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].build_id, build_id);
    assert_eq!(ctx.store.patches_for_job(jobs[0].id).unwrap(), vec![101, 102]);
    assert_patch_pending_for(&ctx.store, 101, jobs[0].id, start_time().timestamp());
    assert_patch_pending_for(&ctx.store, 102, jobs[0].id, start_time().timestamp());
}

#[rstest]
#[tokio::test]
pub async fn checkpoint_follows_recorded_patches(isolated_engine: IsolatedEngine) {
    let mut ctx = isolated_engine;
    setup_pending_series(&mut ctx).await;

    let summary = ctx.engine.ingest().await.unwrap();
    assert_eq!(summary.new_series, 0);
    assert!(summary.submitted.is_empty());

    assert_eq!(ctx.source.polled_since(), vec![tracked_since(), patch(102, 1).date]);
    let source_id = ctx.store.upsert_patch_source(DUMMY_PATCHWORK, DUMMY_PROJECT_ID).unwrap();
    assert_eq!(ctx.store.last_patch_date(source_id).unwrap(), Some(patch(102, 1).date));
}

#[rstest]
#[tokio::test]
pub async fn oldest_series_is_submitted_first(isolated_engine: IsolatedEngine) {
    let mut ctx = isolated_engine;
    setup_stable_baseline(&mut ctx).await;
    setup_published_series(&ctx, "[PATCH] second", &[patch(201, 30)]);
    setup_published_series(&ctx, "[PATCH 0/2] third", &[patch(101, 0), patch(102, 45)]);
    setup_published_series(&ctx, "[PATCH] first", &[patch(301, 10)]);

    let summary = ctx.engine.ingest().await.unwrap();
    assert_eq!(summary.new_series, 3);

    let subjects = summary
        .submitted
        .iter()
        .map(|id| ctx.executor.params(*id).subject.unwrap())
        .collect::<Vec<_>>();
    assert_eq!(subjects, vec!["[PATCH] first", "[PATCH] second", "[PATCH 0/2] third"]);
}

#[rstest]
#[tokio::test]
pub async fn rejected_series_is_recorded_but_not_tested(rejecting_engine: IsolatedEngine) {
    let mut ctx = rejecting_engine;
    setup_stable_baseline(&mut ctx).await;
    setup_published_series(&ctx, "[PATCH] docs: typo", &[patch(101, 0)]);

    let summary = ctx.engine.ingest().await.unwrap();
    assert_eq!(summary.rejected, 1);
    assert!(summary.submitted.is_empty());

    assert!(ctx.store.patch(101).unwrap().is_some());
    assert!(ctx.store.pending_patch(101).unwrap().is_none());
    assert_nothing_pending(&ctx.store);
    // only the baseline
    assert_eq!(ctx.executor.submitted().len(), 1);

    let summary = ctx.engine.ingest().await.unwrap();
    assert_eq!(summary.new_series, 0);
}

#[rstest]
#[tokio::test]
pub async fn broken_filter_keeps_series_for_next_cycle(broken_filter_engine: IsolatedEngine) {
    let mut ctx = broken_filter_engine;
    setup_stable_baseline(&mut ctx).await;
    setup_published_series(&ctx, "[PATCH] net: fix the thing", &[patch(101, 0)]);

    let err = ctx.engine.ingest().await.unwrap_err();
    assert!(matches!(err, CycleError::Filter(_)));
    assert!(!err.is_fatal());
    assert!(ctx.store.patch(101).unwrap().is_none());

    ctx.engine.ingest().await.unwrap_err();
    assert_eq!(ctx.source.polled_since(), vec![tracked_since(), tracked_since()]);
}

#[rstest]
#[tokio::test]
pub async fn failed_submission_is_retried(isolated_engine: IsolatedEngine) {
    let mut ctx = isolated_engine;
    setup_stable_baseline(&mut ctx).await;
    setup_published_series(&ctx, "[PATCH] net: fix the thing", &[patch(101, 0)]);

    ctx.executor.fail_submit(true);
    let err = ctx.engine.ingest().await.unwrap_err();
    assert!(matches!(err, CycleError::Adapter(_)));
    assert!(ctx.store.patch(101).unwrap().is_none());

    ctx.executor.fail_submit(false);
    let summary = ctx.engine.ingest().await.unwrap();
    assert_eq!(summary.submitted.len(), 1);
}

#[rstest]
#[tokio::test]
pub async fn expired_series_is_submitted_again(isolated_engine: IsolatedEngine) {
    let mut ctx = isolated_engine;
    let first_build = setup_pending_series(&mut ctx).await;
    let first_job = ctx.store.list_pending_jobs().unwrap()[0].clone();
    assert_eq!(first_job.build_id, first_build);

    ctx.clock.advance(DUMMY_EXPIRY - 1);
    let summary = ctx.engine.ingest().await.unwrap();
    assert_eq!(summary.resubmitted, 0);
    assert!(summary.submitted.is_empty());

    ctx.clock.advance(1);
    let summary = ctx.engine.ingest().await.unwrap();
    assert_eq!(summary.new_series, 0);
    assert_eq!(summary.resubmitted, 1);
    assert_eq!(summary.submitted.len(), 1);
    let second_build = summary.submitted[0];
    assert_ne!(second_build, first_build);

    assert!(ctx.store.pending_job(first_job.id).unwrap().is_none());
    let jobs = ctx.store.list_pending_jobs().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].build_id, second_build);

    let resubmitted_at = start_time().timestamp() + DUMMY_EXPIRY;
    assert_patch_pending_for(&ctx.store, 101, jobs[0].id, resubmitted_at);
    assert_patch_pending_for(&ctx.store, 102, jobs[0].id, resubmitted_at);

    let params = ctx.executor.params(second_build);
    assert_eq!(params.git_ref.as_deref(), Some(DUMMY_STABLE_COMMIT));
    assert_eq!(params.patchwork, vec![patch_url(101), patch_url(102)]);
}

#[rstest]
#[tokio::test]
pub async fn expired_series_skips_the_filter(rejecting_engine: IsolatedEngine) {
    let mut ctx = rejecting_engine;
    setup_stable_baseline(&mut ctx).await;
    ctx.store
        .submit_pending_job_at(DUMMY_JOB_NAME, 99, &[patch(101, 0)], start_time())
        .unwrap();
    setup_published_series(&ctx, "[PATCH] net: fix the thing", &[patch(101, 0)]);

    ctx.clock.advance(DUMMY_EXPIRY);
    let summary = ctx.engine.ingest().await.unwrap();
    assert_eq!(summary.rejected, 0);
    assert_eq!(summary.resubmitted, 1);
}

#[rstest]
#[tokio::test]
pub async fn expired_patch_without_series_is_dropped(isolated_engine: IsolatedEngine) {
    let mut ctx = isolated_engine;
    setup_pending_series(&mut ctx).await;
    // never published, the tracker doesn't know its series anymore
    let orphan = ctx
        .store
        .submit_pending_job_at(DUMMY_JOB_NAME, 99, &[patch(500, 0)], start_time())
        .unwrap();

    ctx.clock.advance(DUMMY_EXPIRY);
    let summary = ctx.engine.ingest().await.unwrap();
    assert_eq!(summary.resubmitted, 1);
    assert_eq!(summary.dropped, 1);

    assert!(ctx.store.pending_patch(500).unwrap().is_none());
    assert!(ctx.store.pending_job(orphan.id).unwrap().is_none());
    assert!(ctx.store.patch(500).unwrap().is_some());
    let jobs = ctx.store.list_pending_jobs().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(ctx.store.patches_for_job(jobs[0].id).unwrap(), vec![101, 102]);

    ctx.clock.advance(DUMMY_EXPIRY);
    let summary = ctx.engine.ingest().await.unwrap();
    assert_eq!(summary.dropped, 0);
    assert_eq!(summary.resubmitted, 1);
}

#[rstest]
#[tokio::test]
pub async fn aborted_series_gone_from_tracker_is_dropped(isolated_engine: IsolatedEngine) {
    let mut ctx = isolated_engine;
    setup_stable_baseline(&mut ctx).await;
    let job = ctx
        .store
        .submit_pending_job_at(DUMMY_JOB_NAME, 99, &[patch(500, 0)], start_time())
        .unwrap();
    ctx.store.discard_pending_job(job.id).unwrap();

    let summary = ctx.engine.ingest().await.unwrap();
    assert_eq!(summary.dropped, 1);
    assert!(summary.submitted.is_empty());
    assert_nothing_pending(&ctx.store);
}
