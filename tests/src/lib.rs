#![cfg(test)]

use crate::data::*;
use crate::fixtures::*;
use crate::setup::*;
use patchgate::engine::Engine;
use patchgate::filter::AcceptAll;
use patchgate::store::Store;
use patchgate_common::errors::CycleError;
use patchgate_common::TestResult;
use rstest::rstest;
use std::time::Duration;
use tempfile::TempDir;

mod assertions;
pub(crate) mod fixtures;
mod ingest;

#[rstest]
#[tokio::test]
pub async fn new_database_has_no_stable_commit(isolated_engine: IsolatedEngine) {
    let mut ctx = isolated_engine;
    setup_published_series(&ctx, "[PATCH] net: fix the thing", &[patch(101, 0)]);

    let err = ctx.engine.ingest().await.unwrap_err();
    assert!(matches!(err, CycleError::Configuration(_)));
    assert!(err.is_fatal());

    assert!(ctx.store.patch(101).unwrap().is_none());
    assert!(ctx.executor.submitted().is_empty());
}

#[rstest]
#[tokio::test]
pub async fn baseline_is_submitted_for_the_branch_tip(isolated_engine: IsolatedEngine) {
    let mut ctx = isolated_engine;

    let job = ctx.engine.submit_baseline().await.unwrap();
    assert_eq!(job.job_name, DUMMY_JOB_NAME);
    assert!(ctx.store.patches_for_job(job.id).unwrap().is_empty());

    let params = ctx.executor.params(job.build_id);
    assert!(params.is_baseline());
    assert_eq!(params.baserepo.as_deref(), Some(DUMMY_BASEREPO));
    assert_eq!(params.git_ref.as_deref(), Some(DUMMY_BASEREF));
    assert_eq!(params.makeopts.as_deref(), Some(DUMMY_MAKEOPTS));
}

#[rstest]
#[tokio::test]
pub async fn successful_baseline_becomes_stable(isolated_engine: IsolatedEngine) {
    let mut ctx = isolated_engine;

    setup_stable_baseline(&mut ctx).await;

    assert_eq!(
        ctx.store.current_stable_commit(DUMMY_BASEREPO).unwrap().as_deref(),
        Some(DUMMY_STABLE_COMMIT)
    );
    assert!(ctx.store.list_pending_jobs().unwrap().is_empty());
}

#[rstest]
#[tokio::test]
pub async fn worse_baseline_result_revokes_stable(isolated_engine: IsolatedEngine) {
    let mut ctx = isolated_engine;

    setup_stable_baseline(&mut ctx).await;
    setup_baseline(&mut ctx, DUMMY_STABLE_COMMIT, TestResult::BuildFailure).await;

    assert_eq!(ctx.store.current_stable_commit(DUMMY_BASEREPO).unwrap(), None);
    let (_, _, runs) = ctx.store.counts().unwrap();
    assert_eq!(runs, 2);
}

#[rstest]
#[tokio::test]
pub async fn better_baseline_result_is_ignored(isolated_engine: IsolatedEngine) {
    let mut ctx = isolated_engine;

    setup_baseline(&mut ctx, DUMMY_STABLE_COMMIT, TestResult::TestFailure).await;
    setup_baseline(&mut ctx, DUMMY_STABLE_COMMIT, TestResult::Success).await;

    assert_eq!(ctx.store.current_stable_commit(DUMMY_BASEREPO).unwrap(), None);
    let info = ctx.store.repo_info().unwrap();
    assert_eq!(info.len(), 1);
    let (baseline, result) = info[0].latest.clone().unwrap();
    assert_eq!(baseline.commit_id, DUMMY_STABLE_COMMIT);
    assert_eq!(result, TestResult::TestFailure);
}

#[rstest]
#[tokio::test]
pub async fn newer_stable_baseline_wins(isolated_engine: IsolatedEngine) {
    let mut ctx = isolated_engine;

    setup_stable_baseline(&mut ctx).await;
    let job = ctx.engine.submit_baseline().await.unwrap();
    ctx.executor.finish(
        job.build_id,
        baseline_report_at(DUMMY_OTHER_COMMIT, DUMMY_COMMIT_DATE + 86400, TestResult::Success, job.build_id),
    );
    ctx.engine.reconcile().await.unwrap();

    assert_eq!(
        ctx.store.current_stable_commit(DUMMY_BASEREPO).unwrap().as_deref(),
        Some(DUMMY_OTHER_COMMIT)
    );
}

#[rstest]
#[tokio::test]
pub async fn baseline_without_commit_only_records_run(isolated_engine: IsolatedEngine) {
    let mut ctx = isolated_engine;

    let job = ctx.engine.submit_baseline().await.unwrap();
    ctx.executor.finish(
        job.build_id,
        baseline_report_without_commit(TestResult::MergeFailure, job.build_id),
    );
    let summary = ctx.engine.reconcile().await.unwrap();
    assert_eq!(summary.reconciled, 1);

    assert!(ctx.store.repo_info().unwrap().is_empty());
    assert!(ctx.store.pending_job(job.id).unwrap().is_none());
    let (_, _, runs) = ctx.store.counts().unwrap();
    assert_eq!(runs, 1);
}

#[rstest]
#[tokio::test]
pub async fn unknown_source_needs_a_starting_point(isolated_store: (TempDir, Store)) {
    let (_dir, store) = isolated_store;
    let mut engine = Engine::new(
        store,
        Box::new(fixtures::fakes::FakeExecutor::new(DUMMY_JOB_NAME)),
        Box::new(AcceptAll),
        engine_config(),
    );

    let source = fixtures::fakes::FakeSource::new(DUMMY_PATCHWORK, DUMMY_PROJECT_ID);
    let err = engine.add_source(Box::new(source), None).unwrap_err();
    assert!(matches!(err, CycleError::Configuration(_)));
}

#[rstest]
#[tokio::test]
pub async fn known_source_resumes_from_stored_patches(isolated_store: (TempDir, Store)) {
    let (_dir, store) = isolated_store;
    store.record_patches(&[patch(101, 0), patch(102, 5)]).unwrap();
    store
        .update_baseline(DUMMY_BASEREPO, DUMMY_STABLE_COMMIT, DUMMY_COMMIT_DATE, TestResult::Success, 1)
        .unwrap();

    let mut engine = Engine::new(
        store,
        Box::new(fixtures::fakes::FakeExecutor::new(DUMMY_JOB_NAME)),
        Box::new(AcceptAll),
        engine_config(),
    );
    let source = fixtures::fakes::FakeSource::new(DUMMY_PATCHWORK, DUMMY_PROJECT_ID);
    engine.add_source(Box::new(source.clone()), None).unwrap();

    let summary = engine.ingest().await.unwrap();
    assert_eq!(summary.new_series, 0);
    assert_eq!(source.polled_since(), vec![patch(102, 5).date]);
}

#[rstest]
#[tokio::test]
pub async fn cycle_fails_without_stable_baseline(isolated_engine: IsolatedEngine) {
    let mut ctx = isolated_engine;

    assert!(patchgate::cycle(&mut ctx.engine).await.is_err());
}

#[rstest]
#[tokio::test]
pub async fn cycle_survives_executor_errors(isolated_engine: IsolatedEngine) {
    let mut ctx = isolated_engine;
    setup_stable_baseline(&mut ctx).await;
    setup_published_series(&ctx, "[PATCH] net: fix the thing", &[patch(101, 0)]);

    ctx.executor.fail_submit(true);
    patchgate::cycle(&mut ctx.engine).await.unwrap();
    assert!(ctx.store.patch(101).unwrap().is_none());

    ctx.executor.fail_submit(false);
    patchgate::cycle(&mut ctx.engine).await.unwrap();
    assert!(ctx.store.pending_patch(101).unwrap().is_some());
    // baseline plus the series
    assert_eq!(ctx.executor.submitted().len(), 2);
}

#[rstest]
#[tokio::test]
pub async fn wait_for_finished_baseline(isolated_engine: IsolatedEngine) {
    let mut ctx = isolated_engine;

    let job = ctx.engine.submit_baseline().await.unwrap();
    ctx.executor.finish(
        job.build_id,
        baseline_report(DUMMY_STABLE_COMMIT, TestResult::Success, job.build_id),
    );
    patchgate::wait_for_job(&mut ctx.engine, job.id, Duration::from_millis(10))
        .await
        .unwrap();

    assert!(ctx.store.pending_job(job.id).unwrap().is_none());
    assert_eq!(
        ctx.store.current_stable_commit(DUMMY_BASEREPO).unwrap().as_deref(),
        Some(DUMMY_STABLE_COMMIT)
    );
}

#[rstest]
#[tokio::test]
pub async fn shutdown_reaches_the_executor(isolated_engine: IsolatedEngine) {
    let mut ctx = isolated_engine;

    ctx.engine.shutdown().await.unwrap();
    assert!(ctx.executor.is_shut_down());
}

#[rstest]
#[tokio::test]
pub async fn wait_for_builds_ignores_foreign_jobs(isolated_engine: IsolatedEngine) {
    let mut ctx = isolated_engine;
    let build_id = setup_pending_series(&mut ctx).await;
    let foreign = ctx.store.create_pending_job(DUMMY_OTHER_JOB_NAME, 7).unwrap();
    ctx.executor
        .finish(build_id, patch_report(TestResult::Success, build_id));

    let build_ids = [build_id];
    let wait = patchgate::wait_for_builds(&mut ctx.engine, &build_ids, Duration::from_millis(10));
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(ctx.store.list_pending_jobs().unwrap(), vec![foreign]);
    assert_eq!(ctx.source.checks().len(), 2);
}

#[rstest]
#[tokio::test]
pub async fn run_stops_when_told_to(isolated_engine: IsolatedEngine) {
    let mut ctx = isolated_engine;
    setup_stable_baseline(&mut ctx).await;
    setup_published_series(&ctx, "[PATCH] net: fix the thing", &[patch(101, 0)]);
    let executor = ctx.executor.clone();
    let ticks = executor.ticks();

    let shutdown = tokio::time::sleep(Duration::from_millis(200));
    let run = patchgate::run_until(ctx.engine, Duration::from_millis(10), Duration::from_secs(3600), shutdown);
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap();

    assert!(executor.is_shut_down());
    assert!(executor.ticks() > ticks);
    // a fresh baseline plus the series, both still running
    assert_eq!(ctx.store.list_pending_jobs().unwrap().len(), 2);
    assert!(ctx.store.pending_patch(101).unwrap().is_some());
}
