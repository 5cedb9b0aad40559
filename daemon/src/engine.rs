use crate::config::EngineConfig;
use crate::filter::{SeriesFilter, Verdict};
use crate::models::PendingJob;
use crate::store::Store;
use chrono::prelude::*;
use patchgate_common::errors::*;
use patchgate_common::executor::{BuildId, Executor};
use patchgate_common::source::PatchSource;
use patchgate_common::{BuildParams, BuildReport, PatchInfo, RunOutcome, SeriesSummary};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Source of the current time, replaced in tests
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct TrackedSource {
    id: i32,
    initial_since: Option<NaiveDateTime>,
    source: Box<dyn PatchSource>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub new_series: usize,
    pub rejected: usize,
    pub resubmitted: usize,
    pub dropped: usize,
    pub submitted: Vec<BuildId>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub reconciled: usize,
    pub discarded: usize,
    pub pending: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Submitted,
    Reconciled,
    Discarded,
}

/// Pulls series from patch sources, submits them for testing and
/// reconciles finished builds with the store.
pub struct Engine {
    store: Store,
    executor: Box<dyn Executor>,
    filter: Box<dyn SeriesFilter>,
    sources: Vec<Arc<TrackedSource>>,
    config: EngineConfig,
    clock: Box<dyn Clock>,
}

impl Engine {
    pub fn new(
        store: Store,
        executor: Box<dyn Executor>,
        filter: Box<dyn SeriesFilter>,
        config: EngineConfig,
    ) -> Engine {
        Engine {
            store,
            executor,
            filter,
            sources: Vec::new(),
            config,
            clock: Box::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Engine {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn job_name(&self) -> &str {
        self.executor.job_name()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a patch source.
    ///
    /// Fails if the source was never tested before and no starting point
    /// was given.
    pub fn add_source(
        &mut self,
        source: Box<dyn PatchSource>,
        initial_since: Option<NaiveDateTime>,
    ) -> CycleResult<()> {
        let id = self
            .store
            .upsert_patch_source(source.base_url(), source.project_id())
            .map_err(CycleError::Storage)?;
        let source = TrackedSource {
            id,
            initial_since,
            source,
        };
        let since = self.checkpoint(&source)?;
        info!(
            "Tracking project {} on {} since {}",
            source.source.project_id(),
            source.source.base_url(),
            since
        );
        self.sources.push(Arc::new(source));
        Ok(())
    }

    fn checkpoint(&self, source: &TrackedSource) -> CycleResult<NaiveDateTime> {
        let last = self
            .store
            .last_patch_date(source.id)
            .map_err(CycleError::Storage)?;
        last.or(source.initial_since).ok_or_else(|| {
            CycleError::Configuration(anyhow!(
                "Project {} on {} was never tested before, configure last_patch_date to start",
                source.source.project_id(),
                source.source.base_url()
            ))
        })
    }

    fn stable_commit(&self) -> CycleResult<String> {
        self.store
            .current_stable_commit(&self.config.baserepo)
            .map_err(CycleError::Storage)?
            .ok_or_else(|| {
                CycleError::Configuration(anyhow!(
                    "No stable baseline known for {}, run a baseline first",
                    self.config.baserepo
                ))
            })
    }

    /// Submit a build of the tip of the baseline branch
    pub async fn submit_baseline(&mut self) -> CycleResult<PendingJob> {
        let params = BuildParams::baseline(
            &self.config.baserepo,
            &self.config.baseref,
            self.config.baseconfig.as_deref(),
            self.config.makeopts.as_deref(),
        );
        let build_id = self
            .executor
            .submit(&params)
            .await
            .map_err(CycleError::Adapter)?;
        let job = self
            .store
            .submit_pending_job_at(self.executor.job_name(), build_id, &[], self.clock.now())
            .map_err(CycleError::Storage)?;
        info!(
            "Submitted baseline {} of {} as build {}",
            self.config.baseref, self.config.baserepo, build_id
        );
        Ok(job)
    }

    /// Pull new series from every source and submit the ones worth testing,
    /// then submit series again whose patches didn't get a result in time.
    pub async fn ingest(&mut self) -> CycleResult<IngestSummary> {
        // resolved before anything is recorded, so nothing is skipped over
        let stable = self.stable_commit()?;
        let mut summary = IngestSummary::default();
        for source in self.sources.clone() {
            self.ingest_source(&source, &stable, &mut summary).await?;
        }
        Ok(summary)
    }

    async fn ingest_source(
        &mut self,
        source: &TrackedSource,
        stable: &str,
        summary: &mut IngestSummary,
    ) -> CycleResult<()> {
        let since = self.checkpoint(source)?;
        debug!("Checking {} for series since {}", source.source.base_url(), since);
        let series = source
            .source
            .list_new_series(since)
            .await
            .map_err(CycleError::Adapter)?;

        let mut candidates = Vec::new();
        for series in series {
            let patches = fetch_patches(source, &series).await?;
            candidates.push((series, patches));
        }
        // oldest first, the checkpoint must never pass a series that wasn't handled yet
        candidates.sort_by_key(|(_, patches)| patches.iter().map(|p| p.date).max());

        for (series, patches) in candidates {
            summary.new_series += 1;
            let verdict = self
                .filter
                .evaluate(&series)
                .await
                .map_err(CycleError::Filter)?;
            match verdict {
                Verdict::Accept => {
                    let build_id = self.submit_series(stable, &series, &patches).await?;
                    summary.submitted.push(build_id);
                }
                Verdict::Reject => {
                    info!("Filter rejected series {:?}", series.subject);
                    self.store
                        .record_patches(&patches)
                        .map_err(CycleError::Storage)?;
                    summary.rejected += 1;
                }
            }
        }

        let expired = self
            .store
            .expired_pending_patches_at(source.id, self.config.expiry, self.clock.now())
            .map_err(CycleError::Storage)?;
        if expired.is_empty() {
            return Ok(());
        }

        info!("Submitting series again for {} expired patches: {:?}", expired.len(), expired);
        let series = source
            .source
            .list_series(&expired)
            .await
            .map_err(CycleError::Adapter)?;
        let mut covered = BTreeSet::new();
        for series in series {
            let patches = fetch_patches(source, &series).await?;
            let build_id = self.submit_series(stable, &series, &patches).await?;
            covered.extend(patches.iter().map(|p| p.id));
            summary.submitted.push(build_id);
            summary.resubmitted += 1;
        }

        // the series is gone from the tracker or no longer eligible
        let dropped = expired
            .into_iter()
            .filter(|id| !covered.contains(id))
            .collect::<Vec<_>>();
        if !dropped.is_empty() {
            warn!("No series left to test expired patches {:?}, dropping them", dropped);
            self.store
                .drop_pending_patches(&dropped)
                .map_err(CycleError::Storage)?;
            summary.dropped += dropped.len();
        }

        Ok(())
    }

    async fn submit_series(
        &mut self,
        stable: &str,
        series: &SeriesSummary,
        patches: &[PatchInfo],
    ) -> CycleResult<BuildId> {
        let params = BuildParams::series(
            &self.config.baserepo,
            stable,
            self.config.baseconfig.as_deref(),
            self.config.makeopts.as_deref(),
            series,
        )
        .map_err(CycleError::Adapter)?;
        let build_id = self
            .executor
            .submit(&params)
            .await
            .map_err(CycleError::Adapter)?;
        let job = self
            .store
            .submit_pending_job_at(self.executor.job_name(), build_id, patches, self.clock.now())
            .map_err(CycleError::Storage)?;
        info!(
            "Submitted series {:?} ({} patches) on {} as build {} (pending job {})",
            series.subject,
            patches.len(),
            stable,
            build_id,
            job.id
        );
        Ok(build_id)
    }

    /// Poll every pending job and fold finished ones into the store.
    ///
    /// A job that fails to reconcile is logged and retried next cycle, it
    /// doesn't keep the other jobs from being processed.
    pub async fn reconcile(&mut self) -> CycleResult<ReconcileSummary> {
        if let Err(err) = self.executor.tick().await {
            warn!("Failed to advance executor: {:#}", err);
        }

        let jobs = self.store.list_pending_jobs().map_err(CycleError::Storage)?;
        let mut summary = ReconcileSummary::default();
        for job in jobs {
            match self.reconcile_job(&job).await {
                Ok(JobState::Submitted) => summary.pending += 1,
                Ok(JobState::Reconciled) => summary.reconciled += 1,
                Ok(JobState::Discarded) => summary.discarded += 1,
                Err(err) => {
                    error!(
                        "Failed to reconcile pending job {} (build {}): {}",
                        job.id, job.build_id, err
                    );
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn reconcile_job(&mut self, job: &PendingJob) -> CycleResult<JobState> {
        if job.job_name != self.executor.job_name() {
            return Err(CycleError::InvariantViolation(format!(
                "pending job {} was submitted to {:?}, not {:?}",
                job.id,
                job.job_name,
                self.executor.job_name()
            )));
        }

        let complete = self
            .executor
            .is_complete(job.build_id)
            .await
            .map_err(CycleError::Adapter)?;
        if !complete {
            trace!("Build {} is still running", job.build_id);
            return Ok(JobState::Submitted);
        }

        let outcome = self
            .executor
            .status(job.build_id)
            .await
            .map_err(CycleError::Adapter)?;
        let patches = self
            .store
            .patches_for_job(job.id)
            .map_err(CycleError::Storage)?;

        match outcome {
            RunOutcome::Aborted if patches.is_empty() => {
                warn!("Baseline build {} was aborted", job.build_id);
                self.store
                    .remove_pending_job(job.id)
                    .map_err(CycleError::Storage)?;
                Ok(JobState::Discarded)
            }
            RunOutcome::Aborted => {
                warn!(
                    "Build {} was aborted, {} patches are going to be submitted again",
                    job.build_id,
                    patches.len()
                );
                self.store
                    .discard_pending_job(job.id)
                    .map_err(CycleError::Storage)?;
                Ok(JobState::Discarded)
            }
            RunOutcome::Finished(report) if patches.is_empty() => {
                self.finish_baseline(job, &report)?;
                Ok(JobState::Reconciled)
            }
            RunOutcome::Finished(report) => {
                self.finish_patches(job, &patches, &report).await?;
                Ok(JobState::Reconciled)
            }
        }
    }

    fn finish_baseline(&self, job: &PendingJob, report: &BuildReport) -> CycleResult<()> {
        match (&report.base_commit, report.commit_date) {
            (Some(commit), Some(commit_date)) => {
                info!("Baseline build {} of {}: {}", job.build_id, commit, report.result);
                self.store
                    .complete_baseline_job(
                        job.id,
                        &self.config.baserepo,
                        commit,
                        commit_date,
                        report.result,
                        job.build_id,
                    )
                    .map_err(CycleError::Storage)?;
            }
            _ => {
                warn!(
                    "Baseline build {} didn't report its base commit, only recording {}",
                    job.build_id, report.result
                );
                self.store
                    .complete_patch_job(job.id, report.result, job.build_id)
                    .map_err(CycleError::Storage)?;
            }
        }
        Ok(())
    }

    async fn finish_patches(
        &self,
        job: &PendingJob,
        patches: &[i64],
        report: &BuildReport,
    ) -> CycleResult<()> {
        info!(
            "Build {} of patches {:?}: {}",
            job.build_id, patches, report.result
        );
        self.store
            .complete_patch_job(job.id, report.result, job.build_id)
            .map_err(CycleError::Storage)?;

        for patch_id in patches {
            if let Err(err) = self.report_check(*patch_id, report).await {
                warn!("Failed to report result for patch {}: {:#}", patch_id, err);
            }
        }
        Ok(())
    }

    /// Publish the result of a patch on the source it came from
    async fn report_check(&self, patch_id: i64, report: &BuildReport) -> Result<()> {
        let patch = self
            .store
            .patch(patch_id)?
            .with_context(|| anyhow!("Patch {} is not known", patch_id))?;
        let source = self
            .sources
            .iter()
            .find(|s| s.id == patch.source_id)
            .with_context(|| anyhow!("Patch {} belongs to an unconfigured source", patch_id))?;
        source
            .source
            .set_patch_check(patch_id, report.result_url.as_deref(), report.result)
            .await
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.executor.shutdown().await
    }
}

async fn fetch_patches(source: &TrackedSource, series: &SeriesSummary) -> CycleResult<Vec<PatchInfo>> {
    let mut patches = Vec::new();
    for patch_id in series.patch_ids() {
        let patch = source
            .source
            .patch_metadata(patch_id)
            .await
            .map_err(CycleError::Adapter)?;
        patches.push(patch);
    }
    Ok(patches)
}
