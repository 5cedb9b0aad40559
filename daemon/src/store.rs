use crate::db::{self, Pool, PooledConnection};
use crate::models::*;
use chrono::prelude::*;
use diesel::Connection;
use patchgate_common::errors::*;
use patchgate_common::{PatchInfo, TestResult};
use std::collections::BTreeSet;

/// Persistent state of the orchestrator.
///
/// Operations touching more than one row run in a transaction.
#[derive(Clone)]
pub struct Store {
    pool: Pool,
}

/// Summary of what's known about a baseline repo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoInfo {
    pub url: String,
    pub stable: Option<Baseline>,
    pub latest: Option<(Baseline, TestResult)>,
}

impl Store {
    pub fn new(pool: Pool) -> Store {
        Store { pool }
    }

    pub fn open(url: &str) -> Result<Store> {
        let pool = db::setup_pool(url)?;
        Ok(Store::new(pool))
    }

    fn connection(&self) -> Result<PooledConnection> {
        let connection = self.pool.get()?;
        Ok(connection)
    }

    /// Returns the id of the (base url, project) pair, registering it if needed
    pub fn upsert_patch_source(&self, baseurl: &str, project_id: i64) -> Result<i32> {
        let mut connection = self.connection()?;
        let source = NewSource { baseurl, project_id }.upsert(&mut connection)?;
        Ok(source.id)
    }

    /// Insert or refresh tracker metadata of patches
    pub fn record_patches(&self, patches: &[PatchInfo]) -> Result<()> {
        let mut connection = self.connection()?;
        connection.transaction::<(), Error, _>(|connection| {
            record_patches(patches, connection)?;
            Ok(())
        })
    }

    pub fn patch(&self, patch_id: i64) -> Result<Option<Patch>> {
        let mut connection = self.connection()?;
        Patch::get_id(patch_id, &mut connection)
    }

    pub fn last_patch_date(&self, source_id: i32) -> Result<Option<NaiveDateTime>> {
        let mut connection = self.connection()?;
        Patch::last_date(source_id, &mut connection)
    }

    /// Track a freshly submitted build together with the patches it tests.
    ///
    /// The patches are recorded and marked pending for the new job in the same
    /// transaction. Patches that were pending under an older job move over, and
    /// older jobs left without any patch are dropped so they can't be mistaken
    /// for baseline jobs.
    pub fn submit_pending_job(&self, job_name: &str, build_id: i64, patches: &[PatchInfo]) -> Result<PendingJob> {
        self.submit_pending_job_at(job_name, build_id, patches, Utc::now())
    }

    pub fn submit_pending_job_at(
        &self,
        job_name: &str,
        build_id: i64,
        patches: &[PatchInfo],
        now: DateTime<Utc>,
    ) -> Result<PendingJob> {
        let mut connection = self.connection()?;
        connection.transaction::<_, Error, _>(|connection| {
            record_patches(patches, connection)?;

            let job = NewPendingJob { job_name, build_id }.insert(connection)?;
            if patches.is_empty() {
                return Ok(job);
            }

            let patch_ids = patches.iter().map(|p| p.id).collect::<Vec<_>>();
            let previous = PendingPatch::owners(&patch_ids, connection)?;
            mark_patches_pending(job.id, &patch_ids, now, connection)?;

            for orphan in PendingJob::delete_orphaned(&previous, connection)? {
                info!("Pending job {} was superseded by job {} (build {})", orphan, job.id, build_id);
            }

            Ok(job)
        })
    }

    pub fn create_pending_job(&self, job_name: &str, build_id: i64) -> Result<PendingJob> {
        let mut connection = self.connection()?;
        NewPendingJob { job_name, build_id }.insert(&mut connection)
    }

    /// Associate patches with a pending job, moving them over if another job owned them
    pub fn mark_patches_pending(&self, job_id: i32, patch_ids: &[i64]) -> Result<()> {
        self.mark_patches_pending_at(job_id, patch_ids, Utc::now())
    }

    pub fn mark_patches_pending_at(&self, job_id: i32, patch_ids: &[i64], now: DateTime<Utc>) -> Result<()> {
        let mut connection = self.connection()?;
        connection.transaction::<(), Error, _>(|connection| {
            mark_patches_pending(job_id, patch_ids, now, connection)
        })
    }

    pub fn list_pending_jobs(&self) -> Result<Vec<PendingJob>> {
        let mut connection = self.connection()?;
        PendingJob::list(&mut connection)
    }

    pub fn pending_job(&self, job_id: i32) -> Result<Option<PendingJob>> {
        let mut connection = self.connection()?;
        PendingJob::get_id(job_id, &mut connection)
    }

    pub fn patches_for_job(&self, job_id: i32) -> Result<Vec<i64>> {
        let mut connection = self.connection()?;
        PendingPatch::list_for_job(job_id, &mut connection)
    }

    pub fn pending_since(&self, job_id: i32) -> Result<Option<i64>> {
        let mut connection = self.connection()?;
        PendingPatch::pending_since(job_id, &mut connection)
    }

    pub fn pending_patch(&self, patch_id: i64) -> Result<Option<PendingPatch>> {
        let mut connection = self.connection()?;
        PendingPatch::get_patch(patch_id, &mut connection)
    }

    /// Forget a reconciled job and its pending patches
    pub fn remove_pending_job(&self, job_id: i32) -> Result<()> {
        let mut connection = self.connection()?;
        connection.transaction::<(), Error, _>(|connection| remove_pending_job(job_id, connection))
    }

    /// Record the result of a patch job and forget about the job
    pub fn complete_patch_job(&self, job_id: i32, result: TestResult, build_id: i64) -> Result<i32> {
        let mut connection = self.connection()?;
        connection.transaction::<_, Error, _>(|connection| {
            let run = NewTestRun::new(result, build_id).insert(connection)?;
            remove_pending_job(job_id, connection)?;
            Ok(run.id)
        })
    }

    /// Record the result of a baseline job and forget about the job
    pub fn complete_baseline_job(
        &self,
        job_id: i32,
        repo_url: &str,
        commit_id: &str,
        commit_date: i64,
        result: TestResult,
        build_id: i64,
    ) -> Result<()> {
        let mut connection = self.connection()?;
        connection.transaction::<(), Error, _>(|connection| {
            update_baseline(repo_url, commit_id, commit_date, result, build_id, connection)?;
            remove_pending_job(job_id, connection)
        })
    }

    /// Forget an aborted job but keep its patches pending so they're retested
    pub fn discard_pending_job(&self, job_id: i32) -> Result<()> {
        let mut connection = self.connection()?;
        connection.transaction::<(), Error, _>(|connection| {
            let patches = PendingPatch::detach_from_job(job_id, connection)?;
            PendingJob::delete_id(job_id, connection)?;
            debug!("Discarded pending job {}, {} patches are due for resubmission", job_id, patches);
            Ok(())
        })
    }

    /// Stop tracking patches that can't be submitted again.
    ///
    /// Jobs left without any patch are dropped with them.
    pub fn drop_pending_patches(&self, patch_ids: &[i64]) -> Result<()> {
        let mut connection = self.connection()?;
        connection.transaction::<(), Error, _>(|connection| {
            let owners = PendingPatch::owners(patch_ids, connection)?;
            let n = PendingPatch::delete_patches(patch_ids, connection)?;
            debug!("Dropped {} pending patches", n);
            for orphan in PendingJob::delete_orphaned(&owners, connection)? {
                info!("Pending job {} has no patches left, dropping it", orphan);
            }
            Ok(())
        })
    }

    /// Patches of a source that were pending for at least `window` seconds
    pub fn expired_pending_patches(&self, source_id: i32, window: i64) -> Result<Vec<i64>> {
        self.expired_pending_patches_at(source_id, window, Utc::now())
    }

    pub fn expired_pending_patches_at(&self, source_id: i32, window: i64, now: DateTime<Utc>) -> Result<Vec<i64>> {
        let mut connection = self.connection()?;
        let deadline = now.timestamp() - window;
        PendingPatch::expired(source_id, deadline, &mut connection)
    }

    /// Record the result of a baseline build.
    ///
    /// The run is always stored. An existing baseline only moves over to it if
    /// the new result is at least as bad as the one it points at.
    pub fn update_baseline(
        &self,
        repo_url: &str,
        commit_id: &str,
        commit_date: i64,
        result: TestResult,
        build_id: i64,
    ) -> Result<()> {
        let mut connection = self.connection()?;
        connection.transaction::<(), Error, _>(|connection| {
            update_baseline(repo_url, commit_id, commit_date, result, build_id, connection)
        })
    }

    /// The newest commit of `repo_url` known to pass its baseline test
    pub fn current_stable_commit(&self, repo_url: &str) -> Result<Option<String>> {
        let mut connection = self.connection()?;
        let Some(repo) = Repo::get_by_url(repo_url, &mut connection)? else {
            return Ok(None);
        };
        let stable = Baseline::stable(repo.id, &mut connection)?;
        Ok(stable.map(|b| b.commit_id))
    }

    pub fn repo_info(&self) -> Result<Vec<RepoInfo>> {
        let mut connection = self.connection()?;
        let mut out = Vec::new();
        for repo in Repo::list(&mut connection)? {
            let stable = Baseline::stable(repo.id, &mut connection)?;
            let latest = match Baseline::latest(repo.id, &mut connection)? {
                Some((baseline, run)) => Some((baseline, run.result()?)),
                None => None,
            };
            out.push(RepoInfo {
                url: repo.url,
                stable,
                latest,
            });
        }
        Ok(out)
    }

    pub fn list_patch_sources(&self) -> Result<Vec<(Source, Option<NaiveDateTime>)>> {
        let mut connection = self.connection()?;
        let mut out = Vec::new();
        for source in Source::list(&mut connection)? {
            let last = Patch::last_date(source.id, &mut connection)?;
            out.push((source, last));
        }
        Ok(out)
    }

    pub fn counts(&self) -> Result<(i64, i64, i64)> {
        let mut connection = self.connection()?;
        let patches = Patch::count(&mut connection)?;
        let pending = PendingPatch::count(&mut connection)?;
        let runs = TestRun::count(&mut connection)?;
        Ok((patches, pending, runs))
    }
}

fn update_baseline(
    repo_url: &str,
    commit_id: &str,
    commit_date: i64,
    result: TestResult,
    build_id: i64,
    connection: &mut diesel::SqliteConnection,
) -> Result<()> {
    let repo = NewRepo { url: repo_url }.upsert(connection)?;
    let run = NewTestRun::new(result, build_id).insert(connection)?;

    match Baseline::get_with_run(repo.id, commit_id, connection)? {
        None => {
            NewBaseline {
                repo_id: repo.id,
                commit_id,
                commit_date,
                testrun_id: run.id,
            }
            .insert(connection)?;
            info!("New baseline {} for {}: {}", commit_id, repo_url, result);
        }
        Some((baseline, previous)) => {
            let previous = previous.result()?;
            if result.may_replace(previous) {
                baseline.set_testrun(run.id, connection)?;
                info!("Baseline {} for {}: {} -> {}", commit_id, repo_url, previous, result);
            } else {
                info!(
                    "Keeping {} for baseline {} of {}, ignoring {}",
                    previous, commit_id, repo_url, result
                );
            }
        }
    }
    Ok(())
}

fn remove_pending_job(job_id: i32, connection: &mut diesel::SqliteConnection) -> Result<()> {
    let patches = PendingPatch::delete_for_job(job_id, connection)?;
    PendingJob::delete_id(job_id, connection)?;
    debug!("Removed pending job {} with {} patches", job_id, patches);
    Ok(())
}

fn record_patches(patches: &[PatchInfo], connection: &mut diesel::SqliteConnection) -> Result<()> {
    let mut sources = Vec::<(String, i64, i32)>::new();
    for info in patches {
        let known = sources
            .iter()
            .find(|(baseurl, project_id, _)| *baseurl == info.baseurl && *project_id == info.project_id)
            .map(|(_, _, id)| *id);
        let source_id = match known {
            Some(id) => id,
            None => {
                let source = NewSource {
                    baseurl: &info.baseurl,
                    project_id: info.project_id,
                }
                .upsert(connection)?;
                sources.push((info.baseurl.clone(), info.project_id, source.id));
                source.id
            }
        };
        NewPatch::new(info, source_id).upsert(connection)?;
    }
    Ok(())
}

fn mark_patches_pending(
    job_id: i32,
    patch_ids: &[i64],
    now: DateTime<Utc>,
    connection: &mut diesel::SqliteConnection,
) -> Result<()> {
    let unique = patch_ids.iter().collect::<BTreeSet<_>>();
    for patch_id in unique {
        NewPendingPatch {
            patch_id: *patch_id,
            pendingjob_id: Some(job_id),
            timestamp: now.timestamp(),
        }
        .upsert(connection)?;
    }
    Ok(())
}
