use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::filter::{AcceptAll, ProgramFilter, SeriesFilter};
use crate::jenkins::JenkinsProject;
use crate::patchwork::PatchworkProject;
use crate::store::Store;
use patchgate_common::config::{ConfigFile, ExecutorKind};
use patchgate_common::errors::*;
use patchgate_common::executor::{BuildId, Executor};
use patchgate_runner::LocalScheduler;
use std::future::Future;
use std::time::Duration;
use tokio::signal;
use tokio::time::{self, MissedTickBehavior};

pub mod config;
pub mod db;
pub mod engine;
pub mod filter;
pub mod jenkins;
pub mod models;
pub mod patchwork;
pub mod schema;
pub mod store;
pub mod testinfo;

pub fn executor(config: &ConfigFile) -> Result<Box<dyn Executor>> {
    let executor: Box<dyn Executor> = match config.executor.kind() {
        ExecutorKind::Jenkins => Box::new(JenkinsProject::new(&config.jenkins)?),
        ExecutorKind::Local => Box::new(LocalScheduler::new(&config.local)?),
    };
    Ok(executor)
}

pub fn filter(config: &ConfigFile) -> Box<dyn SeriesFilter> {
    match &config.filter.path {
        Some(path) => Box::new(ProgramFilter::new(path.clone(), config.filter.args.clone())),
        None => Box::new(AcceptAll),
    }
}

/// Builds of the local executor are stopped when patchgate exits, so one-shot
/// commands have to wait for them
pub fn check_one_shot(config: &ConfigFile, wait: bool) -> Result<()> {
    if !wait && config.executor.kind() == ExecutorKind::Local {
        bail!("The local executor stops its builds on exit, wait for the result or use `patchgate run`");
    }
    Ok(())
}

/// Assemble an engine with every configured patchwork project
pub async fn setup_engine(config: &ConfigFile, store: Store) -> Result<Engine> {
    let engine_config = EngineConfig::from_config(config)?;
    let mut engine = Engine::new(store, executor(config)?, filter(config), engine_config);

    for pw in &config.patchwork {
        let project = PatchworkProject::connect(pw)
            .await
            .with_context(|| anyhow!("Failed to connect to patchwork project {:?} on {}", pw.project, pw.url))?;
        engine.add_source(Box::new(project), pw.last_patch_date)?;
    }

    Ok(engine)
}

/// One polling pass, only unrecoverable errors are returned
pub async fn cycle(engine: &mut Engine) -> Result<()> {
    match engine.reconcile().await {
        Ok(summary) => debug!("Reconciled pending jobs: {:?}", summary),
        Err(err) if err.is_fatal() => return Err(err.into()),
        Err(err) => error!("Reconciliation failed: {}", err),
    }

    match engine.ingest().await {
        Ok(summary) => debug!("Ingested series: {:?}", summary),
        Err(err) if err.is_fatal() => return Err(err.into()),
        Err(err) => error!("Ingesting series failed: {}", err),
    }

    Ok(())
}

pub async fn submit_baseline(engine: &mut Engine) -> Result<()> {
    match engine.submit_baseline().await {
        Ok(job) => {
            debug!("Baseline is pending as job {}", job.id);
            Ok(())
        }
        Err(err) if err.is_fatal() => Err(err.into()),
        Err(err) => {
            error!("Failed to submit baseline: {}", err);
            Ok(())
        }
    }
}

/// Reconcile until the given pending job is gone
pub async fn wait_for_job(engine: &mut Engine, job_id: i32, poll_interval: Duration) -> Result<()> {
    loop {
        engine.reconcile().await?;
        if engine.store().pending_job(job_id)?.is_none() {
            return Ok(());
        }
        debug!("Job {} is still pending, sleeping for {:?}", job_id, poll_interval);
        time::sleep(poll_interval).await;
    }
}

/// Reconcile until none of the given builds is pending anymore
pub async fn wait_for_builds(engine: &mut Engine, build_ids: &[BuildId], poll_interval: Duration) -> Result<()> {
    loop {
        engine.reconcile().await?;
        let waiting = engine
            .store()
            .list_pending_jobs()?
            .into_iter()
            .filter(|job| job.job_name == engine.job_name() && build_ids.contains(&job.build_id))
            .map(|job| job.build_id)
            .collect::<Vec<_>>();
        if waiting.is_empty() {
            return Ok(());
        }
        debug!("Builds {:?} are still pending, sleeping for {:?}", waiting, poll_interval);
        time::sleep(poll_interval).await;
    }
}

pub async fn run(engine: Engine, poll_interval: Duration, baseline_interval: Duration) -> Result<()> {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received ctrl-c, shutting down"),
            Err(err) => error!("Failed to listen for ctrl-c, shutting down: {}", err),
        }
    };
    run_until(engine, poll_interval, baseline_interval, ctrl_c).await
}

/// Poll and refresh the baseline until `shutdown` completes
pub async fn run_until<F>(
    mut engine: Engine,
    poll_interval: Duration,
    baseline_interval: Duration,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut poll = time::interval(poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut baseline = time::interval(baseline_interval);
    baseline.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let result = loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break Ok(()),
            _ = baseline.tick() => {
                if let Err(err) = submit_baseline(&mut engine).await {
                    break Err(err);
                }
            }
            _ = poll.tick() => {
                if let Err(err) = cycle(&mut engine).await {
                    break Err(err);
                }
            }
        }
    };

    match engine.store().list_pending_jobs() {
        Ok(jobs) if !jobs.is_empty() => {
            let ids = jobs.iter().map(|job| job.id).collect::<Vec<_>>();
            info!("Leaving {} jobs pending: {:?}", ids.len(), ids);
        }
        Ok(_) => (),
        Err(err) => warn!("Failed to list pending jobs: {:#}", err),
    }

    if let Err(err) = engine.shutdown().await {
        warn!("Failed to shut down executor: {:#}", err);
    }
    result
}
