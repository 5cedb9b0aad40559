use crate::proc::Termination;
use crate::run::{LocalRun, RunState};
use async_trait::async_trait;
use patchgate_common::config::LocalConfig;
use patchgate_common::errors::*;
use patchgate_common::executor::{BuildId, Executor};
use patchgate_common::{BuildParams, RunOutcome};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

pub const JOB_NAME: &str = "local";

/// Runs builds as local processes, at most `max_parallel` at a time.
///
/// Runs are admitted in submission order. Ids continue after the highest run
/// directory that already exists, so results of earlier daemons stay put.
pub struct LocalScheduler {
    program: PathBuf,
    args: Vec<String>,
    runs_dir: PathBuf,
    public_url: String,
    max_parallel: usize,
    next_id: BuildId,
    runs: BTreeMap<BuildId, LocalRun>,
    queue: VecDeque<BuildId>,
    terminating: Vec<Termination>,
}

fn highest_run_id(runs_dir: &Path) -> Result<Option<BuildId>> {
    let mut highest = None;
    for entry in fs::read_dir(runs_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(id) = entry.file_name().to_str().and_then(|s| s.parse::<BuildId>().ok()) {
            highest = highest.max(Some(id));
        }
    }
    Ok(highest)
}

impl LocalScheduler {
    pub fn new(config: &LocalConfig) -> Result<LocalScheduler> {
        let program = config.runner.clone().context("No local runner program configured")?;
        let runs_dir = config.runs_dir.clone().context("No runs directory configured")?;
        let public_url = config.public_url.clone().context("No public url for runs configured")?;
        LocalScheduler::with_options(program, config.runner_args.clone(), runs_dir, public_url, config.max_parallel())
    }

    pub fn with_options(
        program: PathBuf,
        args: Vec<String>,
        runs_dir: PathBuf,
        public_url: String,
        max_parallel: usize,
    ) -> Result<LocalScheduler> {
        if max_parallel == 0 {
            bail!("max_parallel needs to be at least 1");
        }
        fs::create_dir_all(&runs_dir)
            .with_context(|| anyhow!("Failed to create runs directory {:?}", runs_dir))?;
        let next_id = highest_run_id(&runs_dir)?.map_or(1, |id| id + 1);
        debug!("Next local run id is {}", next_id);

        Ok(LocalScheduler {
            program,
            args,
            runs_dir,
            public_url,
            max_parallel,
            next_id,
            runs: BTreeMap::new(),
            queue: VecDeque::new(),
            terminating: Vec::new(),
        })
    }

    pub fn submit(&mut self, params: BuildParams) -> Result<BuildId> {
        let id = self.next_id;
        self.next_id += 1;

        let run = LocalRun::new(id, params, &self.runs_dir, &self.public_url);
        run.prepare()?;
        info!("Queued run {}", id);
        self.runs.insert(id, run);
        self.queue.push_back(id);

        self.admit();
        Ok(id)
    }

    /// Reap finished processes and start queued runs in their place
    pub fn tick(&mut self) -> Result<()> {
        for run in self.runs.values_mut() {
            if run.state() == RunState::Running {
                if let Err(err) = run.poll() {
                    error!("Failed to check on run {}: {:#}", run.id, err);
                }
            }
        }

        let mut still_terminating = Vec::new();
        for mut termination in self.terminating.drain(..) {
            match termination.poll() {
                Ok(true) => (),
                Ok(false) => still_terminating.push(termination),
                Err(err) => {
                    warn!("Failed to terminate aborted run: {:#}", err);
                    still_terminating.push(termination);
                }
            }
        }
        self.terminating = still_terminating;

        self.admit();
        Ok(())
    }

    fn admit(&mut self) {
        while self.running().len() < self.max_parallel {
            let Some(id) = self.queue.pop_front() else {
                break;
            };
            if let Some(run) = self.runs.get_mut(&id) {
                run.start(&self.program, &self.args);
            }
        }
    }

    /// Cancel a run, freeing its slot for the next queued one right away
    pub fn abort(&mut self, id: BuildId) -> Result<()> {
        let run = self
            .runs
            .get_mut(&id)
            .with_context(|| anyhow!("Unknown run: {}", id))?;
        if let Some(termination) = run.abort()? {
            self.terminating.push(termination);
        }
        self.queue.retain(|queued| *queued != id);

        self.admit();
        Ok(())
    }

    pub fn state(&self, id: BuildId) -> Option<RunState> {
        self.runs.get(&id).map(LocalRun::state)
    }

    pub fn running(&self) -> Vec<BuildId> {
        self.runs
            .values()
            .filter(|run| run.state() == RunState::Running)
            .map(|run| run.id)
            .collect()
    }

    pub fn queued(&self) -> Vec<BuildId> {
        self.queue.iter().copied().collect()
    }
}

#[async_trait]
impl Executor for LocalScheduler {
    fn job_name(&self) -> &str {
        JOB_NAME
    }

    async fn tick(&mut self) -> Result<()> {
        LocalScheduler::tick(self)
    }

    async fn submit(&mut self, params: &BuildParams) -> Result<BuildId> {
        LocalScheduler::submit(self, params.clone())
    }

    async fn is_complete(&mut self, build_id: BuildId) -> Result<bool> {
        // unknown runs belong to an earlier daemon and are reported as aborted
        Ok(self.state(build_id).map_or(true, RunState::is_terminal))
    }

    async fn status(&mut self, build_id: BuildId) -> Result<RunOutcome> {
        let Some(run) = self.runs.get(&build_id) else {
            warn!("Run {} is unknown, treating it as aborted", build_id);
            return Ok(RunOutcome::Aborted);
        };
        let outcome = match (run.state(), run.report()) {
            (RunState::Aborted, _) => RunOutcome::Aborted,
            (RunState::Succeeded | RunState::Failed, Some(report)) => RunOutcome::Finished(report.clone()),
            (state, _) => bail!("Run {} is not complete: {}", build_id, state),
        };
        // handed over, the results directory keeps the rest
        self.runs.remove(&build_id);
        debug!("Forgot about run {}, {} runs left", build_id, self.runs.len());
        Ok(outcome)
    }

    async fn shutdown(&mut self) -> Result<()> {
        let active = self
            .runs
            .values()
            .filter(|run| !run.state().is_terminal())
            .map(|run| run.id)
            .collect::<Vec<_>>();
        for id in active {
            self.abort(id)?;
        }
        for termination in self.terminating.drain(..) {
            termination.wait().await?;
        }
        Ok(())
    }
}
