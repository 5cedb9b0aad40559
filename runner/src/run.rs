use crate::proc::{self, Termination};
use patchgate_common::errors::*;
use patchgate_common::executor::BuildId;
use patchgate_common::utils::join_with_slash;
use patchgate_common::{BuildParams, BuildReport, TestResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use strum::Display;
use tokio::process::Child;

pub const RESULT_FILE: &str = "result.json";
pub const LOG_FILE: &str = "run.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum RunState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed | RunState::Aborted)
    }
}

/// Written by the runner program into its results directory
#[derive(Debug, Deserialize)]
struct ResultFile {
    result: TestResult,
    basehead: Option<String>,
    commitdate: Option<i64>,
}

/// Map an exit code to a result if the runner didn't leave a result file
fn result_from_exit(code: Option<i32>) -> TestResult {
    code.and_then(|c| TestResult::from_ordinal(c).ok())
        .unwrap_or(TestResult::TestFailure)
}

pub struct LocalRun {
    pub id: BuildId,
    params: BuildParams,
    state: RunState,
    dir: PathBuf,
    result_url: String,
    child: Option<Child>,
    report: Option<BuildReport>,
}

impl LocalRun {
    pub fn new(id: BuildId, params: BuildParams, runs_dir: &Path, public_url: &str) -> LocalRun {
        let result_url = join_with_slash(public_url, &[&id.to_string(), "results/"]);
        LocalRun {
            id,
            params,
            state: RunState::Queued,
            dir: runs_dir.join(id.to_string()),
            result_url,
            child: None,
            report: None,
        }
    }

    pub fn work_dir(&self) -> PathBuf {
        self.dir.join("work")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.dir.join("results")
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn report(&self) -> Option<&BuildReport> {
        self.report.as_ref()
    }

    pub fn result_url(&self) -> &str {
        &self.result_url
    }

    pub fn prepare(&self) -> Result<()> {
        fs::create_dir_all(self.work_dir())
            .with_context(|| anyhow!("Failed to create work directory for run {}", self.id))?;
        fs::create_dir_all(self.results_dir())
            .with_context(|| anyhow!("Failed to create results directory for run {}", self.id))?;
        Ok(())
    }

    /// Build parameters as `PATCHGATE_*` environment variables
    pub fn envs(&self) -> BTreeMap<String, String> {
        let mut envs = self
            .params
            .to_map()
            .into_iter()
            .map(|(key, value)| (format!("PATCHGATE_{}", key.to_uppercase()), value))
            .collect::<BTreeMap<_, _>>();
        envs.insert("PATCHGATE_RUN_ID".to_string(), self.id.to_string());
        envs.insert(
            "PATCHGATE_RESULTS_DIR".to_string(),
            self.results_dir().to_string_lossy().into_owned(),
        );
        envs
    }

    pub fn start(&mut self, program: &Path, args: &[String]) {
        let log = self.results_dir().join(LOG_FILE);
        let spawned = self
            .prepare()
            .and_then(|_| proc::spawn(program, args, &self.envs(), &self.work_dir(), &log));
        match spawned {
            Ok(child) => {
                info!("Started run {}", self.id);
                self.child = Some(child);
                self.state = RunState::Running;
            }
            Err(err) => {
                error!("Failed to start run {}: {:#}", self.id, err);
                self.state = RunState::Aborted;
            }
        }
    }

    /// Check if the process exited, returns true if the run finished just now
    pub fn poll(&mut self) -> Result<bool> {
        let Some(child) = self.child.as_mut() else {
            return Ok(false);
        };
        let Some(status) = child.try_wait()? else {
            return Ok(false);
        };
        self.child = None;
        info!("Run {} exited with {}", self.id, status);
        self.finish(status.code());
        Ok(true)
    }

    fn finish(&mut self, code: Option<i32>) {
        let path = self.results_dir().join(RESULT_FILE);
        let file = match fs::read(&path) {
            Ok(buf) => match serde_json::from_slice::<ResultFile>(&buf) {
                Ok(file) => Some(file),
                Err(err) => {
                    warn!("Ignoring invalid result file of run {}: {:#}", self.id, err);
                    None
                }
            },
            Err(_) => None,
        };

        let report = match file {
            Some(file) => BuildReport {
                result: file.result,
                base_commit: file.basehead,
                commit_date: file.commitdate,
                result_url: Some(self.result_url.clone()),
            },
            None => BuildReport {
                result: result_from_exit(code),
                base_commit: None,
                commit_date: None,
                result_url: Some(self.result_url.clone()),
            },
        };

        self.state = if report.result.is_success() {
            RunState::Succeeded
        } else {
            RunState::Failed
        };
        info!("Run {} finished: {}", self.id, report.result);
        self.report = Some(report);
    }

    /// Cancel the run, returning the process that still needs to be reaped
    pub fn abort(&mut self) -> Result<Option<Termination>> {
        if self.state.is_terminal() {
            return Ok(None);
        }
        info!("Aborting run {} ({})", self.id, self.state);
        self.state = RunState::Aborted;
        match self.child.take() {
            Some(child) => Ok(Some(Termination::start(child)?)),
            None => Ok(None),
        }
    }
}
