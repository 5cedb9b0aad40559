use async_trait::async_trait;
use chrono::prelude::*;
use chrono::Duration;
use patchgate::engine::Clock;
use patchgate::filter::{SeriesFilter, Verdict};
use patchgate_common::errors::*;
use patchgate_common::executor::{BuildId, Executor};
use patchgate_common::source::PatchSource;
use patchgate_common::{BuildParams, BuildReport, PatchInfo, RunOutcome, SeriesSummary, TestResult};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedCheck {
    pub patch_id: i64,
    pub result_url: Option<String>,
    pub result: TestResult,
}

#[derive(Debug, Default)]
struct SourceState {
    series: Vec<(SeriesSummary, Vec<PatchInfo>)>,
    polled_since: Vec<NaiveDateTime>,
    checks: Vec<ReportedCheck>,
    fail_checks: bool,
}

/// An in-memory patchwork project, clones share their state
#[derive(Debug, Clone)]
pub struct FakeSource {
    base_url: String,
    project_id: i64,
    state: Arc<Mutex<SourceState>>,
}

impl FakeSource {
    pub fn new(base_url: &str, project_id: i64) -> FakeSource {
        FakeSource {
            base_url: base_url.to_string(),
            project_id,
            state: Arc::default(),
        }
    }

    pub fn publish(&self, series: SeriesSummary, patches: Vec<PatchInfo>) {
        self.state.lock().unwrap().series.push((series, patches));
    }

    pub fn polled_since(&self) -> Vec<NaiveDateTime> {
        self.state.lock().unwrap().polled_since.clone()
    }

    pub fn checks(&self) -> Vec<ReportedCheck> {
        self.state.lock().unwrap().checks.clone()
    }

    pub fn fail_checks(&self, fail: bool) {
        self.state.lock().unwrap().fail_checks = fail;
    }
}

#[async_trait]
impl PatchSource for FakeSource {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn project_id(&self) -> i64 {
        self.project_id
    }

    async fn list_new_series(&self, since: NaiveDateTime) -> Result<Vec<SeriesSummary>> {
        let mut state = self.state.lock().unwrap();
        state.polled_since.push(since);
        let series = state
            .series
            .iter()
            .filter(|(_, patches)| patches.iter().any(|p| p.date > since))
            .map(|(series, _)| series.clone())
            .collect();
        Ok(series)
    }

    async fn list_series(&self, patch_ids: &[i64]) -> Result<Vec<SeriesSummary>> {
        let state = self.state.lock().unwrap();
        let series = state
            .series
            .iter()
            .filter(|(series, _)| series.patch_ids().iter().any(|id| patch_ids.contains(id)))
            .map(|(series, _)| series.clone())
            .collect();
        Ok(series)
    }

    async fn patch_metadata(&self, patch_id: i64) -> Result<PatchInfo> {
        let state = self.state.lock().unwrap();
        state
            .series
            .iter()
            .flat_map(|(_, patches)| patches.iter())
            .find(|p| p.id == patch_id)
            .cloned()
            .with_context(|| anyhow!("Patch not found: {}", patch_id))
    }

    async fn set_patch_check(&self, patch_id: i64, result_url: Option<&str>, result: TestResult) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_checks {
            bail!("502 Bad Gateway");
        }
        state.checks.push(ReportedCheck {
            patch_id,
            result_url: result_url.map(String::from),
            result,
        });
        Ok(())
    }
}

#[derive(Debug)]
struct ExecutorState {
    next_id: BuildId,
    submitted: Vec<(BuildId, BuildParams)>,
    outcomes: BTreeMap<BuildId, RunOutcome>,
    fail_submit: bool,
    ticks: usize,
    shut_down: bool,
}

impl Default for ExecutorState {
    fn default() -> ExecutorState {
        ExecutorState {
            next_id: 1,
            submitted: Vec::new(),
            outcomes: BTreeMap::new(),
            fail_submit: false,
            ticks: 0,
            shut_down: false,
        }
    }
}

/// Hands out sequential build ids, builds only finish when a test says so
#[derive(Debug, Clone)]
pub struct FakeExecutor {
    job_name: String,
    state: Arc<Mutex<ExecutorState>>,
}

impl FakeExecutor {
    pub fn new(job_name: &str) -> FakeExecutor {
        FakeExecutor {
            job_name: job_name.to_string(),
            state: Arc::default(),
        }
    }

    pub fn submitted(&self) -> Vec<(BuildId, BuildParams)> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn params(&self, build_id: BuildId) -> BuildParams {
        self.submitted()
            .into_iter()
            .find(|(id, _)| *id == build_id)
            .map(|(_, params)| params)
            .unwrap()
    }

    pub fn finish(&self, build_id: BuildId, report: BuildReport) {
        self.state
            .lock()
            .unwrap()
            .outcomes
            .insert(build_id, RunOutcome::Finished(report));
    }

    pub fn abort(&self, build_id: BuildId) {
        self.state
            .lock()
            .unwrap()
            .outcomes
            .insert(build_id, RunOutcome::Aborted);
    }

    pub fn fail_submit(&self, fail: bool) {
        self.state.lock().unwrap().fail_submit = fail;
    }

    pub fn ticks(&self) -> usize {
        self.state.lock().unwrap().ticks
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().unwrap().shut_down
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    fn job_name(&self) -> &str {
        &self.job_name
    }

    async fn tick(&mut self) -> Result<()> {
        self.state.lock().unwrap().ticks += 1;
        Ok(())
    }

    async fn submit(&mut self, params: &BuildParams) -> Result<BuildId> {
        let mut state = self.state.lock().unwrap();
        if state.fail_submit {
            bail!("Connection refused");
        }
        let id = state.next_id;
        state.next_id += 1;
        state.submitted.push((id, params.clone()));
        Ok(id)
    }

    async fn is_complete(&mut self, build_id: BuildId) -> Result<bool> {
        let state = self.state.lock().unwrap();
        if !state.submitted.iter().any(|(id, _)| *id == build_id) {
            bail!("Unknown build: {}", build_id);
        }
        Ok(state.outcomes.contains_key(&build_id))
    }

    async fn status(&mut self, build_id: BuildId) -> Result<RunOutcome> {
        let state = self.state.lock().unwrap();
        state
            .outcomes
            .get(&build_id)
            .cloned()
            .with_context(|| anyhow!("Build {} is still running", build_id))
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.state.lock().unwrap().shut_down = true;
        Ok(())
    }
}

/// A clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> ManualClock {
        ManualClock {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn advance(&self, secs: i64) {
        let mut now = self.now.lock().unwrap();
        *now += Duration::seconds(secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// A filter with a fixed answer, `None` fails like a crashing filter program
#[derive(Debug, Clone, Copy)]
pub struct FixedFilter(pub Option<Verdict>);

#[async_trait]
impl SeriesFilter for FixedFilter {
    async fn evaluate(&self, series: &SeriesSummary) -> Result<Verdict> {
        self.0
            .with_context(|| anyhow!("Filter exited with 127 for {:?}", series.subject))
    }
}
