use async_trait::async_trait;
use patchgate_common::config::JenkinsConfig;
use patchgate_common::errors::*;
use patchgate_common::executor::{BuildId, Executor};
use patchgate_common::utils::join_with_slash;
use patchgate_common::{BuildParams, BuildReport, RunOutcome, TestResult};
use reqwest::header::LOCATION;
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use std::time::Duration;

const QUEUE_POLL_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct QueueExecutable {
    number: i64,
}

#[derive(Debug, Deserialize)]
struct QueueItem {
    #[serde(default)]
    cancelled: bool,
    executable: Option<QueueExecutable>,
}

#[derive(Debug, Deserialize)]
struct BuildInfo {
    building: bool,
    result: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub class_name: String,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub stdout: Option<String>,
}

impl TestCase {
    fn key(&self) -> String {
        format!("{}.{}", self.class_name, self.name)
    }

    fn failed(&self) -> bool {
        self.status == "FAILED" || self.status == "REGRESSION"
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestSuite {
    #[serde(default)]
    pub cases: Vec<TestCase>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestReport {
    #[serde(default)]
    pub suites: Vec<TestSuite>,
}

impl TestReport {
    fn cases(&self) -> impl Iterator<Item = &TestCase> {
        self.suites.iter().flat_map(|s| s.cases.iter())
    }

    fn case(&self, key: &str) -> Option<&TestCase> {
        self.cases().find(|c| c.key() == key)
    }

    /// A value from the json printed by one of the test steps
    fn step_data(&self, step: &str, key: &str) -> Option<serde_json::Value> {
        let stdout = self.case(step)?.stdout.as_deref()?;
        match serde_json::from_str::<serde_json::Value>(stdout) {
            Ok(data) => data.get(key).cloned(),
            Err(err) => {
                debug!("Output of {} is not json: {:#}", step, err);
                None
            }
        }
    }

    pub fn base_commit(&self) -> Option<String> {
        match self.step_data("skt.cmd_merge", "basehead")? {
            serde_json::Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn commit_date(&self) -> Option<i64> {
        match self.step_data("skt.cmd_merge", "commitdate")? {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn base_retcode(&self) -> i64 {
        match self.step_data("skt.cmd_run", "baseretcode") {
            Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or(0),
            Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }
}

/// Map the overall status of a build and its test report to a result
pub fn classify(status: &str, report: Option<&TestReport>) -> Result<TestResult> {
    if status == "SUCCESS" {
        return Ok(TestResult::Success);
    }

    let report = report.with_context(|| anyhow!("No results for build ({})", status))?;

    let run_passed = report
        .case("skt.cmd_run")
        .map_or(false, |c| c.status == "PASSED" || c.status == "FIXED");
    if status == "UNSTABLE" && run_passed {
        if report.base_retcode() != 0 {
            warn!("Baseline failure found during patch testing");
            return Ok(TestResult::BaselineFailure);
        }
        return Ok(TestResult::Success);
    }

    for case in report.cases() {
        let key = case.key();
        if !key.starts_with("skt.") {
            trace!("Skipping test case {}: {}", key, case.status);
            continue;
        }
        if case.failed() {
            match key.as_str() {
                "skt.cmd_merge" => return Ok(TestResult::MergeFailure),
                "skt.cmd_build" => return Ok(TestResult::BuildFailure),
                "skt.cmd_run" => return Ok(TestResult::TestFailure),
                _ => (),
            }
        }
    }

    warn!("Unknown build status {:?}, marking as test failure", status);
    Ok(TestResult::TestFailure)
}

/// A parameterized job on a jenkins instance
pub struct JenkinsProject {
    client: reqwest::Client,
    url: String,
    job: String,
    username: Option<String>,
    password: Option<String>,
    retry_count: u32,
}

impl JenkinsProject {
    pub fn new(config: &JenkinsConfig) -> Result<JenkinsProject> {
        let url = config
            .url
            .clone()
            .context("No jenkins url configured")?;
        let job = config
            .job
            .clone()
            .context("No jenkins job configured")?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("patchgate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(JenkinsProject {
            client,
            url: url.trim_end_matches('/').to_string(),
            job,
            username: config.username.clone(),
            password: config.password.clone(),
            retry_count: config.retry_count(),
        })
    }

    fn auth(&self, req: RequestBuilder) -> RequestBuilder {
        if let Some(username) = &self.username {
            req.basic_auth(username, self.password.as_ref())
        } else {
            req
        }
    }

    fn job_url(&self) -> String {
        join_with_slash(&self.url, &["job", &self.job])
    }

    pub fn result_url(&self, build_id: BuildId) -> String {
        join_with_slash(&self.job_url(), &[&build_id.to_string()])
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        let response = self.auth(self.client.get(url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let data = response.error_for_status()?.json::<T>().await?;
        Ok(Some(data))
    }

    async fn build_info(&self, build_id: BuildId) -> Result<BuildInfo> {
        let url = join_with_slash(&self.result_url(build_id), &["api", "json"]);
        self.get_json::<BuildInfo>(&url)
            .await?
            .with_context(|| anyhow!("Build {} of {} does not exist", build_id, self.job))
    }

    async fn test_report(&self, build_id: BuildId) -> Result<Option<TestReport>> {
        let url = join_with_slash(&self.result_url(build_id), &["testReport", "api", "json"]);
        self.get_json::<TestReport>(&url).await
    }

    /// Follow a queue item until jenkins assigned a build number to it
    async fn wait_for_build(&self, queue_url: &str) -> Result<BuildId> {
        let url = join_with_slash(queue_url, &["api", "json"]);
        for _ in 0..self.retry_count {
            if let Some(item) = self.get_json::<QueueItem>(&url).await? {
                if item.cancelled {
                    bail!("Queued build was cancelled: {}", queue_url);
                }
                if let Some(executable) = item.executable {
                    return Ok(executable.number);
                }
            }
            tokio::time::sleep(QUEUE_POLL_DELAY).await;
        }
        bail!("Jenkins didn't start queued build in time: {}", queue_url)
    }
}

#[async_trait]
impl Executor for JenkinsProject {
    fn job_name(&self) -> &str {
        &self.job
    }

    async fn submit(&mut self, params: &BuildParams) -> Result<BuildId> {
        let url = join_with_slash(&self.job_url(), &["buildWithParameters"]);
        debug!("Submitting build to {:?}: {:?}", url, params);
        let response = self
            .auth(self.client.post(&url))
            .form(&params.to_map())
            .send()
            .await?
            .error_for_status()?;

        let queue_url = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .context("Jenkins didn't return a queue item")?;
        let build_id = self.wait_for_build(&queue_url).await?;
        info!("Submitted build {} of {}", build_id, self.job);
        Ok(build_id)
    }

    async fn is_complete(&mut self, build_id: BuildId) -> Result<bool> {
        let info = self.build_info(build_id).await?;
        Ok(!info.building)
    }

    async fn status(&mut self, build_id: BuildId) -> Result<RunOutcome> {
        let info = self.build_info(build_id).await?;
        if info.building {
            bail!("Build {} of {} is still running", build_id, self.job);
        }
        let status = info.result.unwrap_or_default();
        info!("Build {} of {} finished: {}", build_id, self.job, status);
        if status == "ABORTED" {
            return Ok(RunOutcome::Aborted);
        }

        let report = self.test_report(build_id).await?;
        let result = classify(&status, report.as_ref())?;
        Ok(RunOutcome::Finished(BuildReport {
            result,
            base_commit: report.as_ref().and_then(TestReport::base_commit),
            commit_date: report.as_ref().and_then(TestReport::commit_date),
            result_url: Some(self.result_url(build_id)),
        }))
    }
}
