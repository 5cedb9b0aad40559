use crate::errors::*;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: u64 = 60;
pub const DEFAULT_BASELINE_INTERVAL: u64 = 24 * 3600;
pub const DEFAULT_EXPIRY: i64 = 12 * 3600;
pub const DEFAULT_MAX_PARALLEL: usize = 1;
pub const DEFAULT_JENKINS_RETRY_COUNT: u32 = 30;
pub const DEFAULT_BASELINE_REF: &str = "master";

pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<ConfigFile> {
    let mut config = ConfigFile::default();

    if let Some(c) = load_from("/etc/patchgate.conf")? {
        config.update(c);
    }

    if let Ok(path) = config_path() {
        if let Some(c) = load_from(path)? {
            config.update(c);
        }
    }

    if let Some(path) = path {
        let c = load_from(path.as_ref())?
            .with_context(|| anyhow!("Failed to read config file: {:?}", path.as_ref()))?;
        config.update(c);
    }

    Ok(config)
}

fn config_path() -> Result<PathBuf> {
    let config_dir = dirs_next::config_dir()
        .ok_or_else(|| format_err!("Failed to find config dir"))?;
    Ok(config_dir.join("patchgate.conf"))
}

fn load_from<P: AsRef<Path>>(path: P) -> Result<Option<ConfigFile>> {
    if let Ok(buf) = fs::read_to_string(path.as_ref()) {
        debug!("loading config file {:?}", path.as_ref());
        let config = toml::from_str(&buf)
            .with_context(|| anyhow!("Failed to load config {:?}", path.as_ref()))?;
        Ok(Some(config))
    } else {
        Ok(None)
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub baseline: BaselineConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub patchwork: Vec<PatchworkConfig>,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub jenkins: JenkinsConfig,
    #[serde(default)]
    pub local: LocalConfig,
}

impl ConfigFile {
    pub fn update(&mut self, c: ConfigFile) {
        self.baseline.update(c.baseline);
        self.schedule.update(c.schedule);
        self.filter.update(c.filter);
        for source in c.patchwork {
            if let Some(o) = self.patchwork.iter_mut().find(|o| o.url == source.url && o.project == source.project) {
                o.update(source);
            } else {
                self.patchwork.push(source);
            }
        }
        self.executor.update(c.executor);
        self.jenkins.update(c.jenkins);
        self.local.update(c.local);
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BaselineConfig {
    pub repo: Option<String>,
    #[serde(rename = "ref")]
    pub git_ref: Option<String>,
    pub config_url: Option<String>,
    pub makeopts: Option<String>,
}

impl BaselineConfig {
    pub fn update(&mut self, c: BaselineConfig) {
        if c.repo.is_some() {
            self.repo = c.repo;
        }
        if c.git_ref.is_some() {
            self.git_ref = c.git_ref;
        }
        if c.config_url.is_some() {
            self.config_url = c.config_url;
        }
        if c.makeopts.is_some() {
            self.makeopts = c.makeopts;
        }
    }

    pub fn repo(&self) -> Result<&str> {
        self.repo
            .as_deref()
            .ok_or_else(|| format_err!("No baseline repo configured"))
    }

    pub fn git_ref(&self) -> &str {
        self.git_ref.as_deref().unwrap_or(DEFAULT_BASELINE_REF)
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    poll_interval: Option<u64>,
    baseline_interval: Option<u64>,
    expiry: Option<i64>,
}

impl ScheduleConfig {
    pub fn update(&mut self, c: ScheduleConfig) {
        if c.poll_interval.is_some() {
            self.poll_interval = c.poll_interval;
        }
        if c.baseline_interval.is_some() {
            self.baseline_interval = c.baseline_interval;
        }
        if c.expiry.is_some() {
            self.expiry = c.expiry;
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL))
    }

    pub fn baseline_interval(&self) -> Duration {
        Duration::from_secs(self.baseline_interval.unwrap_or(DEFAULT_BASELINE_INTERVAL))
    }

    /// Seconds a patch may stay pending before it's submitted again
    pub fn expiry(&self) -> i64 {
        self.expiry.unwrap_or(DEFAULT_EXPIRY)
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub path: Option<PathBuf>,
    /// Passed in front of the series urls
    #[serde(default)]
    pub args: Vec<String>,
}

impl FilterConfig {
    pub fn update(&mut self, c: FilterConfig) {
        if c.path.is_some() {
            self.path = c.path;
            self.args = c.args;
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PatchworkConfig {
    pub url: String,
    pub project: String,
    pub api_key: Option<String>,
    /// Additional case insensitive patterns of series names to skip
    #[serde(default)]
    pub skip: Vec<String>,
    /// Starting point for a project that was never tested before
    pub last_patch_date: Option<NaiveDateTime>,
}

impl PatchworkConfig {
    pub fn update(&mut self, c: PatchworkConfig) {
        if c.api_key.is_some() {
            self.api_key = c.api_key;
        }
        if !c.skip.is_empty() {
            self.skip = c.skip;
        }
        if c.last_patch_date.is_some() {
            self.last_patch_date = c.last_patch_date;
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorKind {
    #[default]
    Jenkins,
    Local,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub kind: Option<ExecutorKind>,
}

impl ExecutorConfig {
    pub fn update(&mut self, c: ExecutorConfig) {
        if c.kind.is_some() {
            self.kind = c.kind;
        }
    }

    pub fn kind(&self) -> ExecutorKind {
        self.kind.unwrap_or_default()
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct JenkinsConfig {
    pub url: Option<String>,
    pub job: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub retry_count: Option<u32>,
}

impl JenkinsConfig {
    pub fn update(&mut self, c: JenkinsConfig) {
        if c.url.is_some() {
            self.url = c.url;
        }
        if c.job.is_some() {
            self.job = c.job;
        }
        if c.username.is_some() {
            self.username = c.username;
        }
        if c.password.is_some() {
            self.password = c.password;
        }
        if c.retry_count.is_some() {
            self.retry_count = c.retry_count;
        }
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.unwrap_or(DEFAULT_JENKINS_RETRY_COUNT)
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Program started for every run
    pub runner: Option<PathBuf>,
    #[serde(default)]
    pub runner_args: Vec<String>,
    pub runs_dir: Option<PathBuf>,
    /// Url the runs directory is published at
    pub public_url: Option<String>,
    pub max_parallel: Option<usize>,
}

impl LocalConfig {
    pub fn update(&mut self, c: LocalConfig) {
        if c.runner.is_some() {
            self.runner = c.runner;
            self.runner_args = c.runner_args;
        }
        if c.runs_dir.is_some() {
            self.runs_dir = c.runs_dir;
        }
        if c.public_url.is_some() {
            self.public_url = c.public_url;
        }
        if c.max_parallel.is_some() {
            self.max_parallel = c.max_parallel;
        }
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel.unwrap_or(DEFAULT_MAX_PARALLEL)
    }
}
