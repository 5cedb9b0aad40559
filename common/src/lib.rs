use crate::errors::*;
use chrono::NaiveDateTime;
use colored::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use strum::{AsRefStr, Display, EnumString};

pub mod config;
pub mod errors;
pub mod executor;
pub mod source;
pub mod utils;

/// Outcome of a test job, ordered by severity.
///
/// `Success` is the *lowest* value. Baseline verdicts may only be replaced by
/// an equal or worse result (`new >= previous`), so flipping this order would
/// silently turn the baseline gate upside down.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestResult {
    Success,
    MergeFailure,
    BuildFailure,
    PublishFailure,
    TestFailure,
    BaselineFailure,
}

impl TestResult {
    pub const ALL: [TestResult; 6] = [
        TestResult::Success,
        TestResult::MergeFailure,
        TestResult::BuildFailure,
        TestResult::PublishFailure,
        TestResult::TestFailure,
        TestResult::BaselineFailure,
    ];

    /// The value persisted in `test_run.result_id`
    pub fn ordinal(self) -> i32 {
        match self {
            TestResult::Success => 0,
            TestResult::MergeFailure => 1,
            TestResult::BuildFailure => 2,
            TestResult::PublishFailure => 3,
            TestResult::TestFailure => 4,
            TestResult::BaselineFailure => 5,
        }
    }

    pub fn from_ordinal(ordinal: i32) -> Result<TestResult> {
        TestResult::ALL
            .iter()
            .copied()
            .find(|r| r.ordinal() == ordinal)
            .ok_or_else(|| anyhow!("Unknown result ordinal: {}", ordinal))
    }

    pub fn is_success(self) -> bool {
        self == TestResult::Success
    }

    /// Whether a fresh result may overwrite a stored verdict for the same commit
    pub fn may_replace(self, previous: TestResult) -> bool {
        self >= previous
    }

    pub fn fancy(&self) -> String {
        match self {
            TestResult::Success => self.to_string().green().to_string(),
            TestResult::BaselineFailure => self.to_string().yellow().to_string(),
            _ => self.to_string().red().to_string(),
        }
    }
}

/// Tracker metadata of a single patch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchInfo {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub date: NaiveDateTime,
    pub baseurl: String,
    pub project_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesPatch {
    pub id: i64,
    /// Web url of the patch object in the tracker
    pub url: String,
    pub mbox_url: String,
}

/// A patch or an ordered group of patches plus an optional cover letter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesSummary {
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub emails: BTreeSet<String>,
    pub cover_mbox_url: Option<String>,
    /// In the order they should be applied in
    pub patches: Vec<SeriesPatch>,
}

impl SeriesSummary {
    pub fn patch_ids(&self) -> Vec<i64> {
        self.patches.iter().map(|p| p.id).collect()
    }

    pub fn patch_urls(&self) -> Vec<String> {
        self.patches.iter().map(|p| p.url.clone()).collect()
    }

    pub fn patch_mbox_urls(&self) -> Vec<String> {
        self.patches.iter().map(|p| p.mbox_url.clone()).collect()
    }
}

/// Parameters of a submitted build, passed to executors as a flat key/value map
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildParams {
    pub baserepo: Option<String>,
    pub git_ref: Option<String>,
    pub baseconfig: Option<String>,
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub emails: BTreeSet<String>,
    pub patchwork: Vec<String>,
    pub makeopts: Option<String>,
}

impl BuildParams {
    /// A job without patches, testing `git_ref` of the baseline repo
    pub fn baseline(baserepo: &str, git_ref: &str, baseconfig: Option<&str>, makeopts: Option<&str>) -> BuildParams {
        BuildParams {
            baserepo: Some(baserepo.to_string()),
            git_ref: Some(git_ref.to_string()),
            baseconfig: baseconfig.map(String::from),
            makeopts: makeopts.map(String::from),
            ..Default::default()
        }
    }

    /// A job applying `series` on top of the stable commit
    pub fn series(
        baserepo: &str,
        stable_commit: &str,
        baseconfig: Option<&str>,
        makeopts: Option<&str>,
        series: &SeriesSummary,
    ) -> Result<BuildParams> {
        if series.patches.is_empty() {
            bail!("Series {:?} has no patches", series.subject);
        }
        Ok(BuildParams {
            baserepo: Some(baserepo.to_string()),
            git_ref: Some(stable_commit.to_string()),
            baseconfig: baseconfig.map(String::from),
            message_id: series.message_id.clone(),
            subject: series.subject.clone(),
            emails: series.emails.clone(),
            patchwork: series.patch_urls(),
            makeopts: makeopts.map(String::from),
        })
    }

    pub fn is_baseline(&self) -> bool {
        self.patchwork.is_empty()
    }

    pub fn to_map(&self) -> BTreeMap<&'static str, String> {
        let mut map = BTreeMap::new();
        if let Some(baserepo) = &self.baserepo {
            map.insert("baserepo", baserepo.clone());
        }
        if let Some(git_ref) = &self.git_ref {
            map.insert("ref", git_ref.clone());
        }
        if let Some(baseconfig) = &self.baseconfig {
            map.insert("baseconfig", baseconfig.clone());
        }
        if let Some(message_id) = self.message_id.as_ref().filter(|m| !m.is_empty()) {
            map.insert("message_id", message_id.clone());
        }
        if let Some(subject) = self.subject.as_ref().filter(|s| !s.is_empty()) {
            map.insert("subject", subject.clone());
        }
        if !self.emails.is_empty() {
            map.insert("emails", self.emails.iter().cloned().collect::<Vec<_>>().join(","));
        }
        if !self.patchwork.is_empty() {
            map.insert("patchwork", self.patchwork.join(" "));
        }
        if let Some(makeopts) = &self.makeopts {
            map.insert("makeopts", makeopts.clone());
        }
        map
    }
}

/// What an executor knows about a finished build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub result: TestResult,
    /// Commit the build was based on, only reported by builds that merged
    pub base_commit: Option<String>,
    /// Committer date of `base_commit` as unix epoch
    pub commit_date: Option<i64>,
    pub result_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Aborted,
    Finished(BuildReport),
}
