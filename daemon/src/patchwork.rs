use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime};
use patchgate_common::config::PatchworkConfig;
use patchgate_common::errors::*;
use patchgate_common::source::PatchSource;
use patchgate_common::utils::join_with_slash;
use patchgate_common::{PatchInfo, SeriesPatch, SeriesSummary, TestResult};
use regex::{Regex, RegexBuilder};
use reqwest::header::{AUTHORIZATION, LINK};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Series with names matching any of these are never tested
pub const SKIP_PATTERNS: &[&str] = &[
    r"\[[^\]]*iproute.*?\]",
    r"\[[^\]]*pktgen.*?\]",
    r"\[[^\]]*ethtool.*?\]",
    r"\[[^\]]*git.*?\]",
    r"\[[^\]]*pull.*?\]",
    r"pull.?request",
];

const CHECK_CONTEXT: &str = "patchgate";

#[derive(Debug, Deserialize)]
struct ApiUrls {
    patches: String,
    series: String,
    projects: String,
}

#[derive(Debug, Deserialize)]
struct ApiProject {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct ApiSeriesRef {
    id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HeaderValue {
    One(String),
    Many(Vec<String>),
}

impl HeaderValue {
    fn joined(&self) -> String {
        match self {
            HeaderValue::One(value) => value.clone(),
            HeaderValue::Many(values) => values.join("\n\n"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiPatch {
    id: i64,
    name: String,
    date: NaiveDateTime,
    #[serde(default)]
    checks: Option<String>,
    #[serde(default)]
    series: Vec<ApiSeriesRef>,
    #[serde(default)]
    headers: HashMap<String, HeaderValue>,
}

impl ApiPatch {
    /// Header lookup ignoring the case of the key
    fn header(&self, key: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.joined())
    }

    fn emails(&self) -> BTreeSet<String> {
        let mut emails = BTreeSet::new();
        for key in ["From", "To", "Cc"] {
            if let Some(value) = self.header(key) {
                emails.extend(extract_emails(&value));
            }
        }
        emails
    }
}

#[derive(Debug, Deserialize)]
struct ApiSeriesPatch {
    id: i64,
    name: String,
    mbox: String,
}

#[derive(Debug, Deserialize)]
struct ApiCoverLetter {
    mbox: String,
}

#[derive(Debug, Deserialize)]
struct ApiSeries {
    id: i64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    received_all: bool,
    #[serde(default)]
    cover_letter: Option<ApiCoverLetter>,
    #[serde(default)]
    patches: Vec<ApiSeriesPatch>,
}

/// A single object is returned instead of a list if there's only one
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

#[derive(Debug, Serialize)]
struct CheckPayload<'a> {
    state: &'static str,
    target_url: Option<&'a str>,
    context: &'static str,
    description: String,
}

impl<'a> CheckPayload<'a> {
    fn new(result: TestResult, target_url: Option<&'a str>) -> CheckPayload<'a> {
        let (state, description) = match result {
            TestResult::Success => ("success", "patchgate build test".to_string()),
            TestResult::BaselineFailure => (
                "warning",
                "Baseline failure found while testing this patch".to_string(),
            ),
            other => ("fail", other.to_string()),
        };
        CheckPayload {
            state,
            target_url,
            context: CHECK_CONTEXT,
            description,
        }
    }
}

/// Pull the bare addresses out of a comma separated address header
pub fn extract_emails(header: &str) -> BTreeSet<String> {
    let mut emails = BTreeSet::new();
    for addr in header.split(',').map(str::trim).filter(|x| !x.is_empty()) {
        let addr = match (addr.rfind('<'), addr.rfind('>')) {
            (Some(start), Some(end)) if start < end => &addr[start + 1..end],
            _ => addr,
        };
        emails.insert(addr.to_string());
    }
    emails
}

/// The url with `rel="next"` in a `Link` header, if any
pub fn next_page(link: &str) -> Option<String> {
    for part in link.split(',') {
        let mut fields = part.split(';').map(str::trim);
        let Some(target) = fields.next() else {
            continue;
        };
        let is_next = fields.any(|f| f == r#"rel="next""# || f == "rel=next");
        if is_next {
            let url = target.trim_start_matches('<').trim_end_matches('>');
            return Some(url.to_string());
        }
    }
    None
}

pub fn skip_regex(extra: &[String]) -> Result<Regex> {
    let mut patterns = SKIP_PATTERNS.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    patterns.extend(extra.iter().cloned());
    let regex = RegexBuilder::new(&patterns.join("|"))
        .case_insensitive(true)
        .build()
        .context("Failed to compile series skip patterns")?;
    Ok(regex)
}

/// A project on a patchwork instance, accessed through the REST api
pub struct PatchworkProject {
    client: reqwest::Client,
    baseurl: String,
    project_id: i64,
    api_key: Option<String>,
    urls: ApiUrls,
    skip: Regex,
}

impl PatchworkProject {
    pub async fn connect(config: &PatchworkConfig) -> Result<PatchworkProject> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("patchgate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let baseurl = config.url.trim_end_matches('/').to_string();

        let urls = get_json::<ApiUrls>(&client, &join_with_slash(&baseurl, &["api"]))
            .await
            .with_context(|| anyhow!("Failed to fetch api urls of {:?}", baseurl))?;
        let project = get_json::<ApiProject>(&client, &join_with_slash(&urls.projects, &[&config.project]))
            .await
            .with_context(|| anyhow!("Failed to fetch project {:?}", config.project))?;
        debug!("Resolved patchwork project {:?} to id {}", config.project, project.id);

        Ok(PatchworkProject {
            client,
            baseurl,
            project_id: project.id,
            api_key: config.api_key.clone(),
            urls,
            skip: skip_regex(&config.skip)?,
        })
    }

    fn patch_url(&self, patch_id: i64) -> String {
        join_with_slash(&self.baseurl, &["patch", &patch_id.to_string()])
    }

    async fn get_patch(&self, patch_id: i64) -> Result<ApiPatch> {
        let url = join_with_slash(&self.urls.patches, &[&patch_id.to_string()]);
        get_json(&self.client, &url)
            .await
            .with_context(|| anyhow!("Failed to get patch {}", patch_id))
    }

    /// Fetch every page of a paginated list, starting at `url`
    async fn get_pages<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(url.to_string());
        while let Some(url) = next.take() {
            debug!("Fetching {:?}", url);
            let response = self.client.get(&url).send().await?.error_for_status()?;
            next = response
                .headers()
                .get(LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(next_page);
            let page = response.json::<OneOrMany<T>>().await?;
            items.extend(page.into_vec());
        }
        Ok(items)
    }

    async fn get_series(&self, series_id: i64) -> Result<Option<SeriesSummary>> {
        let url = join_with_slash(&self.urls.series, &[&series_id.to_string()]);
        let series = get_json::<ApiSeries>(&self.client, &url)
            .await
            .with_context(|| anyhow!("Failed to get series {}", series_id))?;
        self.summarize(series).await
    }

    /// Turn a series into something testable, `None` if it should be skipped
    async fn summarize(&self, series: ApiSeries) -> Result<Option<SeriesSummary>> {
        let name = series.name.as_deref().unwrap_or_default();
        if !series.received_all {
            info!("Skipping incomplete series: [{}] {}", series.id, name);
            return Ok(None);
        }
        if self.skip.is_match(name) {
            info!("Skipping series [{}] {}", series.id, name);
            return Ok(None);
        }
        if series.patches.is_empty() {
            return Ok(None);
        }

        info!("Series [{}] {}", series.id, name);
        let mut summary = SeriesSummary {
            cover_mbox_url: series.cover_letter.map(|c| c.mbox),
            ..Default::default()
        };
        for patch in series.patches {
            debug!("Patch [{}] {}", patch.id, patch.name);
            let detail = self.get_patch(patch.id).await?;
            summary.message_id = detail.header("Message-ID");
            summary.subject = detail.header("Subject");
            summary.emails.extend(detail.emails());
            summary.patches.push(SeriesPatch {
                id: patch.id,
                url: self.patch_url(patch.id),
                mbox_url: patch.mbox,
            });
        }
        Ok(Some(summary))
    }

    async fn series_of_patches(&self, patches: Vec<ApiPatch>) -> Result<Vec<SeriesSummary>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for patch in patches {
            for series in patch.series {
                if !seen.insert(series.id) {
                    continue;
                }
                if let Some(summary) = self.get_series(series.id).await? {
                    out.push(summary);
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl PatchSource for PatchworkProject {
    fn base_url(&self) -> &str {
        &self.baseurl
    }

    fn project_id(&self) -> i64 {
        self.project_id
    }

    async fn list_new_series(&self, since: NaiveDateTime) -> Result<Vec<SeriesSummary>> {
        let since = since + Duration::seconds(1);
        let mut url = reqwest::Url::parse(&self.urls.patches)?;
        url.query_pairs_mut()
            .append_pair("project", &self.project_id.to_string())
            .append_pair("since", &since.format("%Y-%m-%dT%H:%M:%S").to_string());

        let patches = self.get_pages::<ApiPatch>(url.as_str()).await?;
        debug!("Found {} patches since {}", patches.len(), since);
        self.series_of_patches(patches).await
    }

    async fn list_series(&self, patch_ids: &[i64]) -> Result<Vec<SeriesSummary>> {
        let mut patches = Vec::new();
        for patch_id in patch_ids {
            patches.push(self.get_patch(*patch_id).await?);
        }
        self.series_of_patches(patches).await
    }

    async fn patch_metadata(&self, patch_id: i64) -> Result<PatchInfo> {
        let patch = self.get_patch(patch_id).await?;
        Ok(PatchInfo {
            id: patch.id,
            name: patch.name,
            url: self.patch_url(patch.id),
            date: patch.date,
            baseurl: self.baseurl.clone(),
            project_id: self.project_id,
        })
    }

    async fn set_patch_check(&self, patch_id: i64, result_url: Option<&str>, result: TestResult) -> Result<()> {
        let Some(api_key) = &self.api_key else {
            debug!("No patchwork api key configured, not setting checks");
            return Ok(());
        };

        let patch = self.get_patch(patch_id).await?;
        let Some(checks) = patch.checks else {
            bail!("Patch {} has no checks url", patch_id);
        };

        let payload = CheckPayload::new(result, result_url);
        let response = self
            .client
            .post(&checks)
            .header(AUTHORIZATION, format!("Token {}", api_key))
            .json(&payload)
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("Failed to post patch check: {}", response.status());
        }
        debug!("Set check on patch {}: {}", patch_id, payload.state);
        Ok(())
    }
}

async fn get_json<T: serde::de::DeserializeOwned>(client: &reqwest::Client, url: &str) -> Result<T> {
    let response = client.get(url).send().await?.error_for_status()?;
    let data = response.json::<T>().await?;
    Ok(data)
}
