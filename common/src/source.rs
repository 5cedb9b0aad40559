use crate::errors::*;
use crate::{PatchInfo, SeriesSummary, TestResult};
use async_trait::async_trait;
use chrono::NaiveDateTime;

/// A patch tracker project that series are pulled from.
///
/// One instance exists per configured (base url, project) pair. Implementations
/// keep no checkpoint of their own, the engine derives it from stored patches.
#[async_trait]
pub trait PatchSource: Send + Sync {
    fn base_url(&self) -> &str;

    fn project_id(&self) -> i64;

    /// Series with patches newer than `since`
    async fn list_new_series(&self, since: NaiveDateTime) -> Result<Vec<SeriesSummary>>;

    /// Series that contain any of the given patches, each series only once
    async fn list_series(&self, patch_ids: &[i64]) -> Result<Vec<SeriesSummary>>;

    async fn patch_metadata(&self, patch_id: i64) -> Result<PatchInfo>;

    /// Publish the verdict for a patch back to the tracker
    async fn set_patch_check(&self, _patch_id: i64, _result_url: Option<&str>, _result: TestResult) -> Result<()> {
        Ok(())
    }
}
