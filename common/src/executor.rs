use crate::errors::*;
use crate::{BuildParams, RunOutcome};
use async_trait::async_trait;

/// Executor-assigned id of a submitted build
pub type BuildId = i64;

/// Something that runs test builds and lets us poll their outcome.
///
/// Completion is never pushed, callers are expected to poll `is_complete`
/// on their own schedule and only then ask for the `status`.
#[async_trait]
pub trait Executor: Send {
    /// Recorded as `pending_job.job_name` next to the build id
    fn job_name(&self) -> &str;

    /// Advance internal scheduling, called once per reconciliation cycle
    async fn tick(&mut self) -> Result<()> {
        Ok(())
    }

    async fn submit(&mut self, params: &BuildParams) -> Result<BuildId>;

    async fn is_complete(&mut self, build_id: BuildId) -> Result<bool>;

    async fn status(&mut self, build_id: BuildId) -> Result<RunOutcome>;

    /// Called once before the daemon exits
    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}
