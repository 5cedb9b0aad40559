use async_trait::async_trait;
use patchgate_common::errors::*;
use patchgate_common::SeriesSummary;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject,
}

/// Decides whether a series is worth testing
#[async_trait]
pub trait SeriesFilter: Send + Sync {
    async fn evaluate(&self, series: &SeriesSummary) -> Result<Verdict>;
}

/// Used when no filter program is configured
#[derive(Debug, Default)]
pub struct AcceptAll;

#[async_trait]
impl SeriesFilter for AcceptAll {
    async fn evaluate(&self, _series: &SeriesSummary) -> Result<Verdict> {
        Ok(Verdict::Accept)
    }
}

/// An external program that gets the cover letter and patch mbox urls.
///
/// Exit status 0 accepts the series, 1 rejects it. 127 means the filter
/// itself failed, like any other status or a signal.
#[derive(Debug, Clone)]
pub struct ProgramFilter {
    program: PathBuf,
    args: Vec<String>,
}

impl ProgramFilter {
    pub fn new(program: PathBuf, args: Vec<String>) -> ProgramFilter {
        ProgramFilter { program, args }
    }

    fn command(&self, series: &SeriesSummary) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(cover) = &series.cover_mbox_url {
            cmd.arg("--cover").arg(cover);
        }
        cmd.args(series.patch_mbox_urls());
        cmd.stdin(Stdio::null());
        cmd
    }
}

#[async_trait]
impl SeriesFilter for ProgramFilter {
    async fn evaluate(&self, series: &SeriesSummary) -> Result<Verdict> {
        debug!("Running filter {:?} for series {:?}", self.program, series.subject);
        let status = self
            .command(series)
            .status()
            .await
            .with_context(|| anyhow!("Failed to execute filter {:?}", self.program))?;

        match status.code() {
            Some(0) => Ok(Verdict::Accept),
            Some(1) => Ok(Verdict::Reject),
            Some(127) => bail!("Filter {:?} failed to evaluate series", self.program),
            Some(code) => bail!("Filter {:?} exited with invalid status {}", self.program, code),
            None => bail!(
                "Filter {:?} was terminated by signal {:?}",
                self.program,
                status.signal()
            ),
        }
    }
}
