pub use anyhow::{anyhow, bail, format_err, Context, Error, Result};
pub use log::{debug, error, info, trace, warn};

/// Why a single engine cycle stopped.
///
/// Only configuration errors are fatal for the process, everything else is
/// logged and the cycle is retried on the next poll interval.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    /// Patch tracker or build executor could not be reached or answered garbage
    #[error("adapter error: {0:#}")]
    Adapter(Error),
    /// The configured filter program failed or returned a reserved exit code
    #[error("filter error: {0:#}")]
    Filter(Error),
    #[error("storage error: {0:#}")]
    Storage(Error),
    /// Missing stable baseline, unknown patch source checkpoint, ...
    #[error("configuration error: {0:#}")]
    Configuration(Error),
    /// Persisted state that can't be produced by this program
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl CycleError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, CycleError::Configuration(_))
    }
}

pub type CycleResult<T> = std::result::Result<T, CycleError>;
