use patchgate_common::config::{self, ConfigFile};
use patchgate_common::errors::*;
use std::env;
use std::path::Path;

/// Load the layered config file and apply environment overrides
pub fn load(path: Option<&Path>) -> Result<ConfigFile> {
    let mut config = config::load(path)?;

    if let Ok(password) = env::var("PATCHGATE_JENKINS_PASSWORD") {
        config.jenkins.password = Some(password);
    }

    Ok(config)
}

/// Everything the engine needs to assemble build parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub baserepo: String,
    pub baseref: String,
    pub baseconfig: Option<String>,
    pub makeopts: Option<String>,
    /// Seconds before a pending patch is submitted again
    pub expiry: i64,
}

impl EngineConfig {
    pub fn from_config(config: &ConfigFile) -> Result<EngineConfig> {
        let expiry = config.schedule.expiry();
        if expiry <= 0 {
            bail!("Expiry window needs to be positive: {}", expiry);
        }
        Ok(EngineConfig {
            baserepo: config.baseline.repo()?.to_string(),
            baseref: config.baseline.git_ref().to_string(),
            baseconfig: config.baseline.config_url.clone(),
            makeopts: config.baseline.makeopts.clone(),
            expiry,
        })
    }
}
