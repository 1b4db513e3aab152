//! Import options.

use std::time::Duration;

use deployer_core::DeployConfig;

/// Knobs for one import run.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Overall budget; every wait and retry shares it.
    pub timeout: Duration,
    pub retry_count: u32,
    pub ignore_errors: bool,
    /// Settle time after new relations, before waiting again.
    pub rel_wait: Duration,
    pub deploy_delay: Duration,
    pub skip_unit_wait: bool,
    pub no_relations: bool,
    /// Overrides the version reported by the environment.
    pub controller_version: Option<semver::Version>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2700),
            retry_count: 0,
            ignore_errors: false,
            rel_wait: Duration::from_secs(60),
            deploy_delay: Duration::ZERO,
            skip_unit_wait: false,
            no_relations: false,
            controller_version: None,
        }
    }
}

impl ImportOptions {
    pub fn from_config(config: &DeployConfig) -> anyhow::Result<Self> {
        Ok(Self {
            timeout: Duration::from_secs(config.timeout_secs),
            retry_count: config.retry_count,
            ignore_errors: config.ignore_errors,
            rel_wait: Duration::from_secs(config.rel_wait_secs),
            deploy_delay: Duration::from_secs(config.deploy_delay_secs),
            skip_unit_wait: config.skip_unit_wait,
            no_relations: config.no_relations,
            controller_version: Some(config.controller_version()?),
        })
    }
}
