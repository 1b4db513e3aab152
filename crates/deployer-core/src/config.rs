//! deployer.toml run configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Controller version assumed when none is configured.
pub const DEFAULT_CONTROLLER_VERSION: &str = "2.9.0";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployerConfig {
    #[serde(default)]
    pub deploy: DeployConfig,
}

/// The `[deploy]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Overall budget for one deployment run.
    pub timeout_secs: u64,
    /// How many times to retry units stuck in error.
    pub retry_count: u32,
    /// Keep going when units enter an error state.
    pub ignore_errors: bool,
    /// Settle delay after adding relations.
    pub rel_wait_secs: u64,
    /// Pause between service deploys.
    pub deploy_delay_secs: u64,
    pub skip_unit_wait: bool,
    pub no_relations: bool,
    /// Version of the target controller; decides the lxc alias.
    pub controller_version: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 2700,
            retry_count: 0,
            ignore_errors: false,
            rel_wait_secs: 60,
            deploy_delay_secs: 0,
            skip_unit_wait: false,
            no_relations: false,
            controller_version: DEFAULT_CONTROLLER_VERSION.to_string(),
        }
    }
}

impl DeployConfig {
    pub fn controller_version(&self) -> anyhow::Result<semver::Version> {
        Ok(semver::Version::parse(&self.controller_version)?)
    }
}

impl DeployerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DeployerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` when it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
