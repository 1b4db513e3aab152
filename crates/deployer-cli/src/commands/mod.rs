pub mod diff;
pub mod plan;
pub mod rehearse;
pub mod reset;
pub mod validate;

use std::path::Path;

use anyhow::Context;
use deployer_core::{BundleDocument, CharmSource, Deployment, DeployerConfig, LocalCharmRepo, StaticCharms};
use deployer_env::StatusSnapshot;

use crate::BundleArgs;

pub fn load_config(path: &Path) -> anyhow::Result<DeployerConfig> {
    DeployerConfig::load_or_default(path)
        .with_context(|| format!("Failed to load config {}", path.display()))
}

pub fn load_deployment(args: &BundleArgs) -> anyhow::Result<Deployment> {
    let document = BundleDocument::from_path(&args.bundle)
        .with_context(|| format!("Failed to read bundle {}", args.bundle.display()))?;
    Ok(document.into_deployment(args.stack.as_deref())?)
}

/// Parse the bundle and attach charm metadata.
pub fn load_resolved(args: &BundleArgs) -> anyhow::Result<Deployment> {
    let mut deployment = load_deployment(args)?;
    deployment.resolve_charms(charm_source(args).as_ref())?;
    Ok(deployment)
}

pub fn charm_source(args: &BundleArgs) -> Box<dyn CharmSource> {
    match &args.repo {
        Some(root) => Box::new(LocalCharmRepo::new(root.clone())),
        None => Box::new(StaticCharms::new()),
    }
}

pub fn load_status(path: &Path) -> anyhow::Result<StatusSnapshot> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read status {}", path.display()))?;
    let raw: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not JSON", path.display()))?;
    Ok(StatusSnapshot::from_value(&raw)?)
}
