use std::path::Path;
use std::time::Duration;

use deployer_core::DeployerConfig;
use deployer_engine::{ImportOptions, Importer};
use deployer_env::MemoryEnvironment;

use crate::BundleArgs;

pub async fn run(args: &BundleArgs, status: Option<&Path>, config: &DeployerConfig) -> anyhow::Result<()> {
    let deployment = super::load_deployment(args)?;
    let mut options = ImportOptions::from_config(&config.deploy)?;
    // Nothing settles in memory; waiting would only slow the rehearsal down.
    options.rel_wait = Duration::ZERO;
    options.deploy_delay = Duration::ZERO;

    let env = match status {
        Some(path) => MemoryEnvironment::from_snapshot(&super::load_status(path)?),
        None => MemoryEnvironment::new(),
    };
    let env = env.with_version(config.deploy.controller_version()?);

    let charms = super::charm_source(args);
    let mut importer = Importer::new(&env, deployment, options);
    let report = importer.run(charms.as_ref()).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    for call in env.journal() {
        tracing::debug!(call = %call, "rehearsed");
    }
    Ok(())
}
