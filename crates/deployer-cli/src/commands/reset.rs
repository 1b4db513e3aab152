use std::path::Path;
use std::time::Duration;

use deployer_core::DeployerConfig;
use deployer_engine::{Reset, ResetReport};
use deployer_env::MemoryEnvironment;

pub async fn run(status: &Path, machines: &[String], force: bool, config: &DeployerConfig) -> anyhow::Result<()> {
    let report = teardown(status, machines, force, config).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Tear down an in-memory copy of the cluster in `status`.
async fn teardown(
    status: &Path,
    machines: &[String],
    force: bool,
    config: &DeployerConfig,
) -> anyhow::Result<ResetReport> {
    let env = MemoryEnvironment::from_snapshot(&super::load_status(status)?);
    let reset = Reset::new(&env, Duration::from_secs(config.deploy.timeout_secs)).force(force);

    if machines.is_empty() {
        return Ok(reset.run().await?);
    }
    Ok(ResetReport {
        services_destroyed: Vec::new(),
        machines_terminated: reset.terminate_machines(machines).await?,
    })
}
