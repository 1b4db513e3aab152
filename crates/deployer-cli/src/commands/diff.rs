use std::path::Path;

use crate::BundleArgs;

pub fn run(args: &BundleArgs, status: &Path) -> anyhow::Result<()> {
    let deployment = super::load_resolved(args)?;
    let status = super::load_status(status)?;

    let report = deployer_engine::diff(&status, &deployment);
    if report.is_empty() {
        tracing::info!(bundle = %deployment.name(), "no differences");
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
