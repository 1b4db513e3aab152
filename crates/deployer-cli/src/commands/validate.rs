use deployer_core::DeployerConfig;
use deployer_engine::validate_bundle;

use crate::BundleArgs;

pub fn run(args: &BundleArgs, config: &DeployerConfig) -> anyhow::Result<()> {
    let deployment = super::load_resolved(args)?;
    let major = config.deploy.controller_version()?.major;
    let feedback = validate_bundle(&deployment, major);

    for warning in feedback.warnings() {
        println!("warning: {warning}");
    }
    for error in feedback.errors() {
        println!("error: {error}");
    }
    if feedback.has_errors() {
        anyhow::bail!("bundle {} is invalid: {feedback}", deployment.name());
    }

    println!(
        "✓ {} is valid ({} applications, {} relations)",
        deployment.name(),
        deployment.services().count(),
        deployment.relations().len()
    );
    Ok(())
}
