use deployer_core::DeployerConfig;

use crate::BundleArgs;

pub fn run(args: &BundleArgs, config: &DeployerConfig, format: &str) -> anyhow::Result<()> {
    let deployment = super::load_deployment(args)?;
    let major = config.deploy.controller_version()?.major;
    let plan = deployer_engine::plan(&deployment, major)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        _ => {
            print!("{plan}");
        }
    }

    Ok(())
}
