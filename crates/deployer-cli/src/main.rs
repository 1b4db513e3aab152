use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "deployer",
    about = "Deploy charm bundles and compare them against a live cluster",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Run configuration ([deploy] table)
    #[arg(short, long, global = true, default_value = "deployer.toml")]
    config: PathBuf,

    /// Controller version; decides whether lxc placements become lxd
    #[arg(long, global = true)]
    controller_version: Option<semver::Version>,

    #[command(subcommand)]
    command: Commands,
}

/// Where the bundle comes from and how its charms are looked up.
#[derive(Args, Debug, Clone)]
pub struct BundleArgs {
    /// Bundle file (YAML or JSON)
    pub bundle: PathBuf,
    /// Stack to deploy from a v3 bundle with several stacks
    #[arg(short, long)]
    pub stack: Option<String>,
    /// Local charm repository (`<repo>/<series>/<charm>/`)
    #[arg(short, long)]
    pub repo: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a bundle without touching a cluster
    Validate {
        #[command(flatten)]
        bundle: BundleArgs,
    },
    /// Show the deploy order and per-unit placement
    Plan {
        #[command(flatten)]
        bundle: BundleArgs,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Compare a bundle against a status document
    Diff {
        #[command(flatten)]
        bundle: BundleArgs,
        /// Status JSON as reported by the controller
        #[arg(long)]
        status: PathBuf,
    },
    /// Run a full import against an in-memory cluster.
    ///
    /// The cluster starts empty, or from --status when given, so a
    /// rehearsal shows what a real run would change.
    Rehearse {
        #[command(flatten)]
        bundle: BundleArgs,
        /// Seed the rehearsal cluster from this status JSON
        #[arg(long)]
        status: Option<PathBuf>,
        /// Overall timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Resolve-and-retry rounds for units in error
        #[arg(long)]
        retry: Option<u32>,
        /// Keep going when units enter an error state
        #[arg(long)]
        ignore_errors: bool,
        /// Skip adding relations
        #[arg(long)]
        no_relations: bool,
    },
    /// Rehearse a teardown of the cluster in a status document.
    ///
    /// Destroys every application and terminates every machine except the
    /// controller, or only the machines given with --machine.
    Reset {
        /// Status JSON of the cluster to tear down
        #[arg(long)]
        status: PathBuf,
        /// Terminate only these machines
        #[arg(short, long = "machine")]
        machines: Vec<String>,
        /// Terminate machines that still host units
        #[arg(long)]
        force: bool,
        /// Overall timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("deployer=info".parse()?)
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = commands::load_config(&cli.config)?;
    if let Some(version) = cli.controller_version {
        settings.deploy.controller_version = version.to_string();
    }

    match cli.command {
        Commands::Validate { bundle } => commands::validate::run(&bundle, &settings),
        Commands::Plan { bundle, format } => commands::plan::run(&bundle, &settings, &format),
        Commands::Diff { bundle, status } => commands::diff::run(&bundle, &status),
        Commands::Rehearse {
            bundle,
            status,
            timeout,
            retry,
            ignore_errors,
            no_relations,
        } => {
            if let Some(timeout) = timeout {
                settings.deploy.timeout_secs = timeout;
            }
            if let Some(retry) = retry {
                settings.deploy.retry_count = retry;
            }
            settings.deploy.ignore_errors |= ignore_errors;
            settings.deploy.no_relations |= no_relations;
            commands::rehearse::run(&bundle, status.as_deref(), &settings).await
        }
        Commands::Reset {
            status,
            machines,
            force,
            timeout,
        } => {
            if let Some(timeout) = timeout {
                settings.deploy.timeout_secs = timeout;
            }
            commands::reset::run(&status, &machines, force, &settings).await
        }
    }
}
