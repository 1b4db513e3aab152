//! deployer-engine: drive a cluster to the state a bundle describes.
//!
//! The [`Importer`] runs the deployment pipeline: charm metadata, bundle
//! validation, machines, services, units, relations, error retries and
//! exposure, waiting for convergence in between. Every stage checks live
//! status first, so re-running an import against a partly deployed
//! cluster only does what is missing.
//!
//! # Components
//!
//! - **`importer`**: the staged deployment pipeline
//! - **`options`**: `ImportOptions`, built from `deployer.toml`
//! - **`report`**: what an import did
//! - **`diff`**: live status vs. bundle (`DeltaReport`)
//! - **`reset`**: tear down every application and machine
//! - **`plan`**: deploy order and per-unit directives, without a cluster

pub mod diff;
pub mod error;
pub mod importer;
pub mod options;
pub mod plan;
pub mod report;
pub mod reset;

pub use diff::{DeltaReport, RelationsDelta, ServiceDelta, ServiceSummary, ServicesDelta, diff, live_relations};
pub use error::{ImportError, ImportResult};
pub use importer::{Importer, validate_bundle};
pub use options::ImportOptions;
pub use plan::{DeployPlan, PlannedService, plan};
pub use report::ImportReport;
pub use reset::{Reset, ResetReport};
