//! deployer-core: the in-memory bundle model.
//!
//! A bundle is parsed once into a [`Deployment`]: services, declared
//! machines and an expanded relation list. Everything downstream
//! (placement, orchestration, diff) reads this model and never mutates it.
//!
//! # Components
//!
//! - **`bundle`**: YAML/JSON document loading (v3 named stacks, v4 bundles)
//! - **`deployment`**: `Deployment`, `Service`, `MachineSpec`
//! - **`relation`**: `Endpoint` / `EndpointPair` with wildcard matching
//! - **`constraints`**: constraint parsing and normalization
//! - **`charm`**: charm metadata lookup (`CharmSource`)
//! - **`feedback`**: accumulated validation errors and warnings
//! - **`placement`**: resolved placement targets handed to the cluster
//! - **`config`**: `deployer.toml` run configuration

pub mod bundle;
pub mod charm;
pub mod config;
pub mod constraints;
pub mod deployment;
pub mod error;
pub mod feedback;
pub mod placement;
pub mod relation;

pub use bundle::BundleDocument;
pub use charm::{CharmInfo, CharmOption, CharmSource, LocalCharmRepo, StaticCharms};
pub use config::{DeployConfig, DeployerConfig};
pub use constraints::{Constraints, normalize_constraints, parse_constraints};
pub use deployment::{BundleVersion, Deployment, MachineSpec, Service};
pub use error::{BundleError, BundleResult, CharmError, CharmResult, ConstraintError};
pub use feedback::Feedback;
pub use placement::{ContainerKind, MachinePlacement, Placement};
pub use relation::{Endpoint, EndpointPair};
