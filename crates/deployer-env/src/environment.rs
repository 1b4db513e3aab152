//! The cluster gateway.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use deployer_core::{Endpoint, Placement};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::EnvResult;
use crate::event::{Delta, EntityKind};
use crate::status::StatusSnapshot;

/// Capacity of a watch channel, in batches.
pub const WATCH_BUFFER: usize = 256;

/// A stream of delta batches. The first batch describes every tracked
/// entity as an `add`.
pub type EventStream = mpsc::Receiver<Vec<Delta>>;

/// Everything needed to deploy one service.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeployRequest {
    pub name: String,
    pub charm_url: String,
    pub repo: Option<PathBuf>,
    pub config: BTreeMap<String, Value>,
    pub constraints: Option<String>,
    pub resources: BTreeMap<String, Value>,
    pub storage: BTreeMap<String, Value>,
    pub num_units: u32,
    /// Placement for the first unit when `num_units` is 1.
    pub placement: Option<Placement>,
    pub series: Option<String>,
    pub bindings: BTreeMap<String, Value>,
}

/// Operations the deployer performs against a live cluster.
///
/// Calls are made one at a time by a single deployment task; implementors
/// do not need to support concurrent mutation from one caller.
#[async_trait]
pub trait Environment: Send + Sync {
    /// Version of the controller.
    async fn version(&self) -> EnvResult<semver::Version>;

    async fn status(&self) -> EnvResult<StatusSnapshot>;

    /// Provision a machine and return its id.
    async fn add_machine(&self, series: Option<&str>, constraints: Option<&str>) -> EnvResult<String>;

    async fn deploy(&self, request: &DeployRequest) -> EnvResult<()>;

    /// Add one unit, returning its name.
    async fn add_unit(&self, service: &str, placement: Option<&Placement>) -> EnvResult<String>;

    /// Add `count` units wherever the cluster chooses.
    async fn add_units(&self, service: &str, count: u32) -> EnvResult<Vec<String>>;

    async fn add_relation(&self, a: &Endpoint, b: &Endpoint) -> EnvResult<()>;

    async fn expose(&self, service: &str) -> EnvResult<()>;

    async fn set_annotation(
        &self,
        entity: &str,
        kind: EntityKind,
        annotations: &BTreeMap<String, String>,
    ) -> EnvResult<()>;

    /// Clear an error on a unit, optionally re-running the failed hook.
    async fn resolved(&self, unit: &str, retry: bool) -> EnvResult<()>;

    async fn destroy_service(&self, service: &str) -> EnvResult<()>;

    async fn terminate_machine(&self, id: &str, force: bool) -> EnvResult<()>;

    /// Open a new watch. Each call gets its own stream.
    async fn get_watch(&self) -> EnvResult<EventStream>;
}
