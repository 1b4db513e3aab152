//! The per-service resolver seam.

use std::collections::BTreeMap;

use deployer_core::{BundleVersion, ContainerKind, Deployment, Feedback, Placement, Service};
use deployer_env::StatusSnapshot;

use crate::v3::PlacementV3;
use crate::v4::PlacementV4;

/// Bundle machine key (`"1"`, or `"<service>/<unit>"` for containers on
/// new machines) → live machine id.
pub type MachinesMap = BTreeMap<String, String>;

/// Everything a resolver reads besides the service itself.
#[derive(Debug, Clone, Copy)]
pub struct PlacementContext<'a> {
    pub deployment: &'a Deployment,
    pub status: &'a StatusSnapshot,
    pub machines_map: &'a MachinesMap,
    /// Major version of the controller; decides the lxc → lxd alias.
    pub controller_major: u64,
}

impl PlacementContext<'_> {
    /// The container type to request from this controller.
    pub fn container_for_controller(&self, kind: ContainerKind) -> ContainerKind {
        kind.for_controller(self.controller_major).unwrap_or(kind)
    }
}

/// Outcome of resolving one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolved {
    /// `None` lets the cluster pick a fresh machine.
    pub placement: Option<Placement>,
    pub feedback: Feedback,
}

impl Resolved {
    pub fn unplaced() -> Self {
        Self::default()
    }

    pub fn at(placement: Placement) -> Self {
        Self {
            placement: Some(placement),
            feedback: Feedback::new(),
        }
    }

    pub fn failed(feedback: Feedback) -> Self {
        Self {
            placement: None,
            feedback,
        }
    }
}

/// Placement for the units of one service.
pub trait UnitPlacement {
    /// Check every directive of the service. Never fails; problems are
    /// returned as feedback.
    fn validate(&self) -> Feedback;

    /// Where unit `unit_number` should go.
    fn get(&self, unit_number: u32) -> Resolved;

    /// The directives actually used, one per unit index.
    fn directives(&self) -> Vec<String>;
}

/// The resolver matching the bundle's grammar.
pub fn unit_placement<'a>(service: &'a Service, ctx: PlacementContext<'a>) -> Box<dyn UnitPlacement + 'a> {
    match ctx.deployment.version() {
        BundleVersion::V3 => Box::new(PlacementV3::new(service, ctx)),
        BundleVersion::V4 => Box::new(PlacementV4::new(service, ctx)),
    }
}
