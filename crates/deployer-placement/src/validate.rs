//! Bundle-wide placement validation.

use deployer_core::{BundleVersion, Deployment, Feedback};
use deployer_env::StatusSnapshot;
use tracing::debug;

use crate::ordering::deploy_order;
use crate::resolver::{MachinesMap, PlacementContext, unit_placement};

/// Validate the placement of every service.
///
/// Runs without live status; colocation targets are checked against the
/// bundle only. v4 bundles are validated even without explicit placement,
/// since their filled tables still name machines and services.
pub fn validate_placement(deployment: &Deployment, controller_major: u64) -> Feedback {
    let status = StatusSnapshot::default();
    let machines_map = MachinesMap::new();
    let ctx = PlacementContext {
        deployment,
        status: &status,
        machines_map: &machines_map,
        controller_major,
    };

    let mut feedback = Feedback::new();
    for service in deployment.services() {
        if deployment.version() == BundleVersion::V3 && !service.has_placement() {
            continue;
        }
        let result = unit_placement(service, ctx).validate();
        debug!(service = %service.name, errors = result.errors().len(), "placement validated");
        feedback.extend(result);
    }
    if let Err(cycle) = deploy_order(deployment) {
        feedback.error(format!("Placement cycle between applications: {}", cycle.services.join(", ")));
    }
    feedback
}
