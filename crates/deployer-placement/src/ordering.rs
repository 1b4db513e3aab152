//! Deploy ordering.
//!
//! Services without placement go first. Placed services follow in
//! dependency order: a service that colocates with another bundle service
//! comes after it. Ties break by name.

use std::collections::{BTreeMap, BTreeSet};

use deployer_core::{Deployment, Service};

use crate::directive::Directive;
use crate::error::CycleError;

/// Bundle services that `service` colocates with (itself excluded).
pub fn colocation_targets(service: &Service, deployment: &Deployment) -> BTreeSet<String> {
    service
        .unit_placement
        .iter()
        .filter_map(|raw| Directive::parse(raw, deployment.version()).ok())
        .filter_map(|d| d.kind.colocated_service().map(str::to_string))
        .filter(|target| target != &service.name && deployment.has_service(target))
        .collect()
}

/// Service names in the order they must be deployed.
pub fn deploy_order(deployment: &Deployment) -> Result<Vec<String>, CycleError> {
    let (unplaced, placed): (Vec<&Service>, Vec<&Service>) =
        deployment.services().partition(|s| !s.has_placement());
    let mut order: Vec<String> = unplaced.iter().map(|s| s.name.clone()).collect();

    let placed_names: BTreeSet<&str> = placed.iter().map(|s| s.name.as_str()).collect();
    let mut pending: BTreeMap<String, BTreeSet<String>> = placed
        .iter()
        .map(|s| {
            let deps = colocation_targets(s, deployment)
                .into_iter()
                .filter(|t| placed_names.contains(t.as_str()))
                .collect();
            (s.name.clone(), deps)
        })
        .collect();

    while !pending.is_empty() {
        let ready = pending
            .iter()
            .find(|(_, deps)| deps.is_empty())
            .map(|(name, _)| name.clone());
        let Some(next) = ready else {
            return Err(CycleError {
                services: pending.into_keys().collect(),
            });
        };
        pending.remove(&next);
        for deps in pending.values_mut() {
            deps.remove(&next);
        }
        order.push(next);
    }
    Ok(order)
}
