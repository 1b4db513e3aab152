//! Colocation against live status.

use deployer_core::{ContainerKind, Feedback, Placement};
use deployer_env::StatusSnapshot;

/// Host machine of the `index`-th unit (by unit number) of `target`.
///
/// Failures are recorded in `feedback` and yield `None`, so the caller
/// can fall back to a fresh machine instead of aborting mid-deploy.
/// A missing target application is an error. A target with no unit at
/// `index`, or whose unit has no machine yet, is only a warning: the
/// bundle itself is valid and the unit still gets deployed.
pub fn colocate(
    status: &StatusSnapshot,
    requester: &str,
    target: &str,
    index: u32,
    container: Option<ContainerKind>,
    feedback: &mut Feedback,
) -> Option<Placement> {
    let Some(with_service) = status.service(target) else {
        feedback.error(format!(
            "Application {requester} to be deployed with non-existent application {target}"
        ));
        return None;
    };

    let units = with_service.units_by_number();
    let Some((unit_name, unit)) = units.get(index as usize) else {
        feedback.warn(format!(
            "Application:{requester}, Deploy-with-application:{target}, Requested-unit-index={index}, \
             Cannot solve, falling back to default placement"
        ));
        return None;
    };
    let Some(machine) = unit.machine.as_deref().filter(|m| !m.is_empty()) else {
        feedback.warn(format!(
            "Application:{requester} deploy-with unit missing machine for {unit_name}"
        ));
        return None;
    };

    Some(match container {
        Some(kind) => Placement::container(kind, machine),
        None => Placement::machine(machine),
    })
}
