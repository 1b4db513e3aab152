//! v4 placement: `[container:](machine | service[/index] | new)`.
//!
//! Before anything is resolved the directive list is filled to one entry
//! per unit (see [`fill_placement`]). The filled table is computed once
//! and never written back to the bundle model.

use std::collections::{BTreeMap, BTreeSet};

use deployer_core::{BundleVersion, Deployment, Feedback, Placement, Service};

use crate::colocate::colocate;
use crate::directive::{Directive, PlacementKind};
use crate::error::DirectiveError;
use crate::resolver::{PlacementContext, Resolved, UnitPlacement};

/// Fill a service's directives to `num_units` entries.
///
/// An empty list becomes all `new`; a short list repeats its last entry.
/// Bare service targets get an explicit `/index`, counting up per target,
/// so `[mysql, mysql]` becomes `[mysql/0, mysql/1]`.
pub fn fill_placement(service: &Service, deployment: &Deployment) -> Vec<String> {
    let count = service.num_units as usize;
    let Some(last) = service.unit_placement.last() else {
        return vec!["new".to_string(); count];
    };
    let mut filled = service.unit_placement.clone();
    if filled.len() < count {
        filled.resize(count, last.clone());
    }

    let mut counters: BTreeMap<String, u32> = BTreeMap::new();
    for entry in filled.iter_mut() {
        let target = entry.split_once(':').map_or(entry.as_str(), |(_, t)| t).to_string();
        if deployment.has_service(&target) {
            let next = counters.entry(target).or_insert(0);
            *entry = format!("{entry}/{next}");
            *next += 1;
        }
    }
    filled
}

pub struct PlacementV4<'a> {
    service: &'a Service,
    ctx: PlacementContext<'a>,
    filled: Vec<String>,
    directives: Vec<Result<Directive, DirectiveError>>,
}

impl<'a> PlacementV4<'a> {
    pub fn new(service: &'a Service, ctx: PlacementContext<'a>) -> Self {
        let filled = fill_placement(service, ctx.deployment);
        let directives = filled
            .iter()
            .map(|raw| Directive::parse(raw, BundleVersion::V4))
            .collect();
        Self {
            service,
            ctx,
            filled,
            directives,
        }
    }

    /// Keys for the machines that `container:new` units need, one per
    /// such unit: `"<service>/<unit>"`.
    pub fn new_machines_for_containers(&self) -> Vec<String> {
        self.directives
            .iter()
            .enumerate()
            .filter(|(_, d)| {
                matches!(d, Ok(Directive { kind: PlacementKind::Container(_, inner), .. }) if **inner == PlacementKind::New)
            })
            .map(|(unit, _)| container_host_key(&self.service.name, unit as u32))
            .collect()
    }

    fn validate_one(&self, raw: &str, parsed: &Result<Directive, DirectiveError>, feedback: &mut Feedback) {
        let name = &self.service.name;
        let directive = match parsed {
            Ok(d) => d,
            Err(DirectiveError::InvalidContainer { container }) => {
                feedback.error(format!(
                    "Invalid container type: {container} application: {name} placement: {raw}"
                ));
                return;
            }
            Err(DirectiveError::BadUnitIndex { index }) => {
                feedback.error(format!("Invalid unit number for placement: {name} to {index}"));
                return;
            }
            Err(_) => {
                feedback.error(format!("Invalid application placement: {name} to {raw}"));
                return;
            }
        };
        let major = self.ctx.controller_major;
        if let Some(kind) = directive.kind.container().filter(|k| k.for_controller(major).is_none()) {
            feedback.error(format!(
                "Invalid container type: {kind} application: {name} placement: {raw}"
            ));
        }

        let deployment = self.ctx.deployment;
        match directive.kind.target() {
            PlacementKind::Machine(id) if deployment.machines().contains_key(id) => {}
            PlacementKind::Machine(_) => {
                feedback.error(format!(
                    "Application placement to machine not supported: {name} to {raw}"
                ));
            }
            PlacementKind::New | PlacementKind::Zone(_) | PlacementKind::Maas(_) => {}
            PlacementKind::Colocate { service, .. } if service == name => {
                feedback.error(format!("Application cannot be placed onto itself: {name} to {raw}"));
            }
            PlacementKind::Colocate { service, unit } => match deployment.service(service) {
                Some(_) if deployment.is_subordinate(service) => {
                    feedback.error(format!(
                        "Cannot place to a subordinate application: {name} -> {service}"
                    ));
                }
                Some(target) => {
                    if let Some(index) = unit.filter(|i| *i >= target.num_units) {
                        feedback.error(format!(
                            "Application unit does not exist: {name} to {service}/{index}"
                        ));
                    }
                }
                None => {
                    feedback.error(format!("Invalid application placement: {name} to {raw}"));
                }
            },
            PlacementKind::Container(..) => {
                feedback.error(format!("Invalid application placement: {name} to {raw}"));
            }
        }
    }
}

/// Machines-map key of the host created for a `container:new` unit.
pub fn container_host_key(service: &str, unit: u32) -> String {
    format!("{service}/{unit}")
}

impl UnitPlacement for PlacementV4<'_> {
    /// Filling repeats directives, so identical messages are reported once.
    fn validate(&self) -> Feedback {
        let mut collected = Feedback::new();
        for (raw, parsed) in self.filled.iter().zip(&self.directives) {
            self.validate_one(raw, parsed, &mut collected);
        }
        let mut seen = BTreeSet::new();
        let mut feedback = Feedback::new();
        for message in collected.errors() {
            if seen.insert(message.clone()) {
                feedback.error(message.clone());
            }
        }
        for message in collected.warnings() {
            if seen.insert(message.clone()) {
                feedback.warn(message.clone());
            }
        }
        feedback
    }

    fn get(&self, unit_number: u32) -> Resolved {
        let Some(parsed) = self.directives.get(unit_number as usize) else {
            return Resolved::unplaced();
        };
        let mut feedback = Feedback::new();
        let directive = match parsed {
            Ok(d) => d,
            Err(e) => {
                feedback.error(format!("{}: {e}", self.service.name));
                return Resolved::failed(feedback);
            }
        };
        let container = directive
            .kind
            .container()
            .map(|kind| self.ctx.container_for_controller(kind));
        let place = |machine: &str| match container {
            Some(kind) => Placement::container(kind, machine),
            None => Placement::machine(machine),
        };

        match directive.kind.target() {
            PlacementKind::New if container.is_none() => Resolved::unplaced(),
            PlacementKind::New => {
                let key = container_host_key(&self.service.name, unit_number);
                match self.ctx.machines_map.get(&key) {
                    Some(machine) => Resolved::at(place(machine)),
                    None => {
                        feedback.error(format!("No machine was created for {key} ({directive})"));
                        Resolved::failed(feedback)
                    }
                }
            }
            PlacementKind::Machine(id) => match self.ctx.machines_map.get(id) {
                Some(machine) => Resolved::at(place(machine)),
                None => {
                    feedback.error(format!(
                        "Application placement to machine not supported: {} to {directive}",
                        self.service.name
                    ));
                    Resolved::failed(feedback)
                }
            },
            PlacementKind::Maas(host) => Resolved::at(Placement::Host { host: host.clone() }),
            PlacementKind::Zone(zone) => Resolved::at(Placement::Zone { zone: zone.clone() }),
            PlacementKind::Colocate { service, unit } => {
                let index = unit.unwrap_or(unit_number);
                let placement = colocate(
                    self.ctx.status,
                    &self.service.name,
                    service,
                    index,
                    container,
                    &mut feedback,
                );
                Resolved { placement, feedback }
            }
            PlacementKind::Container(..) => Resolved::unplaced(),
        }
    }

    fn directives(&self) -> Vec<String> {
        self.filled.clone()
    }
}
