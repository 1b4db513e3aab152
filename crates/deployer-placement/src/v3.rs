//! v3 placement: `[container:]target[=index]`.
//!
//! Units past the end of the directive list are unplaced. A bare service
//! target colocates with the unit of the same index.

use deployer_core::{BundleVersion, Feedback, Placement, Service};

use crate::colocate::colocate;
use crate::directive::{Directive, PlacementKind};
use crate::error::DirectiveError;
use crate::resolver::{PlacementContext, Resolved, UnitPlacement};

pub struct PlacementV3<'a> {
    service: &'a Service,
    ctx: PlacementContext<'a>,
    directives: Vec<Result<Directive, DirectiveError>>,
    arbitrary_machines: bool,
}

impl<'a> PlacementV3<'a> {
    pub fn new(service: &'a Service, ctx: PlacementContext<'a>) -> Self {
        let directives = service
            .unit_placement
            .iter()
            .map(|raw| Directive::parse(raw, BundleVersion::V3))
            .collect();
        Self {
            service,
            ctx,
            directives,
            arbitrary_machines: true,
        }
    }

    /// Restrict numeric targets to machine 0 and bundle-declared machines.
    pub fn without_arbitrary_machines(mut self) -> Self {
        self.arbitrary_machines = false;
        self
    }

    fn machine_allowed(&self, id: &str) -> bool {
        id == "0" || self.arbitrary_machines || self.ctx.deployment.machines().contains_key(id)
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
            Err(DirectiveError::BadUnitIndex { .. }) => {
                feedback.error(format!("Invalid application: {name} placement: {raw}"));
                return;
            }
            Err(_) => {
                feedback.error(format!("Invalid application placement {name} to {raw}"));
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
            PlacementKind::Machine(id) => {
                if !self.machine_allowed(id) {
                    feedback.error(format!(
                        "Application placement to machine not supported {name} to {raw}"
                    ));
                }
            }
            PlacementKind::Zone(_) | PlacementKind::Maas(_) => {}
            PlacementKind::Colocate { service, .. } if service == name => {
                feedback.error(format!("Application cannot be placed onto itself: {name} to {raw}"));
            }
            PlacementKind::Colocate { service, .. } => match deployment.service(service) {
                Some(target) if target.has_placement() => {
                    feedback.error(format!(
                        "Nested placement not supported {name} -> {service} -> [{}]",
                        target.unit_placement.join(", ")
                    ));
                }
                Some(_) if deployment.is_subordinate(service) => {
                    feedback.error(format!(
                        "Cannot place to a subordinate application: {name} -> {service}"
                    ));
                }
                Some(_) => {}
                None => {
                    feedback.error(format!("Invalid application placement {name} to {raw}"));
                }
            },
            PlacementKind::New | PlacementKind::Container(..) => {
                feedback.error(format!("Invalid application placement {name} to {raw}"));
            }
        }
    }
}

impl UnitPlacement for PlacementV3<'_> {
    fn validate(&self) -> Feedback {
        let mut feedback = Feedback::new();
        for (raw, parsed) in self.service.unit_placement.iter().zip(&self.directives) {
            self.validate_one(raw, parsed, &mut feedback);
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

        match directive.kind.target() {
            PlacementKind::Machine(id) if self.machine_allowed(id) => Resolved::at(match container {
                Some(kind) => Placement::container(kind, id),
                None => Placement::machine(id),
            }),
            PlacementKind::Machine(id) => {
                feedback.error(format!(
                    "Application placement to machine not supported {} to {id}",
                    self.service.name
                ));
                Resolved::failed(feedback)
            }
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
            PlacementKind::New | PlacementKind::Container(..) => Resolved::unplaced(),
        }
    }

    fn directives(&self) -> Vec<String> {
        self.service.unit_placement.clone()
    }
}
