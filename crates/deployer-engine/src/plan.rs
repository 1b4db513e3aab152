//! Deploy plan: what an import would do, computed without a cluster.

use std::fmt;

use deployer_core::{BundleVersion, Deployment};
use deployer_env::StatusSnapshot;
use deployer_placement::{CycleError, MachinesMap, PlacementContext, deploy_order, unit_placement};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedService {
    pub name: String,
    pub charm: Option<String>,
    pub num_units: u32,
    /// One directive per unit for v4; the directives as written for v3.
    pub directives: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployPlan {
    pub bundle: String,
    pub machines: Vec<String>,
    /// Services in deploy order.
    pub services: Vec<PlannedService>,
    pub relations: Vec<String>,
}

/// Order the bundle's services and lay out their placement.
pub fn plan(deployment: &Deployment, controller_major: u64) -> Result<DeployPlan, CycleError> {
    let status = StatusSnapshot::default();
    let machines_map = MachinesMap::new();
    let ctx = PlacementContext {
        deployment,
        status: &status,
        machines_map: &machines_map,
        controller_major,
    };

    let services = deploy_order(deployment)?
        .into_iter()
        .filter_map(|name| deployment.service(&name))
        .map(|service| PlannedService {
            name: service.name.clone(),
            charm: service.charm.clone(),
            num_units: service.num_units,
            directives: unit_placement(service, ctx).directives(),
        })
        .collect();

    let machines = match deployment.version() {
        BundleVersion::V3 => Vec::new(),
        BundleVersion::V4 => deployment.machines().keys().cloned().collect(),
    };

    Ok(DeployPlan {
        bundle: deployment.name().to_string(),
        machines,
        services,
        relations: deployment.endpoint_pairs().iter().map(ToString::to_string).collect(),
    })
}

impl fmt::Display for DeployPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "bundle: {}", self.bundle)?;
        if !self.machines.is_empty() {
            writeln!(f, "machines: {}", self.machines.join(", "))?;
        }
        for (step, service) in self.services.iter().enumerate() {
            write!(
                f,
                "{:>3}. {} ({}) x{}",
                step + 1,
                service.name,
                service.charm.as_deref().unwrap_or("-"),
                service.num_units
            )?;
            if service.directives.is_empty() {
                writeln!(f)?;
            } else {
                writeln!(f, " to [{}]", service.directives.join(", "))?;
            }
        }
        for relation in &self.relations {
            writeln!(f, "relate {relation}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deployer_core::BundleDocument;

    #[test]
    fn v4_plan_fills_directives_in_order() {
        let d = BundleDocument::from_yaml(concat!(
            "services:\n",
            "  wordpress: {charm: 'cs:wordpress', num_units: 2, to: ['lxd:mysql']}\n",
            "  mysql: {charm: 'cs:mysql', num_units: 2, to: ['1']}\n",
            "  haproxy: {charm: 'cs:haproxy'}\n",
            "machines:\n  '1': {}\n",
            "relations:\n  - [wordpress, mysql]\n",
        ))
        .unwrap()
        .into_deployment(None)
        .unwrap();

        let plan = plan(&d, 2).unwrap();
        let names: Vec<&str> = plan.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["haproxy", "mysql", "wordpress"]);
        assert_eq!(plan.services[0].directives, ["new"]);
        assert_eq!(plan.services[1].directives, ["1", "1"]);
        assert_eq!(plan.services[2].directives, ["lxd:mysql/0", "lxd:mysql/1"]);
        assert_eq!(plan.machines, ["1"]);
        assert_eq!(plan.relations, ["wordpress <-> mysql"]);

        let text = plan.to_string();
        assert!(text.contains("  3. wordpress (cs:wordpress) x2 to [lxd:mysql/0, lxd:mysql/1]"));
    }

    #[test]
    fn cycles_are_refused() {
        let d = BundleDocument::from_yaml("services:\n  a: {charm: 'cs:a', to: [b]}\n  b: {charm: 'cs:b', to: [a]}\n")
            .unwrap()
            .into_deployment(None)
            .unwrap();
        assert_eq!(plan(&d, 2).unwrap_err().services, ["a", "b"]);
    }
}
