//! The deployment model: services, declared machines and relations.
//!
//! A `Deployment` is built once from a bundle and is immutable afterward,
//! apart from attaching charm metadata in [`Deployment::resolve_charms`].

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::{debug, warn};

use crate::bundle::{BundleSpec, MachineSpecRaw, RelationTarget, RelationsSpec, ServiceSpec};
use crate::charm::{CharmInfo, CharmSource};
use crate::constraints::parse_constraints;
use crate::error::{BundleError, BundleResult, CharmResult};
use crate::feedback::Feedback;
use crate::relation::{Endpoint, EndpointPair};

/// Which placement grammar a bundle uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleVersion {
    /// Named stacks, `svc=idx` colocation, arbitrary machine ids.
    V3,
    /// Single bundle, `svc/idx` colocation, `machines` block, `new`.
    V4,
}

/// A single application in the bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct Service {
    pub name: String,
    pub charm: Option<String>,
    pub num_units: u32,
    pub options: BTreeMap<String, Value>,
    pub constraints: Option<String>,
    pub storage: BTreeMap<String, Value>,
    pub resources: BTreeMap<String, Value>,
    pub bindings: BTreeMap<String, Value>,
    /// Annotation keys and values as strings.
    pub annotations: BTreeMap<String, String>,
    pub expose: bool,
    pub series: Option<String>,
    /// Placement directives as written, one per unit index.
    pub unit_placement: Vec<String>,
}

impl Service {
    /// A service with one unit and nothing else set.
    pub fn new(name: &str, charm: &str) -> Self {
        Self {
            name: name.to_string(),
            charm: Some(charm.to_string()),
            num_units: 1,
            options: BTreeMap::new(),
            constraints: None,
            storage: BTreeMap::new(),
            resources: BTreeMap::new(),
            bindings: BTreeMap::new(),
            annotations: BTreeMap::new(),
            expose: false,
            series: None,
            unit_placement: Vec::new(),
        }
    }

    fn from_spec(name: &str, spec: ServiceSpec) -> Self {
        let unit_placement = spec
            .to
            .or(spec.force_machine)
            .map(|p| p.into_strings())
            .unwrap_or_default();
        Self {
            name: name.to_string(),
            charm: spec.charm,
            num_units: spec.num_units.unwrap_or(1),
            options: spec.options.unwrap_or_default(),
            constraints: spec.constraints.and_then(constraints_text),
            storage: spec.storage.unwrap_or_default(),
            resources: spec.resources.unwrap_or_default(),
            bindings: spec.bindings.unwrap_or_default(),
            annotations: stringify(spec.annotations.unwrap_or_default()),
            expose: spec.expose.unwrap_or(false),
            series: spec.series,
            unit_placement,
        }
    }

    pub fn has_placement(&self) -> bool {
        !self.unit_placement.is_empty()
    }
}

/// A machine declared in the bundle's `machines` block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MachineSpec {
    pub series: Option<String>,
    pub constraints: Option<String>,
    pub annotations: BTreeMap<String, String>,
}

impl From<MachineSpecRaw> for MachineSpec {
    fn from(raw: MachineSpecRaw) -> Self {
        Self {
            series: raw.series,
            constraints: raw.constraints.and_then(constraints_text),
            annotations: stringify(raw.annotations.unwrap_or_default()),
        }
    }
}

/// A loaded bundle.
#[derive(Debug, Clone)]
pub struct Deployment {
    name: String,
    version: BundleVersion,
    series: Option<String>,
    services: BTreeMap<String, Service>,
    machines: BTreeMap<String, MachineSpec>,
    relations: Vec<(String, String)>,
    charms: BTreeMap<String, CharmInfo>,
}

impl Deployment {
    /// Build a deployment from a parsed bundle spec.
    pub fn from_spec(name: &str, spec: BundleSpec, version: BundleVersion) -> BundleResult<Self> {
        let services = spec
            .services
            .into_iter()
            .map(|(svc_name, svc)| (svc_name.clone(), Service::from_spec(&svc_name, svc)))
            .collect();
        let machines = spec
            .machines
            .into_iter()
            .map(|(id, raw)| (id.0, raw.map(MachineSpec::from).unwrap_or_default()))
            .collect();
        let relations = expand_relations(spec.relations)?;
        Ok(Self {
            name: name.to_string(),
            version,
            series: spec.series,
            services,
            machines,
            relations,
            charms: BTreeMap::new(),
        })
    }

    /// Assemble a deployment directly from parts.
    pub fn new(
        name: &str,
        version: BundleVersion,
        services: impl IntoIterator<Item = Service>,
        relations: Vec<(String, String)>,
    ) -> Self {
        Self {
            name: name.to_string(),
            version,
            series: None,
            services: services.into_iter().map(|s| (s.name.clone(), s)).collect(),
            machines: BTreeMap::new(),
            relations,
            charms: BTreeMap::new(),
        }
    }

    pub fn with_machines(mut self, machines: BTreeMap<String, MachineSpec>) -> Self {
        self.machines = machines;
        self
    }

    pub fn with_series(mut self, series: &str) -> Self {
        self.series = Some(series.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> BundleVersion {
        self.version
    }

    /// Default series for services and machines that don't set one.
    pub fn series(&self) -> Option<&str> {
        self.series.as_deref()
    }

    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.get(name)
    }

    /// All services, ordered by name.
    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn machines(&self) -> &BTreeMap<String, MachineSpec> {
        &self.machines
    }

    /// Relations in deployment order, without duplicate pairs.
    pub fn relations(&self) -> &[(String, String)] {
        &self.relations
    }

    pub fn endpoint_pairs(&self) -> Vec<EndpointPair> {
        self.relations
            .iter()
            .map(|(a, b)| EndpointPair::parse(a, b))
            .collect()
    }

    /// Look up charm metadata for every service.
    ///
    /// Must run before placement validation: subordinate charms and option
    /// defaults come from here.
    pub fn resolve_charms(&mut self, source: &dyn CharmSource) -> CharmResult<()> {
        for service in self.services.values() {
            let series = service.series.as_deref().or(self.series.as_deref());
            let info = source.resolve(service, series)?;
            debug!(service = %service.name, charm = %info.url, subordinate = info.subordinate, "charm resolved");
            self.charms.insert(service.name.clone(), info);
        }
        Ok(())
    }

    /// Attach metadata for one service directly.
    pub fn set_charm(&mut self, service: &str, info: CharmInfo) {
        self.charms.insert(service.to_string(), info);
    }

    pub fn charm_for(&self, service: &str) -> Option<&CharmInfo> {
        self.charms.get(service)
    }

    /// Subordinate charms can only live alongside another unit.
    ///
    /// Services without resolved metadata are treated as principals.
    pub fn is_subordinate(&self, service: &str) -> bool {
        self.charms.get(service).is_some_and(|c| c.subordinate)
    }

    /// Check that every relation endpoint names a bundle service.
    pub fn validate_relations(&self) -> Feedback {
        let mut feedback = Feedback::new();
        for (a, b) in &self.relations {
            for end in [a, b] {
                let endpoint = Endpoint::parse(end);
                if !self.services.contains_key(&endpoint.service) {
                    feedback.error(format!(
                        "Invalid relation in config, application {} not found, rel {} <-> {}",
                        endpoint.service, a, b
                    ));
                }
            }
        }
        feedback
    }

    /// Check that every constraint string parses.
    pub fn validate_constraints(&self) -> Feedback {
        let mut feedback = Feedback::new();
        let service_constraints = self
            .services
            .values()
            .filter_map(|s| s.constraints.as_ref().map(|c| (format!("application {}", s.name), c)));
        let machine_constraints = self
            .machines
            .iter()
            .filter_map(|(id, m)| m.constraints.as_ref().map(|c| (format!("machine {id}"), c)));
        for (owner, raw) in service_constraints.chain(machine_constraints) {
            if let Err(e) = parse_constraints(raw) {
                feedback.error(format!("Invalid constraints for {owner}: {e}"));
            }
        }
        feedback
    }

    /// Warn about services that have no charm to deploy.
    pub fn validate_charms(&self) -> Feedback {
        let mut feedback = Feedback::new();
        for service in self.services.values() {
            if service.charm.is_none() {
                feedback.error(format!("Application {} has no charm", service.name));
            }
        }
        feedback
    }
}

/// Expand either relation layout into ordered, de-duplicated pairs.
fn expand_relations(spec: Option<RelationsSpec>) -> BundleResult<Vec<(String, String)>> {
    let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
    let mut out = Vec::new();
    let mut push = |a: String, b: String| {
        let key = if a <= b { (a.clone(), b.clone()) } else { (b.clone(), a.clone()) };
        if seen.insert(key) {
            out.push((a, b));
        } else {
            debug!(%a, %b, "dropping duplicate relation");
        }
    };

    match spec {
        None => {}
        Some(RelationsSpec::List(entries)) => {
            for entry in entries {
                let [first, second]: [RelationTarget; 2] = entry.try_into().map_err(|e: Vec<_>| {
                    BundleError::MalformedRelation(format!("expected 2 endpoints, got {}", e.len()))
                })?;
                let RelationTarget::One(a) = first else {
                    return Err(BundleError::MalformedRelation(
                        "first endpoint must be a single name".to_string(),
                    ));
                };
                match second {
                    RelationTarget::One(b) => push(a, b),
                    RelationTarget::Many(targets) => {
                        for b in targets {
                            push(a.clone(), b);
                        }
                    }
                }
            }
        }
        Some(RelationsSpec::Legacy(entries)) => {
            let mut by_weight: BTreeMap<i64, Vec<(String, String)>> = BTreeMap::new();
            for (service, rel) in entries {
                let bucket = by_weight.entry(rel.weight.unwrap_or(0)).or_default();
                for consumed in rel.consumes {
                    bucket.push((service.clone(), consumed));
                }
            }
            for (_, pairs) in by_weight.into_iter().rev() {
                for (a, b) in pairs {
                    push(a, b);
                }
            }
        }
    }
    Ok(out)
}

/// Bundles write constraints either as a string or as a map.
fn constraints_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Object(map) => Some(
            map.into_iter()
                .map(|(k, v)| match v {
                    Value::String(s) => format!("{k}={s}"),
                    other => format!("{k}={other}"),
                })
                .collect::<Vec<_>>()
                .join(" "),
        ),
        other => {
            warn!(constraints = %other, "ignoring constraints that are neither a string nor a map");
            None
        }
    }
}

/// Annotations only support string keys and values.
fn stringify(raw: BTreeMap<String, Value>) -> BTreeMap<String, String> {
    raw.into_iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::BundleDocument;
    use crate::charm::StaticCharms;

    fn load(yaml: &str) -> Deployment {
        BundleDocument::from_yaml(yaml)
            .unwrap()
            .into_deployment(None)
            .unwrap()
    }

    #[test]
    fn service_defaults() {
        let d = load("services:\n  mysql:\n    charm: cs:mysql\n");
        let svc = d.service("mysql").unwrap();
        assert_eq!(svc.num_units, 1);
        assert!(!svc.expose);
        assert!(svc.unit_placement.is_empty());
        assert!(svc.options.is_empty());
    }

    #[test]
    fn null_options_are_empty() {
        let d = load("services:\n  foo:\n    charm: cs:foo\n    options:\n");
        assert!(d.service("foo").unwrap().options.is_empty());
    }

    #[test]
    fn scalar_placement_becomes_list() {
        let d = load("services:\n  mysql:\n    charm: cs:mysql\n    to: 0\n");
        assert_eq!(d.service("mysql").unwrap().unit_placement, ["0"]);
    }

    #[test]
    fn force_machine_is_placement() {
        let d = load("services:\n  mysql:\n    charm: cs:mysql\n    force-machine: 3\n");
        assert_eq!(d.service("mysql").unwrap().unit_placement, ["3"]);
    }

    #[test]
    fn annotations_are_strings() {
        let d = load(
            "services:\n  a:\n    charm: cs:a\n    annotations:\n      gui-x: 100\n      flag: true\n",
        );
        let ann = &d.service("a").unwrap().annotations;
        assert_eq!(ann["gui-x"], "100");
        assert_eq!(ann["flag"], "true");
    }

    #[test]
    fn map_constraints_are_flattened() {
        let d = load("services:\n  a:\n    charm: cs:a\n    constraints:\n      mem: 2G\n      cpu-cores: 2\n");
        assert_eq!(
            d.service("a").unwrap().constraints.as_deref(),
            Some("cpu-cores=2 mem=2G")
        );
    }

    #[test]
    fn list_relations_with_shorthand() {
        let d = load(
            "services: {}\nrelations:\n  - [haproxy, [wordpress, blog]]\n  - [wordpress, mysql]\n  - [mysql, wordpress]\n",
        );
        assert_eq!(
            d.relations(),
            [
                ("haproxy".to_string(), "wordpress".to_string()),
                ("haproxy".to_string(), "blog".to_string()),
                ("wordpress".to_string(), "mysql".to_string()),
            ]
        );
    }

    #[test]
    fn legacy_relations_without_weight() {
        let d = load(
            "stack:\n  relations:\n    wordpress:\n      consumes: [mysql]\n    nginx:\n      consumes: [wordpress]\n",
        );
        let mut rels = d.relations().to_vec();
        rels.sort();
        assert_eq!(
            rels,
            [
                ("nginx".to_string(), "wordpress".to_string()),
                ("wordpress".to_string(), "mysql".to_string()),
            ]
        );
    }

    #[test]
    fn legacy_relations_by_descending_weight() {
        let d = load(concat!(
            "stack:\n  relations:\n",
            "    keystone: {weight: 100, consumes: [mysql]}\n",
            "    nova-compute: {weight: 50, consumes: [mysql]}\n",
            "    glance: {weight: 70, consumes: [mysql]}\n",
        ));
        let order: Vec<&str> = d.relations().iter().map(|(a, _)| a.as_str()).collect();
        assert_eq!(order, ["keystone", "glance", "nova-compute"]);
    }

    #[test]
    fn malformed_relation_entry() {
        let err = BundleDocument::from_yaml("services: {}\nrelations:\n  - [a, b, c]\n")
            .unwrap()
            .into_deployment(None)
            .unwrap_err();
        assert!(matches!(err, BundleError::MalformedRelation(_)));
    }

    #[test]
    fn relation_to_unknown_service() {
        let d = load("services:\n  a:\n    charm: cs:a\nrelations:\n  - [a, 'b:db']\n");
        let feedback = d.validate_relations();
        assert_eq!(
            feedback.errors(),
            ["Invalid relation in config, application b not found, rel a <-> b:db"]
        );
    }

    #[test]
    fn invalid_constraints_are_reported() {
        let d = load(concat!(
            "services:\n  a:\n    charm: cs:a\n    constraints: mem\n",
            "machines:\n  '1':\n    constraints: cpu-cores=many\n",
        ));
        let feedback = d.validate_constraints();
        assert_eq!(feedback.errors().len(), 2);
    }

    #[test]
    fn subordinate_from_charm_metadata() {
        let mut d = load("services:\n  nrpe:\n    charm: cs:nrpe\n  mysql:\n    charm: cs:mysql\n");
        let charms = StaticCharms::new().with(CharmInfo::new("cs:nrpe").subordinate());
        d.resolve_charms(&charms).unwrap();
        assert!(d.is_subordinate("nrpe"));
        assert!(!d.is_subordinate("mysql"));
    }

    #[test]
    fn missing_charm_is_flagged() {
        let d = load("services:\n  a:\n    num_units: 2\n");
        assert!(d.validate_charms().has_errors());
    }
}
