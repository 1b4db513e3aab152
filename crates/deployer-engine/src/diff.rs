//! Live status vs. bundle.
//!
//! [`diff`] never touches the cluster; it compares a status snapshot with
//! the bundle and reports what is missing, what is unknown to the bundle
//! and which services differ. An empty report serializes to `{}`.

use std::collections::BTreeMap;

use deployer_core::{CharmInfo, Constraints, Deployment, Endpoint, EndpointPair, Service, parse_constraints};
use deployer_env::{ServiceStatus, StatusSnapshot};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeltaReport {
    #[serde(skip_serializing_if = "RelationsDelta::is_empty")]
    pub relations: RelationsDelta,
    #[serde(skip_serializing_if = "ServicesDelta::is_empty")]
    pub services: ServicesDelta,
}

impl DeltaReport {
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty() && self.services.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RelationsDelta {
    /// In the bundle, not in the cluster.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<EndpointPair>,
    /// In the cluster, not in the bundle.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unknown: Vec<EndpointPair>,
}

impl RelationsDelta {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.unknown.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServicesDelta {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub missing: BTreeMap<String, ServiceSummary>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub unknown: BTreeMap<String, ServiceSummary>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub modified: BTreeMap<String, ServiceDelta>,
}

impl ServicesDelta {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.unknown.is_empty() && self.modified.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charm: Option<String>,
    pub num_units: usize,
}

/// How one service differs. `env-*` is the live side, `cfg-*` the bundle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServiceDelta {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env_config: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub cfg_config: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env_constraints: Constraints,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub cfg_constraints: Constraints,
    /// Live unit count minus bundle unit count.
    #[serde(rename = "num_units", skip_serializing_if = "Option::is_none")]
    pub num_units: Option<i64>,
}

impl ServiceDelta {
    pub fn is_empty(&self) -> bool {
        self.env_config.is_empty()
            && self.cfg_config.is_empty()
            && self.env_constraints.is_empty()
            && self.cfg_constraints.is_empty()
            && self.num_units.is_none()
    }
}

/// Compare live status with the bundle.
pub fn diff(status: &StatusSnapshot, deployment: &Deployment) -> DeltaReport {
    let report = DeltaReport {
        relations: diff_relations(status, deployment),
        services: diff_services(status, deployment),
    };
    debug!(empty = report.is_empty(), "diff computed");
    report
}

/// Relations as the cluster reports them, one pair per relation.
///
/// Each service lists its relation names and the remote services. The
/// remote side is named only when the remote lists exactly one relation
/// back; otherwise it stays a wildcard. Peer relations are skipped.
pub fn live_relations(status: &StatusSnapshot) -> Vec<EndpointPair> {
    let mut pairs: Vec<EndpointPair> = Vec::new();
    for (name, service) in &status.services {
        for (relation, remotes) in &service.relations {
            for remote in remotes.iter().filter(|r| *r != name) {
                let back = status.service(remote).map(|r| relation_names_towards(r, name));
                let remote_relation = match back.as_deref() {
                    Some([only]) => Some(only.as_str()),
                    _ => None,
                };
                let pair = EndpointPair::new(
                    Endpoint::new(name, Some(relation.as_str())),
                    Endpoint::new(remote, remote_relation),
                );
                if !pairs.contains(&pair) {
                    pairs.push(pair);
                }
            }
        }
    }
    pairs
}

fn relation_names_towards(service: &ServiceStatus, remote: &str) -> Vec<String> {
    service
        .relations
        .iter()
        .filter(|(_, remotes)| remotes.iter().any(|r| r == remote))
        .map(|(rel, _)| rel.clone())
        .collect()
}

fn diff_relations(status: &StatusSnapshot, deployment: &Deployment) -> RelationsDelta {
    let wanted = deployment.endpoint_pairs();
    let live = live_relations(status);
    RelationsDelta {
        missing: wanted.iter().filter(|p| !live.contains(p)).cloned().collect(),
        unknown: live.iter().filter(|p| !wanted.contains(p)).cloned().collect(),
    }
}

fn diff_services(status: &StatusSnapshot, deployment: &Deployment) -> ServicesDelta {
    let mut delta = ServicesDelta::default();
    for service in deployment.services() {
        match status.service(&service.name) {
            None => {
                delta.missing.insert(
                    service.name.clone(),
                    ServiceSummary {
                        charm: service.charm.clone(),
                        num_units: service.num_units as usize,
                    },
                );
            }
            Some(live) => {
                let changes = diff_service(service, live, deployment);
                if !changes.is_empty() {
                    delta.modified.insert(service.name.clone(), changes);
                }
            }
        }
    }
    for (name, live) in &status.services {
        if !deployment.has_service(name) {
            delta.unknown.insert(
                name.clone(),
                ServiceSummary {
                    charm: Some(live.charm.clone()).filter(|c| !c.is_empty()),
                    num_units: live.units.len(),
                },
            );
        }
    }
    delta
}

fn diff_service(service: &Service, live: &ServiceStatus, deployment: &Deployment) -> ServiceDelta {
    let mut delta = ServiceDelta::default();
    let charm = deployment.charm_for(&service.name);

    let keys = service.options.keys().chain(live.options.keys());
    for key in keys {
        if delta.cfg_config.contains_key(key) {
            continue;
        }
        let wanted = option_value(&service.options, key, charm);
        let actual = option_value(&live.options, key, charm);
        if !same_value(&wanted, &actual) {
            delta.env_config.insert(key.clone(), actual);
            delta.cfg_config.insert(key.clone(), wanted);
        }
    }

    let wanted = bundle_constraints(service);
    if wanted != live.constraints {
        delta.env_constraints = live.constraints.clone();
        delta.cfg_constraints = wanted;
    }

    let subordinate = deployment.is_subordinate(&service.name) || live.is_subordinate();
    if !subordinate {
        let difference = live.units.len() as i64 - i64::from(service.num_units);
        if difference != 0 {
            delta.num_units = Some(difference);
        }
    }
    delta
}

/// The value set for `key`, or the charm default when unset.
fn option_value(options: &BTreeMap<String, Value>, key: &str, charm: Option<&CharmInfo>) -> Value {
    options
        .get(key)
        .cloned()
        .unwrap_or_else(|| charm.map_or(Value::Null, |c| c.default_for(key)))
}

/// Status reports every scalar option as text, so `8080` matches `"8080"`.
fn same_value(a: &Value, b: &Value) -> bool {
    a == b || matches!((scalar_text(a), scalar_text(b)), (Some(x), Some(y)) if x == y)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn bundle_constraints(service: &Service) -> Constraints {
    let Some(raw) = service.constraints.as_deref() else {
        return Constraints::new();
    };
    parse_constraints(raw).unwrap_or_else(|e| {
        warn!(service = %service.name, error = %e, "ignoring unparseable bundle constraints");
        Constraints::new()
    })
}
