//! Normalized cluster status.
//!
//! Controllers report status in two schemas. Older ones capitalize keys
//! (`Services`, `Units`, `AgentState`) and put the lifecycle in a flat
//! `agent-state` string; newer ones say `applications` and split state into
//! `juju-status` and `workload-status` objects. [`StatusSnapshot::from_value`]
//! folds both into one shape.

use std::collections::BTreeMap;

use deployer_core::{Constraints, normalize_constraints, parse_constraints};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{EnvError, EnvResult};

/// Agent state of a unit or machine that is up and running.
pub const STARTED: &str = "started";
pub const PENDING: &str = "pending";
pub const ERROR: &str = "error";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub machines: BTreeMap<String, MachineStatus>,
    pub services: BTreeMap<String, ServiceStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MachineStatus {
    pub agent_state: String,
    pub series: Option<String>,
    /// Set for containers; the machine the container lives on.
    pub host: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub charm: String,
    pub exposed: bool,
    pub options: BTreeMap<String, Value>,
    pub constraints: Constraints,
    /// Local relation name → remote service names.
    pub relations: BTreeMap<String, Vec<String>>,
    /// Set for subordinates: the principals they are attached to.
    pub subordinate_to: Vec<String>,
    pub units: BTreeMap<String, UnitStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UnitStatus {
    pub machine: Option<String>,
    pub agent_state: String,
    pub workload_status: String,
}

impl UnitStatus {
    pub fn is_error(&self) -> bool {
        self.agent_state == ERROR || self.workload_status == ERROR
    }
}

/// Unit number from a unit name (`mysql/3` → 3).
pub fn unit_number(unit: &str) -> Option<u32> {
    unit.rsplit_once('/').and_then(|(_, n)| n.parse().ok())
}

impl ServiceStatus {
    /// Units ordered by unit number rather than by name.
    pub fn units_by_number(&self) -> Vec<(&str, &UnitStatus)> {
        let mut units: Vec<(&str, &UnitStatus)> =
            self.units.iter().map(|(name, u)| (name.as_str(), u)).collect();
        units.sort_by_key(|(name, _)| unit_number(name).unwrap_or(u32::MAX));
        units
    }

    pub fn is_subordinate(&self) -> bool {
        !self.subordinate_to.is_empty()
    }
}

impl StatusSnapshot {
    pub fn service(&self, name: &str) -> Option<&ServiceStatus> {
        self.services.get(name)
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn has_machine(&self, id: &str) -> bool {
        self.machines.contains_key(id)
    }

    pub fn unit_count(&self, service: &str) -> usize {
        self.services.get(service).map_or(0, |s| s.units.len())
    }

    /// Every unit in the cluster, keyed by unit name.
    pub fn units(&self) -> impl Iterator<Item = (&str, &UnitStatus)> {
        self.services
            .values()
            .flat_map(|s| s.units.iter().map(|(name, u)| (name.as_str(), u)))
    }

    pub fn errored_units(&self) -> Vec<String> {
        self.units()
            .filter(|(_, u)| u.is_error())
            .map(|(name, _)| name.to_string())
            .collect()
    }

    /// Parse a raw status document in either schema.
    pub fn from_value(raw: &Value) -> EnvResult<Self> {
        let root = raw
            .as_object()
            .ok_or_else(|| EnvError::MalformedStatus("status is not an object".to_string()))?;

        let mut snapshot = StatusSnapshot::default();
        if let Some(machines) = field(root, &["machines", "Machines"]) {
            let machines = as_object(machines, "machines")?;
            for (id, machine) in machines {
                collect_machine(&mut snapshot.machines, id, machine, None)?;
            }
        }
        if let Some(services) = field(root, &["applications", "services", "Services"]) {
            let services = as_object(services, "applications")?;
            for (name, service) in services {
                let service = parse_service(name, as_object(service, name)?)?;
                snapshot.services.insert(name.clone(), service);
            }
        }
        Ok(snapshot)
    }
}

fn collect_machine(
    out: &mut BTreeMap<String, MachineStatus>,
    id: &str,
    raw: &Value,
    host: Option<&str>,
) -> EnvResult<()> {
    let obj = as_object(raw, id)?;
    out.insert(
        id.to_string(),
        MachineStatus {
            agent_state: agent_state(obj),
            series: field(obj, &["series", "Series"])
                .and_then(Value::as_str)
                .map(str::to_string),
            host: host.map(str::to_string),
        },
    );
    if let Some(containers) = field(obj, &["containers", "Containers"]) {
        for (child, container) in as_object(containers, id)? {
            collect_machine(out, child, container, Some(id))?;
        }
    }
    Ok(())
}

fn parse_service(name: &str, obj: &Map<String, Value>) -> EnvResult<ServiceStatus> {
    let mut service = ServiceStatus {
        charm: text(field(obj, &["charm", "Charm"])).unwrap_or_default(),
        exposed: field(obj, &["exposed", "Exposed"])
            .and_then(Value::as_bool)
            .unwrap_or(false),
        options: field(obj, &["options", "Options"])
            .and_then(Value::as_object)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default(),
        constraints: parse_status_constraints(name, field(obj, &["constraints", "Constraints"])),
        ..ServiceStatus::default()
    };

    if let Some(relations) = field(obj, &["relations", "Relations"]).and_then(Value::as_object) {
        for (rel, remotes) in relations {
            let remotes = match remotes {
                Value::Array(items) => items.iter().filter_map(|v| text(Some(v))).collect(),
                other => text(Some(other)).into_iter().collect(),
            };
            service.relations.insert(rel.clone(), remotes);
        }
    }
    if let Some(Value::Array(items)) = field(obj, &["subordinate-to", "SubordinateTo"]) {
        service.subordinate_to = items.iter().filter_map(|v| text(Some(v))).collect();
    }
    if let Some(units) = field(obj, &["units", "Units"]) {
        for (unit, raw) in as_object(units, name)? {
            let unit_obj = as_object(raw, unit)?;
            service.units.insert(
                unit.clone(),
                UnitStatus {
                    machine: text(field(unit_obj, &["machine", "Machine"])),
                    agent_state: agent_state(unit_obj),
                    workload_status: workload_status(unit_obj),
                },
            );
        }
    }
    Ok(service)
}

fn parse_status_constraints(service: &str, raw: Option<&Value>) -> Constraints {
    let parsed = match raw {
        None | Some(Value::Null) => return Constraints::new(),
        Some(Value::String(s)) => parse_constraints(s),
        Some(Value::Object(m)) => {
            normalize_constraints(&m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        }
        Some(other) => {
            warn!(%service, constraints = %other, "unrecognized constraints in status");
            return Constraints::new();
        }
    };
    parsed.unwrap_or_else(|e| {
        warn!(%service, error = %e, "unparseable constraints in status");
        Constraints::new()
    })
}

/// Agent lifecycle, mapped onto the legacy vocabulary
/// (`pending` / `started` / `error` / ...).
pub(crate) fn agent_state(obj: &Map<String, Value>) -> String {
    if let Some(state) = text(field(obj, &["agent-state", "AgentState", "Status"])) {
        return state;
    }
    let current = field(obj, &["juju-status", "agent-status", "JujuStatus", "AgentStatus"])
        .and_then(|s| text(status_current(s)));
    match current.as_deref() {
        Some("idle" | "started" | "running") => STARTED.to_string(),
        Some("allocating" | "pending" | "") | None => PENDING.to_string(),
        Some(other) => other.to_string(),
    }
}

pub(crate) fn workload_status(obj: &Map<String, Value>) -> String {
    field(obj, &["workload-status", "WorkloadStatus"])
        .and_then(|s| text(status_current(s)))
        .unwrap_or_default()
}

/// Status objects use `current` (new) or `status`/`Status` (old).
fn status_current(value: &Value) -> Option<&Value> {
    match value {
        Value::Object(obj) => field(obj, &["current", "status", "Status", "Current"]),
        other => Some(other),
    }
}

pub(crate) fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k))
}

/// Strings pass through; numbers are stringified (`machine: 1`).
pub(crate) fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_object<'a>(value: &'a Value, what: &str) -> EnvResult<&'a Map<String, Value>> {
    match value {
        Value::Object(obj) => Ok(obj),
        _ => Err(EnvError::MalformedStatus(format!("{what} is not an object"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_schema() {
        let raw = json!({
            "Machines": {"0": {"AgentState": "started", "Series": "trusty"}},
            "Services": {
                "mysql": {
                    "Charm": "cs:trusty/mysql-1",
                    "Exposed": true,
                    "Units": {"mysql/0": {"Machine": "0", "AgentState": "error"}}
                }
            }
        });
        let status = StatusSnapshot::from_value(&raw).unwrap();
        assert_eq!(status.machines["0"].series.as_deref(), Some("trusty"));
        let mysql = status.service("mysql").unwrap();
        assert!(mysql.exposed);
        assert_eq!(mysql.units["mysql/0"].machine.as_deref(), Some("0"));
        assert_eq!(status.errored_units(), ["mysql/0"]);
    }

    #[test]
    fn current_schema() {
        let raw = json!({
            "machines": {
                "1": {
                    "juju-status": {"current": "started"},
                    "containers": {"1/lxd/0": {"juju-status": {"current": "pending"}}}
                }
            },
            "applications": {
                "wordpress": {
                    "charm": "cs:wordpress",
                    "constraints": "mem=2G",
                    "relations": {"db": ["mysql"]},
                    "units": {
                        "wordpress/0": {
                            "machine": "1/lxd/0",
                            "juju-status": {"current": "idle"},
                            "workload-status": {"current": "active"}
                        }
                    }
                }
            }
        });
        let status = StatusSnapshot::from_value(&raw).unwrap();
        assert_eq!(status.machines["1/lxd/0"].host.as_deref(), Some("1"));
        assert_eq!(status.machines["1/lxd/0"].agent_state, PENDING);
        let wp = status.service("wordpress").unwrap();
        assert_eq!(wp.constraints["mem"], json!(2048));
        assert_eq!(wp.relations["db"], ["mysql"]);
        let unit = &wp.units["wordpress/0"];
        assert_eq!(unit.agent_state, STARTED);
        assert_eq!(unit.workload_status, "active");
    }

    #[test]
    fn numeric_machine_ids() {
        let raw = json!({"services": {"a": {"units": {"a/0": {"machine": 3}}}}});
        let status = StatusSnapshot::from_value(&raw).unwrap();
        assert_eq!(status.services["a"].units["a/0"].machine.as_deref(), Some("3"));
    }

    #[test]
    fn units_sort_numerically() {
        let mut svc = ServiceStatus::default();
        for n in [10, 2, 1] {
            svc.units.insert(format!("a/{n}"), UnitStatus::default());
        }
        let names: Vec<&str> = svc.units_by_number().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["a/1", "a/2", "a/10"]);
    }

    #[test]
    fn rejects_non_object() {
        assert!(matches!(
            StatusSnapshot::from_value(&json!([1, 2])),
            Err(EnvError::MalformedStatus(_))
        ));
    }
}
