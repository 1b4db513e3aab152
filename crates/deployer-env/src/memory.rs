//! An in-process control plane.
//!
//! `MemoryEnvironment` keeps machines, services, units and relations in a
//! mutex-guarded table and broadcasts deltas to every open watch. Machine
//! `0` always exists and stands in for the controller. It backs rehearsals
//! from the CLI and every engine test.
//!
//! Units normally come up straight away. Two knobs bend that:
//! [`MemoryEnvironment::hold_units`] leaves new units pending until
//! [`MemoryEnvironment::release_units`], and
//! [`MemoryEnvironment::fail_service`] puts a service's units into error
//! until they have been resolved a given number of times.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use deployer_core::{Constraints, ContainerKind, Endpoint, Placement, parse_constraints};
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::environment::{DeployRequest, Environment, EventStream, WATCH_BUFFER};
use crate::error::{EnvError, EnvResult};
use crate::event::{ChangeKind, Delta, DeltaData, EntityKind, MachineDelta, RelationDelta, UnitDelta};
use crate::status::{
    ERROR, MachineStatus, PENDING, STARTED, ServiceStatus, StatusSnapshot, UnitStatus, unit_number,
};

/// Id of the machine hosting the controller.
pub const CONTROLLER_MACHINE: &str = "0";

const DEFAULT_VERSION: semver::Version = semver::Version::new(2, 9, 0);

#[derive(Debug, Clone)]
struct MachineRecord {
    series: Option<String>,
    host: Option<String>,
    agent_state: String,
}

#[derive(Debug, Clone)]
struct UnitRecord {
    machine: Option<String>,
    agent_state: String,
    workload_status: String,
    failures_left: u32,
}

#[derive(Debug, Clone, Default)]
struct ServiceRecord {
    charm: String,
    series: Option<String>,
    options: BTreeMap<String, Value>,
    constraints: Constraints,
    exposed: bool,
    next_unit: u32,
    units: BTreeMap<String, UnitRecord>,
    relations: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Debug, Default)]
struct State {
    machines: BTreeMap<String, MachineRecord>,
    services: BTreeMap<String, ServiceRecord>,
    next_machine: u64,
    containers: BTreeMap<(String, ContainerKind), u32>,
    failures: BTreeMap<String, u32>,
    hold_units: bool,
    annotations: BTreeMap<(EntityKind, String), BTreeMap<String, String>>,
    watchers: Vec<mpsc::Sender<Vec<Delta>>>,
    journal: Vec<String>,
}

pub struct MemoryEnvironment {
    version: semver::Version,
    state: Mutex<State>,
}

impl Default for MemoryEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEnvironment {
    /// An empty cluster holding only the controller machine.
    pub fn new() -> Self {
        let mut state = State {
            next_machine: 1,
            ..State::default()
        };
        state.machines.insert(
            CONTROLLER_MACHINE.to_string(),
            MachineRecord {
                series: None,
                host: None,
                agent_state: STARTED.to_string(),
            },
        );
        Self {
            version: DEFAULT_VERSION,
            state: Mutex::new(state),
        }
    }

    /// A cluster pre-populated from a status document.
    pub fn from_snapshot(snapshot: &StatusSnapshot) -> Self {
        let env = Self::new();
        {
            let mut state = env.state();
            for (id, machine) in &snapshot.machines {
                state.machines.insert(
                    id.clone(),
                    MachineRecord {
                        series: machine.series.clone(),
                        host: machine.host.clone(),
                        agent_state: machine.agent_state.clone(),
                    },
                );
                if let Ok(n) = id.parse::<u64>() {
                    state.next_machine = state.next_machine.max(n + 1);
                }
            }
            for (name, service) in &snapshot.services {
                let units: BTreeMap<String, UnitRecord> = service
                    .units
                    .iter()
                    .map(|(unit, u)| {
                        let record = UnitRecord {
                            machine: u.machine.clone(),
                            agent_state: u.agent_state.clone(),
                            workload_status: u.workload_status.clone(),
                            failures_left: u32::from(u.is_error()),
                        };
                        (unit.clone(), record)
                    })
                    .collect();
                let next_unit = units
                    .keys()
                    .filter_map(|u| unit_number(u))
                    .max()
                    .map_or(0, |n| n + 1);
                let relations = service
                    .relations
                    .iter()
                    .map(|(rel, remotes)| (rel.clone(), remotes.iter().cloned().collect()))
                    .collect();
                state.services.insert(
                    name.clone(),
                    ServiceRecord {
                        charm: service.charm.clone(),
                        series: None,
                        options: service.options.clone(),
                        constraints: service.constraints.clone(),
                        exposed: service.exposed,
                        next_unit,
                        units,
                        relations,
                    },
                );
            }
        }
        env
    }

    pub fn with_version(mut self, version: semver::Version) -> Self {
        self.version = version;
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Leave units added from now on in `pending`.
    pub fn hold_units(&self) {
        self.state().hold_units = true;
    }

    /// Start every pending unit and stop holding new ones.
    pub fn release_units(&self) {
        let mut state = self.state();
        state.hold_units = false;
        let failures = state.failures.clone();
        let mut batch = Vec::new();
        for (name, service) in state.services.iter_mut() {
            for (unit, record) in service.units.iter_mut() {
                if record.agent_state == PENDING {
                    start_unit(record, failures.get(name).copied());
                    batch.push(unit_delta(ChangeKind::Change, name, unit, record));
                }
            }
        }
        state.emit(batch);
    }

    /// Units of `service` added from now on fail until resolved `resolves`
    /// times.
    pub fn fail_service(&self, service: &str, resolves: u32) {
        self.state().failures.insert(service.to_string(), resolves);
    }

    /// Force a unit's state, as if its agent had reported it.
    pub fn set_unit_state(&self, unit: &str, agent_state: &str, workload_status: &str) -> EnvResult<()> {
        let mut state = self.state();
        let (service, record) = state.unit_mut(unit)?;
        record.agent_state = agent_state.to_string();
        record.workload_status = workload_status.to_string();
        let delta = unit_delta(ChangeKind::Change, &service, unit, record);
        state.emit(vec![delta]);
        Ok(())
    }

    /// Remove a single unit, leaving its machine behind.
    pub fn remove_unit(&self, unit: &str) -> EnvResult<()> {
        let mut state = self.state();
        let (service, record) = state.unit_mut(unit)?;
        let delta = unit_delta(ChangeKind::Remove, &service, unit, record);
        if let Some(svc) = state.services.get_mut(&service) {
            svc.units.remove(unit);
        }
        state.journal.push(format!("remove_unit {unit}"));
        state.emit(vec![delta]);
        Ok(())
    }

    /// Annotations set on an entity so far.
    pub fn annotations(&self, kind: EntityKind, entity: &str) -> BTreeMap<String, String> {
        self.state()
            .annotations
            .get(&(kind, entity.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Every mutating call made so far, in order.
    pub fn journal(&self) -> Vec<String> {
        self.state().journal.clone()
    }
}

impl State {
    fn emit(&mut self, batch: Vec<Delta>) {
        if batch.is_empty() {
            return;
        }
        // A watcher that missed a batch can no longer track state, so it is
        // closed and its waiter sees the stream end.
        self.watchers.retain(|tx| match tx.try_send(batch.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(deltas = batch.len(), "watcher is lagging, closing it");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    fn unit_mut(&mut self, unit: &str) -> EnvResult<(String, &mut UnitRecord)> {
        let service = unit
            .split_once('/')
            .map(|(s, _)| s.to_string())
            .ok_or_else(|| EnvError::not_found("unit", unit))?;
        let record = self
            .services
            .get_mut(&service)
            .and_then(|s| s.units.get_mut(unit))
            .ok_or_else(|| EnvError::not_found("unit", unit))?;
        Ok((service, record))
    }

    fn new_machine(&mut self, series: Option<String>, batch: &mut Vec<Delta>) -> String {
        let id = self.next_machine.to_string();
        self.next_machine += 1;
        self.machines.insert(
            id.clone(),
            MachineRecord {
                series,
                host: None,
                agent_state: STARTED.to_string(),
            },
        );
        batch.push(machine_delta(ChangeKind::Add, &id, STARTED));
        id
    }

    /// Pick (or create) the machine a new unit lands on.
    fn allocate(
        &mut self,
        series: Option<String>,
        placement: Option<&Placement>,
        batch: &mut Vec<Delta>,
    ) -> EnvResult<String> {
        match placement {
            None | Some(Placement::Zone { .. }) | Some(Placement::Host { .. }) => {
                Ok(self.new_machine(series, batch))
            }
            Some(Placement::Machine(target)) => {
                if !self.machines.contains_key(&target.machine) {
                    return Err(EnvError::not_found("machine", target.machine.clone()));
                }
                let Some(kind) = target.container else {
                    return Ok(target.machine.clone());
                };
                let counter = self
                    .containers
                    .entry((target.machine.clone(), kind))
                    .or_insert(0);
                let id = format!("{}/{}/{}", target.machine, kind, counter);
                *counter += 1;
                self.machines.insert(
                    id.clone(),
                    MachineRecord {
                        series,
                        host: Some(target.machine.clone()),
                        agent_state: STARTED.to_string(),
                    },
                );
                batch.push(machine_delta(ChangeKind::Add, &id, STARTED));
                Ok(id)
            }
        }
    }

    fn add_unit(&mut self, service: &str, placement: Option<&Placement>) -> EnvResult<(String, Vec<Delta>)> {
        let series = self
            .services
            .get(service)
            .ok_or_else(|| EnvError::not_found("application", service))?
            .series
            .clone();
        let mut batch = Vec::new();
        let machine = self.allocate(series, placement, &mut batch)?;
        let hold = self.hold_units;
        let failures = self.failures.get(service).copied();

        let svc = self
            .services
            .get_mut(service)
            .ok_or_else(|| EnvError::not_found("application", service))?;
        let unit = format!("{service}/{}", svc.next_unit);
        svc.next_unit += 1;
        let mut record = UnitRecord {
            machine: Some(machine),
            agent_state: PENDING.to_string(),
            workload_status: "waiting".to_string(),
            failures_left: 0,
        };
        batch.push(unit_delta(ChangeKind::Add, service, &unit, &record));
        if !hold {
            start_unit(&mut record, failures);
            batch.push(unit_delta(ChangeKind::Change, service, &unit, &record));
        }
        svc.units.insert(unit.clone(), record);
        self.journal.push(match placement {
            Some(p) => format!("add_unit {service} {p}"),
            None => format!("add_unit {service}"),
        });
        Ok((unit, batch))
    }

    fn snapshot(&self) -> StatusSnapshot {
        let machines = self
            .machines
            .iter()
            .map(|(id, m)| {
                let status = MachineStatus {
                    agent_state: m.agent_state.clone(),
                    series: m.series.clone(),
                    host: m.host.clone(),
                };
                (id.clone(), status)
            })
            .collect();
        let services = self
            .services
            .iter()
            .map(|(name, s)| {
                let status = ServiceStatus {
                    charm: s.charm.clone(),
                    exposed: s.exposed,
                    options: s.options.clone(),
                    constraints: s.constraints.clone(),
                    relations: s
                        .relations
                        .iter()
                        .map(|(rel, remotes)| (rel.clone(), remotes.iter().cloned().collect()))
                        .collect(),
                    subordinate_to: Vec::new(),
                    units: s
                        .units
                        .iter()
                        .map(|(unit, u)| {
                            let status = UnitStatus {
                                machine: u.machine.clone(),
                                agent_state: u.agent_state.clone(),
                                workload_status: u.workload_status.clone(),
                            };
                            (unit.clone(), status)
                        })
                        .collect(),
                };
                (name.clone(), status)
            })
            .collect();
        StatusSnapshot { machines, services }
    }

    /// The current state as a batch of `add` deltas.
    fn initial_batch(&self) -> Vec<Delta> {
        let machines = self
            .machines
            .iter()
            .map(|(id, m)| machine_delta(ChangeKind::Add, id, &m.agent_state));
        let units = self.services.iter().flat_map(|(name, s)| {
            s.units
                .iter()
                .map(move |(unit, u)| unit_delta(ChangeKind::Add, name, unit, u))
        });
        machines.chain(units).collect()
    }
}

fn start_unit(record: &mut UnitRecord, failures: Option<u32>) {
    match failures {
        Some(n) if n > 0 => {
            record.agent_state = ERROR.to_string();
            record.workload_status = ERROR.to_string();
            record.failures_left = n;
        }
        _ => {
            record.agent_state = STARTED.to_string();
            record.workload_status = "active".to_string();
        }
    }
}

fn unit_delta(change: ChangeKind, service: &str, unit: &str, record: &UnitRecord) -> Delta {
    Delta::new(
        change,
        DeltaData::Unit(UnitDelta {
            name: unit.to_string(),
            service: service.to_string(),
            machine: record.machine.clone(),
            agent_state: record.agent_state.clone(),
            workload_status: record.workload_status.clone(),
        }),
    )
}

fn machine_delta(change: ChangeKind, id: &str, agent_state: &str) -> Delta {
    Delta::new(
        change,
        DeltaData::Machine(MachineDelta {
            id: id.to_string(),
            agent_state: agent_state.to_string(),
        }),
    )
}

/// Relation name each side records: its own, else the peer's, else the
/// peer's service name.
fn relation_names(a: &Endpoint, b: &Endpoint) -> (String, String) {
    let a_rel = a
        .relation
        .clone()
        .or_else(|| b.relation.clone())
        .unwrap_or_else(|| b.service.clone());
    let b_rel = b
        .relation
        .clone()
        .or_else(|| a.relation.clone())
        .unwrap_or_else(|| a.service.clone());
    (a_rel, b_rel)
}

#[async_trait]
impl Environment for MemoryEnvironment {
    async fn version(&self) -> EnvResult<semver::Version> {
        Ok(self.version.clone())
    }

    async fn status(&self) -> EnvResult<StatusSnapshot> {
        Ok(self.state().snapshot())
    }

    async fn add_machine(&self, series: Option<&str>, constraints: Option<&str>) -> EnvResult<String> {
        if let Some(raw) = constraints {
            parse_constraints(raw).map_err(|e| EnvError::rpc("add_machine", e.to_string()))?;
        }
        let mut state = self.state();
        let mut batch = Vec::new();
        let id = state.new_machine(series.map(str::to_string), &mut batch);
        state.journal.push(format!("add_machine {id}"));
        state.emit(batch);
        debug!(machine = %id, "machine added");
        Ok(id)
    }

    async fn deploy(&self, request: &DeployRequest) -> EnvResult<()> {
        let constraints = match &request.constraints {
            Some(raw) => parse_constraints(raw).map_err(|e| EnvError::rpc("deploy", e.to_string()))?,
            None => Constraints::new(),
        };
        let mut state = self.state();
        if state.services.contains_key(&request.name) {
            return Err(EnvError::rpc(
                "deploy",
                format!("application already exists: {}", request.name),
            ));
        }
        state.services.insert(
            request.name.clone(),
            ServiceRecord {
                charm: request.charm_url.clone(),
                series: request.series.clone(),
                options: request.config.clone(),
                constraints,
                ..ServiceRecord::default()
            },
        );
        state.journal.push(format!("deploy {}", request.name));

        let mut batch = Vec::new();
        for n in 0..request.num_units {
            let placement = if n == 0 { request.placement.as_ref() } else { None };
            let (_, deltas) = state.add_unit(&request.name, placement)?;
            batch.extend(deltas);
        }
        state.emit(batch);
        info!(application = %request.name, charm = %request.charm_url, units = request.num_units, "application deployed");
        Ok(())
    }

    async fn add_unit(&self, service: &str, placement: Option<&Placement>) -> EnvResult<String> {
        let mut state = self.state();
        let (unit, batch) = state.add_unit(service, placement)?;
        state.emit(batch);
        Ok(unit)
    }

    async fn add_units(&self, service: &str, count: u32) -> EnvResult<Vec<String>> {
        let mut state = self.state();
        let mut units = Vec::new();
        let mut batch = Vec::new();
        for _ in 0..count {
            let (unit, deltas) = state.add_unit(service, None)?;
            units.push(unit);
            batch.extend(deltas);
        }
        state.emit(batch);
        Ok(units)
    }

    async fn add_relation(&self, a: &Endpoint, b: &Endpoint) -> EnvResult<()> {
        let mut state = self.state();
        for end in [a, b] {
            if !state.services.contains_key(&end.service) {
                return Err(EnvError::not_found("application", end.service.clone()));
            }
        }
        let (a_rel, b_rel) = relation_names(a, b);
        let exists = state.services[&a.service]
            .relations
            .get(&a_rel)
            .is_some_and(|remotes| remotes.contains(&b.service));
        if exists {
            return Err(EnvError::rpc(
                "add_relation",
                format!("relation already exists: {a} {b}"),
            ));
        }
        for (end, rel, peer) in [(a, &a_rel, &b.service), (b, &b_rel, &a.service)] {
            if let Some(svc) = state.services.get_mut(&end.service) {
                svc.relations.entry(rel.clone()).or_default().insert(peer.clone());
            }
        }
        let key = format!("{}:{} {}:{}", a.service, a_rel, b.service, b_rel);
        state.journal.push(format!("add_relation {a} {b}"));
        state.emit(vec![Delta::new(
            ChangeKind::Add,
            DeltaData::Relation(RelationDelta { key }),
        )]);
        Ok(())
    }

    async fn expose(&self, service: &str) -> EnvResult<()> {
        let mut state = self.state();
        let svc = state
            .services
            .get_mut(service)
            .ok_or_else(|| EnvError::not_found("application", service))?;
        svc.exposed = true;
        state.journal.push(format!("expose {service}"));
        Ok(())
    }

    async fn set_annotation(
        &self,
        entity: &str,
        kind: EntityKind,
        annotations: &BTreeMap<String, String>,
    ) -> EnvResult<()> {
        let mut state = self.state();
        let exists = match kind {
            EntityKind::Service => state.services.contains_key(entity),
            EntityKind::Machine => state.machines.contains_key(entity),
            EntityKind::Unit => state.unit_mut(entity).is_ok(),
            EntityKind::Relation => false,
        };
        if !exists {
            return Err(EnvError::not_found(kind.as_str(), entity));
        }
        state
            .annotations
            .entry((kind, entity.to_string()))
            .or_default()
            .extend(annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
        state.journal.push(format!("set_annotation {} {entity}", kind.as_str()));
        Ok(())
    }

    async fn resolved(&self, unit: &str, retry: bool) -> EnvResult<()> {
        let mut state = self.state();
        let (service, record) = state.unit_mut(unit)?;
        if record.agent_state != ERROR && record.workload_status != ERROR {
            return Err(EnvError::AlreadyResolved(unit.to_string()));
        }
        record.failures_left = record.failures_left.saturating_sub(1);
        let mut batch = Vec::new();
        if record.failures_left == 0 {
            record.agent_state = STARTED.to_string();
            record.workload_status = "active".to_string();
        } else {
            // The retried hook runs and fails again.
            let mut running = record.clone();
            running.agent_state = "executing".to_string();
            running.workload_status = "maintenance".to_string();
            batch.push(unit_delta(ChangeKind::Change, &service, unit, &running));
        }
        batch.push(unit_delta(ChangeKind::Change, &service, unit, record));
        state.journal.push(format!("resolved {unit} retry={retry}"));
        state.emit(batch);
        Ok(())
    }

    async fn destroy_service(&self, service: &str) -> EnvResult<()> {
        let mut state = self.state();
        let record = state
            .services
            .remove(service)
            .ok_or_else(|| EnvError::not_found("application", service))?;
        let mut batch: Vec<Delta> = record
            .units
            .iter()
            .map(|(unit, u)| unit_delta(ChangeKind::Remove, service, unit, u))
            .collect();
        for (name, other) in state.services.iter_mut() {
            for (rel, remotes) in other.relations.iter_mut() {
                if remotes.remove(service) {
                    batch.push(Delta::new(
                        ChangeKind::Remove,
                        DeltaData::Relation(RelationDelta {
                            key: format!("{name}:{rel} {service}"),
                        }),
                    ));
                }
            }
            other.relations.retain(|_, remotes| !remotes.is_empty());
        }
        state.journal.push(format!("destroy_service {service}"));
        state.emit(batch);
        info!(application = %service, "application destroyed");
        Ok(())
    }

    async fn terminate_machine(&self, id: &str, force: bool) -> EnvResult<()> {
        if id == CONTROLLER_MACHINE {
            return Err(EnvError::ProtectedMachine(id.to_string()));
        }
        let mut state = self.state();
        if !state.machines.contains_key(id) {
            return Err(EnvError::not_found("machine", id));
        }
        let doomed: BTreeSet<String> = state
            .machines
            .iter()
            .filter(|(mid, m)| mid.as_str() == id || m.host.as_deref() == Some(id))
            .map(|(mid, _)| mid.clone())
            .collect();

        let mut batch = Vec::new();
        for (name, svc) in state.services.iter_mut() {
            let hosted: Vec<String> = svc
                .units
                .iter()
                .filter(|(_, u)| u.machine.as_ref().is_some_and(|m| doomed.contains(m)))
                .map(|(unit, _)| unit.clone())
                .collect();
            if !hosted.is_empty() && !force {
                return Err(EnvError::rpc(
                    "terminate_machine",
                    format!("machine {id} hosts units: {}", hosted.join(", ")),
                ));
            }
            for unit in hosted {
                if let Some(record) = svc.units.remove(&unit) {
                    batch.push(unit_delta(ChangeKind::Remove, name, &unit, &record));
                }
            }
        }
        for mid in &doomed {
            state.machines.remove(mid);
            batch.push(machine_delta(ChangeKind::Remove, mid, "stopped"));
        }
        state.journal.push(format!("terminate_machine {id}"));
        state.emit(batch);
        Ok(())
    }

    async fn get_watch(&self) -> EnvResult<EventStream> {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let mut state = self.state();
        let initial = state.initial_batch();
        tx.try_send(initial).map_err(|_| EnvError::WatchClosed)?;
        state.watchers.push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, units: u32) -> DeployRequest {
        DeployRequest {
            name: name.to_string(),
            charm_url: format!("cs:{name}"),
            num_units: units,
            ..DeployRequest::default()
        }
    }

    #[tokio::test]
    async fn deploy_creates_units_on_new_machines() {
        let env = MemoryEnvironment::new();
        env.deploy(&request("mysql", 2)).await.unwrap();
        let status = env.status().await.unwrap();
        let mysql = status.service("mysql").unwrap();
        assert_eq!(mysql.units.len(), 2);
        assert_eq!(mysql.units["mysql/0"].machine.as_deref(), Some("1"));
        assert_eq!(mysql.units["mysql/1"].agent_state, STARTED);
        assert!(status.has_machine("0"));
    }

    #[tokio::test]
    async fn duplicate_deploy_is_rejected() {
        let env = MemoryEnvironment::new();
        env.deploy(&request("mysql", 0)).await.unwrap();
        let err = env.deploy(&request("mysql", 0)).await.unwrap_err();
        assert!(matches!(err, EnvError::Rpc { op: "deploy", .. }));
    }

    #[tokio::test]
    async fn containers_are_numbered_per_host() {
        let env = MemoryEnvironment::new();
        env.deploy(&request("a", 0)).await.unwrap();
        let host = env.add_machine(None, None).await.unwrap();
        let lxd = Placement::container(ContainerKind::Lxd, &host);
        env.add_unit("a", Some(&lxd)).await.unwrap();
        env.add_unit("a", Some(&lxd)).await.unwrap();
        let status = env.status().await.unwrap();
        assert_eq!(status.services["a"].units["a/1"].machine.as_deref(), Some("1/lxd/1"));
        assert_eq!(status.machines["1/lxd/0"].host.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn placement_on_missing_machine() {
        let env = MemoryEnvironment::new();
        env.deploy(&request("a", 0)).await.unwrap();
        let err = env.add_unit("a", Some(&Placement::machine("9"))).await.unwrap_err();
        assert!(matches!(err, EnvError::NotFound { kind: "machine", .. }));
    }

    #[tokio::test]
    async fn relations_are_recorded_both_ways() {
        let env = MemoryEnvironment::new();
        env.deploy(&request("wordpress", 1)).await.unwrap();
        env.deploy(&request("mysql", 1)).await.unwrap();
        env.add_relation(&Endpoint::parse("wordpress"), &Endpoint::parse("mysql:db"))
            .await
            .unwrap();
        let status = env.status().await.unwrap();
        assert_eq!(status.services["wordpress"].relations["db"], ["mysql"]);
        assert_eq!(status.services["mysql"].relations["db"], ["wordpress"]);

        let err = env
            .add_relation(&Endpoint::parse("wordpress"), &Endpoint::parse("mysql:db"))
            .await
            .unwrap_err();
        assert!(matches!(err, EnvError::Rpc { op: "add_relation", .. }));
    }

    #[tokio::test]
    async fn failing_units_need_resolving() {
        let env = MemoryEnvironment::new();
        env.fail_service("mysql", 2);
        env.deploy(&request("mysql", 1)).await.unwrap();
        assert_eq!(env.status().await.unwrap().errored_units(), ["mysql/0"]);

        env.resolved("mysql/0", true).await.unwrap();
        assert_eq!(env.status().await.unwrap().errored_units(), ["mysql/0"]);
        env.resolved("mysql/0", true).await.unwrap();
        assert!(env.status().await.unwrap().errored_units().is_empty());

        let err = env.resolved("mysql/0", true).await.unwrap_err();
        assert!(matches!(err, EnvError::AlreadyResolved(_)));
    }

    #[tokio::test]
    async fn controller_machine_is_protected() {
        let env = MemoryEnvironment::new();
        let err = env.terminate_machine("0", true).await.unwrap_err();
        assert!(matches!(err, EnvError::ProtectedMachine(_)));
    }

    #[tokio::test]
    async fn terminate_requires_force_for_occupied_machines() {
        let env = MemoryEnvironment::new();
        env.deploy(&request("a", 1)).await.unwrap();
        assert!(env.terminate_machine("1", false).await.is_err());
        env.terminate_machine("1", true).await.unwrap();
        let status = env.status().await.unwrap();
        assert!(!status.has_machine("1"));
        assert_eq!(status.unit_count("a"), 0);
    }

    #[tokio::test]
    async fn watch_starts_with_current_state() {
        let env = MemoryEnvironment::new();
        env.deploy(&request("a", 1)).await.unwrap();
        let mut watch = env.get_watch().await.unwrap();
        let first = watch.recv().await.unwrap();
        assert!(first.iter().all(|d| d.change == ChangeKind::Add));
        assert!(first.iter().any(|d| d.name() == "a/0"));

        env.remove_unit("a/0").unwrap();
        let next = watch.recv().await.unwrap();
        assert_eq!(next[0].change, ChangeKind::Remove);
        assert_eq!(next[0].name(), "a/0");
    }

    #[tokio::test]
    async fn failed_retry_passes_through_a_running_state() {
        let env = MemoryEnvironment::new();
        env.fail_service("a", 2);
        env.deploy(&request("a", 1)).await.unwrap();
        let mut watch = env.get_watch().await.unwrap();
        watch.recv().await.unwrap();

        env.resolved("a/0", true).await.unwrap();
        let batch = watch.recv().await.unwrap();
        let states: Vec<&str> = batch
            .iter()
            .filter_map(|d| match &d.data {
                DeltaData::Unit(u) => Some(u.agent_state.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(states, ["executing", ERROR]);
    }

    #[tokio::test]
    async fn lagging_watcher_is_closed() {
        let env = MemoryEnvironment::new();
        let mut watch = env.get_watch().await.unwrap();
        for _ in 0..WATCH_BUFFER + 10 {
            env.add_machine(None, None).await.unwrap();
        }

        let mut received = 0;
        while watch.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, WATCH_BUFFER);
    }

    #[tokio::test]
    async fn held_units_stay_pending() {
        let env = MemoryEnvironment::new();
        env.hold_units();
        env.deploy(&request("a", 1)).await.unwrap();
        assert_eq!(env.status().await.unwrap().services["a"].units["a/0"].agent_state, PENDING);
        env.release_units();
        assert_eq!(env.status().await.unwrap().services["a"].units["a/0"].agent_state, STARTED);
    }

    #[tokio::test]
    async fn seeded_from_snapshot() {
        let env = MemoryEnvironment::new();
        env.deploy(&request("a", 2)).await.unwrap();
        let snapshot = env.status().await.unwrap();

        let copy = MemoryEnvironment::from_snapshot(&snapshot);
        assert_eq!(copy.status().await.unwrap(), snapshot);
        let unit = copy.add_unit("a", None).await.unwrap();
        assert_eq!(unit, "a/2");
        assert_eq!(copy.status().await.unwrap().services["a"].units[&unit].machine.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn annotations_need_an_entity() {
        let env = MemoryEnvironment::new();
        let ann = BTreeMap::from([("gui-x".to_string(), "10".to_string())]);
        assert!(env.set_annotation("a", EntityKind::Service, &ann).await.is_err());
        env.deploy(&request("a", 0)).await.unwrap();
        env.set_annotation("a", EntityKind::Service, &ann).await.unwrap();
        assert_eq!(env.annotations(EntityKind::Service, "a"), ann);
    }
}
