//! Watch deltas.
//!
//! On the wire a delta is a triple `[entity, change, data]`. Only units,
//! machines and relations matter to the deployer; anything else is
//! dropped at this boundary.

use serde::Serialize;
use serde_json::Value;

use crate::error::{EnvError, EnvResult};
use crate::status::{agent_state, field, text, workload_status};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Service,
    Unit,
    Machine,
    Relation,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "application",
            Self::Unit => "unit",
            Self::Machine => "machine",
            Self::Relation => "relation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Add,
    Change,
    Remove,
}

impl ChangeKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "add" => Some(Self::Add),
            "change" => Some(Self::Change),
            "remove" => Some(Self::Remove),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitDelta {
    pub name: String,
    pub service: String,
    pub machine: Option<String>,
    pub agent_state: String,
    pub workload_status: String,
}

impl UnitDelta {
    pub fn is_error(&self) -> bool {
        self.agent_state == crate::status::ERROR || self.workload_status == crate::status::ERROR
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineDelta {
    pub id: String,
    pub agent_state: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationDelta {
    /// `"wordpress:db mysql:db"`.
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "entity", rename_all = "lowercase")]
pub enum DeltaData {
    Unit(UnitDelta),
    Machine(MachineDelta),
    Relation(RelationDelta),
}

/// One change to one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Delta {
    pub change: ChangeKind,
    pub data: DeltaData,
}

impl Delta {
    pub fn new(change: ChangeKind, data: DeltaData) -> Self {
        Self { change, data }
    }

    pub fn entity(&self) -> EntityKind {
        match &self.data {
            DeltaData::Unit(_) => EntityKind::Unit,
            DeltaData::Machine(_) => EntityKind::Machine,
            DeltaData::Relation(_) => EntityKind::Relation,
        }
    }

    /// Unit name, machine id or relation key.
    pub fn name(&self) -> &str {
        match &self.data {
            DeltaData::Unit(u) => &u.name,
            DeltaData::Machine(m) => &m.id,
            DeltaData::Relation(r) => &r.key,
        }
    }

    /// Parse one `[entity, change, data]` triple.
    ///
    /// Returns `Ok(None)` for entity kinds the deployer does not track.
    pub fn from_wire(raw: &Value) -> EnvResult<Option<Self>> {
        let malformed = |why: &str| EnvError::MalformedStatus(format!("delta {raw}: {why}"));
        let [entity, change, data] = raw
            .as_array()
            .and_then(|items| <&[Value; 3]>::try_from(items.as_slice()).ok())
            .ok_or_else(|| malformed("expected [entity, change, data]"))?;
        let change = change
            .as_str()
            .and_then(ChangeKind::parse)
            .ok_or_else(|| malformed("unknown change kind"))?;
        let data_obj = data.as_object().ok_or_else(|| malformed("data is not an object"))?;
        let name = |keys: &[&str]| text(field(data_obj, keys));

        let data = match entity.as_str() {
            Some("unit") => DeltaData::Unit(UnitDelta {
                name: name(&["name", "Name"]).ok_or_else(|| malformed("unit without a name"))?,
                service: name(&["application", "service", "Service"]).unwrap_or_default(),
                machine: name(&["machine-id", "MachineId", "machine"]),
                agent_state: agent_state(data_obj),
                workload_status: workload_status(data_obj),
            }),
            Some("machine") => DeltaData::Machine(MachineDelta {
                id: name(&["id", "Id"]).ok_or_else(|| malformed("machine without an id"))?,
                agent_state: agent_state(data_obj),
            }),
            Some("relation") => DeltaData::Relation(RelationDelta {
                key: name(&["key", "Key"]).unwrap_or_default(),
            }),
            Some(_) => return Ok(None),
            None => return Err(malformed("entity is not a string")),
        };
        Ok(Some(Self { change, data }))
    }
}
