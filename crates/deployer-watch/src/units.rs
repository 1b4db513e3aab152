//! Waiting on units.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use deployer_env::{ChangeKind, Delta, DeltaData, UnitDelta};

use crate::convergence::Convergence;

/// Workload states that count as a started unit.
const STARTED_WORKLOADS: &[&str] = &["started", "active"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Goal {
    Started,
    Removed,
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => f.write_str("started"),
            Self::Removed => f.write_str("removed"),
        }
    }
}

/// Tracks unit state until every tracked unit reaches the goal.
///
/// Units in error do not hold up a `Started` wait; they are surfaced
/// through [`Convergence::take_new_errors`] and the caller decides.
/// Units marked [`recovering`](Self::recovering) are the exception: they
/// hold the wait until they leave the error state.
#[derive(Debug)]
pub struct WaitForUnits {
    goal: Goal,
    services: Option<BTreeSet<String>>,
    units: BTreeMap<String, UnitDelta>,
    recovering: BTreeSet<String>,
    reported: BTreeSet<String>,
    new_errors: Vec<String>,
}

impl WaitForUnits {
    pub fn new(goal: Goal) -> Self {
        Self {
            goal,
            services: None,
            units: BTreeMap::new(),
            recovering: BTreeSet::new(),
            reported: BTreeSet::new(),
            new_errors: Vec::new(),
        }
    }

    /// Only track units of these services.
    pub fn for_services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services = Some(services.into_iter().map(Into::into).collect());
        self
    }

    /// Units that were just resolved. Their error state is stale until
    /// they report something else, so they count as pending until then.
    pub fn recovering<I, S>(mut self, units: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recovering = units.into_iter().map(Into::into).collect();
        self.reported.extend(self.recovering.iter().cloned());
        self
    }

    /// Units still short of the goal.
    pub fn pending(&self) -> Vec<&str> {
        match self.goal {
            Goal::Removed => self.units.keys().map(String::as_str).collect(),
            Goal::Started => {
                let mut pending: BTreeSet<&str> = self
                    .units
                    .values()
                    .filter(|u| !u.is_error() && !is_started(u))
                    .map(|u| u.name.as_str())
                    .collect();
                pending.extend(self.recovering.iter().map(String::as_str));
                pending.into_iter().collect()
            }
        }
    }

    fn tracks(&self, unit: &UnitDelta) -> bool {
        let Some(services) = &self.services else {
            return true;
        };
        let service = if unit.service.is_empty() {
            unit.name.split_once('/').map_or(unit.name.as_str(), |(s, _)| s)
        } else {
            unit.service.as_str()
        };
        services.contains(service)
    }
}

fn is_started(unit: &UnitDelta) -> bool {
    unit.agent_state == "started" || STARTED_WORKLOADS.contains(&unit.workload_status.as_str())
}

impl Convergence for WaitForUnits {
    fn goal(&self) -> String {
        match &self.services {
            Some(services) => format!(
                "units of {} {}",
                services.iter().cloned().collect::<Vec<_>>().join(", "),
                self.goal
            ),
            None => format!("units {}", self.goal),
        }
    }

    fn process(&mut self, delta: &Delta) {
        let DeltaData::Unit(unit) = &delta.data else {
            return;
        };
        if !self.tracks(unit) {
            return;
        }
        match delta.change {
            ChangeKind::Remove => {
                self.units.remove(&unit.name);
                self.recovering.remove(&unit.name);
            }
            ChangeKind::Add | ChangeKind::Change => {
                if unit.is_error() {
                    if self.reported.insert(unit.name.clone()) {
                        self.new_errors.push(unit.name.clone());
                    }
                } else {
                    self.recovering.remove(&unit.name);
                    self.reported.remove(&unit.name);
                }
                self.units.insert(unit.name.clone(), unit.clone());
            }
        }
    }

    fn complete(&self) -> bool {
        match self.goal {
            Goal::Removed => self.units.is_empty(),
            Goal::Started => {
                self.recovering.is_empty() && self.units.values().all(|u| u.is_error() || is_started(u))
            }
        }
    }

    fn take_new_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.new_errors)
    }
}
