//! Waiting on machine termination.

use std::collections::BTreeSet;

use deployer_env::{ChangeKind, Delta, DeltaData};

use crate::convergence::Convergence;

/// Agent states of a machine that is on its way out.
const DYING: &[&str] = &["dead", "stopped"];

/// Completes once none of the given machines is alive.
#[derive(Debug)]
pub struct WaitForMachineTermination {
    targets: BTreeSet<String>,
    alive: BTreeSet<String>,
}

impl WaitForMachineTermination {
    pub fn new<I, S>(machines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: machines.into_iter().map(Into::into).collect(),
            alive: BTreeSet::new(),
        }
    }

    pub fn remaining(&self) -> Vec<&str> {
        self.alive.iter().map(String::as_str).collect()
    }
}

impl Convergence for WaitForMachineTermination {
    fn goal(&self) -> String {
        format!(
            "termination of machines {}",
            self.targets.iter().cloned().collect::<Vec<_>>().join(", ")
        )
    }

    fn process(&mut self, delta: &Delta) {
        let DeltaData::Machine(machine) = &delta.data else {
            return;
        };
        if !self.targets.contains(&machine.id) {
            return;
        }
        let gone = delta.change == ChangeKind::Remove || DYING.contains(&machine.agent_state.as_str());
        if gone {
            self.alive.remove(&machine.id);
        } else {
            self.alive.insert(machine.id.clone());
        }
    }

    fn complete(&self) -> bool {
        self.alive.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deployer_env::MachineDelta;

    fn machine(change: ChangeKind, id: &str, state: &str) -> Delta {
        Delta::new(
            change,
            DeltaData::Machine(MachineDelta {
                id: id.to_string(),
                agent_state: state.to_string(),
            }),
        )
    }

    #[test]
    fn waits_for_every_target() {
        let mut wait = WaitForMachineTermination::new(["1", "2"]);
        wait.process(&machine(ChangeKind::Add, "0", "started"));
        wait.process(&machine(ChangeKind::Add, "1", "started"));
        wait.process(&machine(ChangeKind::Add, "2", "started"));
        assert_eq!(wait.remaining(), ["1", "2"]);

        wait.process(&machine(ChangeKind::Remove, "1", "stopped"));
        assert!(!wait.complete());
        wait.process(&machine(ChangeKind::Change, "2", "dead"));
        assert!(wait.complete());
    }

    #[test]
    fn untracked_machines_do_not_matter() {
        let mut wait = WaitForMachineTermination::new(["5"]);
        wait.process(&machine(ChangeKind::Add, "0", "started"));
        assert!(wait.complete());
        assert_eq!(wait.goal(), "termination of machines 5");
    }
}
