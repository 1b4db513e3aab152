//! Teardown: destroy every application, then every machine.

use std::collections::BTreeSet;
use std::time::Duration;

use deployer_env::{CONTROLLER_MACHINE, EnvError, Environment};
use deployer_watch::{ErrorAction, Goal, WaitForMachineTermination, WaitForUnits, wait_for};
use serde::Serialize;
use tokio::time::Instant;
use tracing::info;

use crate::error::ImportResult;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResetReport {
    pub services_destroyed: Vec<String>,
    pub machines_terminated: Vec<String>,
}

/// Returns an environment to just its controller machine.
pub struct Reset<'a> {
    env: &'a dyn Environment,
    timeout: Duration,
    force: bool,
}

impl<'a> Reset<'a> {
    pub fn new(env: &'a dyn Environment, timeout: Duration) -> Self {
        Self {
            env,
            timeout,
            force: false,
        }
    }

    /// Terminate machines even while they still host units.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub async fn run(&self) -> ImportResult<ResetReport> {
        let deadline = Instant::now() + self.timeout;
        let mut report = ResetReport::default();

        let status = self.env.status().await?;
        for service in status.services.keys() {
            self.env.destroy_service(service).await?;
            info!(service = %service, "application destroyed");
            report.services_destroyed.push(service.clone());
        }
        if !report.services_destroyed.is_empty() {
            let mut wait = WaitForUnits::new(Goal::Removed);
            wait_for(self.env, &mut wait, deadline, |_| ErrorAction::Continue).await?;
        }

        let status = self.env.status().await?;
        let machines: Vec<String> = status
            .machines
            .iter()
            .filter(|(id, machine)| id.as_str() != CONTROLLER_MACHINE && machine.host.is_none())
            .map(|(id, _)| id.clone())
            .collect();
        report.machines_terminated = self.terminate(&machines, deadline).await?;
        info!(
            services = report.services_destroyed.len(),
            machines = report.machines_terminated.len(),
            "environment reset"
        );
        Ok(report)
    }

    /// Terminate the given machines and wait until they are gone.
    ///
    /// The controller machine is refused before anything is terminated.
    pub async fn terminate_machines(&self, ids: &[String]) -> ImportResult<Vec<String>> {
        self.terminate(ids, Instant::now() + self.timeout).await
    }

    async fn terminate(&self, ids: &[String], deadline: Instant) -> ImportResult<Vec<String>> {
        if let Some(id) = ids.iter().find(|id| id.as_str() == CONTROLLER_MACHINE) {
            return Err(EnvError::ProtectedMachine(id.clone()).into());
        }
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let status = self.env.status().await?;
        let requested: BTreeSet<&str> = ids.iter().map(String::as_str).collect();
        let containers = status
            .machines
            .iter()
            .filter(|(_, m)| m.host.as_deref().is_some_and(|h| requested.contains(h)))
            .map(|(id, _)| id.clone());
        let mut targets: Vec<String> = ids.to_vec();
        targets.extend(containers);

        for id in ids {
            self.env.terminate_machine(id, self.force).await?;
            info!(machine = %id, "machine terminated");
        }
        let mut wait = WaitForMachineTermination::new(targets.iter().cloned());
        wait_for(self.env, &mut wait, deadline, |_| ErrorAction::Continue).await?;
        Ok(targets)
    }
}
