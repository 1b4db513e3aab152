//! The deployment pipeline.
//!
//! Stages run strictly in order: charm metadata, validation, machines
//! (v4), services, extra units, a wait for units to start, relations, a
//! second wait if relations were added, resolve-and-retry of units in
//! error, and finally exposure. Every mutating call is preceded by a live
//! status check so that a second run against a partly deployed cluster
//! only fills in what is missing.

use deployer_core::{BundleVersion, CharmSource, Deployment, Feedback, Service};
use deployer_env::{DeployRequest, EntityKind, EnvError, Environment, StatusSnapshot};
use deployer_placement::{
    MachinesMap, PlacementContext, PlacementV4, Resolved, deploy_order, unit_placement, validate_placement,
};
use deployer_watch::{ErrorAction, Goal, WaitForUnits, wait_for, watch_until};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::diff::live_relations;
use crate::error::{ImportError, ImportResult};
use crate::options::ImportOptions;
use crate::report::ImportReport;

/// Deploys one bundle into one environment.
pub struct Importer<'a> {
    env: &'a dyn Environment,
    deployment: Deployment,
    options: ImportOptions,
}

/// Every bundle check the importer runs before touching the cluster.
///
/// Charm metadata must already be resolved for the subordinate checks.
pub fn validate_bundle(deployment: &Deployment, controller_major: u64) -> Feedback {
    let mut feedback = Feedback::new();
    feedback.extend(deployment.validate_charms());
    feedback.extend(deployment.validate_relations());
    feedback.extend(deployment.validate_constraints());
    feedback.extend(validate_placement(deployment, controller_major));
    feedback
}

impl<'a> Importer<'a> {
    pub fn new(env: &'a dyn Environment, deployment: Deployment, options: ImportOptions) -> Self {
        Self {
            env,
            deployment,
            options,
        }
    }

    /// The bundle, with charm metadata once [`Importer::run`] resolved it.
    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    /// Run every stage against the environment.
    ///
    /// Exceeding the overall timeout is fatal. Changes already made stay
    /// in place; running again picks up from there.
    pub async fn run(&mut self, charms: &dyn CharmSource) -> ImportResult<ImportReport> {
        let started = Instant::now();
        let deadline = started + self.options.timeout;
        let mut report = ImportReport::default();
        info!(bundle = %self.deployment.name(), "starting import");

        self.deployment.resolve_charms(charms)?;
        let major = self.controller_major().await?;
        self.validate(major)?;
        let order = deploy_order(&self.deployment).map_err(|cycle| {
            let mut feedback = Feedback::new();
            feedback.error(cycle.to_string());
            ImportError::Validation(feedback)
        })?;
        debug!(order = ?order, "deploy order");

        let mut machines_map = MachinesMap::new();
        if self.deployment.version() == BundleVersion::V4 {
            self.create_machines(major, &mut machines_map, &mut report).await?;
        }
        self.deploy_services(&order, major, &machines_map, &mut report).await?;
        self.add_units(&order, major, &machines_map, &mut report).await?;

        if !self.options.skip_unit_wait {
            self.wait_for_units(deadline, self.error_action()).await?;
        }

        if self.options.no_relations {
            info!("skipping relations");
        } else if self.add_relations(&mut report).await? > 0 && !self.options.skip_unit_wait {
            let settle = self
                .options
                .rel_wait
                .min(deadline.saturating_duration_since(Instant::now()));
            debug!(?settle, "waiting for relations to settle");
            tokio::time::sleep(settle).await;
            self.wait_for_units(deadline, self.error_action()).await?;
        }

        self.retry_errors(deadline, &mut report).await?;
        self.expose(&mut report).await?;

        info!(
            bundle = %self.deployment.name(),
            elapsed = ?started.elapsed(),
            deployed = report.services_deployed.len(),
            units = report.units_added.len(),
            relations = report.relations_added.len(),
            "import complete"
        );
        Ok(report)
    }

    async fn controller_major(&self) -> ImportResult<u64> {
        let version = match &self.options.controller_version {
            Some(version) => version.clone(),
            None => self.env.version().await?,
        };
        Ok(version.major)
    }

    /// Collect every bundle problem before touching the cluster.
    fn validate(&self, controller_major: u64) -> ImportResult<()> {
        let feedback = validate_bundle(&self.deployment, controller_major);
        feedback.log();
        if feedback.has_errors() {
            return Err(ImportError::Validation(feedback));
        }
        Ok(())
    }

    fn context<'s>(
        &'s self,
        status: &'s StatusSnapshot,
        machines_map: &'s MachinesMap,
        controller_major: u64,
    ) -> PlacementContext<'s> {
        PlacementContext {
            deployment: &self.deployment,
            status,
            machines_map,
            controller_major,
        }
    }

    /// Create declared machines and the hosts `container:new` units need.
    async fn create_machines(
        &self,
        major: u64,
        machines_map: &mut MachinesMap,
        report: &mut ImportReport,
    ) -> ImportResult<()> {
        let status = self.env.status().await?;
        for (key, spec) in self.deployment.machines() {
            if status.has_machine(key) {
                info!(machine = %key, "machine already exists");
                machines_map.insert(key.clone(), key.clone());
                continue;
            }
            let series = spec.series.as_deref().or(self.deployment.series());
            let id = self.env.add_machine(series, spec.constraints.as_deref()).await?;
            info!(machine = %key, id = %id, "machine created");
            if !spec.annotations.is_empty() {
                self.env
                    .set_annotation(&id, EntityKind::Machine, &spec.annotations)
                    .await?;
            }
            machines_map.insert(key.clone(), id.clone());
            report.machines_created.push((key.clone(), id));
        }

        let hosts: Vec<(String, Option<String>)> = {
            let ctx = self.context(&status, machines_map, major);
            self.deployment
                .services()
                .filter(|s| !status.has_service(&s.name))
                .flat_map(|s| {
                    PlacementV4::new(s, ctx)
                        .new_machines_for_containers()
                        .into_iter()
                        .map(move |key| (key, s.series.clone()))
                })
                .collect()
        };
        for (key, series) in hosts {
            let series = series.as_deref().or(self.deployment.series());
            let id = self.env.add_machine(series, None).await?;
            info!(host = %key, id = %id, "container host created");
            machines_map.insert(key.clone(), id.clone());
            report.machines_created.push((key, id));
        }
        Ok(())
    }

    async fn deploy_services(
        &self,
        order: &[String],
        major: u64,
        machines_map: &MachinesMap,
        report: &mut ImportReport,
    ) -> ImportResult<()> {
        for name in order {
            let Some(service) = self.deployment.service(name) else {
                continue;
            };
            let status = self.env.status().await?;
            if status.has_service(name) {
                info!(service = %name, "application already deployed");
                report.services_existing.push(name.clone());
                continue;
            }

            let resolved = if service.num_units > 0 {
                unit_placement(service, self.context(&status, machines_map, major)).get(0)
            } else {
                Resolved::unplaced()
            };
            note_placement(name, &resolved, report);

            let request = self.deploy_request(service, resolved);
            info!(
                service = %name,
                charm = %request.charm_url,
                units = request.num_units,
                placement = ?request.placement,
                "deploying application"
            );
            self.env.deploy(&request).await?;
            if !service.annotations.is_empty() {
                self.env
                    .set_annotation(name, EntityKind::Service, &service.annotations)
                    .await?;
            }
            report.services_deployed.push(name.clone());

            if !self.options.deploy_delay.is_zero() {
                debug!(delay = ?self.options.deploy_delay, "pausing between deploys");
                tokio::time::sleep(self.options.deploy_delay).await;
            }
        }
        Ok(())
    }

    /// Units requested by the deploy call itself.
    ///
    /// Placed units need fresh status one at a time, so only unplaced v3
    /// services get their full count up front.
    fn initial_units(&self, service: &Service) -> u32 {
        match self.deployment.version() {
            BundleVersion::V3 if !service.has_placement() => service.num_units,
            _ => service.num_units.min(1),
        }
    }

    fn deploy_request(&self, service: &Service, resolved: Resolved) -> DeployRequest {
        let charm = self.deployment.charm_for(&service.name);
        let charm_url = charm
            .map(|c| c.url.clone())
            .or_else(|| service.charm.clone())
            .unwrap_or_default();
        let series = service
            .series
            .clone()
            .or_else(|| charm.and_then(|c| c.series.clone()))
            .or_else(|| self.deployment.series().map(str::to_string));
        DeployRequest {
            name: service.name.clone(),
            charm_url,
            repo: charm.and_then(|c| c.repo.clone()),
            config: service.options.clone(),
            constraints: service.constraints.clone(),
            resources: service.resources.clone(),
            storage: service.storage.clone(),
            num_units: self.initial_units(service),
            placement: resolved.placement,
            series,
            bindings: service.bindings.clone(),
        }
    }

    /// Bring every service up to its unit count.
    async fn add_units(
        &self,
        order: &[String],
        major: u64,
        machines_map: &MachinesMap,
        report: &mut ImportReport,
    ) -> ImportResult<()> {
        for name in order {
            let Some(service) = self.deployment.service(name) else {
                continue;
            };
            if self.deployment.is_subordinate(name) {
                continue;
            }
            let status = self.env.status().await?;
            let live = u32::try_from(status.unit_count(name)).unwrap_or(u32::MAX);
            if live >= service.num_units {
                continue;
            }

            if !service.has_placement() {
                let units = self.env.add_units(name, service.num_units - live).await?;
                info!(service = %name, count = units.len(), "units added");
                report.units_added.extend(units);
                continue;
            }
            for index in live..service.num_units {
                let status = self.env.status().await?;
                let resolved = unit_placement(service, self.context(&status, machines_map, major)).get(index);
                note_placement(name, &resolved, report);
                let unit = self.env.add_unit(name, resolved.placement.as_ref()).await?;
                info!(service = %name, unit = %unit, placement = ?resolved.placement, "unit added");
                report.units_added.push(unit);
            }
        }
        Ok(())
    }

    fn error_action(&self) -> ErrorAction {
        if self.options.ignore_errors || self.options.retry_count > 0 {
            ErrorAction::Continue
        } else {
            ErrorAction::Abort
        }
    }

    async fn wait_for_units(&self, deadline: Instant, action: ErrorAction) -> ImportResult<()> {
        let mut wait = WaitForUnits::new(Goal::Started).for_services(self.deployment.service_names());
        wait_for(self.env, &mut wait, deadline, |units| {
            if action == ErrorAction::Continue {
                warn!(units = ?units, "continuing past units in error");
            }
            action
        })
        .await?;
        Ok(())
    }

    /// Add bundle relations the cluster doesn't have yet.
    async fn add_relations(&self, report: &mut ImportReport) -> ImportResult<usize> {
        let status = self.env.status().await?;
        let live = live_relations(&status);
        let mut added = 0;
        for pair in self.deployment.endpoint_pairs() {
            if live.contains(&pair) {
                debug!(relation = %pair, "relation already exists");
                continue;
            }
            self.env.add_relation(&pair.0, &pair.1).await?;
            info!(relation = %pair, "relation added");
            report.relations_added.push(pair.to_string());
            added += 1;
        }
        Ok(added)
    }

    /// Bundle units currently in error.
    async fn errored_units(&self) -> ImportResult<Vec<String>> {
        let status = self.env.status().await?;
        Ok(status
            .errored_units()
            .into_iter()
            .filter(|unit| {
                unit.split_once('/')
                    .is_some_and(|(service, _)| self.deployment.has_service(service))
            })
            .collect())
    }

    /// Resolve units in error and wait again, up to `retry_count` rounds.
    async fn retry_errors(&self, deadline: Instant, report: &mut ImportReport) -> ImportResult<()> {
        let max = self.options.retry_count;
        for attempt in 1..=max {
            let errored = self.errored_units().await?;
            if errored.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ImportError::Timeout {
                    goal: "units in error to be resolved".to_string(),
                    waited: self.options.timeout,
                });
            }
            warn!(attempt, max, units = ?errored, "resolving units in error");
            // Watch before resolving so the units' way out of error is seen.
            let mut stream = self.env.get_watch().await?;
            for unit in &errored {
                match self.env.resolved(unit, true).await {
                    Ok(()) => {}
                    Err(EnvError::AlreadyResolved(_)) => debug!(unit = %unit, "unit already resolved"),
                    Err(e) => return Err(e.into()),
                }
            }
            report.retries = attempt;
            let mut wait = WaitForUnits::new(Goal::Started)
                .for_services(self.deployment.service_names())
                .recovering(errored);
            watch_until(&mut stream, &mut wait, deadline, |_| ErrorAction::Continue).await?;
        }

        if max > 0 && !self.options.ignore_errors {
            let errored = self.errored_units().await?;
            if !errored.is_empty() {
                return Err(ImportError::UnitErrors { units: errored });
            }
        }
        Ok(())
    }

    async fn expose(&self, report: &mut ImportReport) -> ImportResult<()> {
        let status = self.env.status().await?;
        for service in self.deployment.services().filter(|s| s.expose) {
            if status.service(&service.name).is_some_and(|s| s.exposed) {
                debug!(service = %service.name, "already exposed");
                continue;
            }
            self.env.expose(&service.name).await?;
            info!(service = %service.name, "application exposed");
            report.exposed.push(service.name.clone());
        }
        Ok(())
    }
}

/// Log placement problems; the unit falls back to a fresh machine.
fn note_placement(service: &str, resolved: &Resolved, report: &mut ImportReport) {
    let feedback = &resolved.feedback;
    if feedback.is_empty() {
        return;
    }
    feedback.log();
    if resolved.placement.is_none() {
        warn!(service = %service, "placement unresolved, using a new machine");
    }
    report
        .warnings
        .extend(feedback.errors().iter().chain(feedback.warnings()).cloned());
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use deployer_core::{BundleDocument, StaticCharms};
    use deployer_env::MemoryEnvironment;

    fn options() -> ImportOptions {
        ImportOptions {
            timeout: Duration::from_secs(5),
            rel_wait: Duration::ZERO,
            ..ImportOptions::default()
        }
    }

    fn load(yaml: &str) -> Deployment {
        BundleDocument::from_yaml(yaml).unwrap().into_deployment(None).unwrap()
    }

    #[tokio::test]
    async fn v3_unplaced_services_deploy_all_units_at_once() {
        let env = MemoryEnvironment::new();
        let d = load("web:\n  services:\n    a: {charm: 'cs:a', num_units: 3}\n");
        let mut importer = Importer::new(&env, d, options());
        let report = importer.run(&StaticCharms::new()).await.unwrap();
        assert!(report.units_added.is_empty());
        assert_eq!(env.status().await.unwrap().unit_count("a"), 3);
    }

    #[tokio::test]
    async fn v4_deploys_one_unit_then_adds_the_rest() {
        let env = MemoryEnvironment::new();
        let d = load("services:\n  a: {charm: 'cs:a', num_units: 3}\n");
        let mut importer = Importer::new(&env, d, options());
        let report = importer.run(&StaticCharms::new()).await.unwrap();
        assert_eq!(report.units_added, ["a/1", "a/2"]);
    }

    #[tokio::test]
    async fn deploy_delay_is_honoured() {
        let env = MemoryEnvironment::new();
        let d = load("services:\n  a: {charm: 'cs:a'}\n  b: {charm: 'cs:b'}\n");
        let mut opts = options();
        opts.deploy_delay = Duration::from_millis(20);
        let started = Instant::now();
        Importer::new(&env, d, opts).run(&StaticCharms::new()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn placement_cycle_is_reported_once() {
        let d = load("services:\n  a: {charm: 'cs:a', to: [b]}\n  b: {charm: 'cs:b', to: [a]}\n");
        let feedback = validate_bundle(&d, 2);
        let cycles: Vec<&String> = feedback.errors().iter().filter(|e| e.contains("cycle")).collect();
        assert_eq!(cycles, ["Placement cycle between applications: a, b"]);
    }

    #[tokio::test]
    async fn controller_version_comes_from_the_environment() {
        let env = MemoryEnvironment::new().with_version(semver::Version::new(1, 25, 6));
        let importer = Importer::new(&env, load("services: {}\n"), options());
        assert_eq!(importer.controller_major().await.unwrap(), 1);
    }
}
