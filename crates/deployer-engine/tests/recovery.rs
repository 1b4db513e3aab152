//! Resolve-and-retry against a cluster where units recover some time
//! after `resolved` returns, as a real controller does.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deployer_core::{BundleDocument, Endpoint, Placement, StaticCharms};
use deployer_engine::{ImportError, ImportOptions, Importer};
use deployer_env::{
    DeployRequest, EntityKind, EnvResult, Environment, EventStream, MemoryEnvironment, StatusSnapshot,
};
use tokio::time::Instant;

/// Delegates to an in-memory cluster, but lets units leave the error
/// state only `delay` after they were resolved.
struct SlowRecovery {
    inner: Arc<MemoryEnvironment>,
    delay: Duration,
}

#[async_trait]
impl Environment for SlowRecovery {
    async fn version(&self) -> EnvResult<semver::Version> {
        self.inner.version().await
    }

    async fn status(&self) -> EnvResult<StatusSnapshot> {
        self.inner.status().await
    }

    async fn add_machine(&self, series: Option<&str>, constraints: Option<&str>) -> EnvResult<String> {
        self.inner.add_machine(series, constraints).await
    }

    async fn deploy(&self, request: &DeployRequest) -> EnvResult<()> {
        self.inner.deploy(request).await
    }

    async fn add_unit(&self, service: &str, placement: Option<&Placement>) -> EnvResult<String> {
        self.inner.add_unit(service, placement).await
    }

    async fn add_units(&self, service: &str, count: u32) -> EnvResult<Vec<String>> {
        self.inner.add_units(service, count).await
    }

    async fn add_relation(&self, a: &Endpoint, b: &Endpoint) -> EnvResult<()> {
        self.inner.add_relation(a, b).await
    }

    async fn expose(&self, service: &str) -> EnvResult<()> {
        self.inner.expose(service).await
    }

    async fn set_annotation(
        &self,
        entity: &str,
        kind: EntityKind,
        annotations: &BTreeMap<String, String>,
    ) -> EnvResult<()> {
        self.inner.set_annotation(entity, kind, annotations).await
    }

    async fn resolved(&self, unit: &str, retry: bool) -> EnvResult<()> {
        let inner = Arc::clone(&self.inner);
        let unit = unit.to_string();
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = inner.resolved(&unit, retry).await;
        });
        Ok(())
    }

    async fn destroy_service(&self, service: &str) -> EnvResult<()> {
        self.inner.destroy_service(service).await
    }

    async fn terminate_machine(&self, id: &str, force: bool) -> EnvResult<()> {
        self.inner.terminate_machine(id, force).await
    }

    async fn get_watch(&self) -> EnvResult<EventStream> {
        self.inner.get_watch().await
    }
}

const BUNDLE: &str = "services:\n  a: {charm: 'cs:a', num_units: 1}\n";

fn failing_cluster(delay: Duration) -> SlowRecovery {
    let inner = Arc::new(MemoryEnvironment::new());
    inner.fail_service("a", 1);
    SlowRecovery { inner, delay }
}

fn options(timeout: Duration) -> ImportOptions {
    ImportOptions {
        timeout,
        rel_wait: Duration::ZERO,
        retry_count: 3,
        ..ImportOptions::default()
    }
}

async fn import(env: &SlowRecovery, timeout: Duration) -> Result<deployer_engine::ImportReport, ImportError> {
    let deployment = BundleDocument::from_yaml(BUNDLE)
        .unwrap()
        .into_deployment(None)
        .unwrap();
    Importer::new(env, deployment, options(timeout))
        .run(&StaticCharms::new())
        .await
}

#[tokio::test]
async fn retry_waits_for_the_unit_to_recover() {
    let env = failing_cluster(Duration::from_millis(100));
    let started = Instant::now();
    let report = import(&env, Duration::from_secs(5)).await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(report.retries, 1);
    assert!(env.status().await.unwrap().errored_units().is_empty());
}

#[tokio::test]
async fn recovery_after_the_deadline_times_out() {
    let env = failing_cluster(Duration::from_secs(2));
    let err = import(&env, Duration::from_millis(300)).await.unwrap_err();
    assert!(matches!(err, ImportError::Timeout { .. }), "{err}");
    assert_eq!(env.status().await.unwrap().errored_units(), ["a/0"]);
}
