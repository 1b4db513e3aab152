//! Import pipeline against the in-memory control plane.
//!
//! Covers:
//! - placement across declared machines, `container:new` hosts and colocation
//! - idempotent re-runs
//! - unit errors: abort, ignore, resolve-and-retry
//! - timeouts and validation failures

use std::time::Duration;

use deployer_core::{BundleDocument, CharmInfo, Deployment, StaticCharms};
use deployer_engine::{ImportError, ImportOptions, Importer};
use deployer_env::{EntityKind, Environment, MemoryEnvironment};

fn load(yaml: &str) -> Deployment {
    BundleDocument::from_yaml(yaml)
        .unwrap()
        .into_deployment(None)
        .unwrap()
}

fn options() -> ImportOptions {
    ImportOptions {
        timeout: Duration::from_secs(5),
        rel_wait: Duration::ZERO,
        ..ImportOptions::default()
    }
}

const WORDPRESS: &str = r#"
services:
  mysql:
    charm: cs:mysql
    num_units: 2
    constraints: mem=2G
  wordpress:
    charm: cs:wordpress
    num_units: 1
    expose: true
    annotations:
      gui-x: 100
relations:
  - ['wordpress:db', mysql]
"#;

const PLACED: &str = r#"
services:
  mysql:
    charm: cs:mysql
    num_units: 1
    to: ['1']
  wordpress:
    charm: cs:wordpress
    num_units: 2
    to: ['lxd:mysql', 'lxd:new']
machines:
  '1':
    series: focal
    annotations:
      rack: r1
"#;

// ── Deploying ───────────────────────────────────────────────────────

#[tokio::test]
async fn deploys_services_relations_and_exposure() {
    let env = MemoryEnvironment::new();
    let mut importer = Importer::new(&env, load(WORDPRESS), options());
    let report = importer.run(&StaticCharms::new()).await.unwrap();

    assert_eq!(report.services_deployed, ["mysql", "wordpress"]);
    assert_eq!(report.units_added, ["mysql/1"]);
    assert_eq!(report.relations_added, ["wordpress:db <-> mysql"]);
    assert_eq!(report.exposed, ["wordpress"]);

    let status = env.status().await.unwrap();
    assert_eq!(status.unit_count("mysql"), 2);
    assert!(status.service("wordpress").unwrap().exposed);
    assert_eq!(
        env.annotations(EntityKind::Service, "wordpress").get("gui-x").map(String::as_str),
        Some("100")
    );
}

#[tokio::test]
async fn places_units_on_declared_machines_and_containers() {
    let env = MemoryEnvironment::new();
    let mut importer = Importer::new(&env, load(PLACED), options());
    let report = importer.run(&StaticCharms::new()).await.unwrap();

    assert_eq!(
        report.machines_created,
        [
            ("1".to_string(), "1".to_string()),
            ("wordpress/1".to_string(), "2".to_string())
        ]
    );
    assert_eq!(env.annotations(EntityKind::Machine, "1")["rack"], "r1");

    let status = env.status().await.unwrap();
    let machine_of = |unit: &str| {
        status
            .units()
            .find(|(name, _)| *name == unit)
            .and_then(|(_, u)| u.machine.clone())
    };
    assert_eq!(machine_of("mysql/0").as_deref(), Some("1"));
    assert_eq!(machine_of("wordpress/0").as_deref(), Some("1/lxd/0"));
    assert_eq!(machine_of("wordpress/1").as_deref(), Some("2/lxd/0"));
}

#[tokio::test]
async fn v3_colocation_follows_the_target() {
    let env = MemoryEnvironment::new();
    let bundle = concat!(
        "stack:\n  services:\n",
        "    db: {charm: 'cs:db', num_units: 2}\n",
        "    app: {charm: 'cs:app', num_units: 2, to: ['db=1', 'lxc:db=0']}\n",
    );
    let mut importer = Importer::new(&env, load(bundle), options());
    importer.run(&StaticCharms::new()).await.unwrap();

    let status = env.status().await.unwrap();
    let db = status.service("db").unwrap();
    let app = status.service("app").unwrap();
    assert_eq!(app.units["app/0"].machine, db.units["db/1"].machine);
    let host = db.units["db/0"].machine.clone().unwrap();
    assert_eq!(app.units["app/1"].machine, Some(format!("{host}/lxd/0")));
}

#[tokio::test]
async fn missing_colocation_target_falls_back_to_a_new_machine() {
    let env = MemoryEnvironment::new();
    let bundle = concat!(
        "stack:\n  services:\n",
        "    db: {charm: 'cs:db', num_units: 1}\n",
        "    app: {charm: 'cs:app', num_units: 2, to: ['db', 'db=5']}\n",
    );
    let mut importer = Importer::new(&env, load(bundle), options());
    let report = importer.run(&StaticCharms::new()).await.unwrap();

    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("Requested-unit-index=5"));
    assert_eq!(env.status().await.unwrap().unit_count("app"), 2);
}

// ── Idempotence ─────────────────────────────────────────────────────

#[tokio::test]
async fn second_run_changes_nothing() {
    let env = MemoryEnvironment::new();
    Importer::new(&env, load(PLACED), options())
        .run(&StaticCharms::new())
        .await
        .unwrap();
    let journal = env.journal();

    let report = Importer::new(&env, load(PLACED), options())
        .run(&StaticCharms::new())
        .await
        .unwrap();
    assert!(report.is_noop(), "{report:?}");
    assert_eq!(report.services_existing, ["mysql", "wordpress"]);
    assert_eq!(env.journal(), journal);
}

#[tokio::test]
async fn rerun_replaces_a_removed_unit() {
    let env = MemoryEnvironment::new();
    Importer::new(&env, load(WORDPRESS), options())
        .run(&StaticCharms::new())
        .await
        .unwrap();
    env.remove_unit("mysql/0").unwrap();

    let report = Importer::new(&env, load(WORDPRESS), options())
        .run(&StaticCharms::new())
        .await
        .unwrap();
    assert_eq!(report.units_added, ["mysql/2"]);
    assert!(report.relations_added.is_empty());
    assert!(report.exposed.is_empty());
}

// ── Unit errors ─────────────────────────────────────────────────────

#[tokio::test]
async fn unit_errors_abort_by_default() {
    let env = MemoryEnvironment::new();
    env.fail_service("mysql", 1);
    let err = Importer::new(&env, load(WORDPRESS), options())
        .run(&StaticCharms::new())
        .await
        .unwrap_err();
    match err {
        ImportError::UnitErrors { units } => assert_eq!(units, ["mysql/0", "mysql/1"]),
        other => panic!("unexpected: {other}"),
    }
    assert!(env.journal().iter().all(|entry| !entry.starts_with("add_relation")));
}

#[tokio::test]
async fn ignored_errors_let_the_run_finish() {
    let env = MemoryEnvironment::new();
    env.fail_service("mysql", 1);
    let mut opts = options();
    opts.ignore_errors = true;
    let report = Importer::new(&env, load(WORDPRESS), opts)
        .run(&StaticCharms::new())
        .await
        .unwrap();
    assert_eq!(report.relations_added.len(), 1);
    assert_eq!(env.status().await.unwrap().errored_units(), ["mysql/0", "mysql/1"]);
}

#[tokio::test]
async fn retries_resolve_units_in_error() {
    let env = MemoryEnvironment::new();
    env.fail_service("mysql", 2);
    let mut opts = options();
    opts.retry_count = 3;
    let report = Importer::new(&env, load(WORDPRESS), opts)
        .run(&StaticCharms::new())
        .await
        .unwrap();

    assert_eq!(report.retries, 2);
    assert!(env.status().await.unwrap().errored_units().is_empty());
    let resolves = env
        .journal()
        .iter()
        .filter(|entry| entry.starts_with("resolved mysql/0 retry=true"))
        .count();
    assert_eq!(resolves, 2);
}

#[tokio::test]
async fn retries_run_out() {
    let env = MemoryEnvironment::new();
    env.fail_service("mysql", 3);
    let mut opts = options();
    opts.retry_count = 1;
    let err = Importer::new(&env, load(WORDPRESS), opts)
        .run(&StaticCharms::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::UnitErrors { .. }), "{err}");
}

// ── Fatal conditions ────────────────────────────────────────────────

#[tokio::test]
async fn pending_units_time_out() {
    let env = MemoryEnvironment::new();
    env.hold_units();
    let mut opts = options();
    opts.timeout = Duration::from_millis(100);
    let err = Importer::new(&env, load(WORDPRESS), opts)
        .run(&StaticCharms::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::Timeout { .. }), "{err}");
}

#[tokio::test]
async fn invalid_bundle_touches_nothing() {
    let env = MemoryEnvironment::new();
    let bundle = concat!(
        "services:\n",
        "  mysql: {charm: 'cs:mysql', num_units: 1}\n",
        "  wordpress: {charm: 'cs:wordpress', num_units: 1, to: [mysql]}\n",
        "relations:\n  - [wordpress, ghost]\n",
    );
    let charms = StaticCharms::new().with(CharmInfo::new("cs:mysql").subordinate());
    let err = Importer::new(&env, load(bundle), options())
        .run(&charms)
        .await
        .unwrap_err();

    let ImportError::Validation(feedback) = err else {
        panic!("expected a validation error, got {err}");
    };
    assert_eq!(feedback.errors().len(), 2);
    assert!(feedback.errors().iter().any(|e| e.contains("wordpress -> mysql")));
    assert!(feedback.errors().iter().any(|e| e.contains("ghost")));
    assert!(env.journal().is_empty());
}
