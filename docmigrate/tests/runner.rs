use async_trait::async_trait;
use docmigrate::migrations::{bind_context, RunLog, SeedOutcome};
use docmigrate::prelude::*;
use docmigrate::store::{
    Connection, Connector, ControlPlane, DataPlane, LocalConnector, LocalDatabase, LocalStore,
};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use url::Url;

type Trace = Arc<Mutex<Vec<String>>>;

fn environment() -> EnvironmentConfig {
    EnvironmentConfig::local("dev")
}

/// Unit that appends its id to `trace` and succeeds
fn tracked(id: &'static str, trace: &Trace) -> FnMigration {
    let trace = trace.clone();
    FnMigration::new(id, format!("tracked {}", id), move |_ctx| {
        let trace = trace.clone();
        async move {
            trace.lock().unwrap().push(id.to_string());
            Ok(())
        }
    })
}

/// Unit that appends its id to `trace` and fails
fn failing(id: &'static str, trace: &Trace) -> FnMigration {
    let trace = trace.clone();
    FnMigration::new(id, format!("failing {}", id), move |_ctx| {
        let trace = trace.clone();
        async move {
            trace.lock().unwrap().push(id.to_string());
            Err(Error::validation("tenant data is inconsistent"))
        }
    })
}

async fn runner(
    connector: &Arc<LocalConnector>,
    endpoint: &str,
    options: RunOptions,
) -> MigrationRunner {
    let mut runner = MigrationRunner::new(
        environment(),
        Box::new(DirectConnection::new(endpoint)),
        connector.clone(),
    )
    .with_options(options);
    runner.initialize().await.unwrap();
    runner
}

async fn store(connector: &LocalConnector, endpoint: &str) -> Arc<LocalStore> {
    connector
        .store_for(&Url::parse(endpoint).unwrap())
        .await
        .unwrap()
}

fn ids(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[tokio::test]
async fn test_units_run_in_identifier_order() {
    let trace = Trace::default();
    let registry = Registry::builder()
        .add(tracked("0003_c", &trace))
        .add(tracked("0001_a", &trace))
        .add(tracked("0002_b", &trace))
        .build()
        .unwrap();

    let connector = Arc::new(LocalConnector::new());
    let runner = runner(&connector, "memory:order", RunOptions::default()).await;
    let report = runner.run_migrations(&registry).await.unwrap();

    assert_eq!(*trace.lock().unwrap(), vec!["0001_a", "0002_b", "0003_c"]);
    let reported: Vec<_> = report.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(reported, vec!["0001_a", "0002_b", "0003_c"]);
    assert!(report.is_success());
}

#[tokio::test]
async fn test_second_run_executes_nothing() {
    let trace = Trace::default();
    let registry = Registry::builder()
        .add(tracked("0001_a", &trace))
        .add(tracked("0002_b", &trace))
        .build()
        .unwrap();

    let connector = Arc::new(LocalConnector::new());
    let runner = runner(&connector, "memory:twice", RunOptions::default()).await;

    let first = runner.run_migrations(&registry).await.unwrap();
    assert_eq!(first.applied(), 2);

    let second = runner.run_migrations(&registry).await.unwrap();
    assert!(second.results.is_empty());
    assert_eq!(trace.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_stop_on_first_failure_and_resume() {
    let trace = Trace::default();
    let registry = Registry::builder()
        .add(tracked("A", &trace))
        .add(failing("B", &trace))
        .add(tracked("C", &trace))
        .build()
        .unwrap();

    let connector = Arc::new(LocalConnector::new());
    let runner = runner(&connector, "memory:halt", RunOptions::default()).await;
    let report = runner.run_migrations(&registry).await.unwrap();

    assert_eq!(*trace.lock().unwrap(), vec!["A", "B"]);
    assert_eq!(report.results.len(), 2);
    assert!(report.results[0].success);
    let failed = report.failure().unwrap();
    assert_eq!(failed.id, "B");
    assert!(failed
        .error
        .as_deref()
        .unwrap()
        .contains("tenant data is inconsistent"));
    assert_eq!(runner.get_applied_migrations().await.unwrap(), ids(&["A"]));

    // Fixed B: the next run only attempts B and C
    let fixed = Registry::builder()
        .add(tracked("A", &trace))
        .add(tracked("B", &trace))
        .add(tracked("C", &trace))
        .build()
        .unwrap();
    let resumed = runner.run_migrations(&fixed).await.unwrap();
    let reported: Vec<_> = resumed.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(reported, vec!["B", "C"]);
    assert_eq!(
        runner.get_applied_migrations().await.unwrap(),
        ids(&["A", "B", "C"])
    );
}

fn schema_registry() -> Registry {
    Registry::builder()
        .define("0001_tenants", "Create tenants", |ctx: SharedContext| async move {
            ctx.create_container(&ContainerDefinition::new("tenants", "/tenantId"))
                .await?;
            Ok(())
        })
        .define("0002_seed", "Seed tenants", |ctx: SharedContext| async move {
            ctx.seed_data(&SeedSpec::new(
                "tenants",
                "tenantId",
                vec![json!({"id": "acme", "tenantId": "acme", "name": "Acme"})],
            ))
            .await?;
            Ok(())
        })
        .define("0003_rename", "Rename acme", |ctx: SharedContext| async move {
            let rows = ctx
                .run_query(
                    "tenants",
                    &Query::new("SELECT * FROM c WHERE c.name = @name").param("name", "Acme"),
                )
                .await?;
            for row in rows {
                ctx.patch_item(
                    "tenants",
                    "acme",
                    &PartitionKey::from_value(&row["tenantId"])?,
                    &[PatchOperation::set("/name", "Acme Corp")],
                )
                .await?;
            }
            Ok(())
        })
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_dry_run_has_no_durable_effect() {
    let connector = Arc::new(LocalConnector::new());
    let store = store(&connector, "memory:dry").await;

    // Part of the history is already applied
    let live = runner(
        &connector,
        "memory:dry",
        RunOptions::default().target("0001_tenants"),
    )
    .await;
    live.run_migrations(&schema_registry()).await.unwrap();
    let applied_before = live.get_applied_migrations().await.unwrap();
    let before = store.snapshot().await;

    let dry = runner(&connector, "memory:dry", RunOptions::default().dry_run(true)).await;
    let report = dry.run_migrations(&schema_registry()).await.unwrap();

    assert!(report.dry_run);
    assert!(report.is_success());
    let reported: Vec<_> = report.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(reported, vec!["0002_seed", "0003_rename"]);

    assert_eq!(store.snapshot().await, before);
    assert_eq!(dry.get_applied_migrations().await.unwrap(), applied_before);
    assert_eq!(live.get_applied_migrations().await.unwrap(), applied_before);
    assert!(dry
        .log()
        .lines()
        .iter()
        .any(|line| line.message.starts_with(docmigrate::migrations::DRY_RUN_PREFIX)));
}

#[tokio::test]
async fn test_dry_run_on_empty_environment_creates_nothing() {
    let connector = Arc::new(LocalConnector::new());
    let store = store(&connector, "memory:dry-empty").await;

    let dry = runner(
        &connector,
        "memory:dry-empty",
        RunOptions::default().dry_run(true).target("0002_seed"),
    )
    .await;
    let report = dry.run_migrations(&schema_registry()).await.unwrap();

    assert_eq!(report.results.len(), 2);
    assert!(store.container_names("app").await.is_empty());
    assert!(dry.get_applied_migrations().await.unwrap().is_empty());
}

async fn seed_context(endpoint: &str) -> (Arc<LocalStore>, SharedContext) {
    let connector = LocalConnector::new();
    let env = environment();
    let connection = connector
        .connect(&ConnectionString::parse(endpoint).unwrap(), &env)
        .await
        .unwrap();
    connection
        .control()
        .create_container(&ContainerDefinition::new("plans", "/kind"))
        .await
        .unwrap();

    let store = store(&connector, endpoint).await;
    let ctx = bind_context(
        connection,
        env,
        "docmigrate@dev",
        RunLog::new("dev", false),
        false,
    );
    (store, ctx)
}

async fn stored_plan(store: &LocalStore) -> Value {
    store
        .snapshot()
        .await
        .pointer("/databases/app/containers/plans/items")
        .and_then(Value::as_object)
        .and_then(|items| items.values().next().cloned())
        .unwrap()
}

#[tokio::test]
async fn test_seed_skip_mode_is_idempotent() {
    let (store, ctx) = seed_context("memory:seed-skip").await;
    let spec = SeedSpec::new(
        "plans",
        "kind",
        vec![json!({"id": "free", "kind": "plan", "seats": 3})],
    );

    let first = ctx.seed_data(&spec).await.unwrap();
    assert_eq!(first, SeedOutcome { inserted: 1, skipped: 0 });
    let after_first = stored_plan(&store).await;

    let second = ctx.seed_data(&spec).await.unwrap();
    assert_eq!(second, SeedOutcome { inserted: 0, skipped: 1 });
    assert_eq!(stored_plan(&store).await, after_first);

    // Different content under the same id is not merged either
    let changed = SeedSpec::new(
        "plans",
        "kind",
        vec![json!({"id": "free", "kind": "plan", "seats": 10})],
    );
    assert_eq!(ctx.seed_data(&changed).await.unwrap().skipped, 1);
    assert_eq!(stored_plan(&store).await["seats"], 3);
}

#[tokio::test]
async fn test_seed_upsert_mode_overwrites() {
    let (store, ctx) = seed_context("memory:seed-upsert").await;

    let first = SeedSpec::new(
        "plans",
        "kind",
        vec![json!({"id": "free", "kind": "plan", "seats": 3})],
    )
    .upsert(true);
    assert_eq!(ctx.seed_data(&first).await.unwrap().inserted, 1);

    let second = SeedSpec::new(
        "plans",
        "kind",
        vec![json!({"id": "free", "kind": "plan", "seats": 5, "label": "Free"})],
    )
    .upsert(true);
    assert_eq!(
        ctx.seed_data(&second).await.unwrap(),
        SeedOutcome { inserted: 1, skipped: 0 }
    );

    let stored = stored_plan(&store).await;
    assert_eq!(stored["seats"], 5);
    assert_eq!(stored["label"], "Free");
    assert_eq!(stored["status"], "ACTIVE");
}

#[tokio::test]
async fn test_status_partitions_registry() {
    let trace = Trace::default();
    let registry = Registry::builder()
        .add(tracked("0001", &trace))
        .add(tracked("0002", &trace))
        .add(tracked("0003", &trace))
        .add(tracked("0004", &trace))
        .add(tracked("0005", &trace))
        .build()
        .unwrap();

    let connector = Arc::new(LocalConnector::new());
    let partial = runner(
        &connector,
        "memory:status",
        RunOptions::default().target("0002"),
    )
    .await;
    partial.run_migrations(&registry).await.unwrap();

    let status = partial.get_status(&registry).await.unwrap();
    assert_eq!(status.applied, vec!["0001", "0002"]);
    assert_eq!(status.pending, vec!["0003", "0004", "0005"]);
    assert!(status.unknown.is_empty());
    assert!(!status.is_up_to_date());

    // Ledger entries the registry no longer carries are reported separately
    let smaller = Registry::builder()
        .add(tracked("0002", &trace))
        .add(tracked("0003", &trace))
        .build()
        .unwrap();
    let status = partial.get_status(&smaller).await.unwrap();
    assert_eq!(status.applied, vec!["0002"]);
    assert_eq!(status.pending, vec!["0003"]);
    assert_eq!(status.unknown, vec!["0001"]);
}

#[tokio::test]
async fn test_file_store_survives_restart() {
    let dir = TempDir::new().unwrap();
    let endpoint = format!("file://{}", dir.path().join("account.json").display());

    {
        let connector = Arc::new(LocalConnector::new());
        let runner = runner(&connector, &endpoint, RunOptions::default()).await;
        let report = runner.run_migrations(&schema_registry()).await.unwrap();
        assert_eq!(report.applied(), 3);
    }

    let connector = Arc::new(LocalConnector::new());
    let runner = runner(&connector, &endpoint, RunOptions::default()).await;
    let status = runner.get_status(&schema_registry()).await.unwrap();
    assert!(status.is_up_to_date());
    assert_eq!(status.applied.len(), 3);

    let store = store(&connector, &endpoint).await;
    let renamed = store
        .database("app")
        .read_item("tenants", "acme", &PartitionKey::from("acme"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(renamed["name"], "Acme Corp");
}

/// Hands out connections labelled with the wrong environment
struct MislabeledConnector(LocalConnector);

#[async_trait]
impl Connector for MislabeledConnector {
    async fn connect(
        &self,
        connection_string: &ConnectionString,
        environment: &EnvironmentConfig,
    ) -> Result<Connection> {
        let connection = self.0.connect(connection_string, environment).await?;
        Ok(Connection::new(
            "prod",
            connection.database(),
            connection.control().clone(),
            connection.data().clone(),
        ))
    }
}

#[tokio::test]
async fn test_connection_must_match_environment() {
    let mut runner = MigrationRunner::new(
        environment(),
        Box::new(DirectConnection::new("memory:mislabeled")),
        Arc::new(MislabeledConnector(LocalConnector::new())),
    );
    let err = runner.initialize().await.unwrap_err();
    assert_eq!(err.error_code(), "E_CONNECTION");
    assert!(!runner.is_initialized());
}

/// Database whose ledger container refuses writes
struct BrokenLedger(LocalDatabase);

#[async_trait]
impl ControlPlane for BrokenLedger {
    async fn read_container(&self, name: &str) -> Result<Option<ContainerDefinition>> {
        self.0.read_container(name).await
    }

    async fn create_container(&self, definition: &ContainerDefinition) -> Result<()> {
        self.0.create_container(definition).await
    }

    async fn replace_container(&self, definition: &ContainerDefinition) -> Result<()> {
        self.0.replace_container(definition).await
    }
}

#[async_trait]
impl DataPlane for BrokenLedger {
    async fn read_item(
        &self,
        container: &str,
        id: &str,
        partition_key: &PartitionKey,
    ) -> Result<Option<Value>> {
        self.0.read_item(container, id, partition_key).await
    }

    async fn create_item(
        &self,
        container: &str,
        partition_key: &PartitionKey,
        item: Value,
    ) -> Result<()> {
        if container == "_migrations" {
            return Err(Error::provisioning("ledger is read-only"));
        }
        self.0.create_item(container, partition_key, item).await
    }

    async fn upsert_item(
        &self,
        container: &str,
        partition_key: &PartitionKey,
        item: Value,
    ) -> Result<()> {
        self.0.upsert_item(container, partition_key, item).await
    }

    async fn query_items(&self, container: &str, query: &Query) -> Result<Vec<Value>> {
        self.0.query_items(container, query).await
    }

    async fn patch_item(
        &self,
        container: &str,
        id: &str,
        partition_key: &PartitionKey,
        operations: &[PatchOperation],
    ) -> Result<Value> {
        self.0.patch_item(container, id, partition_key, operations).await
    }
}

struct BrokenLedgerConnector;

#[async_trait]
impl Connector for BrokenLedgerConnector {
    async fn connect(
        &self,
        _connection_string: &ConnectionString,
        environment: &EnvironmentConfig,
    ) -> Result<Connection> {
        let store = Arc::new(LocalStore::in_memory());
        let db = Arc::new(BrokenLedger(store.database("app")));
        Ok(Connection::new(environment.name.clone(), "app", db.clone(), db))
    }
}

#[tokio::test]
async fn test_ledger_write_failure_halts_run() {
    let trace = Trace::default();
    let registry = Registry::builder()
        .add(tracked("0001_a", &trace))
        .add(tracked("0002_b", &trace))
        .build()
        .unwrap();

    let mut runner = MigrationRunner::new(
        environment(),
        Box::new(DirectConnection::new("memory:broken")),
        Arc::new(BrokenLedgerConnector),
    );
    runner.initialize().await.unwrap();
    let report = runner.run_migrations(&registry).await.unwrap();

    assert_eq!(*trace.lock().unwrap(), vec!["0001_a"]);
    assert_eq!(report.results.len(), 1);
    let failed = report.failure().unwrap();
    assert_eq!(failed.id, "0001_a");
    let message = failed.error.as_deref().unwrap();
    assert!(message.contains("ledger write failed"));
    assert!(message.contains("ledger is read-only"));
}

/// Account that refuses to create the ledger container
struct UnprovisionableLedger(LocalDatabase);

#[async_trait]
impl ControlPlane for UnprovisionableLedger {
    async fn read_container(&self, name: &str) -> Result<Option<ContainerDefinition>> {
        self.0.read_container(name).await
    }

    async fn create_container(&self, definition: &ContainerDefinition) -> Result<()> {
        if definition.name == "_migrations" {
            return Err(Error::connection("quota exceeded"));
        }
        self.0.create_container(definition).await
    }

    async fn replace_container(&self, definition: &ContainerDefinition) -> Result<()> {
        self.0.replace_container(definition).await
    }
}

struct UnprovisionableConnector;

#[async_trait]
impl Connector for UnprovisionableConnector {
    async fn connect(
        &self,
        _connection_string: &ConnectionString,
        environment: &EnvironmentConfig,
    ) -> Result<Connection> {
        let store = Arc::new(LocalStore::in_memory());
        let control = Arc::new(UnprovisionableLedger(store.database("app")));
        let data = Arc::new(store.database("app"));
        Ok(Connection::new(environment.name.clone(), "app", control, data))
    }
}

#[tokio::test]
async fn test_ledger_provisioning_failure_runs_nothing() {
    let trace = Trace::default();
    let registry = Registry::builder()
        .add(tracked("0001_a", &trace))
        .build()
        .unwrap();

    let mut runner = MigrationRunner::new(
        environment(),
        Box::new(DirectConnection::new("memory:unprovisionable")),
        Arc::new(UnprovisionableConnector),
    );
    runner.initialize().await.unwrap();
    let err = runner.run_migrations(&registry).await.unwrap_err();

    assert_eq!(err.error_code(), "E_PROVISIONING");
    assert!(err.to_string().contains("quota exceeded"));
    assert!(trace.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_ledger_partition_cannot_shadow_status() {
    let trace = Trace::default();
    let registry = Registry::builder()
        .add(tracked("0001_a", &trace))
        .build()
        .unwrap();

    let connector = Arc::new(LocalConnector::new());
    let mut runner = MigrationRunner::new(
        environment(),
        Box::new(DirectConnection::new("memory:shadowed")),
        connector.clone(),
    )
    .with_settings(MigratorSettings {
        ledger_partition_key_path: "/status".to_string(),
        ..MigratorSettings::default()
    });

    let err = runner.initialize().await.unwrap_err();
    assert_eq!(err.error_code(), "E_CONFIGURATION");
    assert!(!runner.is_initialized());
    assert!(runner.run_migrations(&registry).await.is_err());
    assert!(trace.lock().unwrap().is_empty());
}
