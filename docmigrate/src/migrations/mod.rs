//! Ordered, idempotent change units and the runner that applies them
//!
//! ```no_run
//! use docmigrate::migrations::{MigrationRunner, Registry, SeedSpec, SharedContext};
//! use docmigrate::store::{ContainerDefinition, LocalConnector};
//! use docmigrate::{DirectConnection, EnvironmentConfig};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn run() -> docmigrate::Result<()> {
//! let registry = Registry::builder()
//!     .define("0001_tenants", "Create tenants container", |ctx: SharedContext| async move {
//!         ctx.create_container(&ContainerDefinition::new("tenants", "/tenantId")).await?;
//!         Ok(())
//!     })
//!     .define("0002_seed_plans", "Seed plans", |ctx: SharedContext| async move {
//!         let plans = vec![json!({"id": "free", "kind": "plan"})];
//!         ctx.seed_data(&SeedSpec::new("plans", "kind", plans)).await?;
//!         Ok(())
//!     })
//!     .build()?;
//!
//! let mut runner = MigrationRunner::new(
//!     EnvironmentConfig::local("dev"),
//!     Box::new(DirectConnection::new("memory:dev")),
//!     Arc::new(LocalConnector::new()),
//! );
//! runner.initialize().await?;
//! let report = runner.run_migrations(&registry).await?;
//! assert!(report.is_success());
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod dry_run;
pub mod ledger;
pub mod live;
pub mod recording;
pub mod run_log;
pub mod runner;
pub mod unit;

pub use context::{
    bind_context, ContainerOutcome, ExecutionContext, SeedOutcome, SeedSpec, SharedContext,
};
pub use dry_run::{DryRunContext, DRY_RUN_PREFIX};
pub use ledger::{AppliedMigrationRecord, Ledger, RECORD_FIELDS};
pub use live::StoreContext;
pub use recording::{RecordedCall, RecordingContext};
pub use run_log::{LogLine, RunLog};
pub use runner::{MigrationResult, MigrationRunner, MigrationStatus, RunReport};
pub use unit::{FnMigration, Migration, MigrationHandler, Registry, RegistryBuilder};
