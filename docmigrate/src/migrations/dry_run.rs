//! Dry-run decorator
//!
//! Wraps another context and replaces every mutating primitive with a log
//! line describing the intended action. Reads still go to the wrapped
//! context so units can compute a meaningful preview.

use super::context::{ContainerOutcome, ExecutionContext, SeedOutcome, SeedSpec};
use crate::config::EnvironmentConfig;
use crate::error::Result;
use crate::store::{ContainerDefinition, IndexingPolicy, PartitionKey, PatchOperation, Query};
use async_trait::async_trait;
use serde_json::Value;

/// Prefix of every line describing an intended action
pub const DRY_RUN_PREFIX: &str = "[DRY RUN]";

pub struct DryRunContext<C> {
    inner: C,
}

impl<C: ExecutionContext> DryRunContext<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn intend(&self, action: String) {
        self.inner.log(&format!("{} {}", DRY_RUN_PREFIX, action));
    }
}

#[async_trait]
impl<C: ExecutionContext> ExecutionContext for DryRunContext<C> {
    fn environment(&self) -> &EnvironmentConfig {
        self.inner.environment()
    }

    fn is_dry_run(&self) -> bool {
        true
    }

    fn log(&self, message: &str) {
        self.inner.log(message);
    }

    async fn create_container(
        &self,
        definition: &ContainerDefinition,
    ) -> Result<ContainerOutcome> {
        self.intend(format!(
            "Would create container '{}' if absent (partition key {})",
            definition.name,
            definition.partition_key.paths.join(", ")
        ));
        Ok(ContainerOutcome::WouldCreate)
    }

    async fn update_indexing_policy(
        &self,
        container: &str,
        _policy: &IndexingPolicy,
    ) -> Result<()> {
        self.intend(format!("Would update indexing policy of '{}'", container));
        Ok(())
    }

    async fn seed_data(&self, spec: &SeedSpec) -> Result<SeedOutcome> {
        self.intend(format!(
            "Would seed {} record(s) into '{}' ({} mode)",
            spec.records.len(),
            spec.container,
            if spec.upsert { "upsert" } else { "skip-if-exists" }
        ));
        Ok(SeedOutcome {
            inserted: 0,
            skipped: spec.records.len(),
        })
    }

    async fn run_query(&self, container: &str, query: &Query) -> Result<Vec<Value>> {
        self.inner.run_query(container, query).await
    }

    async fn patch_item(
        &self,
        container: &str,
        id: &str,
        partition_key: &PartitionKey,
        operations: &[PatchOperation],
    ) -> Result<()> {
        let ops: Vec<String> = operations
            .iter()
            .map(|op| format!("{} {}", op.name(), op.path()))
            .collect();
        self.intend(format!(
            "Would patch '{}' {} in '{}': {}",
            id,
            partition_key,
            container,
            ops.join(", ")
        ));
        Ok(())
    }
}
