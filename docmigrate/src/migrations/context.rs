//! The capability surface handed to change units
//!
//! A change unit only ever sees an [`ExecutionContext`]. [`bind_context`]
//! builds the one a run uses: the live [`StoreContext`], wrapped in a
//! [`DryRunContext`] when the run only simulates its mutations.

use super::dry_run::DryRunContext;
use super::live::StoreContext;
use super::run_log::RunLog;
use crate::config::EnvironmentConfig;
use crate::error::{Error, Result};
use crate::store::{
    Connection, ContainerDefinition, IndexingPolicy, PartitionKey, PatchOperation, Query,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Context shared by every unit of one run
pub type SharedContext = Arc<dyn ExecutionContext>;

/// Result of `create_container`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerOutcome {
    Created,
    Existed,
    /// Dry run: the container would be created if absent
    WouldCreate,
}

/// Batch of records to seed into one container
#[derive(Debug, Clone, PartialEq)]
pub struct SeedSpec {
    pub container: String,
    /// Field supplying each record's partition key (`tenantId` or `/tenantId`)
    pub partition_key_field: String,
    pub records: Vec<Value>,
    /// Overwrite existing records instead of skipping them
    pub upsert: bool,
}

impl SeedSpec {
    pub fn new(
        container: impl Into<String>,
        partition_key_field: impl Into<String>,
        records: Vec<Value>,
    ) -> Self {
        Self {
            container: container.into(),
            partition_key_field: partition_key_field.into(),
            records,
            upsert: false,
        }
    }

    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    /// Identifier of `record`
    pub fn record_id<'r>(&self, record: &'r Value) -> Result<&'r str> {
        record
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                Error::validation(format!(
                    "Seed record for '{}' has no string 'id': {}",
                    self.container, record
                ))
            })
    }

    /// Partition key of `record`, read from the configured field
    pub fn partition_key(&self, record: &Value) -> Result<PartitionKey> {
        let pointer = if self.partition_key_field.starts_with('/') {
            self.partition_key_field.clone()
        } else {
            format!("/{}", self.partition_key_field)
        };

        let value = record.pointer(&pointer).ok_or_else(|| {
            Error::validation(format!(
                "Seed record for '{}' has no partition key field '{}'",
                self.container, self.partition_key_field
            ))
        })?;
        PartitionKey::from_value(value)
    }
}

/// Counts reported by `seed_data`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedOutcome {
    pub inserted: usize,
    pub skipped: usize,
}

/// Everything a change unit may do to the database
///
/// Mutating primitives: `create_container`, `update_indexing_policy`,
/// `seed_data`, `patch_item`. `run_query` always reads, even in a dry run.
#[async_trait]
pub trait ExecutionContext: Send + Sync {
    fn environment(&self) -> &EnvironmentConfig;

    /// Whether mutations are only simulated
    fn is_dry_run(&self) -> bool;

    /// Append a line to the run log
    fn log(&self, message: &str);

    /// Create the container if it does not exist; never alters an existing one
    async fn create_container(&self, definition: &ContainerDefinition)
        -> Result<ContainerOutcome>;

    /// Replace the indexing policy of an existing container
    async fn update_indexing_policy(&self, container: &str, policy: &IndexingPolicy)
        -> Result<()>;

    async fn seed_data(&self, spec: &SeedSpec) -> Result<SeedOutcome>;

    async fn run_query(&self, container: &str, query: &Query) -> Result<Vec<Value>>;

    async fn patch_item(
        &self,
        container: &str,
        id: &str,
        partition_key: &PartitionKey,
        operations: &[PatchOperation],
    ) -> Result<()>;
}

/// Build the context for one run
pub fn bind_context(
    connection: Connection,
    environment: EnvironmentConfig,
    actor: impl Into<String>,
    log: RunLog,
    dry_run: bool,
) -> SharedContext {
    let live = StoreContext::new(connection, environment, actor, log);
    if dry_run {
        Arc::new(DryRunContext::new(live))
    } else {
        Arc::new(live)
    }
}
