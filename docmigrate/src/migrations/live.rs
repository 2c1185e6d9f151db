//! Execution context that performs its mutations

use super::context::{ContainerOutcome, ExecutionContext, SeedOutcome, SeedSpec};
use super::run_log::RunLog;
use crate::config::EnvironmentConfig;
use crate::error::{Error, ErrorContext, Result};
use crate::store::{
    Connection, ContainerDefinition, IndexingPolicy, PartitionKey, PatchOperation, Query,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

/// Status stamped on seeded records
pub const SEED_STATUS: &str = "ACTIVE";

/// Context backed by a live [`Connection`]
pub struct StoreContext {
    connection: Connection,
    environment: EnvironmentConfig,
    actor: String,
    log: RunLog,
}

impl StoreContext {
    pub fn new(
        connection: Connection,
        environment: EnvironmentConfig,
        actor: impl Into<String>,
        log: RunLog,
    ) -> Self {
        Self {
            connection,
            environment,
            actor: actor.into(),
            log,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Record plus bookkeeping fields; fields the record already carries win
    fn stamped(&self, record: &Value) -> Value {
        let mut stamped = record.clone();
        if let Some(fields) = stamped.as_object_mut() {
            fields
                .entry("status")
                .or_insert_with(|| Value::from(SEED_STATUS));
            fields
                .entry("createdAt")
                .or_insert_with(|| Value::from(Utc::now().to_rfc3339()));
            fields
                .entry("createdBy")
                .or_insert_with(|| Value::from(self.actor.clone()));
        }
        stamped
    }
}

#[async_trait]
impl ExecutionContext for StoreContext {
    fn environment(&self) -> &EnvironmentConfig {
        &self.environment
    }

    fn is_dry_run(&self) -> bool {
        false
    }

    fn log(&self, message: &str) {
        self.log.push(message);
    }

    async fn create_container(
        &self,
        definition: &ContainerDefinition,
    ) -> Result<ContainerOutcome> {
        self.log(&format!(
            "Creating container '{}' (partition key {})",
            definition.name,
            definition.partition_key.paths.join(", ")
        ));

        let control = self.connection.control();
        let existing = control.read_container(&definition.name).await.map_err(|e| {
            Error::provisioning(format!(
                "Failed to read container '{}': {}",
                definition.name, e
            ))
        })?;
        if existing.is_some() {
            self.log(&format!("Container '{}' already exists", definition.name));
            return Ok(ContainerOutcome::Existed);
        }

        match control.create_container(definition).await {
            Ok(()) => {
                self.log(&format!("Created container '{}'", definition.name));
                Ok(ContainerOutcome::Created)
            }
            Err(e) if e.is_conflict() => {
                self.log(&format!(
                    "Container '{}' appeared concurrently",
                    definition.name
                ));
                Ok(ContainerOutcome::Existed)
            }
            Err(e) => Err(Error::provisioning(format!(
                "Failed to create container '{}': {}",
                definition.name, e
            ))),
        }
    }

    async fn update_indexing_policy(
        &self,
        container: &str,
        policy: &IndexingPolicy,
    ) -> Result<()> {
        self.log(&format!("Updating indexing policy of '{}'", container));

        let control = self.connection.control();
        let mut definition = control
            .read_container(container)
            .await
            .map_err(|e| {
                Error::provisioning(format!("Failed to read container '{}': {}", container, e))
            })?
            .ok_or_else(|| {
                Error::provisioning(format!(
                    "Cannot update indexing policy: container '{}' does not exist",
                    container
                ))
            })?;

        definition.indexing_policy = Some(policy.clone());
        control.replace_container(&definition).await.map_err(|e| {
            Error::provisioning(format!(
                "Failed to replace container '{}': {}",
                container, e
            ))
        })?;

        self.log(&format!("Indexing policy of '{}' updated", container));
        Ok(())
    }

    async fn seed_data(&self, spec: &SeedSpec) -> Result<SeedOutcome> {
        self.log(&format!(
            "Seeding {} record(s) into '{}' ({} mode)",
            spec.records.len(),
            spec.container,
            if spec.upsert { "upsert" } else { "skip-if-exists" }
        ));

        let data = self.connection.data();
        let mut outcome = SeedOutcome::default();

        for record in &spec.records {
            let id = spec.record_id(record)?;
            let partition_key = spec.partition_key(record)?;
            let document = self.stamped(record);

            if spec.upsert {
                data.upsert_item(&spec.container, &partition_key, document)
                    .await
                    .with_context(|| format!("Failed to upsert '{}' into '{}'", id, spec.container))?;
                outcome.inserted += 1;
                continue;
            }

            let existing = data
                .read_item(&spec.container, id, &partition_key)
                .await
                .with_context(|| format!("Failed to read '{}' from '{}'", id, spec.container))?;
            if existing.is_some() {
                outcome.skipped += 1;
                continue;
            }

            match data
                .create_item(&spec.container, &partition_key, document)
                .await
            {
                Ok(()) => outcome.inserted += 1,
                Err(e) if e.is_conflict() => {
                    self.log(&format!(
                        "Record '{}' was created concurrently, skipping",
                        id
                    ));
                    outcome.skipped += 1;
                }
                Err(e) => {
                    return Err(e.with_context(format!(
                        "Failed to insert '{}' into '{}'",
                        id, spec.container
                    )))
                }
            }
        }

        self.log(&format!(
            "Seeded '{}': {} inserted, {} skipped",
            spec.container, outcome.inserted, outcome.skipped
        ));
        Ok(outcome)
    }

    async fn run_query(&self, container: &str, query: &Query) -> Result<Vec<Value>> {
        self.log(&format!("Querying '{}': {}", container, query.text));
        self.connection
            .data()
            .query_items(container, query)
            .await
            .with_context(|| format!("Query against '{}' failed", container))
    }

    async fn patch_item(
        &self,
        container: &str,
        id: &str,
        partition_key: &PartitionKey,
        operations: &[PatchOperation],
    ) -> Result<()> {
        self.log(&format!(
            "Patching '{}' {} in '{}' ({} operation(s))",
            id,
            partition_key,
            container,
            operations.len()
        ));
        self.connection
            .data()
            .patch_item(container, id, partition_key, operations)
            .await
            .with_context(|| format!("Failed to patch '{}' in '{}'", id, container))?;
        Ok(())
    }
}
