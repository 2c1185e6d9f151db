//! Applied-migration ledger
//!
//! A container holding one record per successfully applied change unit.
//! Every record of an environment shares one logical partition so listing
//! the history is a single-partition query. The container is provisioned
//! lazily on first use.

use super::unit::Migration;
use crate::config::MigratorSettings;
use crate::error::{Error, ErrorContext, Result};
use crate::store::{Connection, ContainerDefinition, PartitionKey, Query};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Status of a record that counts as applied
pub const ACTIVE: &str = "ACTIVE";

/// Fields of a serialized [`AppliedMigrationRecord`]
///
/// The ledger partition field is written next to these and must not be one
/// of them.
pub const RECORD_FIELDS: &[&str] = &[
    "id",
    "migrationId",
    "description",
    "appliedAt",
    "appliedBy",
    "environment",
    "durationMs",
    "status",
];

/// One applied change unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedMigrationRecord {
    pub id: String,
    pub migration_id: String,
    pub description: String,
    pub applied_at: DateTime<Utc>,
    pub applied_by: String,
    pub environment: String,
    pub duration_ms: u64,
    pub status: String,
}

pub struct Ledger {
    connection: Connection,
    settings: MigratorSettings,
    environment: String,
}

impl Ledger {
    pub fn new(connection: Connection, settings: MigratorSettings) -> Self {
        let environment = connection.environment().to_string();
        Self {
            connection,
            settings,
            environment,
        }
    }

    pub fn container(&self) -> &str {
        &self.settings.ledger_container
    }

    fn partition_field(&self) -> &str {
        self.settings.ledger_partition_key_path.trim_start_matches('/')
    }

    fn partition_key(&self) -> PartitionKey {
        PartitionKey::from(self.settings.ledger_partition_value.as_str())
    }

    /// Create the ledger container if it does not exist
    pub async fn ensure(&self) -> Result<()> {
        let control = self.connection.control();
        let existing = control.read_container(self.container()).await.map_err(|e| {
            Error::provisioning(format!(
                "Failed to read ledger container '{}': {}",
                self.container(),
                e
            ))
        })?;
        if existing.is_some() {
            return Ok(());
        }

        log::info!(
            "Creating ledger container '{}' in environment '{}'",
            self.container(),
            self.environment
        );
        let definition = ContainerDefinition::new(
            self.container(),
            self.settings.ledger_partition_key_path.clone(),
        );
        match control.create_container(&definition).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_conflict() => Ok(()),
            Err(e) => Err(Error::provisioning(format!(
                "Failed to create ledger container '{}': {}",
                self.container(),
                e
            ))),
        }
    }

    /// Identifiers of every applied unit, provisioning the ledger if needed
    pub async fn applied_ids(&self) -> Result<BTreeSet<String>> {
        self.ensure().await?;
        self.peek_applied_ids().await
    }

    /// Identifiers of every applied unit; a missing ledger means none
    pub async fn peek_applied_ids(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .peek_records()
            .await?
            .into_iter()
            .map(|record| record.migration_id)
            .collect())
    }

    /// Every ACTIVE record of this environment, oldest identifier first
    pub async fn peek_records(&self) -> Result<Vec<AppliedMigrationRecord>> {
        let exists = self
            .connection
            .control()
            .read_container(self.container())
            .await
            .map_err(|e| {
                Error::provisioning(format!(
                    "Failed to read ledger container '{}': {}",
                    self.container(),
                    e
                ))
            })?
            .is_some();
        if !exists {
            return Ok(Vec::new());
        }

        let query = Query::new(format!(
            "SELECT * FROM c WHERE c.{} = @partition AND c.status = @status AND c.environment = @environment",
            self.partition_field()
        ))
        .param("partition", self.settings.ledger_partition_value.clone())
        .param("status", ACTIVE)
        .param("environment", self.environment.clone());

        let rows = self
            .connection
            .data()
            .query_items(self.container(), &query)
            .await
            .context("Failed to read the migration ledger")?;

        let mut records = rows
            .into_iter()
            .map(serde_json::from_value::<AppliedMigrationRecord>)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
            .context("Malformed ledger record")?;
        records.sort_by(|a, b| a.migration_id.cmp(&b.migration_id));
        Ok(records)
    }

    /// Append the record of a successfully applied unit
    pub async fn record(
        &self,
        migration: &dyn Migration,
        duration_ms: u64,
    ) -> Result<AppliedMigrationRecord> {
        let record = AppliedMigrationRecord {
            id: uuid::Uuid::new_v4().to_string(),
            migration_id: migration.id().to_string(),
            description: migration.description().to_string(),
            applied_at: Utc::now(),
            applied_by: self.settings.actor_for(&self.environment),
            environment: self.environment.clone(),
            duration_ms,
            status: ACTIVE.to_string(),
        };

        let mut document = serde_json::to_value(&record)?;
        if let Value::Object(fields) = &mut document {
            fields.insert(
                self.partition_field().to_string(),
                Value::from(self.settings.ledger_partition_value.clone()),
            );
        }

        self.connection
            .data()
            .create_item(self.container(), &self.partition_key(), document)
            .await
            .with_context(|| format!("Failed to record migration {} in the ledger", record.migration_id))?;

        log::debug!(
            "Recorded {} in ledger of '{}' ({} ms)",
            record.migration_id,
            self.environment,
            duration_ms
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::unit::FnMigration;
    use crate::store::LocalStore;
    use std::sync::Arc;

    fn ledger(store: &Arc<LocalStore>, environment: &str) -> Ledger {
        let db = Arc::new(store.database("app"));
        Ledger::new(
            Connection::new(environment, "app", db.clone(), db),
            MigratorSettings::default(),
        )
    }

    fn unit(id: &str) -> FnMigration {
        FnMigration::new(id, "test unit", |_ctx| async { Ok(()) })
    }

    #[tokio::test]
    async fn test_peek_does_not_provision() {
        let store = Arc::new(LocalStore::in_memory());
        let ledger = ledger(&store, "dev");

        assert!(ledger.peek_applied_ids().await.unwrap().is_empty());
        assert!(store.container_names("app").await.is_empty());

        assert!(ledger.applied_ids().await.unwrap().is_empty());
        assert_eq!(store.container_names("app").await, vec!["_migrations"]);
    }

    #[tokio::test]
    async fn test_record_and_list() {
        let store = Arc::new(LocalStore::in_memory());
        let ledger = ledger(&store, "dev");
        ledger.ensure().await.unwrap();

        let record = ledger.record(&unit("0002_b"), 12).await.unwrap();
        assert_eq!(record.applied_by, "docmigrate@dev");
        assert_eq!(record.status, ACTIVE);
        ledger.record(&unit("0001_a"), 3).await.unwrap();

        let records = ledger.peek_records().await.unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.migration_id.as_str()).collect();
        assert_eq!(ids, vec!["0001_a", "0002_b"]);
        assert_eq!(records[1].duration_ms, 12);

        let raw = store.snapshot().await;
        let items = raw["databases"]["app"]["containers"]["_migrations"]["items"]
            .as_object()
            .unwrap();
        assert!(items
            .values()
            .all(|doc| doc["partitionKey"] == "migrations"));

        let mut expected: Vec<&str> = RECORD_FIELDS.to_vec();
        expected.push("partitionKey");
        expected.sort_unstable();
        for doc in items.values() {
            let mut keys: Vec<&str> = doc.as_object().unwrap().keys().map(String::as_str).collect();
            keys.sort_unstable();
            assert_eq!(keys, expected);
        }
    }

    #[tokio::test]
    async fn test_other_environment_records_are_ignored() {
        let store = Arc::new(LocalStore::in_memory());
        let dev = ledger(&store, "dev");
        dev.ensure().await.unwrap();
        dev.record(&unit("0001_a"), 1).await.unwrap();

        let stray = ledger(&store, "test");
        assert!(stray.applied_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_without_container_fails() {
        let store = Arc::new(LocalStore::in_memory());
        let err = ledger(&store, "dev")
            .record(&unit("0001_a"), 1)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("0001_a"));
    }
}
