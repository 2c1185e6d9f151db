//! Fake execution context for testing change units in isolation

use super::context::{ContainerOutcome, ExecutionContext, SeedOutcome, SeedSpec};
use crate::config::EnvironmentConfig;
use crate::error::Result;
use crate::store::{ContainerDefinition, IndexingPolicy, PartitionKey, PatchOperation, Query};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// One call a change unit made
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    CreateContainer(ContainerDefinition),
    UpdateIndexingPolicy {
        container: String,
        policy: IndexingPolicy,
    },
    SeedData(SeedSpec),
    RunQuery {
        container: String,
        query: Query,
    },
    PatchItem {
        container: String,
        id: String,
        partition_key: PartitionKey,
        operations: Vec<PatchOperation>,
    },
    Log(String),
}

#[derive(Debug, Default)]
struct Recorded {
    calls: Vec<RecordedCall>,
    containers: HashSet<String>,
}

/// Context that records calls instead of performing them
///
/// Containers "exist" once created (or declared with
/// [`with_container`](Self::with_container)); queries answer with canned rows
/// per container.
#[derive(Debug)]
pub struct RecordingContext {
    environment: EnvironmentConfig,
    dry_run: bool,
    query_results: HashMap<String, Vec<Value>>,
    recorded: Mutex<Recorded>,
}

impl RecordingContext {
    pub fn new(environment: impl Into<String>) -> Self {
        Self::with_environment(EnvironmentConfig::local(environment))
    }

    pub fn with_environment(environment: EnvironmentConfig) -> Self {
        Self {
            environment,
            dry_run: false,
            query_results: HashMap::new(),
            recorded: Mutex::new(Recorded::default()),
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_container(self, name: impl Into<String>) -> Self {
        self.guard().containers.insert(name.into());
        self
    }

    /// Rows returned by every query against `container`
    pub fn with_query_result(mut self, container: impl Into<String>, rows: Vec<Value>) -> Self {
        self.query_results.insert(container.into(), rows);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.guard().calls.clone()
    }

    /// Calls other than log lines
    pub fn operations(&self) -> Vec<RecordedCall> {
        self.guard()
            .calls
            .iter()
            .filter(|call| !matches!(call, RecordedCall::Log(_)))
            .cloned()
            .collect()
    }

    /// Logged messages, oldest first
    pub fn messages(&self) -> Vec<String> {
        self.guard()
            .calls
            .iter()
            .filter_map(|call| match call {
                RecordedCall::Log(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: RecordedCall) {
        self.guard().calls.push(call);
    }

    fn guard(&self) -> MutexGuard<'_, Recorded> {
        self.recorded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ExecutionContext for RecordingContext {
    fn environment(&self) -> &EnvironmentConfig {
        &self.environment
    }

    fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn log(&self, message: &str) {
        self.record(RecordedCall::Log(message.to_string()));
    }

    async fn create_container(
        &self,
        definition: &ContainerDefinition,
    ) -> Result<ContainerOutcome> {
        let mut recorded = self.guard();
        recorded
            .calls
            .push(RecordedCall::CreateContainer(definition.clone()));

        if self.dry_run {
            return Ok(ContainerOutcome::WouldCreate);
        }
        if recorded.containers.insert(definition.name.clone()) {
            Ok(ContainerOutcome::Created)
        } else {
            Ok(ContainerOutcome::Existed)
        }
    }

    async fn update_indexing_policy(
        &self,
        container: &str,
        policy: &IndexingPolicy,
    ) -> Result<()> {
        self.record(RecordedCall::UpdateIndexingPolicy {
            container: container.to_string(),
            policy: policy.clone(),
        });
        Ok(())
    }

    async fn seed_data(&self, spec: &SeedSpec) -> Result<SeedOutcome> {
        for record in &spec.records {
            spec.record_id(record)?;
            spec.partition_key(record)?;
        }
        self.record(RecordedCall::SeedData(spec.clone()));

        let count = spec.records.len();
        Ok(if self.dry_run {
            SeedOutcome {
                inserted: 0,
                skipped: count,
            }
        } else {
            SeedOutcome {
                inserted: count,
                skipped: 0,
            }
        })
    }

    async fn run_query(&self, container: &str, query: &Query) -> Result<Vec<Value>> {
        self.record(RecordedCall::RunQuery {
            container: container.to_string(),
            query: query.clone(),
        });
        Ok(self.query_results.get(container).cloned().unwrap_or_default())
    }

    async fn patch_item(
        &self,
        container: &str,
        id: &str,
        partition_key: &PartitionKey,
        operations: &[PatchOperation],
    ) -> Result<()> {
        self.record(RecordedCall::PatchItem {
            container: container.to_string(),
            id: id.to_string(),
            partition_key: partition_key.clone(),
            operations: operations.to_vec(),
        });
        Ok(())
    }
}
