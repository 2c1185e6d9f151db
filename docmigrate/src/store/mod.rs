//! Store interfaces consumed by the runner
//!
//! The database is reached through two narrow traits: [`ControlPlane`] for
//! container lifecycle and [`DataPlane`] for document CRUD, query and patch.
//! A [`Connection`] bundles both for exactly one environment. Transport
//! clients for a hosted account live outside this crate and plug in through
//! [`Connector`]; [`LocalStore`] covers local runs and tests.

pub mod local;
pub mod secrets;
pub mod types;

pub use local::{LocalConnector, LocalDatabase, LocalStore};
pub use secrets::{FileSecretStore, StaticSecretStore};
pub use types::{
    CompositePath, ContainerDefinition, IndexPath, IndexingMode, IndexingPolicy, PartitionKey,
    PartitionKeyDefinition, PartitionKind, PatchOperation, Query, QueryParameter, SortOrder,
};

use crate::config::EnvironmentConfig;
use crate::credentials::ConnectionString;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Administrative surface: container lifecycle and indexing policy
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Read a container definition
    ///
    /// # Returns
    /// * `Ok(Some(definition))` - The container exists
    /// * `Ok(None)` - The store answered "not found"
    /// * `Err(Error)` - Any other failure
    async fn read_container(&self, name: &str) -> Result<Option<ContainerDefinition>>;

    /// Create a container; `Error::Conflict` if it already exists
    async fn create_container(&self, definition: &ContainerDefinition) -> Result<()>;

    /// Replace a container definition; `Error::NotFound` if it is missing
    async fn replace_container(&self, definition: &ContainerDefinition) -> Result<()>;
}

/// Document surface: point reads, writes, queries and patches
#[async_trait]
pub trait DataPlane: Send + Sync {
    /// Point read; `Ok(None)` when the document does not exist
    async fn read_item(
        &self,
        container: &str,
        id: &str,
        partition_key: &PartitionKey,
    ) -> Result<Option<Value>>;

    /// Create a document; `Error::Conflict` if id + partition already exist
    async fn create_item(
        &self,
        container: &str,
        partition_key: &PartitionKey,
        item: Value,
    ) -> Result<()>;

    /// Create or overwrite a document
    async fn upsert_item(
        &self,
        container: &str,
        partition_key: &PartitionKey,
        item: Value,
    ) -> Result<()>;

    /// Run a parameterized query and return every matching document
    async fn query_items(&self, container: &str, query: &Query) -> Result<Vec<Value>>;

    /// Apply `operations` in order to one document and return the result
    async fn patch_item(
        &self,
        container: &str,
        id: &str,
        partition_key: &PartitionKey,
        operations: &[PatchOperation],
    ) -> Result<Value>;
}

/// Secret store scoped to one environment
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, name: &str) -> Result<Option<String>>;
}

/// Control and data plane handles bound to one environment's database
#[derive(Clone)]
pub struct Connection {
    environment: String,
    database: String,
    control: Arc<dyn ControlPlane>,
    data: Arc<dyn DataPlane>,
}

impl Connection {
    pub fn new(
        environment: impl Into<String>,
        database: impl Into<String>,
        control: Arc<dyn ControlPlane>,
        data: Arc<dyn DataPlane>,
    ) -> Self {
        Self {
            environment: environment.into(),
            database: database.into(),
            control,
            data,
        }
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn control(&self) -> &Arc<dyn ControlPlane> {
        &self.control
    }

    pub fn data(&self) -> &Arc<dyn DataPlane> {
        &self.data
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("environment", &self.environment)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

/// Opens a [`Connection`] for a resolved connection string
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        connection_string: &ConnectionString,
        environment: &EnvironmentConfig,
    ) -> Result<Connection>;
}
