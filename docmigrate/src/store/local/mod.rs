//! Local document store
//!
//! An emulator-grade implementation of [`ControlPlane`] and [`DataPlane`]
//! used for local runs and tests. A [`LocalStore`] plays the part of one
//! database account; [`LocalStore::database`] hands out handles bound to one
//! database inside it. File-backed stores rewrite their JSON file after every
//! mutation.
//!
//! Endpoints understood by [`LocalConnector`]:
//! - `memory:<name>`: process-local, shared by every connect with that name
//! - `file:///path/to/account.json`: persisted to disk

mod patch;
mod query;

use super::types::{ContainerDefinition, PartitionKey, PatchOperation, Query};
use super::{Connection, Connector, ControlPlane, DataPlane};
use crate::config::EnvironmentConfig;
use crate::credentials::ConnectionString;
use crate::error::{Error, ErrorContext, Result};
use async_trait::async_trait;
use query::LocalQuery;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use url::Url;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AccountState {
    #[serde(default)]
    databases: BTreeMap<String, DatabaseState>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DatabaseState {
    #[serde(default)]
    containers: BTreeMap<String, ContainerState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContainerState {
    definition: ContainerDefinition,
    #[serde(default)]
    items: BTreeMap<String, Value>,
}

fn item_key(partition_key: &PartitionKey, id: &str) -> String {
    format!("{}:{}", partition_key, id)
}

fn document_id(item: &Value) -> Result<&str> {
    item.get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::validation("Documents must carry a non-empty string 'id'"))
}

/// One local database account
#[derive(Debug)]
pub struct LocalStore {
    state: RwLock<AccountState>,
    path: Option<PathBuf>,
}

impl LocalStore {
    /// Create an empty store that lives only in this process
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(AccountState::default()),
            path: None,
        }
    }

    /// Open (or start) a store persisted at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let state = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => AccountState::default(),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(Error::from)
                .with_context(|| format!("Failed to parse local store {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("Local store {} does not exist yet", path.display());
                AccountState::default()
            }
            Err(e) => {
                return Err(Error::connection(format!(
                    "Failed to read local store {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        Ok(Self {
            state: RwLock::new(state),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Handle bound to database `name`
    pub fn database(self: &Arc<Self>, name: impl Into<String>) -> LocalDatabase {
        LocalDatabase {
            store: Arc::clone(self),
            name: name.into(),
        }
    }

    /// Full account state as JSON, for comparisons in tests and diagnostics
    pub async fn snapshot(&self) -> Value {
        let state = self.state.read().await;
        serde_json::to_value(&*state).unwrap_or(Value::Null)
    }

    /// Container names of `database`
    pub async fn container_names(&self, database: &str) -> Vec<String> {
        let state = self.state.read().await;
        state
            .databases
            .get(database)
            .map(|db| db.containers.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Apply `change` and persist the result
    ///
    /// In-memory state is replaced only after the file write succeeded, so a
    /// failed write leaves the store as it was.
    async fn commit<T>(
        &self,
        change: impl FnOnce(&mut AccountState) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.write().await;
        if self.path.is_none() {
            return change(&mut *state);
        }

        let mut next = state.clone();
        let output = change(&mut next)?;
        self.persist(&next).await?;
        *state = next;
        Ok(output)
    }

    async fn persist(&self, state: &AccountState) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = serde_json::to_vec_pretty(state)?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

/// Handle on one database of a [`LocalStore`]
#[derive(Debug, Clone)]
pub struct LocalDatabase {
    store: Arc<LocalStore>,
    name: String,
}

impl LocalDatabase {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    fn container<'s>(&self, state: &'s AccountState, container: &str) -> Result<&'s ContainerState> {
        state
            .databases
            .get(&self.name)
            .and_then(|db| db.containers.get(container))
            .ok_or_else(|| self.missing(container))
    }

    fn container_mut<'s>(
        &self,
        state: &'s mut AccountState,
        container: &str,
    ) -> Result<&'s mut ContainerState> {
        let missing = self.missing(container);
        state
            .databases
            .get_mut(&self.name)
            .and_then(|db| db.containers.get_mut(container))
            .ok_or(missing)
    }

    fn missing(&self, container: &str) -> Error {
        Error::not_found(format!("container {}/{}", self.name, container))
    }
}

#[async_trait]
impl ControlPlane for LocalDatabase {
    async fn read_container(&self, name: &str) -> Result<Option<ContainerDefinition>> {
        let state = self.store.state.read().await;
        Ok(self
            .container(&state, name)
            .ok()
            .map(|container| container.definition.clone()))
    }

    async fn create_container(&self, definition: &ContainerDefinition) -> Result<()> {
        definition.validate()?;

        self.store
            .commit(|state| {
                let database = state.databases.entry(self.name.clone()).or_default();
                if database.containers.contains_key(&definition.name) {
                    return Err(Error::conflict(format!(
                        "container {}/{} already exists",
                        self.name, definition.name
                    )));
                }

                database.containers.insert(
                    definition.name.clone(),
                    ContainerState {
                        definition: definition.clone(),
                        items: BTreeMap::new(),
                    },
                );
                Ok(())
            })
            .await
    }

    async fn replace_container(&self, definition: &ContainerDefinition) -> Result<()> {
        definition.validate()?;

        self.store
            .commit(|state| {
                let container = self.container_mut(state, &definition.name)?;
                if container.definition.partition_key != definition.partition_key {
                    return Err(Error::provisioning(format!(
                        "Partition key of container {} cannot be changed",
                        definition.name
                    )));
                }
                container.definition = definition.clone();
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl DataPlane for LocalDatabase {
    async fn read_item(
        &self,
        container: &str,
        id: &str,
        partition_key: &PartitionKey,
    ) -> Result<Option<Value>> {
        let state = self.store.state.read().await;
        let container = self.container(&state, container)?;
        Ok(container.items.get(&item_key(partition_key, id)).cloned())
    }

    async fn create_item(
        &self,
        container: &str,
        partition_key: &PartitionKey,
        item: Value,
    ) -> Result<()> {
        let key = item_key(partition_key, document_id(&item)?);

        self.store
            .commit(|state| {
                let target = self.container_mut(state, container)?;
                if target.items.contains_key(&key) {
                    return Err(Error::conflict(format!(
                        "document {} already exists in {}",
                        key, container
                    )));
                }
                target.items.insert(key, item);
                Ok(())
            })
            .await
    }

    async fn upsert_item(
        &self,
        container: &str,
        partition_key: &PartitionKey,
        item: Value,
    ) -> Result<()> {
        let key = item_key(partition_key, document_id(&item)?);

        self.store
            .commit(|state| {
                self.container_mut(state, container)?
                    .items
                    .insert(key, item);
                Ok(())
            })
            .await
    }

    async fn query_items(&self, container: &str, query: &Query) -> Result<Vec<Value>> {
        let parsed = LocalQuery::parse(query)?;

        let state = self.store.state.read().await;
        let container = self.container(&state, container)?;
        Ok(container
            .items
            .values()
            .filter(|doc| parsed.matches(doc))
            .filter_map(|doc| parsed.project(doc))
            .collect())
    }

    async fn patch_item(
        &self,
        container: &str,
        id: &str,
        partition_key: &PartitionKey,
        operations: &[PatchOperation],
    ) -> Result<Value> {
        let key = item_key(partition_key, id);

        self.store
            .commit(|state| {
                let target = self.container_mut(state, container)?;
                let current = target.items.get(&key).ok_or_else(|| {
                    Error::not_found(format!("document {} in {}", key, container))
                })?;

                let patched = patch::apply_patch(current, operations)?;
                target.items.insert(key, patched.clone());
                Ok(patched)
            })
            .await
    }
}

/// Connector for `memory:` and `file://` endpoints
///
/// Stores are cached per endpoint, so every connection made through one
/// connector to the same endpoint observes the same state.
#[derive(Debug, Default)]
pub struct LocalConnector {
    stores: Mutex<HashMap<String, Arc<LocalStore>>>,
}

impl LocalConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store behind `endpoint`, opening it on first use
    pub async fn store_for(&self, endpoint: &Url) -> Result<Arc<LocalStore>> {
        let mut stores = self.stores.lock().await;
        if let Some(store) = stores.get(endpoint.as_str()) {
            return Ok(Arc::clone(store));
        }

        let store = match endpoint.scheme() {
            "memory" => LocalStore::in_memory(),
            "file" => {
                let path = endpoint.to_file_path().map_err(|_| {
                    Error::connection(format!("Invalid file endpoint '{}'", endpoint))
                })?;
                LocalStore::open(path).await?
            }
            scheme => {
                return Err(Error::connection(format!(
                    "No transport available for '{}' endpoints; only memory: and file:// are handled locally",
                    scheme
                )))
            }
        };

        let store = Arc::new(store);
        stores.insert(endpoint.to_string(), Arc::clone(&store));
        Ok(store)
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(
        &self,
        connection_string: &ConnectionString,
        environment: &EnvironmentConfig,
    ) -> Result<Connection> {
        let store = self.store_for(connection_string.endpoint()).await?;
        let database = connection_string
            .database()
            .unwrap_or(&environment.database)
            .to_string();

        log::debug!(
            "Connected to local store {} (database '{}', environment '{}')",
            connection_string.endpoint(),
            database,
            environment.name
        );

        let handle = Arc::new(store.database(database.clone()));
        Ok(Connection::new(
            environment.name.clone(),
            database,
            handle.clone(),
            handle,
        ))
    }
}
