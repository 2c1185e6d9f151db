//! Container, partition, query and patch types shared by every store

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// How a container hashes its partition key paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PartitionKind {
    /// One path
    #[default]
    Hash,
    /// Up to three hierarchical paths
    MultiHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionKeyDefinition {
    pub paths: Vec<String>,
    #[serde(default)]
    pub kind: PartitionKind,
}

impl PartitionKeyDefinition {
    pub fn single(path: impl Into<String>) -> Self {
        Self {
            paths: vec![path.into()],
            kind: PartitionKind::Hash,
        }
    }

    pub fn hierarchical<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            kind: PartitionKind::MultiHash,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match (self.kind, self.paths.len()) {
            (_, 0) => {
                return Err(Error::validation(
                    "Partition key needs at least one path",
                ))
            }
            (PartitionKind::Hash, n) if n > 1 => {
                return Err(Error::validation(
                    "Hash partition keys take exactly one path; use MultiHash for more",
                ))
            }
            (PartitionKind::MultiHash, n) if n > 3 => {
                return Err(Error::validation(
                    "MultiHash partition keys take at most three paths",
                ))
            }
            _ => {}
        }

        for path in &self.paths {
            if !path.starts_with('/') || path.len() < 2 {
                return Err(Error::validation(format!(
                    "Partition key path must look like '/field': {}",
                    path
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexingMode {
    #[default]
    Consistent,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPath {
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositePath {
    pub path: String,
    #[serde(default)]
    pub order: SortOrder,
}

/// Container indexing policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingPolicy {
    #[serde(default)]
    pub indexing_mode: IndexingMode,
    #[serde(default = "default_automatic")]
    pub automatic: bool,
    #[serde(default)]
    pub included_paths: Vec<IndexPath>,
    #[serde(default)]
    pub excluded_paths: Vec<IndexPath>,
    #[serde(default)]
    pub composite_indexes: Vec<Vec<CompositePath>>,
}

fn default_automatic() -> bool {
    true
}

impl Default for IndexingPolicy {
    fn default() -> Self {
        Self {
            indexing_mode: IndexingMode::Consistent,
            automatic: true,
            included_paths: vec![IndexPath {
                path: "/*".to_string(),
            }],
            excluded_paths: vec![IndexPath {
                path: "/\"_etag\"/?".to_string(),
            }],
            composite_indexes: Vec::new(),
        }
    }
}

impl IndexingPolicy {
    pub fn include(mut self, path: impl Into<String>) -> Self {
        self.included_paths.push(IndexPath { path: path.into() });
        self
    }

    pub fn exclude(mut self, path: impl Into<String>) -> Self {
        self.excluded_paths.push(IndexPath { path: path.into() });
        self
    }

    pub fn composite<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = (S, SortOrder)>,
        S: Into<String>,
    {
        self.composite_indexes.push(
            paths
                .into_iter()
                .map(|(path, order)| CompositePath {
                    path: path.into(),
                    order,
                })
                .collect(),
        );
        self
    }
}

/// Container (collection) definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDefinition {
    pub name: String,
    pub partition_key: PartitionKeyDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexing_policy: Option<IndexingPolicy>,
    /// Per-record time-to-live in seconds (`-1` = on, no default expiry)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_ttl: Option<i64>,
}

impl ContainerDefinition {
    pub fn new(name: impl Into<String>, partition_key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partition_key: PartitionKeyDefinition::single(partition_key_path),
            indexing_policy: None,
            default_ttl: None,
        }
    }

    pub fn with_partition_key(mut self, partition_key: PartitionKeyDefinition) -> Self {
        self.partition_key = partition_key;
        self
    }

    pub fn with_indexing_policy(mut self, policy: IndexingPolicy) -> Self {
        self.indexing_policy = Some(policy);
        self
    }

    pub fn with_default_ttl(mut self, seconds: i64) -> Self {
        self.default_ttl = Some(seconds);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("Container name cannot be empty"));
        }
        if self.name.contains(['/', '\\', '?', '#']) {
            return Err(Error::validation(format!(
                "Container name contains a reserved character: {}",
                self.name
            )));
        }
        if let Some(ttl) = self.default_ttl {
            if ttl == 0 || ttl < -1 {
                return Err(Error::validation(format!(
                    "Default TTL must be -1 or a positive number of seconds, got {}",
                    ttl
                )));
            }
        }
        self.partition_key.validate()
    }
}

/// Partition key value of one document (one component per key path)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(Vec<Value>);

impl PartitionKey {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Read the key of `document` according to `definition`
    pub fn from_document(definition: &PartitionKeyDefinition, document: &Value) -> Option<Self> {
        definition
            .paths
            .iter()
            .map(|path| document.pointer(path).cloned())
            .collect::<Option<Vec<_>>>()
            .map(Self)
    }

    /// Build a key from a single scalar value
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(_) | Value::Number(_) | Value::Bool(_) | Value::Null => {
                Ok(Self(vec![value.clone()]))
            }
            other => Err(Error::validation(format!(
                "Partition key values must be scalars, got {}",
                other
            ))),
        }
    }
}

impl From<&str> for PartitionKey {
    fn from(value: &str) -> Self {
        Self(vec![Value::String(value.to_string())])
    }
}

impl From<String> for PartitionKey {
    fn from(value: String) -> Self {
        Self(vec![Value::String(value)])
    }
}

impl From<i64> for PartitionKey {
    fn from(value: i64) -> Self {
        Self(vec![Value::from(value)])
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(|v| v.to_string()).collect();
        write!(f, "[{}]", rendered.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParameter {
    pub name: String,
    pub value: Value,
}

/// Parameterized query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    #[serde(default)]
    pub parameters: Vec<QueryParameter>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parameters: Vec::new(),
        }
    }

    /// Bind `@name`; the leading `@` is added when missing
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let name = if name.starts_with('@') {
            name
        } else {
            format!("@{}", name)
        };
        self.parameters.push(QueryParameter {
            name,
            value: value.into(),
        });
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }
}

/// One field-level operation of a partial document update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    /// Create or overwrite a property; inserts into arrays
    Add { path: String, value: Value },
    /// Overwrite an existing property
    Replace { path: String, value: Value },
    /// Delete an existing property
    Remove { path: String },
    /// Create or overwrite a property; overwrites array slots
    Set { path: String, value: Value },
    /// Add a number to a numeric property
    #[serde(rename = "incr")]
    Increment { path: String, value: Value },
}

impl PatchOperation {
    pub fn add(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Add {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn replace(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Replace {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self::Remove { path: path.into() }
    }

    pub fn set(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Set {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn increment(path: impl Into<String>, by: impl Into<Value>) -> Self {
        Self::Increment {
            path: path.into(),
            value: by.into(),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. }
            | Self::Replace { path, .. }
            | Self::Remove { path }
            | Self::Set { path, .. }
            | Self::Increment { path, .. } => path,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Replace { .. } => "replace",
            Self::Remove { .. } => "remove",
            Self::Set { .. } => "set",
            Self::Increment { .. } => "incr",
        }
    }
}
