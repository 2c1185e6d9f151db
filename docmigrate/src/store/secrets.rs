//! Secret store implementations for local runs and tests

use super::SecretStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// In-memory secret store
#[derive(Debug, Clone, Default)]
pub struct StaticSecretStore {
    secrets: HashMap<String, String>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn get_secret(&self, name: &str) -> Result<Option<String>> {
        Ok(self.secrets.get(name).cloned())
    }
}

/// Secret store backed by a flat TOML file of `name = "value"` pairs
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    path: PathBuf,
    secrets: HashMap<String, String>,
}

impl FileSecretStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            Error::connection(format!(
                "Failed to read secret store {}: {}",
                path.display(),
                e
            ))
        })?;

        let table: toml::Table = toml::from_str(&content).map_err(|e| {
            Error::connection(format!(
                "Failed to parse secret store {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut secrets = HashMap::new();
        for (name, value) in table {
            match value {
                toml::Value::String(secret) => {
                    secrets.insert(name, secret);
                }
                _ => log::warn!(
                    "Ignoring non-string secret '{}' in {}",
                    name,
                    path.display()
                ),
            }
        }

        log::debug!("Opened secret store {} ({} secrets)", path.display(), secrets.len());
        Ok(Self { path, secrets })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get_secret(&self, name: &str) -> Result<Option<String>> {
        Ok(self.secrets.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_static_secret_store() {
        let store = StaticSecretStore::new().with_secret("a", "1");
        assert_eq!(store.get_secret("a").await.unwrap().as_deref(), Some("1"));
        assert!(store.get_secret("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_secret_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secrets.toml");
        std::fs::write(
            &path,
            "database-connection-string = \"AccountEndpoint=memory:dev;\"\nretries = 3\n",
        )
        .unwrap();

        let store = FileSecretStore::open(&path).await.unwrap();
        assert_eq!(
            store
                .get_secret("database-connection-string")
                .await
                .unwrap()
                .as_deref(),
            Some("AccountEndpoint=memory:dev;")
        );
        assert!(store.get_secret("retries").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_secret_store_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = FileSecretStore::open(dir.path().join("nope.toml"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "E_CONNECTION");
    }
}
