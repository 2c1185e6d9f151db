//! Credential resolution
//!
//! A runner never decides on its own where its credentials come from. The
//! caller hands it a [`CredentialSource`]:
//!
//! - [`DirectConnection`]: an explicit connection string, typically taken
//!   from `DOCMIGRATE_CONNECTION_STRING` for emulator and local runs
//! - [`SecretStoreCredentials`]: opens the environment's secret store and
//!   fetches the connection secret by a fixed name
//!
//! [`select_source`] applies the precedence: the override variable wins.

use crate::config::EnvironmentConfig;
use crate::error::{Error, Result};
use crate::store::{FileSecretStore, SecretStore};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use url::Url;

/// Environment variable holding a direct connection string
pub const CONNECTION_STRING_VAR: &str = "DOCMIGRATE_CONNECTION_STRING";

/// Secret name holding the database connection string
pub const CONNECTION_SECRET_NAME: &str = "database-connection-string";

/// Parsed `AccountEndpoint=...;AccountKey=...;` connection string
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    endpoint: Url,
    account_key: Option<String>,
    database: Option<String>,
}

impl ConnectionString {
    /// Parse a connection string
    ///
    /// Accepts the `Key=Value;` form (`AccountEndpoint` required, keys are
    /// case-insensitive) or a bare endpoint URL.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::connection("Connection string is empty"));
        }

        if !raw.contains('=') {
            return Ok(Self {
                endpoint: parse_endpoint(raw)?,
                account_key: None,
                database: None,
            });
        }

        let mut endpoint = None;
        let mut account_key = None;
        let mut database = None;

        for part in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                Error::connection(format!("Malformed connection string segment '{}'", part))
            })?;
            match key.trim().to_ascii_lowercase().as_str() {
                "accountendpoint" => endpoint = Some(parse_endpoint(value.trim())?),
                "accountkey" => account_key = Some(value.trim().to_string()),
                "database" => database = Some(value.trim().to_string()),
                other => log::debug!("Ignoring connection string key '{}'", other),
            }
        }

        let endpoint = endpoint
            .ok_or_else(|| Error::connection("Connection string has no AccountEndpoint"))?;

        Ok(Self {
            endpoint,
            account_key,
            database,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn account_key(&self) -> Option<&str> {
        self.account_key.as_deref()
    }

    /// Database override carried by the connection string
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }
}

fn parse_endpoint(value: &str) -> Result<Url> {
    Url::parse(value)
        .map_err(|e| Error::connection(format!("Invalid account endpoint '{}': {}", value, e)))
}

impl FromStr for ConnectionString {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// The account key never reaches logs
impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountEndpoint={};", self.endpoint)?;
        if self.account_key.is_some() {
            write!(f, "AccountKey=***;")?;
        }
        if let Some(database) = &self.database {
            write!(f, "Database={};", database)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionString({})", self)
    }
}

/// Where a runner gets its connection string from
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Short description for logs
    fn describe(&self) -> String;

    async fn resolve(&self, environment: &EnvironmentConfig) -> Result<ConnectionString>;
}

/// Explicit connection string
#[derive(Clone)]
pub struct DirectConnection {
    raw: String,
}

impl DirectConnection {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// Read `DOCMIGRATE_CONNECTION_STRING`, ignoring empty values
    pub fn from_env() -> Option<Self> {
        std::env::var(CONNECTION_STRING_VAR)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(Self::new)
    }
}

#[async_trait]
impl CredentialSource for DirectConnection {
    fn describe(&self) -> String {
        "direct connection string".to_string()
    }

    async fn resolve(&self, environment: &EnvironmentConfig) -> Result<ConnectionString> {
        log::debug!(
            "Using direct connection string for environment '{}'",
            environment.name
        );
        ConnectionString::parse(&self.raw)
    }
}

/// Opens the secret store of an environment
///
/// Implementations obtain whatever ambient credential their secret store
/// client needs.
#[async_trait]
pub trait SecretStoreOpener: Send + Sync {
    async fn open(&self, environment: &EnvironmentConfig) -> Result<Arc<dyn SecretStore>>;
}

/// Opens file-based secret stores (`/path/secrets.toml` or `file://` URLs)
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSecretStoreOpener;

#[async_trait]
impl SecretStoreOpener for LocalSecretStoreOpener {
    async fn open(&self, environment: &EnvironmentConfig) -> Result<Arc<dyn SecretStore>> {
        let location = environment.secret_store.trim();

        let path = if let Some(stripped) = location.strip_prefix("file://") {
            Url::parse(location)
                .ok()
                .and_then(|url| url.to_file_path().ok())
                .unwrap_or_else(|| stripped.into())
        } else if location.starts_with("https://") || location.starts_with("http://") {
            return Err(Error::connection(format!(
                "No secret store client available for '{}'; set {} to connect directly",
                location, CONNECTION_STRING_VAR
            )));
        } else {
            location.into()
        };

        Ok(Arc::new(FileSecretStore::open(path).await?))
    }
}

/// Connection string fetched from the environment's secret store
pub struct SecretStoreCredentials {
    opener: Arc<dyn SecretStoreOpener>,
    secret_name: String,
}

impl SecretStoreCredentials {
    pub fn new(opener: Arc<dyn SecretStoreOpener>) -> Self {
        Self {
            opener,
            secret_name: CONNECTION_SECRET_NAME.to_string(),
        }
    }

    pub fn with_secret_name(mut self, name: impl Into<String>) -> Self {
        self.secret_name = name.into();
        self
    }
}

#[async_trait]
impl CredentialSource for SecretStoreCredentials {
    fn describe(&self) -> String {
        format!("secret store ({})", self.secret_name)
    }

    async fn resolve(&self, environment: &EnvironmentConfig) -> Result<ConnectionString> {
        let store = self.opener.open(environment).await.map_err(|e| {
            Error::connection(format!(
                "Failed to open secret store '{}' for environment '{}': {}",
                environment.secret_store, environment.name, e
            ))
        })?;

        let secret = store
            .get_secret(&self.secret_name)
            .await?
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                Error::connection(format!(
                    "Secret '{}' not found in secret store '{}'",
                    self.secret_name, environment.secret_store
                ))
            })?;

        ConnectionString::parse(&secret)
    }
}

/// Pick the credential source: direct override first, secret store second
pub fn select_source(opener: Arc<dyn SecretStoreOpener>) -> Box<dyn CredentialSource> {
    match DirectConnection::from_env() {
        Some(direct) => Box::new(direct),
        None => Box::new(SecretStoreCredentials::new(opener)),
    }
}
