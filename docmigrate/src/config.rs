//! Environment and runner configuration
//!
//! Environments are described once, in a TOML table compiled into the
//! operator binary:
//!
//! ```toml
//! [environments.dev]
//! subscription_id = "00000000-0000-0000-0000-000000000001"
//! resource_group = "rg-app-dev"
//! account_name = "app-dev"
//! database = "app"
//! secret_store = "https://kv-app-dev.vault.example.net/"
//! ```
//!
//! A runner is handed exactly one resolved [`EnvironmentConfig`]; nothing in
//! this crate keeps a global environment table.

use crate::error::{Error, Result};
use crate::migrations::ledger::RECORD_FIELDS;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;

/// Static description of one target environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Environment name ("dev", "prod", ...)
    #[serde(default)]
    pub name: String,

    /// Cloud subscription / account identifier
    pub subscription_id: String,

    /// Resource group the database account lives in
    pub resource_group: String,

    /// Database account name
    pub account_name: String,

    /// Database inside the account that change units target
    #[serde(default = "default_database")]
    pub database: String,

    /// Location of the secret store holding the connection secret
    pub secret_store: String,
}

impl EnvironmentConfig {
    /// Synthetic environment for local stores and tests
    pub fn local(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            subscription_id: "local".to_string(),
            resource_group: "local".to_string(),
            account_name: format!("{}-local", name),
            database: default_database(),
            secret_store: String::new(),
            name,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self.name.as_str(), "prod" | "production")
    }
}

/// Collaborator that turns an environment name into its configuration
pub trait EnvironmentResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<EnvironmentConfig>;

    /// Names this resolver knows, sorted
    fn names(&self) -> Vec<String>;
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    environments: BTreeMap<String, EnvironmentConfig>,
}

/// Disjoint set of environment configurations
#[derive(Debug, Clone, Default)]
pub struct EnvironmentCatalog {
    environments: BTreeMap<String, EnvironmentConfig>,
}

impl EnvironmentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a catalog from `[environments.<name>]` tables
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: CatalogFile = toml::from_str(content)?;

        let mut catalog = Self::new();
        for (name, mut environment) in file.environments {
            environment.name = name;
            catalog.add(environment)?;
        }

        log::debug!(
            "Loaded environment catalog: {}",
            catalog.names().join(", ")
        );
        Ok(catalog)
    }

    /// Add an environment, rejecting anything that would share resources
    pub fn add(&mut self, environment: EnvironmentConfig) -> Result<()> {
        if environment.name.trim().is_empty() {
            return Err(Error::configuration("Environment name cannot be empty"));
        }
        if self.environments.contains_key(&environment.name) {
            return Err(Error::configuration(format!(
                "Environment '{}' is defined twice",
                environment.name
            )));
        }
        if let Some(other) = self
            .environments
            .values()
            .find(|e| e.account_name == environment.account_name)
        {
            return Err(Error::configuration(format!(
                "Environments '{}' and '{}' share database account '{}'",
                other.name, environment.name, environment.account_name
            )));
        }

        self.environments
            .insert(environment.name.clone(), environment);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.environments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.environments.is_empty()
    }
}

impl EnvironmentResolver for EnvironmentCatalog {
    fn resolve(&self, name: &str) -> Result<EnvironmentConfig> {
        self.environments.get(name).cloned().ok_or_else(|| {
            Error::configuration(format!(
                "Unknown environment '{}' (known: {})",
                name,
                self.names().join(", ")
            ))
        })
    }

    fn names(&self) -> Vec<String> {
        self.environments.keys().cloned().collect()
    }
}

/// Ledger and bookkeeping settings shared by every environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigratorSettings {
    /// Container holding applied-migration records
    #[serde(default = "default_ledger_container")]
    pub ledger_container: String,

    /// Partition key path of the ledger container
    #[serde(default = "default_ledger_partition_key_path")]
    pub ledger_partition_key_path: String,

    /// Logical partition shared by all ledger records
    #[serde(default = "default_ledger_partition_value")]
    pub ledger_partition_value: String,

    /// Prefix of the "applied by" actor, qualified with the environment name
    #[serde(default = "default_actor_prefix")]
    pub actor_prefix: String,
}

fn default_database() -> String {
    "app".to_string()
}
fn default_ledger_container() -> String {
    "_migrations".to_string()
}
fn default_ledger_partition_key_path() -> String {
    "/partitionKey".to_string()
}
fn default_ledger_partition_value() -> String {
    "migrations".to_string()
}
fn default_actor_prefix() -> String {
    "docmigrate".to_string()
}

impl Default for MigratorSettings {
    fn default() -> Self {
        Self {
            ledger_container: default_ledger_container(),
            ledger_partition_key_path: default_ledger_partition_key_path(),
            ledger_partition_value: default_ledger_partition_value(),
            actor_prefix: default_actor_prefix(),
        }
    }
}

impl MigratorSettings {
    /// Defaults with `DOCMIGRATE_*` environment variable overrides applied
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();
        settings.apply_env_overrides()?;
        Ok(settings)
    }

    /// Actor recorded on ledger entries, e.g. `docmigrate@prod`
    pub fn actor_for(&self, environment: &str) -> String {
        format!("{}@{}", self.actor_prefix, environment)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(container) = env::var("DOCMIGRATE_LEDGER_CONTAINER") {
            self.ledger_container = container;
        }
        if let Ok(path) = env::var("DOCMIGRATE_LEDGER_PARTITION_KEY_PATH") {
            self.ledger_partition_key_path = path;
        }
        if let Ok(value) = env::var("DOCMIGRATE_LEDGER_PARTITION_VALUE") {
            self.ledger_partition_value = value;
        }
        if let Ok(actor) = env::var("DOCMIGRATE_ACTOR") {
            self.actor_prefix = actor;
        }

        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.ledger_container.trim().is_empty() {
            return Err(Error::configuration("Ledger container name cannot be empty"));
        }
        if !self.ledger_partition_key_path.starts_with('/')
            || self.ledger_partition_key_path.len() < 2
            || self.ledger_partition_key_path[1..].contains('/')
        {
            return Err(Error::configuration(format!(
                "Ledger partition key path must be a top-level field like '/field': {}",
                self.ledger_partition_key_path
            )));
        }
        let field = &self.ledger_partition_key_path[1..];
        if RECORD_FIELDS.contains(&field) {
            return Err(Error::configuration(format!(
                "Ledger partition key path '{}' collides with a ledger record field ({})",
                self.ledger_partition_key_path,
                RECORD_FIELDS.join(", ")
            )));
        }
        if self.ledger_partition_value.is_empty() {
            return Err(Error::configuration(
                "Ledger partition value cannot be empty",
            ));
        }
        Ok(())
    }
}

/// Per-invocation switches
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Simulate mutations instead of performing them
    pub dry_run: bool,
    /// Mirror run log lines to interactive output
    pub verbose: bool,
    /// Stop after this identifier (inclusive)
    pub target: Option<String>,
}

impl RunOptions {
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
[environments.dev]
subscription_id = "sub-dev"
resource_group = "rg-dev"
account_name = "acct-dev"
database = "app"
secret_store = "https://kv-dev.example.net/"

[environments.prod]
subscription_id = "sub-prod"
resource_group = "rg-prod"
account_name = "acct-prod"
secret_store = "https://kv-prod.example.net/"
"#;

    #[test]
    fn test_catalog_from_toml() {
        let catalog = EnvironmentCatalog::from_toml_str(CATALOG).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.names(), vec!["dev", "prod"]);

        let prod = catalog.resolve("prod").unwrap();
        assert_eq!(prod.name, "prod");
        assert_eq!(prod.account_name, "acct-prod");
        assert_eq!(prod.database, "app");
        assert!(prod.is_production());
        assert!(!catalog.resolve("dev").unwrap().is_production());
    }

    #[test]
    fn test_unknown_environment() {
        let catalog = EnvironmentCatalog::from_toml_str(CATALOG).unwrap();
        let err = catalog.resolve("staging").unwrap_err();
        assert_eq!(err.error_code(), "E_CONFIGURATION");
        assert!(err.to_string().contains("known: dev, prod"));
    }

    #[test]
    fn test_shared_account_rejected() {
        let shared = r#"
[environments.dev]
subscription_id = "s"
resource_group = "rg"
account_name = "same"
secret_store = "kv"

[environments.test]
subscription_id = "s"
resource_group = "rg"
account_name = "same"
secret_store = "kv"
"#;
        let err = EnvironmentCatalog::from_toml_str(shared).unwrap_err();
        assert!(err.to_string().contains("share database account 'same'"));
    }

    #[test]
    fn test_settings_defaults() {
        let settings = MigratorSettings::default();
        assert_eq!(settings.ledger_container, "_migrations");
        assert_eq!(settings.ledger_partition_key_path, "/partitionKey");
        assert_eq!(settings.ledger_partition_value, "migrations");
        assert_eq!(settings.actor_for("prod"), "docmigrate@prod");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_validation() {
        let settings = MigratorSettings {
            ledger_partition_key_path: "partitionKey".to_string(),
            ..MigratorSettings::default()
        };
        assert!(settings.validate().is_err());

        let nested = MigratorSettings {
            ledger_partition_key_path: "/meta/partition".to_string(),
            ..MigratorSettings::default()
        };
        assert!(nested.validate().is_err());
    }

    #[test]
    fn test_partition_path_cannot_shadow_record_fields() {
        for field in RECORD_FIELDS {
            let settings = MigratorSettings {
                ledger_partition_key_path: format!("/{}", field),
                ..MigratorSettings::default()
            };
            let err = settings.validate().unwrap_err();
            assert_eq!(err.error_code(), "E_CONFIGURATION", "accepted /{}", field);
        }

        let custom = MigratorSettings {
            ledger_partition_key_path: "/ledgerPartition".to_string(),
            ..MigratorSettings::default()
        };
        assert!(custom.validate().is_ok());
    }

    #[test]
    fn test_local_environment() {
        let env = EnvironmentConfig::local("ci");
        assert_eq!(env.name, "ci");
        assert_eq!(env.account_name, "ci-local");
        assert_eq!(env.database, "app");
    }

    #[test]
    fn test_run_options_builder() {
        let options = RunOptions::default().dry_run(true).target("0003_seed");
        assert!(options.dry_run);
        assert!(!options.verbose);
        assert_eq!(options.target.as_deref(), Some("0003_seed"));
    }
}
