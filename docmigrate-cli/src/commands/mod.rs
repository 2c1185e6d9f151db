pub mod apply;
pub mod status;

use anyhow::{Context, Result};
use docmigrate::store::LocalConnector;
use docmigrate::{
    select_source, EnvironmentCatalog, EnvironmentResolver, LocalSecretStoreOpener,
    MigrationRunner, MigratorSettings, RunOptions,
};
use std::sync::Arc;

/// Environment table compiled into the binary
const ENVIRONMENTS: &str = include_str!("../../environments.toml");

pub fn catalog() -> Result<EnvironmentCatalog> {
    EnvironmentCatalog::from_toml_str(ENVIRONMENTS).context("Invalid built-in environment table")
}

/// Resolve `environment`, pick credentials and connect
pub async fn connect(environment: &str, options: RunOptions) -> Result<MigrationRunner> {
    let environment = catalog()?.resolve(environment)?;
    let settings = MigratorSettings::from_env()?;
    let credentials = select_source(Arc::new(LocalSecretStoreOpener));

    log::info!(
        "Environment '{}' (account {}, resource group {}), credentials from {}",
        environment.name,
        environment.account_name,
        environment.resource_group,
        credentials.describe()
    );

    let mut runner = MigrationRunner::new(environment, credentials, Arc::new(LocalConnector::new()))
        .with_settings(settings)
        .with_options(options);
    runner
        .initialize()
        .await
        .with_context(|| format!("Failed to initialize runner for '{}'", runner.environment().name))?;
    Ok(runner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_is_valid() {
        let catalog = catalog().unwrap();
        assert_eq!(catalog.names(), vec!["dev", "prod", "staging"]);
        assert!(catalog.resolve("prod").unwrap().is_production());
    }
}
