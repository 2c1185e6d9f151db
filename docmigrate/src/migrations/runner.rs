//! Migration runner
//!
//! Connects to one environment, diffs the registry against the ledger and
//! applies pending units strictly in identifier order. The first failure
//! halts the run; units already applied stay recorded, so a re-run resumes
//! at the unit that failed.

use super::context::bind_context;
use super::ledger::Ledger;
use super::run_log::RunLog;
use super::unit::Registry;
use crate::config::{EnvironmentConfig, MigratorSettings, RunOptions};
use crate::credentials::CredentialSource;
use crate::error::{Error, Result};
use crate::store::{Connection, Connector};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of one attempted unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationResult {
    pub id: String,
    pub description: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl MigrationResult {
    fn succeeded(id: &str, description: &str, duration_ms: u64) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            success: true,
            duration_ms,
            error: None,
        }
    }

    fn failed(id: &str, description: &str, duration_ms: u64, error: String) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            success: false,
            duration_ms,
            error: Some(error),
        }
    }
}

/// Everything one `run_migrations` call attempted, in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub environment: String,
    pub dry_run: bool,
    pub results: Vec<MigrationResult>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }

    /// Units that completed
    pub fn applied(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failure(&self) -> Option<&MigrationResult> {
        self.results.iter().find(|r| !r.success)
    }

    /// The failure as an error, if the run halted
    pub fn error(&self) -> Option<Error> {
        self.failure().map(|failed| {
            Error::unit_execution(
                failed.id.clone(),
                failed.error.clone().unwrap_or_default(),
            )
        })
    }
}

/// Registry identifiers split by ledger state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub environment: String,
    pub applied: Vec<String>,
    pub pending: Vec<String>,
    /// Ledger identifiers the registry does not know
    pub unknown: Vec<String>,
}

impl MigrationStatus {
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }
}

pub struct MigrationRunner {
    environment: EnvironmentConfig,
    settings: MigratorSettings,
    options: RunOptions,
    credentials: Box<dyn CredentialSource>,
    connector: Arc<dyn Connector>,
    connection: Option<Connection>,
    log: RunLog,
}

impl MigrationRunner {
    pub fn new(
        environment: EnvironmentConfig,
        credentials: Box<dyn CredentialSource>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let log = RunLog::new(environment.name.clone(), false);
        Self {
            environment,
            settings: MigratorSettings::default(),
            options: RunOptions::default(),
            credentials,
            connector,
            connection: None,
            log,
        }
    }

    pub fn with_settings(mut self, settings: MigratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.log = RunLog::new(self.environment.name.clone(), options.verbose);
        self.options = options;
        self
    }

    pub fn environment(&self) -> &EnvironmentConfig {
        &self.environment
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Log of everything this runner and its units did
    pub fn log(&self) -> &RunLog {
        &self.log
    }

    pub fn is_initialized(&self) -> bool {
        self.connection.is_some()
    }

    /// Resolve credentials and connect to the environment
    pub async fn initialize(&mut self) -> Result<()> {
        self.settings.validate()?;

        log::debug!(
            "Resolving credentials for '{}' via {}",
            self.environment.name,
            self.credentials.describe()
        );
        let connection_string = self
            .credentials
            .resolve(&self.environment)
            .await
            .map_err(|e| as_connection_error(e, &self.environment))?;

        let connection = self
            .connector
            .connect(&connection_string, &self.environment)
            .await
            .map_err(|e| as_connection_error(e, &self.environment))?;

        if connection.environment() != self.environment.name {
            return Err(Error::connection(format!(
                "Connection is bound to environment '{}', expected '{}'",
                connection.environment(),
                self.environment.name
            )));
        }

        self.log.push(format!(
            "Connected to environment '{}' (database '{}')",
            self.environment.name,
            connection.database()
        ));
        self.connection = Some(connection);
        Ok(())
    }

    fn connection(&self) -> Result<&Connection> {
        self.connection.as_ref().ok_or_else(|| {
            Error::not_initialized(format!(
                "call initialize() before using the runner for '{}'",
                self.environment.name
            ))
        })
    }

    fn ledger(&self) -> Result<Ledger> {
        Ok(Ledger::new(self.connection()?.clone(), self.settings.clone()))
    }

    /// Identifiers recorded as applied
    ///
    /// Provisions the ledger container on first use, except in a dry run.
    pub async fn get_applied_migrations(&self) -> Result<BTreeSet<String>> {
        let ledger = self.ledger()?;
        if self.options.dry_run {
            ledger.peek_applied_ids().await
        } else {
            ledger.applied_ids().await
        }
    }

    /// Apply every pending unit in identifier order, halting on the first failure
    pub async fn run_migrations(&self, registry: &Registry) -> Result<RunReport> {
        let connection = self.connection()?.clone();
        let ledger = self.ledger()?;
        let dry_run = self.options.dry_run;

        if let Some(target) = &self.options.target {
            if !registry.contains(target) {
                return Err(Error::configuration(format!(
                    "Target migration '{}' is not in the registry",
                    target
                )));
            }
        }

        let applied = self.get_applied_migrations().await?;
        let pending: Vec<_> = registry
            .iter()
            .filter(|m| !applied.contains(m.id()))
            .filter(|m| match &self.options.target {
                Some(target) => m.id() <= target.as_str(),
                None => true,
            })
            .collect();

        let mut report = RunReport {
            environment: self.environment.name.clone(),
            dry_run,
            results: Vec::new(),
        };

        if pending.is_empty() {
            self.log.push("No pending migrations");
            return Ok(report);
        }

        self.log.push(format!(
            "{} pending migration(s) for '{}'{}",
            pending.len(),
            self.environment.name,
            if dry_run { " [DRY RUN]" } else { "" }
        ));

        let context = bind_context(
            connection,
            self.environment.clone(),
            self.settings.actor_for(&self.environment.name),
            self.log.clone(),
            dry_run,
        );

        for migration in pending {
            let id = migration.id();
            let description = migration.description();
            self.log.push(format!("Applying {}: {}", id, description));

            let started = Instant::now();
            let outcome = migration.apply(Arc::clone(&context)).await;
            let duration_ms = millis(started.elapsed());

            if let Err(e) = outcome {
                self.log.push(format!(
                    "{} failed after {} ms: {}",
                    id,
                    duration_ms,
                    e.describe()
                ));
                log::error!("Migration {} failed: {}", id, e.describe());
                report.results.push(MigrationResult::failed(
                    id,
                    description,
                    duration_ms,
                    e.describe(),
                ));
                break;
            }

            if !dry_run {
                if let Err(e) = ledger.record(&**migration, duration_ms).await {
                    log::error!(
                        "Migration {} applied but not recorded: {}",
                        id,
                        e.describe()
                    );
                    report.results.push(MigrationResult::failed(
                        id,
                        description,
                        duration_ms,
                        format!("applied, but the ledger write failed: {}", e.describe()),
                    ));
                    break;
                }
            }

            self.log.push(format!("{} completed in {} ms", id, duration_ms));
            report
                .results
                .push(MigrationResult::succeeded(id, description, duration_ms));
        }

        Ok(report)
    }

    /// Split the registry into applied and pending without side effects
    pub async fn get_status(&self, registry: &Registry) -> Result<MigrationStatus> {
        let applied = self.ledger()?.peek_applied_ids().await?;

        let mut status = MigrationStatus {
            environment: self.environment.name.clone(),
            ..MigrationStatus::default()
        };
        for id in registry.ids() {
            if applied.contains(&id) {
                status.applied.push(id);
            } else {
                status.pending.push(id);
            }
        }
        status.unknown = applied
            .into_iter()
            .filter(|id| !registry.contains(id))
            .collect();

        Ok(status)
    }
}

/// Whole milliseconds of `elapsed`, saturating at `u64::MAX`
fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

fn as_connection_error(error: Error, environment: &EnvironmentConfig) -> Error {
    match error.root() {
        Error::Connection(_) => error,
        _ => Error::connection(format!(
            "Failed to connect to environment '{}': {}",
            environment.name, error
        )),
    }
}
