//! Change units and the registry that orders them

use super::context::SharedContext;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// One ordered, idempotent schema or data change
///
/// `apply` must be safe to run again after a crash that happened before its
/// ledger record was written: detect existing state instead of blindly
/// re-inserting.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Sortable identifier, e.g. `0003_seed_plans`
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    async fn apply(&self, context: SharedContext) -> Result<()>;

    /// Reverse the change; most units cannot
    async fn unapply(&self, _context: SharedContext) -> Result<()> {
        Err(Error::unsupported(format!(
            "Migration {} cannot be reversed",
            self.id()
        )))
    }

    fn is_reversible(&self) -> bool {
        false
    }
}

/// Handler invoked with the run's context
pub type MigrationHandler = Arc<dyn Fn(SharedContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Change unit built from closures
#[derive(Clone)]
pub struct FnMigration {
    id: String,
    description: String,
    apply: MigrationHandler,
    unapply: Option<MigrationHandler>,
}

impl FnMigration {
    pub fn new<F, Fut>(id: impl Into<String>, description: impl Into<String>, apply: F) -> Self
    where
        F: Fn(SharedContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            id: id.into(),
            description: description.into(),
            apply: Arc::new(move |ctx| apply(ctx).boxed()),
            unapply: None,
        }
    }

    pub fn with_unapply<F, Fut>(mut self, unapply: F) -> Self
    where
        F: Fn(SharedContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.unapply = Some(Arc::new(move |ctx| unapply(ctx).boxed()));
        self
    }
}

impl fmt::Debug for FnMigration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMigration")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("reversible", &self.unapply.is_some())
            .finish()
    }
}

#[async_trait]
impl Migration for FnMigration {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn apply(&self, context: SharedContext) -> Result<()> {
        (self.apply)(context).await
    }

    async fn unapply(&self, context: SharedContext) -> Result<()> {
        match &self.unapply {
            Some(unapply) => unapply(context).await,
            None => Err(Error::unsupported(format!(
                "Migration {} cannot be reversed",
                self.id
            ))),
        }
    }

    fn is_reversible(&self) -> bool {
        self.unapply.is_some()
    }
}

/// Accepted identifier shape
#[allow(clippy::expect_used)]
static MIGRATION_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9A-Za-z][0-9A-Za-z_.\-]*$").expect("Registry: invalid migration id pattern")
});

/// Complete list of change units, sorted by identifier
#[derive(Clone, Default)]
pub struct Registry {
    migrations: Vec<Arc<dyn Migration>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Validate and sort `migrations`
    pub fn from_migrations(mut migrations: Vec<Arc<dyn Migration>>) -> Result<Self> {
        let mut seen = HashSet::new();
        for migration in &migrations {
            let id = migration.id();
            if !MIGRATION_ID.is_match(id) {
                return Err(Error::invalid_registry(format!(
                    "Malformed migration id '{}': use letters, digits, '_', '-' or '.'",
                    id
                )));
            }
            if !seen.insert(id.to_string()) {
                return Err(Error::invalid_registry(format!(
                    "Duplicate migration id '{}'",
                    id
                )));
            }
        }

        migrations.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(Self { migrations })
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Units in execution order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Migration>> {
        self.migrations.iter()
    }

    pub fn ids(&self) -> Vec<String> {
        self.migrations.iter().map(|m| m.id().to_string()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Migration>> {
        self.migrations
            .binary_search_by(|m| m.id().cmp(id))
            .ok()
            .map(|index| &self.migrations[index])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.ids()).finish()
    }
}

/// Collects change units before validating them into a [`Registry`]
#[derive(Default)]
pub struct RegistryBuilder {
    migrations: Vec<Arc<dyn Migration>>,
}

impl RegistryBuilder {
    /// Define a unit from a closure
    pub fn define<F, Fut>(
        &mut self,
        id: impl Into<String>,
        description: impl Into<String>,
        apply: F,
    ) -> &mut Self
    where
        F: Fn(SharedContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.migrations
            .push(Arc::new(FnMigration::new(id, description, apply)));
        self
    }

    pub fn add(&mut self, migration: impl Migration + 'static) -> &mut Self {
        self.migrations.push(Arc::new(migration));
        self
    }

    pub fn build(&mut self) -> Result<Registry> {
        Registry::from_migrations(std::mem::take(&mut self.migrations))
    }
}
