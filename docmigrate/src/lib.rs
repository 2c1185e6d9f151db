//! docmigrate - ordered, idempotent migrations for multi-tenant document databases
//!
//! docmigrate applies a strictly ordered list of change units to one named
//! environment:
//! - container creation and indexing-policy updates
//! - record seeding (skip-if-exists or upsert)
//! - targeted document patches
//!
//! Every applied unit is recorded in a ledger container, so a unit runs at
//! most once per environment and a failed run resumes where it stopped.

// No unwrap/expect/panic in library code
#![cfg_attr(
    not(test),
    warn(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
    )
)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used,))]

pub mod config;
pub mod credentials;
pub mod error;
pub mod migrations;
pub mod store;

// Re-export main types for public API
pub use config::{
    EnvironmentCatalog, EnvironmentConfig, EnvironmentResolver, MigratorSettings, RunOptions,
};
pub use credentials::{
    select_source, ConnectionString, CredentialSource, DirectConnection, LocalSecretStoreOpener,
    SecretStoreCredentials, SecretStoreOpener, CONNECTION_SECRET_NAME, CONNECTION_STRING_VAR,
};
pub use error::{Error, ErrorContext, Result};
pub use migrations::{
    ExecutionContext, FnMigration, Migration, MigrationResult, MigrationRunner, MigrationStatus,
    Registry, RunReport, SeedSpec, SharedContext,
};

// Re-export commonly used external types
pub use serde_json::{json, Value};

/// Prelude module for writing change units
pub mod prelude {
    pub use crate::migrations::{ContainerOutcome, SeedOutcome};
    pub use crate::store::{
        ContainerDefinition, IndexingPolicy, PartitionKey, PartitionKeyDefinition, PatchOperation,
        Query,
    };
    pub use crate::*;
}
