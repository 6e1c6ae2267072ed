// Shared crate clippy configuration
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Shared infrastructure for the tenlic services: database pool helpers,
//! migrations, and the core domain enums used by both the billing crate and
//! the API server.

pub mod types;

pub use types::{BillingPeriod, LicenseStatus, PlanTier, VerificationStatus};

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// Create the main connection pool used for request-path queries.
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(300))
        .connect(database_url)
        .await
}

/// Create a pool suitable for running migrations: a single connection with a
/// generous timeout, pointed at the direct (non-pooler) URL when one exists.
pub async fn create_migration_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(60))
        .connect(database_url)
        .await
}

/// Run the embedded SQL migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await
}
