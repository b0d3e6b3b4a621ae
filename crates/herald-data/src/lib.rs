#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Shared data access layer for Herald: migrations, message persistence, and
//! operator configuration rows.
//!
//! Query helpers are generic over [`sqlx::Executor`] so callers decide the
//! connection scope: a pooled connection, a transaction, or the pool itself.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub mod config;
pub mod error;
pub mod messages;

pub use error::{DataError, Result as DataResult};

/// Upper bound on how long an operation waits for a free connection.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect a `PostgreSQL` pool sized for scoped, per-operation connections.
///
/// # Errors
///
/// Returns an error if the database is unreachable.
pub async fn connect(database_url: &str, max_connections: u32) -> DataResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await
        .map_err(|source| DataError::ConnectFailed { source })
}

/// Apply the embedded schema migrations.
///
/// # Errors
///
/// Returns an error when migration execution fails.
pub async fn run_migrations(pool: &PgPool) -> DataResult<()> {
    let mut migrator = sqlx::migrate!("./migrations");
    migrator.set_ignore_missing(true);
    migrator
        .run(pool)
        .await
        .map_err(|source| DataError::MigrationFailed { source })?;
    tracing::debug!("schema migrations applied");
    Ok(())
}
